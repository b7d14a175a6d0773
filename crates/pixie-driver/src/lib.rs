//! Communication and boot protocol stack for Pixie-16 PXI pulse-processing
//! modules.
//!
//! Each module sits behind a PLX 9054 PCI bridge. This crate turns the
//! bridge's register window into a small set of synchronous operations:
//! register and CSR access, the bit-banged serial bus to the onboard
//! EEPROM and slot expander, processor memory access under the host bus
//! request handshake, block DMA from the module FIFOs, external memory
//! access, and the FPGA and processor boot protocols.
//!
//! # Layering
//!
//! ```text
//! System             slot map -> ModuleHandle per module, owns all resources
//!   discovery        survey bridges, read slots, open matched bridges
//!   boot             comm FPGA -> SP FPGAs -> DSP program -> DSP parameters
//!   hbr / dma        processor memory, bursts with guaranteed channel close
//!   fifo / extmem    acquisition readout, histogram memory
//!   serial           EEPROM and slot expander over two register bits
//!   csr / bus        RegisterBus: mmap'd BAR 2, or MockBus in tests
//! PlxLibrary         SysfsPlx on a host, MockPlx in tests
//! ```
//!
//! # Quick start
//!
//! ```no_run
//! use pixie_driver::prelude::*;
//!
//! # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//! let mut system = System::init_sysfs(&[2, 3], SystemConfig::from_env())?;
//! for module in system.modules() {
//!     println!("module {} in slot {}: {}", module.number(), module.slot(), module.info());
//! }
//!
//! let files = BootFiles {
//!     comm_fpga: "firmware/syspixie16.bin".into(),
//!     sp_fpga: "firmware/fippixie16.bin".into(),
//!     dsp_code: "dsp/Pixie16DSP.ldr".into(),
//!     dsp_parameters: "configuration/default.set".into(),
//! };
//! let all = system.module_count();
//! system.boot_module(all, &files, BootPattern::FULL)?;
//!
//! let mut words = vec![0u32; 1024];
//! system.module_mut(0)?.drain_fifo(&mut words)?;
//! system.exit()?;
//! # Ok(())
//! # }
//! ```
//!
//! # Offline mode
//!
//! With [`SystemConfig::offline`] set (or `PIXIE_OFFLINE=1` through
//! [`SystemConfig::from_env`]) no bridge is ever touched: hardware
//! operations succeed immediately, caller buffers are left untouched,
//! single register reads return zero, and module identity
//! comes from [`ModuleInfo::offline`].

#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::doc_markdown)]

pub mod backends;
pub mod boot;
mod bus;
mod config;
pub mod csr;
mod discovery;
mod dma;
mod error;
mod extmem;
mod fifo;
pub mod hbr;
mod identity;
pub mod mock;
mod module;
pub mod plx;
pub mod retry;
pub mod serial;
mod system;
pub mod timing;

pub use boot::dsp::{DspProgram, ProgramSegment};
pub use boot::firmware::{DspParameters, FirmwareImage};
pub use boot::{boot_modules, BootFiles, BootPattern, BootState};
pub use bus::RegisterBus;
pub use config::{DelaySource, ProtocolConfig, SystemConfig, OFFLINE_ENV};
pub use discovery::{survey, Bridge};
pub use error::{ErrorKind, Operation, PixieError, Result};
pub use identity::{AdcInfo, ModuleInfo};
pub use module::{IoDirection, ModuleHandle};
pub use plx::{PlxDevice, PlxLibrary};
pub use system::System;
pub use timing::{CalibratedDelay, Delay, NoDelay};

/// Hardware model (re-exported from pixie-chip).
pub use pixie_chip as chip;

/// Commonly used types.
pub mod prelude {
    pub use crate::{
        BootFiles, BootPattern, BootState, DspParameters, DspProgram, ErrorKind, FirmwareImage, IoDirection,
        ModuleHandle, ModuleInfo, PixieError, ProtocolConfig, RegisterBus, Result, System, SystemConfig,
    };
}
