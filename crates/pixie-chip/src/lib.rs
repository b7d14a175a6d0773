//! Hardware model of the Pixie-16 digital pulse-processing module.
//!
//! This crate has **no dependencies** and **no hardware access**. It is a
//! pure description of what the host sees through the PCI bridge: the
//! register window, CSR bits, FPGA configuration patterns, the onboard
//! processor's boot-stream tags, serial-bus devices and firmware sizing.
//!
//! # Crate organisation
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`pci`] | PLX 9054 vendor/device IDs, register BAR, system limits |
//! | [`regs`] | Register window map with access directions |
//! | [`csr`] | CSR bits, FPGA configuration-port patterns |
//! | [`dsp`] | Processor registers, data-memory addresses, boot-stream tags |
//! | [`serial`] | Serial-bus lines, device selects, timing profiles |
//! | [`firmware`] | Hardware revisions and expected image sizes |

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod csr;
pub mod dsp;
pub mod firmware;
pub mod pci;
pub mod regs;
pub mod serial;
