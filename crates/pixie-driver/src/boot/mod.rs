//! Module boot
//!
//! Three independent download protocols bring a module from power-on to
//! run-ready:
//!
//! - FPGA configuration: communications FPGA, then both signal-processing pairs
//! - [`dsp`]: processor program, parsed into tagged segments
//! - parameter block written to processor data memory
//!
//! [`boot_modules`] runs the stages a [`BootPattern`] selects, stage by
//! stage across the target modules. A failing stage stops the boot; stages
//! already completed stay recorded in each module's [`BootState`].

pub mod dsp;
pub mod firmware;
mod fpga;

use crate::error::{Operation, PixieError, Result};
use crate::module::ModuleHandle;
use dsp::DspProgram;
use firmware::{DspParameters, FirmwareImage};
use pixie_chip::dsp::{DATA_MEMORY_ADDRESS, DSP_IO_BORDER};
use pixie_chip::firmware::FirmwareTarget;
use std::fmt;
use std::path::PathBuf;
use tracing::{debug, info};

/// Bit mask selecting boot stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BootPattern(u16);

impl BootPattern {
    /// Communications FPGA.
    pub const COMM_FPGA: Self = Self(1 << 0);
    /// Trigger FPGA. Present on no supported revision; accepted and skipped.
    pub const TRIGGER_FPGA: Self = Self(1 << 1);
    /// Signal-processing FPGAs.
    pub const SP_FPGA: Self = Self(1 << 2);
    /// Processor program.
    pub const DSP_CODE: Self = Self(1 << 3);
    /// Processor parameter block.
    pub const DSP_PARAMETERS: Self = Self(1 << 4);
    /// Program the signal-processing FPGA from parameters. Not handled here.
    pub const PROGRAM_FIPPI: Self = Self(1 << 5);
    /// Set the offset DACs. Not handled here.
    pub const SET_DACS: Self = Self(1 << 6);
    /// Every stage.
    pub const FULL: Self = Self(0x7F);

    /// Pattern from raw bits.
    #[must_use]
    pub const fn from_bits(bits: u16) -> Self {
        Self(bits)
    }

    /// Raw bits.
    #[must_use]
    pub const fn bits(self) -> u16 {
        self.0
    }

    /// True if every bit of `other` is set.
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Stages requested that this stack leaves to the parameter layer.
    #[must_use]
    pub const fn unhandled(self) -> Self {
        Self(self.0 & (Self::TRIGGER_FPGA.0 | Self::PROGRAM_FIPPI.0 | Self::SET_DACS.0))
    }
}

impl std::ops::BitOr for BootPattern {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Display for BootPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#04x}", self.0)
    }
}

/// Firmware file locations.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BootFiles {
    /// Communications FPGA bitstream.
    pub comm_fpga: PathBuf,
    /// Signal-processing FPGA bitstream.
    pub sp_fpga: PathBuf,
    /// Processor program.
    pub dsp_code: PathBuf,
    /// Processor parameter file.
    pub dsp_parameters: PathBuf,
}

/// Boot stages a module has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootState {
    /// Communications FPGA configured.
    pub comm_fpga: bool,
    /// Signal-processing FPGAs configured.
    pub sp_fpga: bool,
    /// Processor program running.
    pub dsp: bool,
    /// Parameter block downloaded.
    pub dsp_parameters: bool,
}

impl BootState {
    /// True once every hardware stage is done.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.comm_fpga && self.sp_fpga && self.dsp && self.dsp_parameters
    }
}

impl ModuleHandle {
    /// Write this module's parameter block to processor data memory.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndex` if the file has no block for this module,
    /// otherwise propagates memory write failures.
    pub fn load_dsp_parameters(&mut self, parameters: &DspParameters) -> Result<()> {
        let block = parameters.block(self.number())?;
        self.dsp_write(DATA_MEMORY_ADDRESS, &block[..DSP_IO_BORDER])?;
        self.boot.dsp_parameters = true;
        Ok(())
    }

    /// Boot this module alone.
    ///
    /// # Errors
    ///
    /// See [`boot_modules`].
    pub fn boot(&mut self, files: &BootFiles, pattern: BootPattern) -> Result<()> {
        boot_modules(std::slice::from_mut(self), files, pattern)
    }
}

fn each(modules: &mut [ModuleHandle], status: i32, mut stage: impl FnMut(&mut ModuleHandle) -> Result<()>) -> Result<()> {
    for module in modules.iter_mut() {
        stage(module).map_err(|e| {
            tracing::error!("module {} boot stage failed: {e}", module.number());
            e.within(Operation::BootModule, status)
        })?;
    }
    Ok(())
}

/// Run the stages `pattern` selects on every module in `modules`.
///
/// Bitstream sizes are validated against the first module's revision; all
/// modules booted together must share it. Offline modules skip the
/// hardware stages without reading their files.
///
/// # Errors
///
/// File and size failures carry their own status. A failing hardware stage
/// is reported as status -25 (communications FPGA), -26 (signal-processing
/// FPGA) or -27 (processor), with the stage's error as detail.
pub fn boot_modules(modules: &mut [ModuleHandle], files: &BootFiles, pattern: BootPattern) -> Result<()> {
    let Some(first) = modules.first() else {
        return Err(PixieError::invalid_argument("no modules to boot"));
    };
    let revision = first.info().revision;
    let online = modules.iter().any(|m| !m.is_offline());
    debug!("Booting {} module(s) with pattern {pattern}", modules.len());

    if pattern.contains(BootPattern::COMM_FPGA) && online {
        let image = FirmwareImage::load(FirmwareTarget::CommFpga, revision, &files.comm_fpga)?;
        each(modules, -25, |m| m.boot_comm_fpga(&image))?;
    }

    if pattern.contains(BootPattern::SP_FPGA) && online {
        let image = FirmwareImage::load(FirmwareTarget::SpFpga, revision, &files.sp_fpga)?;
        each(modules, -26, |m| m.boot_sp_fpga(&image))?;
    }

    if pattern.contains(BootPattern::DSP_CODE) && online {
        let program = DspProgram::load(&files.dsp_code)?;
        each(modules, -27, |m| m.boot_dsp(&program))?;
    }

    if pattern.contains(BootPattern::DSP_PARAMETERS) {
        let parameters = DspParameters::load(&files.dsp_parameters)?;
        for module in modules.iter_mut() {
            module.load_dsp_parameters(&parameters)?;
        }
    }

    let unhandled = pattern.unhandled();
    if unhandled.bits() != 0 {
        debug!("Boot stages {unhandled} left to the parameter layer");
    }

    info!("Boot pattern {pattern} complete on {} module(s)", modules.len());
    Ok(())
}
