//! FPGA configuration download
//!
//! Each FPGA group is configured with the same cycle: drive PROGRAM* low
//! then high through the control port, wait for INIT, stream the bitstream
//! through the data port, then check DONE. A cycle that misses INIT or
//! DONE is repeated from the clear, up to
//! [`fpga_attempts`](crate::config::ProtocolConfig::fpga_attempts) times.

use crate::error::{Operation, PixieError, Result};
use crate::module::{ModuleHandle, Port};
use crate::retry::{self, Attempt};
use pixie_chip::csr::cfg::{self, FpgaPattern};
use pixie_chip::firmware::FirmwareTarget;
use pixie_chip::regs::{CFG_CTRLCS, CFG_DATACS, CFG_DCMRST, CFG_RDCS};
use tracing::{debug, info, warn};

use super::firmware::FirmwareImage;

const INIT_PHASE: &str = "INIT poll";
const DONE_PHASE: &str = "DONE check";

impl Port<'_> {
    /// Run clear/program/verify cycles for one FPGA group.
    fn configure_fpga(&self, pattern: &FpgaPattern, words: &[u32], operation: Operation) -> Result<()> {
        let attempts = self.config.fpga_attempts;
        let mut failed_phase = INIT_PHASE;

        let outcome = retry::bounded(attempts, |attempt| -> Result<Attempt<u32>> {
            self.strobe_program(pattern)?;
            if !self.wait_init(pattern)? {
                debug!("module {}: {} INIT not set, attempt {}", self.number, pattern.target, attempt + 1);
                failed_phase = INIT_PHASE;
                return Ok(Attempt::Retry);
            }

            for &word in words {
                self.bus.write(CFG_DATACS, word)?;
                self.delay.wait_ns(self.config.fpga_word_delay_ns);
            }

            let status = self.bus.read(CFG_RDCS)?;
            if status & pattern.done_mask == pattern.done_mask {
                Ok(Attempt::Success(attempt))
            } else {
                debug!(
                    "module {}: {} DONE not set (status {status:#x}), attempt {}",
                    self.number,
                    pattern.target,
                    attempt + 1
                );
                failed_phase = DONE_PHASE;
                Ok(Attempt::Retry)
            }
        })?;

        match outcome {
            Attempt::Success(retries) => {
                if retries > 0 {
                    warn!("module {}: {} configured after {retries} retries", self.number, pattern.target);
                }
                info!("module {}: {} configured", self.number, pattern.target);
                Ok(())
            }
            Attempt::Retry | Attempt::TimedOut => {
                let status = if failed_phase == INIT_PHASE { -2 } else { -3 };
                Err(PixieError::timeout(operation, failed_phase, attempts, status))
            }
        }
    }

    /// PROGRAM* low, then high, keeping the upper status bits.
    fn strobe_program(&self, pattern: &FpgaPattern) -> Result<()> {
        let clear = (self.bus.read(CFG_RDCS)? & cfg::KEEP_MASK) | pattern.clear;
        self.bus.write(CFG_CTRLCS, clear)?;

        let base = if pattern.reread_before_program {
            self.bus.read(CFG_RDCS)?
        } else {
            clear
        };
        self.bus.write(CFG_CTRLCS, (base & cfg::KEEP_MASK) | pattern.program)?;
        self.delay.wait_us(self.config.fpga_init_poll_interval_us);
        Ok(())
    }

    fn wait_init(&self, pattern: &FpgaPattern) -> Result<bool> {
        let polls = self.config.fpga_init_polls;
        for poll in 0..polls {
            if self.bus.read(CFG_RDCS)? & pattern.init_mask == pattern.init_mask {
                return Ok(true);
            }
            if poll + 1 < polls {
                self.delay.wait_us(self.config.fpga_init_poll_interval_us);
            }
        }
        Ok(false)
    }

    pub(crate) fn boot_comm_fpga(&self, words: &[u32]) -> Result<()> {
        self.configure_fpga(&cfg::COMM, words, Operation::CommFpgaBoot)
    }

    /// Both signal-processing pairs take the same image, then the clock
    /// managers are reset.
    pub(crate) fn boot_sp_fpga(&self, words: &[u32]) -> Result<()> {
        self.configure_fpga(&cfg::SP_PAIR_A, words, Operation::SpFpgaBoot)?;
        self.configure_fpga(&cfg::SP_PAIR_B, words, Operation::SpFpgaBoot)?;
        self.delay.sleep_ms(self.config.dcm_reset_settle_ms);
        self.bus.write(CFG_DCMRST, 0)
    }
}

fn check_target(image: &FirmwareImage, expected: FirmwareTarget) -> Result<()> {
    if image.target() == expected {
        Ok(())
    } else {
        Err(PixieError::invalid_argument(format!(
            "{} image passed where a {expected} image is required",
            image.target()
        )))
    }
}

impl ModuleHandle {
    /// Configure the communications FPGA.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an image built for another chip, and
    /// `ProtocolTimeout` once every cycle has missed INIT (status -2) or
    /// DONE (status -3).
    pub fn boot_comm_fpga(&mut self, image: &FirmwareImage) -> Result<()> {
        check_target(image, FirmwareTarget::CommFpga)?;
        if let Some(port) = self.port()? {
            port.boot_comm_fpga(image.words())?;
        }
        self.boot.comm_fpga = true;
        Ok(())
    }

    /// Configure both signal-processing FPGA pairs.
    ///
    /// # Errors
    ///
    /// As [`boot_comm_fpga`](Self::boot_comm_fpga).
    pub fn boot_sp_fpga(&mut self, image: &FirmwareImage) -> Result<()> {
        check_target(image, FirmwareTarget::SpFpga)?;
        if let Some(port) = self.port()? {
            port.boot_sp_fpga(image.words())?;
        }
        self.boot.sp_fpga = true;
        Ok(())
    }
}
