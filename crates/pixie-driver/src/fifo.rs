//! External FIFO readout
//!
//! The list-mode FIFO fills from the processor side. The host reads its
//! level from the watermark register and drains a fixed word count by
//! burst once the level covers the request.

use crate::dma::{BurstCodes, Watermark};
use crate::error::{PixieError, Result};
use crate::module::{ModuleHandle, Port};
use pixie_chip::regs::{local, RD_WRT_FIFO_WML, SET_EXT_FIFO};

impl Port<'_> {
    pub(crate) fn drain_fifo(&mut self, out: &mut [u32]) -> Result<()> {
        let words = u32::try_from(out.len())
            .map_err(|_| PixieError::invalid_argument(format!("{} words exceed the FIFO", out.len())))?;
        self.burst(
            BurstCodes::FIFO,
            local::EXT_FIFO,
            out,
            Some((SET_EXT_FIFO, words)),
            Watermark::Level(words),
        )
    }
}

impl ModuleHandle {
    /// Words currently held in the external FIFO. Offline modules report zero.
    ///
    /// # Errors
    ///
    /// Returns error if the module is closed.
    pub fn fifo_status(&self) -> Result<u32> {
        self.read_register(RD_WRT_FIFO_WML)
    }

    /// Drain exactly `out.len()` words from the external FIFO.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolTimeout` (status -2) if the FIFO never holds enough
    /// words, `ResourceFailure` for channel open (-1), transfer (-3) or close
    /// (-4) failures.
    pub fn drain_fifo(&mut self, out: &mut [u32]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        match self.port()? {
            Some(mut port) => port.drain_fifo(out),
            None => Ok(()),
        }
    }
}
