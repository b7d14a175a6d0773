//! External memory access
//!
//! The host owns external memory while PCIACTIVE is set in the CSR. Writes
//! stream through the data window one word at a time; reads load the
//! memory FIFO and drain it by burst. A hardware clear runs in the
//! background and is polled until the clear-active bit drops.

use crate::csr::{self, CsrBitGuard};
use crate::dma::{BurstCodes, Watermark};
use crate::error::{Operation, PixieError, Result};
use crate::module::{IoDirection, ModuleHandle, Port};
use pixie_chip::csr::CLREXTMEM_ACTIVE;
use pixie_chip::regs::{local, EXT_MEM_DATA, SET_EXMEM_FIFO, WRT_CLR_EXTMEM, WRT_EXT_MEM};

impl Port<'_> {
    pub(crate) fn external_memory_write(&self, address: u32, words: &[u32]) -> Result<()> {
        let _owner = CsrBitGuard::pci_active(self.bus)?;
        self.bus.write(WRT_EXT_MEM, address)?;
        for &word in words {
            self.bus.write(EXT_MEM_DATA, word)?;
        }
        Ok(())
    }

    pub(crate) fn external_memory_read(&mut self, address: u32, out: &mut [u32]) -> Result<()> {
        let _owner = CsrBitGuard::pci_active(self.bus)?;
        self.bus.write(WRT_EXT_MEM, address)?;
        self.bus.write(SET_EXMEM_FIFO, 0)?;
        self.burst(BurstCodes::EXTERNAL_MEMORY, local::EXT_MEM, out, None, Watermark::Immediate)
    }

    pub(crate) fn clear_external_memory(&self, address: u32, words: u32) -> Result<()> {
        let _owner = CsrBitGuard::pci_active(self.bus)?;
        self.bus.write(WRT_EXT_MEM, address)?;
        self.bus.write(WRT_CLR_EXTMEM, words)?;

        let polls = self.config.clear_polls;
        for _ in 0..polls {
            self.delay.wait_us(self.config.clear_poll_interval_us);
            if csr::read(self.bus)? & CLREXTMEM_ACTIVE == 0 {
                return Ok(());
            }
        }
        Err(PixieError::timeout(Operation::ExternalMemoryClear, "clear-active poll", polls, -1))
    }
}

impl ModuleHandle {
    /// Move words between the host and external memory.
    ///
    /// Offline modules leave `data` untouched.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` for channel open (-1), transfer (-2) or
    /// close (-3) failures on reads.
    pub fn external_memory_io(&mut self, address: u32, data: &mut [u32], direction: IoDirection) -> Result<()> {
        match direction {
            IoDirection::Read => self.external_memory_read(address, data),
            IoDirection::Write => self.external_memory_write(address, data),
        }
    }

    /// Read `out.len()` words of external memory.
    ///
    /// # Errors
    ///
    /// See [`external_memory_io`](Self::external_memory_io).
    pub fn external_memory_read(&mut self, address: u32, out: &mut [u32]) -> Result<()> {
        if out.is_empty() {
            return Ok(());
        }
        match self.port()? {
            Some(mut port) => port.external_memory_read(address, out),
            None => Ok(()),
        }
    }

    /// Write words to external memory.
    ///
    /// # Errors
    ///
    /// Returns error if the module is closed.
    pub fn external_memory_write(&mut self, address: u32, words: &[u32]) -> Result<()> {
        match self.port()? {
            Some(port) => port.external_memory_write(address, words),
            None => Ok(()),
        }
    }

    /// Zero `words` words of external memory starting at `address` and wait
    /// for the hardware to finish.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolTimeout` (status -1) if the clear never completes.
    pub fn clear_external_memory(&mut self, address: u32, words: u32) -> Result<()> {
        match self.port()? {
            Some(port) => port.clear_external_memory(address, words),
            None => Ok(()),
        }
    }
}
