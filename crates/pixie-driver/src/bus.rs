//! Register bus: 32-bit reads and writes at byte offsets of a module's window.
//!
//! Every protocol in this crate talks to hardware only through
//! [`RegisterBus`]. Production code maps BAR 2 of the bridge
//! ([`MmapRegion`](crate::backends::mmap::MmapRegion)); tests substitute
//! [`MockBus`](crate::mock::MockBus).

use crate::error::Result;
use pixie_chip::regs::RegisterAddress;
use std::fmt::Debug;

/// Access to one module's register window.
///
/// Writes take `&self`: register stores are side effects on hardware, not
/// on host memory, and protocols hold the bus alongside a mutable vendor
/// device handle.
pub trait RegisterBus: Debug + Send {
    /// Read the 32-bit word at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if `offset` lies outside the mapped window.
    fn read32(&self, offset: usize) -> Result<u32>;

    /// Write the 32-bit word at byte `offset`.
    ///
    /// # Errors
    ///
    /// Returns error if `offset` lies outside the mapped window.
    fn write32(&self, offset: usize, value: u32) -> Result<()>;

    /// Read a named register.
    ///
    /// # Errors
    ///
    /// Propagates [`read32`](Self::read32) failures.
    fn read(&self, reg: RegisterAddress) -> Result<u32> {
        debug_assert!(reg.is_readable(), "{reg} is write-only");
        let value = self.read32(reg.offset())?;
        tracing::trace!("{reg} -> {value:#010x}");
        Ok(value)
    }

    /// Write a named register.
    ///
    /// # Errors
    ///
    /// Propagates [`write32`](Self::write32) failures.
    fn write(&self, reg: RegisterAddress, value: u32) -> Result<()> {
        debug_assert!(reg.is_writable(), "{reg} is read-only");
        tracing::trace!("{reg} <- {value:#010x}");
        self.write32(reg.offset(), value)
    }
}

impl<B: RegisterBus + ?Sized> RegisterBus for Box<B> {
    fn read32(&self, offset: usize) -> Result<u32> {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        (**self).write32(offset, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;
    use pixie_chip::regs::{CSR, EXT_MEM_TEST};

    #[test]
    fn test_named_access_uses_offset() {
        let bus = MockBus::new();
        bus.write(EXT_MEM_TEST, 0x1234).unwrap();
        assert_eq!(bus.writes_to(EXT_MEM_TEST), vec![0x1234]);

        bus.set_register(CSR, 0x40);
        assert_eq!(bus.read(CSR).unwrap(), 0x40);
        assert_eq!(bus.read32(CSR.offset()).unwrap(), 0x40);
    }

    #[test]
    fn test_boxed_bus_forwards() {
        let mock = MockBus::new();
        let boxed: Box<dyn RegisterBus> = Box::new(mock.clone());
        boxed.write(CSR, 7).unwrap();
        assert_eq!(mock.writes_to(CSR), vec![7]);
    }
}
