//! Control-status register access
//!
//! Read-modify-write helpers over [`CSR`] and a scoped guard that holds a
//! bit set for the lifetime of a borrow.

use crate::bus::RegisterBus;
use crate::error::Result;
use pixie_chip::csr::{PCIACTIVE, PCIACTIVE_RELEASE_MASK, RUNACTIVE, RUNENA};
use pixie_chip::regs::CSR;

/// Read the CSR.
///
/// # Errors
///
/// Propagates bus failures.
pub fn read(bus: &dyn RegisterBus) -> Result<u32> {
    bus.read(CSR)
}

/// Overwrite the CSR.
///
/// # Errors
///
/// Propagates bus failures.
pub fn write(bus: &dyn RegisterBus, value: u32) -> Result<()> {
    bus.write(CSR, value)
}

/// Set `mask` bits, leaving the rest untouched.
///
/// # Errors
///
/// Propagates bus failures.
pub fn set_bits(bus: &dyn RegisterBus, mask: u32) -> Result<()> {
    let value = read(bus)?;
    write(bus, value | mask)
}

/// Clear `mask` bits, leaving the rest untouched.
///
/// # Errors
///
/// Propagates bus failures.
pub fn clear_bits(bus: &dyn RegisterBus, mask: u32) -> Result<()> {
    let value = read(bus)?;
    write(bus, value & !mask)
}

/// True while a run is enabled or still active.
///
/// # Errors
///
/// Propagates bus failures.
pub fn run_active(bus: &dyn RegisterBus) -> Result<bool> {
    Ok(read(bus)? & (RUNENA | RUNACTIVE) != 0)
}

/// Holds CSR bits set until dropped.
#[derive(Debug)]
#[must_use = "the bits are cleared as soon as the guard is dropped"]
pub struct CsrBitGuard<'a> {
    bus: &'a dyn RegisterBus,
    mask: u32,
    keep: u32,
}

impl<'a> CsrBitGuard<'a> {
    /// Set `mask` and return a guard that clears it again.
    ///
    /// # Errors
    ///
    /// Returns error if the bits could not be set; nothing is cleared then.
    pub fn set(bus: &'a dyn RegisterBus, mask: u32) -> Result<Self> {
        Self::set_then_keep(bus, mask, !mask)
    }

    /// Set `mask`; on drop, write back the CSR ANDed with `keep`.
    ///
    /// # Errors
    ///
    /// Returns error if the bits could not be set; nothing is cleared then.
    pub fn set_then_keep(bus: &'a dyn RegisterBus, mask: u32, keep: u32) -> Result<Self> {
        set_bits(bus, mask)?;
        Ok(Self { bus, mask, keep })
    }

    /// Hold PCIACTIVE: the host owns external memory until the guard drops.
    ///
    /// # Errors
    ///
    /// Returns error if the bit could not be set.
    pub fn pci_active(bus: &'a dyn RegisterBus) -> Result<Self> {
        Self::set_then_keep(bus, PCIACTIVE, PCIACTIVE_RELEASE_MASK)
    }
}

impl Drop for CsrBitGuard<'_> {
    fn drop(&mut self) {
        let released = read(self.bus).and_then(|v| write(self.bus, v & self.keep));
        if let Err(e) = released {
            tracing::warn!("failed to clear CSR bits {:#06x}: {e}", self.mask);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBus;
    use pixie_chip::csr::DSPDOWNLOAD;

    #[test]
    fn test_set_and_clear_preserve_other_bits() {
        let bus = MockBus::new();
        bus.set_register(CSR, 0x8001);
        set_bits(&bus, DSPDOWNLOAD).unwrap();
        assert_eq!(read(&bus).unwrap(), 0x8003);
        clear_bits(&bus, 0x8000).unwrap();
        assert_eq!(read(&bus).unwrap(), 0x0003);
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let bus = MockBus::new();
        bus.set_register(CSR, 0x1);
        {
            let _guard = CsrBitGuard::set(&bus, PCIACTIVE).unwrap();
            assert_eq!(read(&bus).unwrap(), 0x5);
        }
        assert_eq!(bus.writes_to(CSR), vec![0x5, 0x1]);
    }

    #[test]
    fn test_pci_active_release_keeps_low_half() {
        let bus = MockBus::new();
        bus.set_register(CSR, 0x0001_0001);
        drop(CsrBitGuard::pci_active(&bus).unwrap());
        assert_eq!(bus.writes_to(CSR), vec![0x0001_0005, 0x0001]);
    }

    #[test]
    fn test_run_active() {
        let bus = MockBus::new();
        assert!(!run_active(&bus).unwrap());
        bus.set_register(CSR, RUNACTIVE);
        assert!(run_active(&bus).unwrap());
        bus.set_register(CSR, RUNENA);
        assert!(run_active(&bus).unwrap());
    }
}
