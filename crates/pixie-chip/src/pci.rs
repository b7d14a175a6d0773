//! PCI identifiers of the bridge chip and crate-wide limits.
//!
//! Every module sits behind a PLX PCI 9054 bridge; the module's local bus
//! is reached through BAR 2.

/// PLX Technology vendor ID.
pub const PLX_VENDOR_ID: u16 = 0x10B5;

/// PCI 9054 bridge device ID.
pub const PLX_9054_DEVICE_ID: u16 = 0x9054;

/// BAR carrying the PCI-to-local register window.
pub const REGISTER_BAR: u8 = 2;

/// Upper bound on bridges enumerated during discovery.
pub const MAX_NUM_MODULES: usize = 32;

/// Slots in the largest supported PXI chassis.
pub const MAX_PXI_SLOTS: u8 = 14;

/// Largest number of modules a caller may declare.
pub const PRESET_MAX_MODULES: usize = 24;

/// Bus position of one PCI function, as reported by the vendor library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PciLocation {
    /// PCI domain.
    pub domain: u16,
    /// Bus number.
    pub bus: u8,
    /// Device (slot) number on the bus.
    pub slot: u8,
    /// Function number.
    pub function: u8,
}

impl PciLocation {
    /// Parse a sysfs-style address such as `0000:05:0d.0`.
    #[must_use]
    pub fn parse(address: &str) -> Option<Self> {
        let (domain, rest) = address.split_once(':')?;
        let (bus, rest) = rest.split_once(':')?;
        let (slot, function) = rest.split_once('.')?;
        Some(Self {
            domain: u16::from_str_radix(domain, 16).ok()?,
            bus: u8::from_str_radix(bus, 16).ok()?,
            slot: u8::from_str_radix(slot, 16).ok()?,
            function: u8::from_str_radix(function, 16).ok()?,
        })
    }

    /// True if both refer to the same physical device, ignoring the function.
    #[must_use]
    pub const fn same_device(&self, other: &Self) -> bool {
        self.domain == other.domain && self.bus == other.bus && self.slot == other.slot
    }
}

impl std::fmt::Display for PciLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:04x}:{:02x}:{:02x}.{:x}",
            self.domain, self.bus, self.slot, self.function
        )
    }
}
