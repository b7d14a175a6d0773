//! Hardware revisions and the firmware image sizes they expect.

/// Communications FPGA image length, revisions B/C/D (32-bit words).
pub const COMM_FPGA_WORDS_REV_BCD: usize = 162_962;
/// Signal-processing FPGA image length, revisions B/C/D (32-bit words).
pub const SP_FPGA_WORDS_REV_BCD: usize = 162_962;
/// Communications FPGA image length, revision F (32-bit words).
pub const COMM_FPGA_WORDS_REV_F: usize = 162_962;
/// Signal-processing FPGA image length, revision F (32-bit words).
pub const SP_FPGA_WORDS_REV_F: usize = 371_101;

/// Module hardware revision, as stored in the identification EEPROM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Revision {
    /// Rev B (`0xB`).
    B,
    /// Rev C (`0xC`).
    C,
    /// Rev D (`0xD`).
    D,
    /// Rev F (`0xF`).
    F,
    /// Anything else; no firmware sizing is known.
    Other(u16),
}

impl Revision {
    /// Decode an EEPROM revision byte.
    #[must_use]
    pub const fn from_raw(raw: u16) -> Self {
        match raw {
            0xB => Self::B,
            0xC => Self::C,
            0xD => Self::D,
            0xF => Self::F,
            other => Self::Other(other),
        }
    }

    /// Raw revision number.
    #[must_use]
    pub const fn raw(&self) -> u16 {
        match self {
            Self::B => 0xB,
            Self::C => 0xC,
            Self::D => 0xD,
            Self::F => 0xF,
            Self::Other(raw) => *raw,
        }
    }

    /// Expected image length for a target, `None` if the revision is unsupported.
    #[must_use]
    pub const fn expected_words(&self, target: FirmwareTarget) -> Option<usize> {
        match (self, target) {
            (Self::B | Self::C | Self::D, FirmwareTarget::CommFpga) => Some(COMM_FPGA_WORDS_REV_BCD),
            (Self::B | Self::C | Self::D, FirmwareTarget::SpFpga) => Some(SP_FPGA_WORDS_REV_BCD),
            (Self::F, FirmwareTarget::CommFpga) => Some(COMM_FPGA_WORDS_REV_F),
            (Self::F, FirmwareTarget::SpFpga) => Some(SP_FPGA_WORDS_REV_F),
            (Self::Other(_), _) => None,
        }
    }
}

impl std::fmt::Display for Revision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Other(raw) => write!(f, "rev {raw:#x}"),
            known => write!(f, "Rev-{:X}", known.raw()),
        }
    }
}

/// Chip a bitstream is built for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FirmwareTarget {
    /// Communications (system) FPGA.
    CommFpga,
    /// Signal-processing FPGAs (one image loaded into both pairs).
    SpFpga,
}

impl std::fmt::Display for FirmwareTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CommFpga => write!(f, "communications FPGA"),
            Self::SpFpga => write!(f, "signal-processing FPGA"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_revision_sizes() {
        assert_eq!(Revision::from_raw(0xB).expected_words(FirmwareTarget::SpFpga), Some(162_962));
        assert_eq!(Revision::from_raw(0xF).expected_words(FirmwareTarget::SpFpga), Some(371_101));
        assert_eq!(Revision::from_raw(0xF).expected_words(FirmwareTarget::CommFpga), Some(162_962));
        assert_eq!(Revision::from_raw(0xA).expected_words(FirmwareTarget::CommFpga), None);
    }

    #[test]
    fn test_revision_display() {
        assert_eq!(Revision::F.to_string(), "Rev-F");
        assert_eq!(Revision::Other(0x11).to_string(), "rev 0x11");
        assert_eq!(Revision::from_raw(0xD).raw(), 0xD);
    }
}
