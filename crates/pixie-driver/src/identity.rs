//! Module identification from the onboard EEPROM
//!
//! The first three EEPROM bytes hold the serial number and hardware
//! revision. Two layouts exist: modules whose third byte is a revision of
//! 11 or later store a 16-bit serial then the revision, older modules store
//! an 8-bit serial then the revision. ADC resolution and sampling rate are
//! implied by the serial range, except on the newest modules which store
//! them at EEPROM address 99.

use crate::error::{Operation, Result};
use crate::module::ModuleHandle;
use pixie_chip::firmware::Revision;
use pixie_chip::serial::{ADC_INFO_ADDRESS, IDENT_ADDRESS};
use std::fmt;

const NEW_LAYOUT_REVISION: u8 = 11;
const FIRST_UNDESCRIBED_SERIAL: u16 = 275;
const FIRST_250_MSPS_SERIAL: u16 = 1000;
const FIRST_STORED_ADC_SERIAL: u16 = 1035;

/// ADC resolution and sampling rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AdcInfo {
    /// Resolution in bits.
    pub bits: u8,
    /// Sampling rate in MSPS.
    pub msps: u16,
}

impl AdcInfo {
    /// Describe an ADC.
    #[must_use]
    pub const fn new(bits: u8, msps: u16) -> Self {
        Self { bits, msps }
    }
}

impl fmt::Display for AdcInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-bit {} MSPS", self.bits, self.msps)
    }
}

/// Identity of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModuleInfo {
    /// Hardware revision.
    pub revision: Revision,
    /// Serial number.
    pub serial: u16,
    /// ADC description, `None` where the serial range carries none.
    pub adc: Option<AdcInfo>,
}

impl Default for ModuleInfo {
    fn default() -> Self {
        Self::offline(None)
    }
}

/// How the ADC description is obtained for a decoded identity block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AdcSource {
    Known(Option<AdcInfo>),
    Stored,
}

fn decode_id(bytes: [u8; 3]) -> (Revision, u16, AdcSource) {
    let [b0, b1, b2] = bytes;
    if b2 < NEW_LAYOUT_REVISION {
        let adc = AdcSource::Known(Some(AdcInfo::new(12, 100)));
        return (Revision::from_raw(u16::from(b1)), u16::from(b0), adc);
    }

    let serial = u16::from_le_bytes([b0, b1]);
    let adc = match serial {
        s if s < FIRST_UNDESCRIBED_SERIAL => AdcSource::Known(Some(AdcInfo::new(12, 100))),
        s if s < FIRST_250_MSPS_SERIAL => AdcSource::Known(None),
        s if s < FIRST_STORED_ADC_SERIAL => AdcSource::Known(Some(AdcInfo::new(12, 250))),
        _ => AdcSource::Stored,
    };
    (Revision::from_raw(u16::from(b2)), serial, adc)
}

impl ModuleInfo {
    /// Identity reported for an offline module.
    ///
    /// Variants 1..=7 select the ADC (and for variant 1 the revision and
    /// serial) of a particular hardware flavour; anything else reports a
    /// revision F module with serial 1000 and no ADC description.
    #[must_use]
    pub const fn offline(variant: Option<u8>) -> Self {
        let (revision, serial, adc) = match variant {
            Some(1) => (Revision::D, 275, Some(AdcInfo::new(12, 100))),
            Some(2) => (Revision::F, 1000, Some(AdcInfo::new(14, 100))),
            Some(3) => (Revision::F, 1000, Some(AdcInfo::new(12, 250))),
            Some(4) => (Revision::F, 1000, Some(AdcInfo::new(14, 250))),
            Some(5) => (Revision::F, 1000, Some(AdcInfo::new(12, 500))),
            Some(6) => (Revision::F, 1000, Some(AdcInfo::new(14, 500))),
            Some(7) => (Revision::F, 1000, Some(AdcInfo::new(16, 250))),
            _ => (Revision::F, 1000, None),
        };
        Self { revision, serial, adc }
    }

    /// Decode the identity block, reading the stored ADC description
    /// through `read_adc` when the serial calls for it.
    ///
    /// # Errors
    ///
    /// Propagates failures of `read_adc`.
    pub fn decode(bytes: [u8; 3], read_adc: impl FnOnce() -> Result<[u8; 3]>) -> Result<Self> {
        let (revision, serial, source) = decode_id(bytes);
        let adc = match source {
            AdcSource::Known(adc) => adc,
            AdcSource::Stored => {
                let [bits, lo, hi] = read_adc()?;
                Some(AdcInfo::new(bits, u16::from_le_bytes([lo, hi])))
            }
        };
        Ok(Self { revision, serial, adc })
    }
}

impl fmt::Display for ModuleInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} serial {}", self.revision, self.serial)?;
        match self.adc {
            Some(adc) => write!(f, " ({adc})"),
            None => write!(f, " (ADC unknown)"),
        }
    }
}

fn three(bytes: &[u8]) -> [u8; 3] {
    let mut out = [0u8; 3];
    for (dst, src) in out.iter_mut().zip(bytes) {
        *dst = *src;
    }
    out
}

impl ModuleHandle {
    /// Read and decode the identification EEPROM, and remember the result.
    ///
    /// Offline modules report the identity they were configured with.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` if the EEPROM does not acknowledge while
    /// reading the serial number (status -2) or the ADC description (-3).
    pub fn read_module_info(&mut self) -> Result<ModuleInfo> {
        if self.is_offline() {
            return Ok(*self.info());
        }
        let id = self
            .eeprom_read(IDENT_ADDRESS, 3)
            .map_err(|e| e.within(Operation::ReadModuleInfo, -2))?;
        let info = ModuleInfo::decode(three(&id), || {
            self.eeprom_read(ADC_INFO_ADDRESS, 3)
                .map(|b| three(&b))
                .map_err(|e| e.within(Operation::ReadModuleInfo, -3))
        })?;
        tracing::debug!("module {}: {info}", self.number());
        self.set_info(info);
        Ok(info)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PixieError;

    fn no_adc() -> Result<[u8; 3]> {
        Err(PixieError::invalid_argument("ADC bytes must not be read"))
    }

    #[test]
    fn test_new_layout_early_serial() {
        let info = ModuleInfo::decode([0x05, 0x00, 0x0B], no_adc).unwrap();
        assert_eq!(info.serial, 5);
        assert_eq!(info.revision, Revision::B);
        assert_eq!(info.revision.raw(), 11);
        assert_eq!(info.adc, Some(AdcInfo::new(12, 100)));
    }

    #[test]
    fn test_old_layout() {
        let info = ModuleInfo::decode([42, 0x0A, 0x03], no_adc).unwrap();
        assert_eq!(info.serial, 42);
        assert_eq!(info.revision, Revision::Other(0xA));
        assert_eq!(info.adc, Some(AdcInfo::new(12, 100)));
    }

    #[test]
    fn test_serial_ranges() {
        // 600 = 0x258
        let info = ModuleInfo::decode([0x58, 0x02, 0x0D], no_adc).unwrap();
        assert_eq!(info.serial, 600);
        assert_eq!(info.adc, None);

        // 1010 = 0x3F2
        let info = ModuleInfo::decode([0xF2, 0x03, 0x0F], no_adc).unwrap();
        assert_eq!(info.adc, Some(AdcInfo::new(12, 250)));
    }

    #[test]
    fn test_stored_adc() {
        // 1100 = 0x44C
        let info = ModuleInfo::decode([0x4C, 0x04, 0x0F], || Ok([16, 0xF4, 0x01])).unwrap();
        assert_eq!(info.serial, 1100);
        assert_eq!(info.revision, Revision::F);
        assert_eq!(info.adc, Some(AdcInfo::new(16, 500)));
    }

    #[test]
    fn test_offline_variants() {
        let base = ModuleInfo::offline(None);
        assert_eq!((base.revision, base.serial, base.adc), (Revision::F, 1000, None));

        let v1 = ModuleInfo::offline(Some(1));
        assert_eq!((v1.revision, v1.serial), (Revision::D, 275));
        assert_eq!(ModuleInfo::offline(Some(7)).adc, Some(AdcInfo::new(16, 250)));
        assert_eq!(ModuleInfo::offline(Some(9)), base);
    }

    #[test]
    fn test_display() {
        let info = ModuleInfo::offline(Some(4));
        assert_eq!(info.to_string(), "Rev-F serial 1000 (14-bit 250 MSPS)");
        assert_eq!(ModuleInfo::offline(None).to_string(), "Rev-F serial 1000 (ADC unknown)");
    }
}
