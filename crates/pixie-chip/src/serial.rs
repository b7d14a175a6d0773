//! Two-wire serial bus: line bits, device addresses and timing profiles.
//!
//! The bus is bit-banged through [`SERIAL_BUS`](crate::regs::SERIAL_BUS).
//! A write drives the lines; a read samples the data line in bit 0.

/// Data line. Bit 3 doubles the line on large-format carriers.
pub const SDA: u32 = 0x9;
/// Clock line.
pub const SCL: u32 = 0x2;
/// Host drives the bus. Clear to let a device drive the data line.
pub const CTRL: u32 = 0x4;
/// Bit sampled when reading the data line.
pub const SDA_SAMPLE: u32 = 0x1;

/// M24C64 EEPROM device select, write direction.
pub const EEPROM_WRITE: u8 = 0xA0;
/// M24C64 EEPROM device select, read direction.
pub const EEPROM_READ: u8 = 0xA1;
/// M24C64 page size in bytes.
pub const EEPROM_PAGE_BYTES: usize = 32;

/// PCF8574 expander device select, read direction.
pub const EXPANDER_READ: u8 = 0x43;
/// Expander bits carrying the physical slot number.
pub const SLOT_MASK: u8 = 0xF8;
/// Shift applied after [`SLOT_MASK`].
pub const SLOT_SHIFT: u32 = 3;

/// EEPROM address of the 3-byte identification record.
pub const IDENT_ADDRESS: u16 = 0;
/// EEPROM address of the 3-byte ADC description (newer boards).
pub const ADC_INFO_ADDRESS: u16 = 99;

/// Settle delays, in nanoseconds, after each phase of a bus transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SerialTiming {
    /// After raising both lines.
    pub start_idle: u32,
    /// After dropping the data line under a high clock.
    pub start_hold: u32,
    /// After dropping the data line (clock high) before stop.
    pub stop_setup: u32,
    /// After raising the data line to complete stop.
    pub stop_hold: u32,
    /// After dropping the clock before driving a bit.
    pub write_clock_low: u32,
    /// After driving the data bit.
    pub write_data_setup: u32,
    /// After raising the clock on a written bit.
    pub write_clock_high: u32,
    /// After releasing the bus following the eighth bit.
    pub release: u32,
    /// After raising the clock to sample a bit.
    pub read_clock_high: u32,
    /// After dropping the clock following a sample.
    pub read_clock_low: u32,
    /// After raising the clock to sample acknowledge.
    pub ack_sample: u32,
    /// After restoring the clock low following acknowledge.
    pub ack_restore: u32,
    /// After pulling data low to acknowledge.
    pub send_ack_setup: u32,
    /// After the acknowledge clock pulse.
    pub send_ack_clock: u32,
    /// After releasing the acknowledge.
    pub send_ack_release: u32,
}

impl SerialTiming {
    /// M24C64 EEPROM (400 kHz class).
    pub const M24C64: Self = Self {
        start_idle: 600,
        start_hold: 600,
        stop_setup: 600,
        stop_hold: 1300,
        write_clock_low: 700,
        write_data_setup: 600,
        write_clock_high: 600,
        release: 600,
        read_clock_high: 600,
        read_clock_low: 600,
        ack_sample: 300,
        ack_restore: 600,
        send_ack_setup: 300,
        send_ack_clock: 600,
        send_ack_release: 300,
    };

    /// PCF8574 expander (100 kHz class).
    pub const PCF8574: Self = Self {
        start_idle: 6000,
        start_hold: 6000,
        stop_setup: 6000,
        stop_hold: 6000,
        write_clock_low: 6000,
        write_data_setup: 1000,
        write_clock_high: 6000,
        release: 6000,
        read_clock_high: 6000,
        read_clock_low: 6000,
        ack_sample: 6000,
        ack_restore: 6000,
        send_ack_setup: 6000,
        send_ack_clock: 6000,
        send_ack_release: 6000,
    };
}

/// Physical slot number encoded in an expander port byte.
#[must_use]
pub const fn slot_from_port(byte: u8) -> u8 {
    (byte & SLOT_MASK) >> SLOT_SHIFT
}
