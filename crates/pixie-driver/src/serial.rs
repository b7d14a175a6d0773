//! Bit-banged two-wire serial master
//!
//! The module exposes its serial bus as three line bits in one register
//! ([`SERIAL_BUS`]). [`SerialBus`] drives START, STOP, byte and acknowledge
//! phases with the settle waits of a [`SerialTiming`] profile; [`Eeprom`]
//! and [`SlotExpander`] build device transactions on top.
//!
//! A byte transfer runs `Start → 8 × bit → release → ack → Stop`. Bits go
//! most-significant first. The only failure the bus itself can report is a
//! missing acknowledge; the transaction is abandoned at that point.

use crate::bus::RegisterBus;
use crate::error::{Operation, PixieError, Result};
use crate::timing::Delay;
use pixie_chip::regs::SERIAL_BUS;
use pixie_chip::serial::{
    slot_from_port, SerialTiming, CTRL, EEPROM_READ, EEPROM_WRITE, EXPANDER_READ, SCL, SDA, SDA_SAMPLE,
};

/// Two-wire master on one module's serial-bus register.
#[derive(Debug, Clone, Copy)]
pub struct SerialBus<'a> {
    bus: &'a dyn RegisterBus,
    delay: &'a dyn Delay,
    timing: SerialTiming,
}

impl<'a> SerialBus<'a> {
    /// Master with the given timing profile.
    pub fn new(bus: &'a dyn RegisterBus, delay: &'a dyn Delay, timing: SerialTiming) -> Self {
        Self { bus, delay, timing }
    }

    fn drive(&self, lines: u32, settle_ns: u32) -> Result<()> {
        self.bus.write(SERIAL_BUS, lines)?;
        self.delay.wait_ns(u64::from(settle_ns));
        Ok(())
    }

    /// Claim the bus: data falls while the clock is high.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    pub fn start(&self) -> Result<()> {
        self.drive(SDA | SCL | CTRL, self.timing.start_idle)?;
        self.drive(SCL | CTRL, self.timing.start_hold)
    }

    /// Release the bus: data rises while the clock is high.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    pub fn stop(&self) -> Result<()> {
        self.drive(SCL | CTRL, self.timing.stop_setup)?;
        self.drive(SDA | SCL | CTRL, self.timing.stop_hold)
    }

    /// Shift one byte out, MSB first, then release the data line for the
    /// acknowledge.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    pub fn write_byte(&self, byte: u8) -> Result<()> {
        let mut lines = CTRL;
        for bit in (0..8).rev() {
            lines &= !SCL;
            self.drive(lines, self.timing.write_clock_low)?;

            lines = if (byte >> bit) & 1 == 1 { SDA | CTRL } else { CTRL };
            self.drive(lines, self.timing.write_data_setup)?;

            lines |= SCL;
            self.drive(lines, self.timing.write_clock_high)?;
        }
        // Clock and CTRL low hand the data line to the device.
        self.drive(lines & SDA_SAMPLE, self.timing.release)
    }

    /// Shift one byte in, MSB first. Sends no acknowledge.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    pub fn read_byte(&self) -> Result<u8> {
        let mut byte = 0u8;
        let mut lines = 0u32;
        for bit in (0..8).rev() {
            lines |= SCL;
            self.drive(lines, self.timing.read_clock_high)?;

            lines = self.bus.read(SERIAL_BUS)?;
            if lines & SDA_SAMPLE != 0 {
                byte |= 1 << bit;
            }

            lines &= !SCL;
            self.drive(lines, self.timing.read_clock_low)?;
        }
        tracing::trace!("serial byte in: {byte:#04x}");
        Ok(byte)
    }

    /// Clock the acknowledge slot. Returns `true` if the device pulled data low.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    pub fn get_ack(&self) -> Result<bool> {
        self.drive(SCL, self.timing.ack_sample)?;
        let sampled = self.bus.read(SERIAL_BUS)?;
        self.drive(0, self.timing.ack_restore)?;
        Ok(sampled & SDA_SAMPLE == 0)
    }

    /// Acknowledge a byte received from the device.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    pub fn send_ack(&self) -> Result<()> {
        self.drive(CTRL, self.timing.send_ack_setup)?;
        self.drive(SCL | CTRL, self.timing.send_ack_clock)?;
        self.drive(0, self.timing.send_ack_release)
    }

    /// Write a byte and require an acknowledge.
    ///
    /// On a missing acknowledge the bus is released with STOP before the
    /// error returns.
    fn write_acked(&self, byte: u8, phase: &str, status: i32) -> Result<()> {
        self.write_byte(byte)?;
        if self.get_ack()? {
            return Ok(());
        }
        tracing::debug!("no acknowledge after {phase} ({byte:#04x})");
        self.stop()?;
        Err(PixieError::resource(
            Operation::SerialBus,
            status,
            format!("no acknowledge after {phase}"),
        ))
    }
}

// ── M24C64 EEPROM ───────────────────────────────────────────────────────────

/// Identification EEPROM (M24C64) on the serial bus.
#[derive(Debug, Clone, Copy)]
pub struct Eeprom<'a> {
    serial: SerialBus<'a>,
}

impl<'a> Eeprom<'a> {
    /// EEPROM on `bus`, clocked with the M24C64 profile.
    pub fn new(bus: &'a dyn RegisterBus, delay: &'a dyn Delay) -> Self {
        Self {
            serial: SerialBus::new(bus, delay, SerialTiming::M24C64),
        }
    }

    /// START, device select for writing, 16-bit address MSB first.
    fn address(&self, address: u16) -> Result<()> {
        let [msb, lsb] = address.to_be_bytes();
        self.serial.start()?;
        self.serial.write_acked(EEPROM_WRITE, "device select", -2)?;
        self.serial.write_acked(msb, "address MSB", -3)?;
        self.serial.write_acked(lsb, "address LSB", -4)
    }

    /// Repeated START and device select for reading.
    fn select_read(&self) -> Result<()> {
        self.serial.start()?;
        self.serial.write_acked(EEPROM_READ, "read select", -5)
    }

    /// Write one byte.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` naming the phase that was not acknowledged.
    pub fn write_byte(&self, address: u16, value: u8) -> Result<()> {
        self.address(address)?;
        self.serial.write_acked(value, "data", -5)?;
        self.serial.stop()
    }

    /// Read one byte.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` naming the phase that was not acknowledged.
    pub fn read_byte(&self, address: u16) -> Result<u8> {
        self.address(address)?;
        self.select_read()?;
        let byte = self.serial.read_byte()?;
        self.serial.stop()?;
        Ok(byte)
    }

    /// Write up to one page starting at `address`.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` naming the phase that was not acknowledged.
    pub fn page_write(&self, address: u16, bytes: &[u8]) -> Result<()> {
        self.address(address)?;
        for &b in bytes {
            self.serial.write_acked(b, "data", -5)?;
        }
        self.serial.stop()
    }

    /// Read `count` consecutive bytes starting at `address`.
    ///
    /// Each byte but the last is acknowledged.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` naming the phase that was not acknowledged.
    pub fn sequential_read(&self, address: u16, count: usize) -> Result<Vec<u8>> {
        self.address(address)?;
        self.select_read()?;
        let mut out = Vec::with_capacity(count);
        for i in 0..count {
            out.push(self.serial.read_byte()?);
            if i + 1 != count {
                self.serial.send_ack()?;
            }
        }
        self.serial.stop()?;
        tracing::debug!("EEPROM read {count} bytes at {address}: {out:02x?}");
        Ok(out)
    }
}

// ── PCF8574 expander ────────────────────────────────────────────────────────

/// Port expander wired to the chassis slot-ID pins.
#[derive(Debug, Clone, Copy)]
pub struct SlotExpander<'a> {
    serial: SerialBus<'a>,
}

impl<'a> SlotExpander<'a> {
    /// Expander on `bus`, clocked with the PCF8574 profile.
    pub fn new(bus: &'a dyn RegisterBus, delay: &'a dyn Delay) -> Self {
        Self {
            serial: SerialBus::new(bus, delay, SerialTiming::PCF8574),
        }
    }

    /// Read the port byte.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` (status −2) if the expander does not
    /// acknowledge its address.
    pub fn read_port(&self) -> Result<u8> {
        self.serial.start()?;
        self.serial.write_acked(EXPANDER_READ, "device select", -2)?;
        let byte = self.serial.read_byte()?;
        self.serial.send_ack()?;
        self.serial.stop()?;
        tracing::debug!("PCF8574 port byte {byte:#04x}");
        Ok(byte)
    }

    /// Physical chassis slot of the module.
    ///
    /// # Errors
    ///
    /// See [`read_port`](Self::read_port).
    pub fn slot(&self) -> Result<u8> {
        Ok(slot_from_port(self.read_port()?))
    }
}
