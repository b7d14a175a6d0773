//! Simulated two-wire bus devices
//!
//! Decodes the line states the serial master writes to
//! [`SERIAL_BUS`](pixie_chip::regs::SERIAL_BUS) and answers reads with the
//! data line a real M24C64 EEPROM or PCF8574 expander would drive.
//!
//! Rules:
//! - START: data falls while clock and CTRL stay high.
//! - STOP: data rises while clock and CTRL stay high.
//! - On each clock rising edge with CTRL set the master is sending a bit
//!   (data, or its acknowledge after a byte it read).
//! - On each clock rising edge with CTRL clear the peer drives the line
//!   (its acknowledge, or the next data bit it is sending).

use pixie_chip::serial::{CTRL, EEPROM_PAGE_BYTES, SCL, SDA_SAMPLE};

/// EEPROM capacity of an M24C64 (64 kbit).
pub const EEPROM_BYTES: usize = 8192;

const EEPROM_SELECT: u8 = 0x50;
const EXPANDER_SELECT: u8 = 0x21;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Eeprom,
    Expander,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Receiving,
    AckSlot(u8),
    Transmitting,
    MasterAck,
}

/// EEPROM and slot expander answering on one simulated bus.
#[derive(Debug, Clone)]
pub struct SimulatedSerialPeer {
    eeprom: Vec<u8>,
    port: u8,
    responsive: bool,
    lines: u32,
    out: u32,
    phase: Phase,
    shift: u8,
    bits: u8,
    received: usize,
    target: Option<Target>,
    pointer: usize,
    tx: u8,
    transactions: usize,
}

impl Default for SimulatedSerialPeer {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedSerialPeer {
    /// Blank (0xFF) EEPROM and expander port reading 0.
    #[must_use]
    pub fn new() -> Self {
        Self {
            eeprom: vec![0xFF; EEPROM_BYTES],
            port: 0,
            responsive: true,
            lines: 0,
            out: SDA_SAMPLE,
            phase: Phase::Idle,
            shift: 0,
            bits: 0,
            received: 0,
            target: None,
            pointer: 0,
            tx: 0,
            transactions: 0,
        }
    }

    /// Preload EEPROM bytes at `address`.
    #[must_use]
    pub fn with_eeprom(mut self, address: usize, bytes: &[u8]) -> Self {
        for (i, b) in bytes.iter().enumerate() {
            let at = (address + i) % EEPROM_BYTES;
            self.eeprom[at] = *b;
        }
        self
    }

    /// Expander port byte carrying the slot number in bits 7..3.
    #[must_use]
    pub const fn with_port(mut self, port: u8) -> Self {
        self.port = port;
        self
    }

    /// Expander port byte for a physical slot.
    #[must_use]
    pub const fn in_slot(self, slot: u8) -> Self {
        self.with_port(slot << 3)
    }

    /// A peer that never acknowledges anything.
    #[must_use]
    pub const fn unresponsive(mut self) -> Self {
        self.responsive = false;
        self
    }

    /// Current EEPROM contents.
    #[must_use]
    pub fn eeprom(&self) -> &[u8] {
        &self.eeprom
    }

    /// Number of START conditions seen.
    #[must_use]
    pub const fn transactions(&self) -> usize {
        self.transactions
    }

    /// Value returned by a read of the bus register.
    #[must_use]
    pub const fn read(&self) -> u32 {
        self.out
    }

    /// Apply a write of the bus register.
    pub fn write(&mut self, value: u32) {
        let old = self.lines;
        self.lines = value;

        let clock_held = old & SCL != 0 && value & SCL != 0;
        let ctrl_held = old & CTRL != 0 && value & CTRL != 0;
        let data_old = old & SDA_SAMPLE != 0;
        let data_new = value & SDA_SAMPLE != 0;

        if clock_held && ctrl_held && data_old != data_new {
            if data_new {
                self.stop();
            } else {
                self.start();
            }
            return;
        }

        if old & SCL == 0 && value & SCL != 0 {
            if value & CTRL != 0 {
                self.master_bit(data_new);
            } else {
                self.peer_slot();
            }
        }
    }

    fn start(&mut self) {
        self.transactions += 1;
        self.phase = Phase::Receiving;
        self.shift = 0;
        self.bits = 0;
        self.received = 0;
        self.target = None;
    }

    fn stop(&mut self) {
        self.phase = Phase::Idle;
        self.target = None;
        self.out = SDA_SAMPLE;
    }

    fn master_bit(&mut self, bit: bool) {
        match self.phase {
            Phase::Receiving => {
                self.shift = (self.shift << 1) | u8::from(bit);
                self.bits += 1;
                if self.bits == 8 {
                    self.phase = Phase::AckSlot(self.shift);
                    self.shift = 0;
                    self.bits = 0;
                }
            }
            Phase::MasterAck => {
                if bit {
                    self.phase = Phase::Idle;
                } else {
                    self.load_next();
                }
            }
            _ => {}
        }
    }

    fn peer_slot(&mut self) {
        match self.phase {
            Phase::AckSlot(byte) => {
                let ack = self.responsive && self.accept(byte);
                self.out = if ack { 0 } else { SDA_SAMPLE };
                if !ack {
                    self.phase = Phase::Idle;
                }
            }
            Phase::Transmitting => {
                let bit = (self.tx >> (7 - self.bits)) & 1;
                self.out = u32::from(bit);
                self.bits += 1;
                if self.bits == 8 {
                    self.bits = 0;
                    self.phase = Phase::MasterAck;
                }
            }
            _ => self.out = SDA_SAMPLE,
        }
    }

    /// Consume one byte from the master; returns whether to acknowledge.
    fn accept(&mut self, byte: u8) -> bool {
        let index = self.received;
        self.received += 1;

        if index == 0 {
            let read = byte & 1 != 0;
            self.target = match byte >> 1 {
                EEPROM_SELECT => Some(Target::Eeprom),
                EXPANDER_SELECT => Some(Target::Expander),
                _ => None,
            };
            if self.target.is_none() {
                return false;
            }
            if read {
                self.load_next();
            } else {
                self.phase = Phase::Receiving;
            }
            return true;
        }

        self.phase = Phase::Receiving;
        match (self.target, index) {
            (Some(Target::Eeprom), 1) => {
                self.pointer = (usize::from(byte) << 8) % EEPROM_BYTES;
            }
            (Some(Target::Eeprom), 2) => {
                self.pointer = (self.pointer | usize::from(byte)) % EEPROM_BYTES;
            }
            (Some(Target::Eeprom), _) => {
                // Page writes roll over inside the current page.
                self.eeprom[self.pointer] = byte;
                let page = self.pointer - self.pointer % EEPROM_PAGE_BYTES;
                self.pointer = page + (self.pointer + 1) % EEPROM_PAGE_BYTES;
            }
            (Some(Target::Expander), _) => self.port = byte,
            (None, _) => return false,
        }
        true
    }

    fn load_next(&mut self) {
        self.tx = match self.target {
            Some(Target::Eeprom) => {
                let b = self.eeprom[self.pointer];
                self.pointer = (self.pointer + 1) % EEPROM_BYTES;
                b
            }
            Some(Target::Expander) => self.port,
            None => 0xFF,
        };
        self.bits = 0;
        self.phase = Phase::Transmitting;
    }
}
