//! Register map of the module's PCI-to-local window (BAR 2 of the bridge).
//!
//! Every offset below is the byte offset from the start of the mapped
//! window. The table is the wire contract with the system FPGA and is
//! reproduced exactly; a wrong offset here talks to a different block.
//!
//! ```text
//! 0x000000  configuration ports (FPGA download)
//! 0x000010  two-wire serial bus (EEPROM + slot expander)
//! 0x000048  control-status register
//! 0x000080  host bus request / done
//! 0x0000C0  external memory + processor DMA setup ports
//! 0x200000  external FIFO (local bus, DMA source)
//! 0x300000  processor readout FIFO (local bus, DMA source)
//! 0x400000  external memory data window (local bus)
//! ```

/// Direction a register may be accessed in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Host may only read.
    ReadOnly,
    /// Host may only write; reads return undefined data.
    WriteOnly,
    /// Host may read and write.
    ReadWrite,
}

/// One hardware-addressable offset in the register window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterAddress {
    name: &'static str,
    offset: usize,
    access: Access,
}

impl RegisterAddress {
    /// Define a register.
    #[must_use]
    pub const fn new(name: &'static str, offset: usize, access: Access) -> Self {
        Self {
            name,
            offset,
            access,
        }
    }

    /// Symbolic name, used in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Byte offset from the start of the window.
    #[must_use]
    pub const fn offset(&self) -> usize {
        self.offset
    }

    /// Access direction.
    #[must_use]
    pub const fn access(&self) -> Access {
        self.access
    }

    /// True if the host may read this register.
    #[must_use]
    pub const fn is_readable(&self) -> bool {
        matches!(self.access, Access::ReadOnly | Access::ReadWrite)
    }

    /// True if the host may write this register.
    #[must_use]
    pub const fn is_writable(&self) -> bool {
        matches!(self.access, Access::WriteOnly | Access::ReadWrite)
    }
}

impl std::fmt::Display for RegisterAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{:#06x}", self.name, self.offset)
    }
}

// ── Configuration ports ─────────────────────────────────────────────────────

/// FPGA configuration data port. One bitstream word per write.
pub const CFG_DATACS: RegisterAddress = RegisterAddress::new("CFG_DATACS", 0x00, Access::WriteOnly);

/// FPGA configuration control port (PROGRAM lines, chip selects).
pub const CFG_CTRLCS: RegisterAddress = RegisterAddress::new("CFG_CTRLCS", 0x04, Access::WriteOnly);

/// FPGA configuration status port (INIT and DONE lines).
pub const CFG_RDCS: RegisterAddress = RegisterAddress::new("CFG_RDCS", 0x08, Access::ReadOnly);

/// Clock-manager reset strobe, written once after the signal-processing FPGAs load.
pub const CFG_DCMRST: RegisterAddress = RegisterAddress::new("CFG_DCMRST", 0x14, Access::WriteOnly);

// ── Serial bus ──────────────────────────────────────────────────────────────

/// Two-wire serial bus port. The EEPROM and the slot-ID expander share it.
pub const SERIAL_BUS: RegisterAddress = RegisterAddress::new("SERIAL_BUS", 0x10, Access::ReadWrite);

// ── Control-status register ─────────────────────────────────────────────────

/// Control-status register.
pub const CSR: RegisterAddress = RegisterAddress::new("CSR", 0x48, Access::ReadWrite);

// ── Host bus request ────────────────────────────────────────────────────────

/// Host bus request. Any write asks for the processor memory bus.
pub const REQUEST_HBR: RegisterAddress = RegisterAddress::new("REQUEST_HBR", 0x80, Access::WriteOnly);

/// Host bus done. Any write hands the processor memory bus back.
pub const HBR_DONE: RegisterAddress = RegisterAddress::new("HBR_DONE", 0x84, Access::WriteOnly);

// ── External memory and processor DMA setup ────────────────────────────────

/// Start address for host access to external memory.
pub const WRT_EXT_MEM: RegisterAddress = RegisterAddress::new("WRT_EXT_MEM", 0xC0, Access::WriteOnly);

/// Processor memory address latch for single-word access.
pub const EXT_MEM_TEST: RegisterAddress = RegisterAddress::new("EXT_MEM_TEST", 0xC4, Access::WriteOnly);

/// Processor memory data port (auto-incrementing unless download mode is set).
pub const WRT_DSP_MMA: RegisterAddress = RegisterAddress::new("WRT_DSP_MMA", 0xC8, Access::ReadWrite);

/// Arms the external FIFO for a DMA readout of N words.
pub const SET_EXT_FIFO: RegisterAddress = RegisterAddress::new("SET_EXT_FIFO", 0xCC, Access::WriteOnly);

/// Processor DMA channel 11 control.
pub const WRT_DSP_DMAC11: RegisterAddress = RegisterAddress::new("WRT_DSP_DMAC11", 0xD0, Access::WriteOnly);

/// Processor DMA channel 11 internal index (start address).
pub const WRT_DSP_II11: RegisterAddress = RegisterAddress::new("WRT_DSP_II11", 0xD4, Access::WriteOnly);

/// Hardware clear accelerator. Writing a word count starts the clear.
pub const WRT_CLR_EXTMEM: RegisterAddress = RegisterAddress::new("WRT_CLR_EXTMEM", 0xD8, Access::WriteOnly);

/// Processor DMA channel 11 internal count.
pub const WRT_DSP_C11: RegisterAddress = RegisterAddress::new("WRT_DSP_C11", 0xDC, Access::WriteOnly);

/// Processor DMA channel 11 internal modifier (step).
pub const WRT_DSP_IM11: RegisterAddress = RegisterAddress::new("WRT_DSP_IM11", 0xE0, Access::WriteOnly);

/// Processor DMA channel 11 external count.
pub const WRT_DSP_EC11: RegisterAddress = RegisterAddress::new("WRT_DSP_EC11", 0xE4, Access::WriteOnly);

/// FIFO watermark: read gives buffered external-FIFO words, write sets the
/// system-FPGA readout watermark.
pub const RD_WRT_FIFO_WML: RegisterAddress = RegisterAddress::new("RD_WRT_FIFO_WML", 0xE8, Access::ReadWrite);

/// Arms the short system-FPGA FIFO in front of external memory.
pub const SET_EXMEM_FIFO: RegisterAddress = RegisterAddress::new("SET_EXMEM_FIFO", 0xEC, Access::WriteOnly);

/// Arms the internal readout FIFO in front of the processor DMA channel.
pub const SET_INT_FIFO: RegisterAddress = RegisterAddress::new("SET_INT_FIFO", 0xF0, Access::WriteOnly);

/// Resets the run-FIFO counters.
pub const WRT_RESET_RFCNT: RegisterAddress = RegisterAddress::new("WRT_RESET_RFCNT", 0xF4, Access::WriteOnly);

// ── Local-bus windows ───────────────────────────────────────────────────────

/// External memory data window. Sequential writes here land at
/// consecutive external-memory addresses starting at [`WRT_EXT_MEM`].
pub const EXT_MEM_DATA: RegisterAddress = RegisterAddress::new("EXT_MEM_DATA", 0x40_0000, Access::WriteOnly);

/// Local-bus address the bridge DMA engine reads from, per source.
pub mod local {
    /// External FIFO readout.
    pub const EXT_FIFO: u32 = 0x20_0000;
    /// Processor memory readout FIFO.
    pub const DSP_FIFO: u32 = 0x30_0000;
    /// External memory readout.
    pub const EXT_MEM: u32 = 0x40_0000;
}

/// All named registers, in offset order.
pub const ALL: &[RegisterAddress] = &[
    CFG_DATACS,
    CFG_CTRLCS,
    CFG_RDCS,
    SERIAL_BUS,
    CFG_DCMRST,
    CSR,
    REQUEST_HBR,
    HBR_DONE,
    WRT_EXT_MEM,
    EXT_MEM_TEST,
    WRT_DSP_MMA,
    SET_EXT_FIFO,
    WRT_DSP_DMAC11,
    WRT_DSP_II11,
    WRT_CLR_EXTMEM,
    WRT_DSP_C11,
    WRT_DSP_IM11,
    WRT_DSP_EC11,
    RD_WRT_FIFO_WML,
    SET_EXMEM_FIFO,
    SET_INT_FIFO,
    WRT_RESET_RFCNT,
    EXT_MEM_DATA,
];
