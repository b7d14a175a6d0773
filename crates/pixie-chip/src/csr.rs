//! Control-status register bits and configuration-port patterns.

// ── CSR bit positions ───────────────────────────────────────────────────────

/// Run enable. Set by the host to start a run or control task.
pub const RUNENA: u32 = 1 << 0;
/// Processor download mode. Set: address auto-increment disabled.
pub const DSPDOWNLOAD: u32 = 1 << 1;
/// Host owns external memory.
pub const PCIACTIVE: u32 = 1 << 2;
/// Pull-up control for the backplane lines.
pub const PULLUP_CTRL: u32 = 1 << 3;
/// Processor held in reset.
pub const DSPRESET: u32 = 1 << 4;
/// Processor readout FIFO has reached its watermark.
pub const EXTFIFO_WML: u32 = 1 << 6;
/// A run or control task is executing.
pub const RUNACTIVE: u32 = 1 << 13;
/// The hardware clear accelerator is still clearing external memory.
pub const CLREXTMEM_ACTIVE: u32 = 1 << 15;

/// Mask applied when handing external memory back to the module.
///
/// Clears [`PCIACTIVE`] and keeps the low 16 bits, matching the width the
/// system FPGA decodes.
pub const PCIACTIVE_RELEASE_MASK: u32 = 0xFFFB;

/// Configuration-port control words for FPGA download.
///
/// The host reads [`CFG_RDCS`](crate::regs::CFG_RDCS), keeps the upper
/// bits under [`KEEP_MASK`](cfg::KEEP_MASK), ORs in the pattern and writes
/// [`CFG_CTRLCS`](crate::regs::CFG_CTRLCS).
pub mod cfg {
    /// Bits preserved from the status readback.
    pub const KEEP_MASK: u32 = 0xFFFF_F000;

    /// One clear/program/verify bit set for a group of FPGAs.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FpgaPattern {
        /// Human-readable target, for logs.
        pub target: &'static str,
        /// PROGRAM* low: clears the configuration.
        pub clear: u32,
        /// PROGRAM* high: starts configuration.
        pub program: u32,
        /// Status bits that must all be set before streaming (INIT).
        pub init_mask: u32,
        /// Status bits that must all be set after streaming (DONE).
        pub done_mask: u32,
        /// Re-read the status port between the clear and program writes.
        pub reread_before_program: bool,
    }

    /// Communications (system) FPGA.
    pub const COMM: FpgaPattern = FpgaPattern {
        target: "communications FPGA",
        clear: 0x551,
        program: 0x553,
        init_mask: 0x01,
        done_mask: 0x03,
        reread_before_program: true,
    };

    /// Signal-processing FPGAs 1 and 2.
    pub const SP_PAIR_A: FpgaPattern = FpgaPattern {
        target: "signal-processing FPGAs 1&2",
        clear: 0x052,
        program: 0x0F2,
        init_mask: 0x53,
        done_mask: 0xA3,
        reread_before_program: true,
    };

    /// Signal-processing FPGAs 3 and 4.
    pub const SP_PAIR_B: FpgaPattern = FpgaPattern {
        target: "signal-processing FPGAs 3&4",
        clear: 0x5A2,
        program: 0xFA2,
        init_mask: 0x5A3,
        done_mask: 0xAA3,
        reread_before_program: false,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_csr_bits_distinct() {
        let bits = [
            RUNENA,
            DSPDOWNLOAD,
            PCIACTIVE,
            PULLUP_CTRL,
            DSPRESET,
            EXTFIFO_WML,
            RUNACTIVE,
            CLREXTMEM_ACTIVE,
        ];
        let mut seen = 0u32;
        for b in bits {
            assert_eq!(b.count_ones(), 1);
            assert_eq!(seen & b, 0);
            seen |= b;
        }
    }

    #[test]
    fn test_release_mask_clears_pciactive() {
        assert_eq!(PCIACTIVE_RELEASE_MASK & PCIACTIVE, 0);
        assert_eq!(0xFFFF & PCIACTIVE_RELEASE_MASK, 0xFFFB);
    }

    #[test]
    fn test_patterns_fit_under_keep_mask() {
        for p in [cfg::COMM, cfg::SP_PAIR_A, cfg::SP_PAIR_B] {
            assert_eq!(p.clear & cfg::KEEP_MASK, 0, "{}", p.target);
            assert_eq!(p.program & cfg::KEEP_MASK, 0, "{}", p.target);
        }
    }
}
