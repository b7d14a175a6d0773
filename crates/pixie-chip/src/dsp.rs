//! Onboard processor (ADSP-21160 class) registers, memory map and the
//! tagged boot-stream format.
//!
//! ## Boot stream
//!
//! The processor program file is a sequence of 48-bit words, each carried
//! as three 16-bit sub-words (one per host write). It starts with a fixed
//! 256-word boot kernel, followed by tagged segments:
//!
//! ```text
//! [tag triple] [count triple] [payload ...]
//! ```
//!
//! A *zero* tag clears `count` words of the selected zone (no payload), an
//! *init* tag carries `count` words of payload (two triples per word for
//! 64-bit zones), and [`ProgramTag::FinalInit`] carries a fixed 258-word
//! block and ends the stream.

// ── IOP registers (addressed through EXT_MEM_TEST) ─────────────────────────

/// System configuration register.
pub const SYSCON: u32 = 0x00;
/// External port buffer 0, the boot-load destination.
pub const EPB0: u32 = 0x04;
/// DMA channel 10 control.
pub const DMAC10: u32 = 0x1C;
/// DMA status.
pub const DMASTAT: u32 = 0x37;

/// SYSCON value once the processor is out of reset and in host-boot mode.
pub const SYSCON_BOOT_READY: u32 = 0x10;
/// DMAC10 value once the boot DMA channel is armed.
pub const DMAC10_BOOT_READY: u32 = 0xA1;

/// DMASTAT bit: channel 11 transfer still active.
pub const DMASTAT_CH11_ACTIVE: u32 = 1 << 11;
/// DMAC11 control word: enable, receive, external handshake.
pub const DMAC11_ENABLE: u32 = 0x905;
/// DMAC11 control word: channel disabled.
pub const DMAC11_DISABLE: u32 = 0x904;

// ── Data memory ─────────────────────────────────────────────────────────────

/// Start of processor data memory as seen by the host.
pub const DATA_MEMORY_ADDRESS: u32 = 0x4A000;
/// Processor variable set to 1 once power-up initialisation is done.
pub const POWER_UP_INIT_DONE_ADDRESS: u32 = 0x4A03F;
/// Number of 32-bit parameter words per module.
pub const N_DSP_PAR: usize = 1280;
/// Number of writable I/O parameters at the start of the parameter block.
pub const DSP_IO_BORDER: usize = 832;

// ── Boot stream layout ─────────────────────────────────────────────────────

/// Host writes per boot word.
pub const WORDS_PER_TRIPLE: usize = 3;
/// Boot-kernel length in boot words.
pub const BOOT_KERNEL_WORDS: usize = 256;
/// Length of the block carried by [`ProgramTag::FinalInit`], in boot words.
pub const FINAL_INIT_WORDS: usize = 258;

/// Processor memory zone a segment targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryZone {
    /// Data memory.
    Data,
    /// Program memory.
    Program,
}

/// What the boot kernel does with a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Disposition {
    /// Clear `count` words; no payload follows.
    Zero,
    /// Copy `count` words of payload.
    Init,
}

/// Tag opening a boot-stream segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgramTag {
    /// Last segment: fixed-length block, ends the stream.
    FinalInit,
    /// Zero or initialise a zone of a given width.
    Segment {
        /// Zero-fill or download.
        disposition: Disposition,
        /// Target zone.
        zone: MemoryZone,
        /// Word width in bits: 16, 32, 40, 48 or 64.
        width: u8,
    },
}

impl ProgramTag {
    /// Decode a raw tag word. `None` for anything the boot kernel does not know.
    #[must_use]
    pub const fn from_word(word: u32) -> Option<Self> {
        use Disposition::{Init, Zero};
        use MemoryZone::{Data, Program};

        let (disposition, zone, width) = match word {
            0x00 => return Some(Self::FinalInit),
            0x01 => (Zero, Data, 16),
            0x02 => (Zero, Data, 32),
            0x03 => (Zero, Data, 40),
            0x04 => (Init, Data, 16),
            0x05 => (Init, Data, 32),
            0x07 => (Zero, Program, 16),
            0x08 => (Zero, Program, 32),
            0x09 => (Zero, Program, 40),
            0x0A => (Zero, Program, 48),
            0x0B => (Init, Program, 16),
            0x0C => (Init, Program, 32),
            0x0E => (Init, Program, 48),
            0x0F => (Zero, Data, 64),
            0x10 => (Init, Data, 64),
            0x11 => (Zero, Program, 64),
            0x12 => (Init, Program, 64),
            _ => return None,
        };
        Some(Self::Segment {
            disposition,
            zone,
            width,
        })
    }

    /// Host triples of payload per counted word.
    ///
    /// Zero segments carry no payload; 64-bit words need two triples.
    #[must_use]
    pub const fn triples_per_word(&self) -> usize {
        match self {
            Self::FinalInit => 1,
            Self::Segment {
                disposition: Disposition::Zero,
                ..
            } => 0,
            Self::Segment { width: 64, .. } => 2,
            Self::Segment { .. } => 1,
        }
    }
}
