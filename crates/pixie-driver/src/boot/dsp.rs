//! Processor program download
//!
//! The program file is parsed into a [`DspProgram`] before the processor
//! is touched, so an unknown tag or a truncated segment fails without
//! leaving the module half-booted.
//!
//! One boot attempt:
//!
//! ```text
//! reset (DSPDOWNLOAD|DSPRESET) ─► release ─► HBR ─► SYSCON == 0x10
//!   ─► DMAC10 == 0xA1 ─► kernel to EPB0 ─► release HBR
//!   ─► tagged segments (one HBR per three writes) ─► poll PowerUpInitDone
//! ```
//!
//! Attempts repeat while PowerUpInitDone stays clear.

use crate::csr;
use crate::error::{Operation, PixieError, Result};
use crate::hbr::{HbrGuard, HBR_RELEASE};
use crate::module::{ModuleHandle, Port};
use crate::retry::{self, Attempt};
use pixie_chip::csr::{DSPDOWNLOAD, DSPRESET};
use pixie_chip::dsp::{
    Disposition, ProgramTag, BOOT_KERNEL_WORDS, DMAC10, DMAC10_BOOT_READY, EPB0, FINAL_INIT_WORDS,
    POWER_UP_INIT_DONE_ADDRESS, SYSCON, SYSCON_BOOT_READY, WORDS_PER_TRIPLE,
};
use pixie_chip::regs::{EXT_MEM_TEST, HBR_DONE, WRT_DSP_MMA};
use std::ops::Range;
use std::path::Path;
use tracing::{debug, info, warn};

/// One tagged unit of the boot stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSegment {
    /// Decoded tag.
    pub tag: ProgramTag,
    /// Word count carried after the tag (fixed for the final block).
    pub count: usize,
    /// Raw host words of the segment, tag triple included.
    pub span: Range<usize>,
}

impl ProgramSegment {
    /// Raw words of the tag and count triples.
    const HEADER: usize = 2 * WORDS_PER_TRIPLE;
}

/// A parsed processor program.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DspProgram {
    words: Vec<u32>,
    segments: Vec<ProgramSegment>,
}

fn malformed(reason: String) -> PixieError {
    PixieError::integrity(Operation::DspBoot, -4, reason)
}

impl DspProgram {
    /// Parse a stream of host words (one 16-bit sub-word each).
    ///
    /// Parsing ends at the final-init segment; anything after it is ignored.
    ///
    /// # Errors
    ///
    /// Returns `DataIntegrityFailure` (status -4) for a stream shorter than
    /// the boot kernel, an unknown tag, a truncated segment, or a stream
    /// with no final-init segment.
    pub fn parse(words: Vec<u32>) -> Result<Self> {
        let kernel = BOOT_KERNEL_WORDS * WORDS_PER_TRIPLE;
        if words.len() < kernel {
            return Err(malformed(format!(
                "program is {} words, shorter than the {kernel}-word boot kernel",
                words.len()
            )));
        }

        let mut segments = Vec::new();
        let mut pos = kernel;
        while pos < words.len() {
            let tag = ProgramTag::from_word(words[pos])
                .ok_or_else(|| malformed(format!("unsupported tag {:#x} at word {pos}", words[pos])))?;

            let (count, len) = match tag {
                ProgramTag::FinalInit => (FINAL_INIT_WORDS, FINAL_INIT_WORDS * WORDS_PER_TRIPLE),
                ProgramTag::Segment { .. } => {
                    let count = words
                        .get(pos + WORDS_PER_TRIPLE)
                        .map(|&c| c as usize)
                        .ok_or_else(|| malformed(format!("segment at word {pos} has no count")))?;
                    let payload = count
                        .checked_mul(tag.triples_per_word() * WORDS_PER_TRIPLE)
                        .ok_or_else(|| malformed(format!("segment count {count} at word {pos} overflows")))?;
                    (count, ProgramSegment::HEADER + payload)
                }
            };

            let end = pos + len;
            if end > words.len() {
                return Err(malformed(format!(
                    "segment at word {pos} needs {len} words, {} remain",
                    words.len() - pos
                )));
            }
            segments.push(ProgramSegment {
                tag,
                count,
                span: pos..end,
            });
            pos = end;

            if tag == ProgramTag::FinalInit {
                return Ok(Self { words, segments });
            }
        }
        Err(malformed("program has no final-init segment".into()))
    }

    /// Parse a program file's bytes: 16-bit words, byte-swapped into host words.
    ///
    /// # Errors
    ///
    /// See [`parse`](Self::parse).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut raw = vec![0u16; (bytes.len() + 1) / 2];
        let dst = bytemuck::cast_slice_mut::<u16, u8>(&mut raw);
        let take = bytes.len().min(dst.len());
        dst[..take].copy_from_slice(&bytes[..take]);
        Self::parse(raw.into_iter().map(|w| u32::from(w.swap_bytes())).collect())
    }

    /// Read and parse a program file.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` (status -16) if the file cannot be read,
    /// otherwise see [`parse`](Self::parse).
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let bytes = std::fs::read(path).map_err(|e| PixieError::file(Operation::BootModule, -16, path, &e))?;
        Self::from_bytes(&bytes)
    }

    /// Boot-kernel words.
    #[must_use]
    pub fn kernel(&self) -> &[u32] {
        &self.words[..BOOT_KERNEL_WORDS * WORDS_PER_TRIPLE]
    }

    /// Segments in stream order, the final-init segment last.
    #[must_use]
    pub fn segments(&self) -> &[ProgramSegment] {
        &self.segments
    }

    /// Raw words of one segment.
    #[must_use]
    pub fn segment_words(&self, segment: &ProgramSegment) -> &[u32] {
        &self.words[segment.span.clone()]
    }
}

impl Port<'_> {
    fn write_words(&self, words: &[u32]) -> Result<()> {
        for &word in words {
            self.bus.write(WRT_DSP_MMA, word)?;
        }
        Ok(())
    }

    /// Write each triple under its own bus request.
    fn write_triples(&self, words: &[u32]) -> Result<()> {
        for triple in words.chunks(WORDS_PER_TRIPLE) {
            let hbr = HbrGuard::request(self.bus)?;
            self.write_words(triple)?;
            hbr.release()?;
        }
        Ok(())
    }

    fn stream_segments(&self, program: &DspProgram) -> Result<()> {
        for segment in program.segments() {
            let words = program.segment_words(segment);
            match segment.tag {
                ProgramTag::FinalInit => {
                    let hbr = HbrGuard::request(self.bus)?;
                    self.write_words(words)?;
                    hbr.release()?;
                }
                ProgramTag::Segment {
                    disposition: Disposition::Zero,
                    ..
                } => {
                    self.write_triples(words)?;
                    self.delay.sleep_ms(self.config.dsp_zero_settle_ms);
                }
                ProgramTag::Segment {
                    disposition: Disposition::Init,
                    ..
                } => self.write_triples(words)?,
            }
            debug!(
                "module {}: {:?} segment, {} words at {}",
                self.number, segment.tag, segment.count, segment.span.start
            );
        }
        Ok(())
    }

    /// Read an IOP register until it holds `expected`, re-selecting it each time.
    fn verify_iop(&self, register: u32, expected: u32, pause_ms: u64, status: i32, phase: &'static str) -> Result<()> {
        let attempts = self.config.dsp_register_retries + 1;
        let outcome = retry::bounded(attempts, |_| -> Result<Attempt<()>> {
            self.bus.write(EXT_MEM_TEST, register)?;
            let value = self.bus.read(WRT_DSP_MMA)?;
            if value == expected {
                return Ok(Attempt::Success(()));
            }
            debug!("module {}: {phase} read {value:#x}, want {expected:#x}", self.number);
            self.delay.sleep_ms(pause_ms);
            Ok(Attempt::Retry)
        })?;
        if outcome.is_success() {
            Ok(())
        } else {
            Err(PixieError::timeout(Operation::DspBoot, phase, attempts, status))
        }
    }

    /// Reset, download and wait for the power-up flag once.
    ///
    /// Returns whether the processor reported power-up initialisation done.
    fn boot_dsp_once(&self, program: &DspProgram) -> Result<bool> {
        let hold = self.config.dsp_reset_hold_ms;
        csr::set_bits(self.bus, DSPDOWNLOAD | DSPRESET)?;
        self.delay.sleep_ms(hold);
        self.bus.write(HBR_DONE, HBR_RELEASE)?;
        self.delay.sleep_ms(hold);

        self.bus.write(EXT_MEM_TEST, SYSCON)?;
        let hbr = HbrGuard::request(self.bus)?;
        self.delay.sleep_ms(hold);
        self.verify_iop(SYSCON, SYSCON_BOOT_READY, hold, -2, "SYSCON verify")?;
        self.verify_iop(DMAC10, DMAC10_BOOT_READY, 0, -3, "DMAC10 verify")?;

        self.bus.write(EXT_MEM_TEST, EPB0)?;
        self.write_words(program.kernel())?;
        hbr.release()?;

        self.stream_segments(program)?;

        let polls = self.config.power_up_polls;
        let done = retry::bounded(polls, |_| -> Result<Attempt<()>> {
            if self.dsp_read_word(POWER_UP_INIT_DONE_ADDRESS)? == 1 {
                return Ok(Attempt::Success(()));
            }
            self.delay.sleep_ms(self.config.power_up_poll_interval_ms);
            Ok(Attempt::Retry)
        })?;
        Ok(done.is_success())
    }

    pub(crate) fn boot_dsp(&self, program: &DspProgram) -> Result<()> {
        let attempts = self.config.dsp_boot_attempts;
        let outcome = retry::bounded(attempts, |attempt| -> Result<Attempt<u32>> {
            if self.boot_dsp_once(program)? {
                Ok(Attempt::Success(attempt))
            } else {
                warn!("module {}: processor did not finish power-up init, attempt {}", self.number, attempt + 1);
                Ok(Attempt::Retry)
            }
        })?;
        match outcome {
            Attempt::Success(retries) => {
                if retries > 0 {
                    warn!("module {}: processor booted after {retries} retries", self.number);
                }
                info!("module {}: processor booted", self.number);
                Ok(())
            }
            Attempt::Retry | Attempt::TimedOut => Err(PixieError::timeout(
                Operation::DspBoot,
                "power-up-init-done poll",
                attempts,
                -5,
            )),
        }
    }
}

impl ModuleHandle {
    /// Download a processor program and wait for it to initialise.
    ///
    /// # Errors
    ///
    /// Returns `ProtocolTimeout` if SYSCON (status -2) or DMAC10 (-3) never
    /// reads back its boot value, or if power-up init never completes
    /// within the allowed attempts (-5).
    pub fn boot_dsp(&mut self, program: &DspProgram) -> Result<()> {
        if let Some(port) = self.port()? {
            port.boot_dsp(program)?;
        }
        self.boot.dsp = true;
        Ok(())
    }
}
