//! Host bus request and processor memory access
//!
//! The processor's memory is reachable from the host only while the host
//! holds the local bus. [`HbrGuard`] writes the request on construction and
//! the release on drop, so every exit path gives the bus back.
//!
//! Writes go word by word through the memory-mapped access register. Reads
//! of more than one word are split into bursts of at most
//! [`ProtocolConfig::dma_block_words`](crate::config::ProtocolConfig) words;
//! a short tail is read word by word instead of paying for another burst.

use crate::bus::RegisterBus;
use crate::csr;
use crate::error::{Operation, PixieError, Result};
use crate::module::{IoDirection, ModuleHandle, Port};
use pixie_chip::csr::DSPDOWNLOAD;
use pixie_chip::regs::{EXT_MEM_TEST, HBR_DONE, REQUEST_HBR, WRT_DSP_MMA};

/// Value written to request the local bus.
pub const HBR_REQUEST: u32 = 0xC;

/// Value written to release the local bus.
pub const HBR_RELEASE: u32 = 0xD;

/// Holds the processor's local bus until released or dropped.
#[derive(Debug)]
#[must_use = "the bus is released as soon as the guard is dropped"]
pub struct HbrGuard<'a> {
    bus: &'a dyn RegisterBus,
    held: bool,
}

impl<'a> HbrGuard<'a> {
    /// Request the local bus.
    ///
    /// # Errors
    ///
    /// Propagates bus failures; nothing is released then.
    pub fn request(bus: &'a dyn RegisterBus) -> Result<Self> {
        bus.write(REQUEST_HBR, HBR_REQUEST)?;
        Ok(Self { bus, held: true })
    }

    /// Release the bus now and report the outcome.
    ///
    /// # Errors
    ///
    /// Propagates bus failures.
    pub fn release(mut self) -> Result<()> {
        self.held = false;
        self.bus.write(HBR_DONE, HBR_RELEASE)
    }
}

impl Drop for HbrGuard<'_> {
    fn drop(&mut self) {
        if self.held {
            if let Err(e) = self.bus.write(HBR_DONE, HBR_RELEASE) {
                tracing::warn!("failed to release host bus: {e}");
            }
        }
    }
}

/// Word offset as a processor address increment.
#[allow(clippy::cast_possible_truncation)]
const fn word_offset(index: usize) -> u32 {
    index as u32
}

fn check_span(address: u32, words: usize) -> Result<()> {
    match u32::try_from(words).ok().and_then(|n| address.checked_add(n)) {
        Some(_) => Ok(()),
        None => Err(PixieError::invalid_argument(format!(
            "{words} words from {address:#x} overrun the processor address space"
        ))),
    }
}

impl Port<'_> {
    /// Write `words` starting at processor address `address`.
    pub(crate) fn dsp_write(&self, address: u32, words: &[u32]) -> Result<()> {
        let hbr = HbrGuard::request(self.bus)?;
        csr::clear_bits(self.bus, DSPDOWNLOAD)?;
        self.bus.write(EXT_MEM_TEST, address)?;
        for &word in words {
            self.bus.write(WRT_DSP_MMA, word)?;
        }
        hbr.release()
    }

    /// Read one word without touching the CSR.
    pub(crate) fn dsp_read_word(&self, address: u32) -> Result<u32> {
        let hbr = HbrGuard::request(self.bus)?;
        self.bus.write(EXT_MEM_TEST, address)?;
        let word = self.bus.read(WRT_DSP_MMA)?;
        hbr.release()?;
        Ok(word)
    }

    /// Read consecutive words through the access register.
    fn dsp_read_single(&self, address: u32, out: &mut [u32]) -> Result<()> {
        let hbr = HbrGuard::request(self.bus)?;
        csr::clear_bits(self.bus, DSPDOWNLOAD)?;
        self.bus.write(EXT_MEM_TEST, address)?;
        for slot in out.iter_mut() {
            *slot = self.bus.read(WRT_DSP_MMA)?;
        }
        hbr.release()
    }

    /// Read `out.len()` words from processor address `address`.
    pub(crate) fn dsp_read(&mut self, address: u32, out: &mut [u32]) -> Result<()> {
        if let [single] = out {
            *single = self.dsp_read_word(address)?;
            return Ok(());
        }

        let block = self.config.dma_block_words.max(1);
        let whole = out.len() - out.len() % block;
        let (blocks, tail) = out.split_at_mut(whole);

        for (k, chunk) in blocks.chunks_exact_mut(block).enumerate() {
            let start = address.wrapping_add(word_offset(k * block));
            self.dsp_burst(start, chunk)
                .map_err(|e| e.within(Operation::DspMemoryIo, -1))?;
        }

        if tail.is_empty() {
            return Ok(());
        }
        let start = address.wrapping_add(word_offset(whole));
        if tail.len() < self.config.single_word_threshold {
            self.dsp_read_single(start, tail)
                .map_err(|e| e.within(Operation::DspMemoryIo, -2))
        } else {
            self.dsp_burst(start, tail)
                .map_err(|e| e.within(Operation::DspMemoryIo, -2))
        }
    }
}

impl ModuleHandle {
    /// Move words between the host and processor memory.
    ///
    /// For [`IoDirection::Write`] `data` is sent; for [`IoDirection::Read`]
    /// it is filled. Offline modules leave `data` untouched.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` if the range overruns the address space,
    /// `ResourceFailure` or `HardwareBusy` from the burst engine.
    pub fn dsp_memory_io(&mut self, address: u32, data: &mut [u32], direction: IoDirection) -> Result<()> {
        match direction {
            IoDirection::Read => self.dsp_read(address, data),
            IoDirection::Write => self.dsp_write(address, data),
        }
    }

    /// Read `out.len()` words of processor memory.
    ///
    /// # Errors
    ///
    /// See [`dsp_memory_io`](Self::dsp_memory_io).
    pub fn dsp_read(&mut self, address: u32, out: &mut [u32]) -> Result<()> {
        check_span(address, out.len())?;
        match self.port()? {
            Some(mut port) => port.dsp_read(address, out),
            None => Ok(()),
        }
    }

    /// Write words to processor memory.
    ///
    /// # Errors
    ///
    /// See [`dsp_memory_io`](Self::dsp_memory_io).
    pub fn dsp_write(&mut self, address: u32, words: &[u32]) -> Result<()> {
        check_span(address, words.len())?;
        match self.port()? {
            Some(port) => port.dsp_write(address, words),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{BusOp, PlxCall};
    use crate::module::rig::Rig;
    use pixie_chip::csr::EXTFIFO_WML;
    use pixie_chip::regs::CSR;

    fn hbr_balanced(rig: &Rig) -> (usize, usize) {
        (rig.bus.write_count(REQUEST_HBR), rig.bus.write_count(HBR_DONE))
    }

    #[test]
    fn test_guard_releases_on_drop() {
        let rig = Rig::new();
        {
            let _hbr = HbrGuard::request(&rig.bus).unwrap();
        }
        assert_eq!(rig.bus.writes_to(REQUEST_HBR), vec![HBR_REQUEST]);
        assert_eq!(rig.bus.writes_to(HBR_DONE), vec![HBR_RELEASE]);
    }

    #[test]
    fn test_explicit_release_writes_once() {
        let rig = Rig::new();
        HbrGuard::request(&rig.bus).unwrap().release().unwrap();
        assert_eq!(rig.bus.write_count(HBR_DONE), 1);
    }

    #[test]
    fn test_write_sequence() {
        let mut rig = Rig::new();
        rig.bus.set_register(CSR, 0x3);
        rig.port().dsp_write(0x4A000, &[7, 8, 9]).unwrap();

        let writes: Vec<_> = rig
            .bus
            .log()
            .into_iter()
            .filter_map(|op| match op {
                BusOp::Write { offset, value } => Some((offset, value)),
                BusOp::Read { .. } => None,
            })
            .collect();
        assert_eq!(
            writes,
            vec![
                (REQUEST_HBR.offset(), HBR_REQUEST),
                (CSR.offset(), 0x1),
                (EXT_MEM_TEST.offset(), 0x4A000),
                (WRT_DSP_MMA.offset(), 7),
                (WRT_DSP_MMA.offset(), 8),
                (WRT_DSP_MMA.offset(), 9),
                (HBR_DONE.offset(), HBR_RELEASE),
            ]
        );
    }

    #[test]
    fn test_single_word_read_skips_csr() {
        let mut rig = Rig::new();
        rig.bus.push_reads(WRT_DSP_MMA, [0xABCD]);
        let mut out = [0u32; 1];
        rig.port().dsp_read(0x4A03F, &mut out).unwrap();
        assert_eq!(out, [0xABCD]);
        assert_eq!(rig.bus.write_count(CSR), 0);
        assert_eq!(hbr_balanced(&rig), (1, 1));
        assert_eq!(rig.plx.call_count(), 0);
    }

    #[test]
    fn test_short_read_is_word_by_word() {
        let mut rig = Rig::new();
        rig.bus.push_reads(WRT_DSP_MMA, 0..10);
        let mut out = [0u32; 10];
        rig.port().dsp_read(0x4A000, &mut out).unwrap();
        assert_eq!(out.to_vec(), (0..10).collect::<Vec<_>>());
        assert_eq!(rig.plx.call_count(), 0);
    }

    fn burst_ready(rig: &Rig) {
        rig.bus.set_register(CSR, EXTFIFO_WML);
    }

    fn transfers(rig: &Rig) -> Vec<usize> {
        rig.plx
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                PlxCall::DmaTransfer { byte_count, .. } => Some(byte_count / 4),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_exact_block_is_one_burst() {
        let mut rig = Rig::new();
        burst_ready(&rig);
        let mut out = vec![0u32; 8192];
        rig.port().dsp_read(0, &mut out).unwrap();
        assert_eq!(transfers(&rig), vec![8192]);
        assert_eq!(out[8191], 8191);
    }

    #[test]
    fn test_small_tail_after_block() {
        let mut rig = Rig::new();
        burst_ready(&rig);
        let mut out = vec![0u32; 8192 + 10];
        rig.port().dsp_read(0, &mut out).unwrap();
        assert_eq!(transfers(&rig), vec![8192]);
        let (requests, releases) = hbr_balanced(&rig);
        assert_eq!(requests, releases);
    }

    #[test]
    fn test_large_tail_gets_second_burst() {
        let mut rig = Rig::new();
        burst_ready(&rig);
        let mut out = vec![0u32; 8192 + 100];
        rig.port().dsp_read(0, &mut out).unwrap();
        assert_eq!(transfers(&rig), vec![8192, 100]);
        assert_eq!(rig.bus.writes_to(pixie_chip::regs::WRT_DSP_II11), vec![0, 8192]);
    }

    #[test]
    fn test_block_failure_is_status_minus_one() {
        let mut rig = Rig::new();
        let mut out = vec![0u32; 8192];
        let err = rig.port().dsp_read(0, &mut out).unwrap_err();
        assert_eq!(err.status(), -1);
        assert_eq!(err.operation(), Some(Operation::DspMemoryIo));
    }

    #[test]
    fn test_failed_write_releases_bus() {
        let mut rig = Rig::new();
        rig.bus.fail_writes(WRT_DSP_MMA, 1, 1);
        let err = rig.port().dsp_write(0x4A000, &[1, 2, 3]).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::ResourceFailure);
        assert_eq!(rig.bus.writes_to(WRT_DSP_MMA), vec![1]);
        assert_eq!(hbr_balanced(&rig), (1, 1));
    }

    #[test]
    fn test_tail_read_failure_is_status_minus_two() {
        let mut rig = Rig::new();
        burst_ready(&rig);
        // The first read is the channel-11 status check before the burst.
        rig.bus.fail_reads(WRT_DSP_MMA, 1, 1);
        let mut out = vec![0u32; 8192 + 10];
        let err = rig.port().dsp_read(0, &mut out).unwrap_err();
        assert_eq!(err.status(), -2);
        assert_eq!(err.operation(), Some(Operation::DspMemoryIo));
        let (requests, releases) = hbr_balanced(&rig);
        assert_eq!(requests, releases);
    }

    #[test]
    fn test_span_overflow_rejected() {
        assert!(check_span(u32::MAX, 2).is_err());
        assert!(check_span(0x4A000, 1280).is_ok());
    }
}
