//! Block DMA through the bridge
//!
//! Every burst has the same shape: claim a channel, prime the source,
//! wait for the watermark, move the block, release the channel. Callers
//! differ in how the source is primed and how readiness is signalled, and
//! each reports failures with its own status table ([`BurstCodes`]).
//!
//! The channel is always released, including after a failed transfer. A
//! close that finds a transfer still in flight resets the bridge and closes
//! once more before giving up.

use crate::bus::RegisterBus;
use crate::error::{Operation, PixieError, Result};
use crate::hbr::HbrGuard;
use crate::module::Port;
use crate::plx::{DmaChannel, DmaCloseStatus, DmaDescriptor, DmaRequest};
use pixie_chip::csr::{DSPDOWNLOAD, EXTFIFO_WML};
use pixie_chip::dsp::{DMAC11_DISABLE, DMAC11_ENABLE, DMASTAT, DMASTAT_CH11_ACTIVE};
use pixie_chip::regs::{
    local, RegisterAddress, CSR, EXT_MEM_TEST, RD_WRT_FIFO_WML, SET_INT_FIFO, WRT_DSP_C11, WRT_DSP_DMAC11, WRT_DSP_EC11,
    WRT_DSP_II11, WRT_DSP_IM11, WRT_DSP_MMA,
};

/// Status codes reported by one burst caller, per phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct BurstCodes {
    pub(crate) operation: Operation,
    pub(crate) open: i32,
    pub(crate) watermark: i32,
    pub(crate) transfer: i32,
    pub(crate) close: i32,
}

impl BurstCodes {
    pub(crate) const DSP: Self = Self {
        operation: Operation::DspBurst,
        open: -2,
        watermark: -3,
        transfer: -4,
        close: -5,
    };

    pub(crate) const FIFO: Self = Self {
        operation: Operation::FifoDrain,
        open: -1,
        watermark: -2,
        transfer: -3,
        close: -4,
    };

    /// External memory has no watermark phase.
    pub(crate) const EXTERNAL_MEMORY: Self = Self {
        operation: Operation::ExternalMemoryIo,
        open: -1,
        watermark: -1,
        transfer: -2,
        close: -3,
    };
}

/// How the engine learns the source holds enough data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Watermark {
    /// Source is ready as soon as it is primed.
    Immediate,
    /// The processor raises the watermark flag in the CSR.
    CsrFlag,
    /// The FIFO level register reaches the given word count.
    Level(u32),
}

impl Port<'_> {
    /// Run one burst of `out.len()` words from `local_address`.
    ///
    /// `prime` is written after the channel is claimed.
    pub(crate) fn burst(
        &mut self,
        codes: BurstCodes,
        local_address: u32,
        out: &mut [u32],
        prime: Option<(RegisterAddress, u32)>,
        watermark: Watermark,
    ) -> Result<()> {
        let channel = self
            .device
            .dma_open(&DmaDescriptor::FIFO_READOUT)
            .map_err(|e| PixieError::resource(codes.operation, codes.open, format!("DMA channel open failed: {e}")))?;

        let moved = self.fill(codes, channel, local_address, out, prime, watermark);
        let closed = self.close_channel(codes, channel);
        moved.and(closed)
    }

    fn fill(
        &mut self,
        codes: BurstCodes,
        channel: DmaChannel,
        local_address: u32,
        out: &mut [u32],
        prime: Option<(RegisterAddress, u32)>,
        watermark: Watermark,
    ) -> Result<()> {
        if let Some((reg, value)) = prime {
            self.bus.write(reg, value)?;
        }
        self.wait_watermark(codes, watermark)?;

        let request = DmaRequest::readout(local_address, out.len(), self.config.dma_timeout_ms);
        self.device.dma_transfer(channel, &request, out).map_err(|e| {
            PixieError::resource(
                codes.operation,
                codes.transfer,
                format!("transfer of {} words from {local_address:#x} failed: {e}", out.len()),
            )
        })
    }

    fn wait_watermark(&self, codes: BurstCodes, watermark: Watermark) -> Result<()> {
        let polls = self.config.watermark_polls;
        let reached = match watermark {
            Watermark::Immediate => return Ok(()),
            Watermark::CsrFlag => self.poll(polls, |bus| Ok(bus.read(CSR)? & EXTFIFO_WML != 0))?,
            Watermark::Level(words) => self.poll(polls, |bus| Ok(bus.read(RD_WRT_FIFO_WML)? >= words))?,
        };
        if reached {
            Ok(())
        } else {
            Err(PixieError::timeout(codes.operation, "watermark poll", polls, codes.watermark))
        }
    }

    fn poll(&self, polls: u32, mut ready: impl FnMut(&dyn RegisterBus) -> Result<bool>) -> Result<bool> {
        for _ in 0..polls {
            if ready(self.bus)? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Release a channel, resetting the bridge once if a transfer is stuck.
    fn close_channel(&mut self, codes: BurstCodes, channel: DmaChannel) -> Result<()> {
        let closed = |e: PixieError| {
            PixieError::resource(codes.operation, codes.close, format!("DMA channel close failed: {e}"))
        };
        match self.device.dma_close(channel).map_err(closed)? {
            DmaCloseStatus::Closed => Ok(()),
            DmaCloseStatus::InProgress => {
                tracing::warn!("module {}: DMA still in progress on close, resetting bridge", self.number);
                if let Err(e) = self.device.reset() {
                    tracing::warn!("module {}: bridge reset failed: {e}", self.number);
                }
                match self.device.dma_close(channel).map_err(closed)? {
                    DmaCloseStatus::Closed => Ok(()),
                    DmaCloseStatus::InProgress => Err(PixieError::busy(
                        codes.operation,
                        codes.close,
                        "DMA channel still busy after bridge reset",
                    )),
                }
            }
        }
    }

    /// Burst `out.len()` words of processor memory starting at `address`.
    ///
    /// Programs processor DMA channel 11 under a host bus request, drains
    /// the internal FIFO, then disables the channel again.
    pub(crate) fn dsp_burst(&mut self, address: u32, out: &mut [u32]) -> Result<()> {
        let words = u32::try_from(out.len())
            .map_err(|_| PixieError::invalid_argument(format!("{} words exceed one burst", out.len())))?;

        let hbr = HbrGuard::request(self.bus)?;
        self.bus.write(EXT_MEM_TEST, DMASTAT)?;
        if self.bus.read(WRT_DSP_MMA)? & DMASTAT_CH11_ACTIVE != 0 {
            return Err(PixieError::busy(Operation::DspBurst, -1, "processor DMA channel 11 is active"));
        }

        let result = self
            .program_channel11(address, words)
            .and_then(|()| hbr.release())
            .and_then(|()| {
                self.burst(
                    BurstCodes::DSP,
                    local::DSP_FIFO,
                    out,
                    Some((SET_INT_FIFO, 0)),
                    Watermark::CsrFlag,
                )
            });
        let disabled = self.disable_channel11();
        result.and(disabled)
    }

    fn program_channel11(&self, address: u32, words: u32) -> Result<()> {
        crate::csr::clear_bits(self.bus, DSPDOWNLOAD)?;
        self.bus.write(WRT_DSP_II11, address)?;
        self.bus.write(WRT_DSP_C11, words)?;
        self.bus.write(WRT_DSP_IM11, 1)?;
        self.bus.write(WRT_DSP_EC11, words)?;
        self.bus.write(WRT_DSP_DMAC11, DMAC11_ENABLE)?;
        self.bus.write(RD_WRT_FIFO_WML, words / 2)
    }

    fn disable_channel11(&self) -> Result<()> {
        let hbr = HbrGuard::request(self.bus)?;
        self.bus.write(WRT_DSP_DMAC11, DMAC11_DISABLE)?;
        hbr.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{FailPoint, PlxCall};
    use crate::module::rig::Rig;
    use pixie_chip::regs::{HBR_DONE, REQUEST_HBR};

    fn ready_rig() -> Rig {
        let rig = Rig::new();
        rig.bus.set_register(CSR, EXTFIFO_WML);
        rig
    }

    fn opens_and_closes(rig: &Rig) -> (usize, usize) {
        (
            rig.plx.count(|c| matches!(c, PlxCall::DmaOpen(_))),
            rig.plx.count(|c| matches!(c, PlxCall::DmaClose(_))),
        )
    }

    #[test]
    fn test_dsp_burst_programs_channel11() {
        let mut rig = ready_rig();
        rig.plx.push_dma_words([10, 11, 12, 13]);
        let mut out = [0u32; 4];
        rig.port().dsp_burst(0x4A000, &mut out).unwrap();

        assert_eq!(out, [10, 11, 12, 13]);
        assert_eq!(rig.bus.writes_to(WRT_DSP_II11), vec![0x4A000]);
        assert_eq!(rig.bus.writes_to(WRT_DSP_C11), vec![4]);
        assert_eq!(rig.bus.writes_to(WRT_DSP_EC11), vec![4]);
        assert_eq!(rig.bus.writes_to(WRT_DSP_IM11), vec![1]);
        assert_eq!(rig.bus.writes_to(RD_WRT_FIFO_WML), vec![2]);
        assert_eq!(rig.bus.writes_to(WRT_DSP_DMAC11), vec![DMAC11_ENABLE, DMAC11_DISABLE]);
        assert_eq!(rig.bus.writes_to(SET_INT_FIFO), vec![0]);
        assert_eq!(rig.bus.write_count(REQUEST_HBR), 2);
        assert_eq!(rig.bus.write_count(HBR_DONE), 2);
        assert_eq!(opens_and_closes(&rig), (1, 1));
        assert!(rig.plx.calls().contains(&PlxCall::DmaTransfer {
            location: rig.device.location(),
            local_address: local::DSP_FIFO,
            byte_count: 16,
        }));
    }

    #[test]
    fn test_channel11_programming_failure_releases_bus() {
        let mut rig = ready_rig();
        rig.bus.fail_writes(WRT_DSP_C11, 0, 1);
        let err = rig.port().dsp_burst(0x4A000, &mut [0u32; 64]).unwrap_err();

        assert_eq!(err.kind(), ErrorKind::ResourceFailure);
        assert_eq!(rig.bus.write_count(REQUEST_HBR), rig.bus.write_count(HBR_DONE));
        assert_eq!(rig.bus.writes_to(WRT_DSP_DMAC11), vec![DMAC11_DISABLE]);
        assert_eq!(opens_and_closes(&rig), (0, 0));
    }

    #[test]
    fn test_active_channel_is_busy_and_releases_bus() {
        let mut rig = ready_rig();
        rig.bus.push_reads(WRT_DSP_MMA, [DMASTAT_CH11_ACTIVE]);
        let err = rig.port().dsp_burst(0, &mut [0u32; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareBusy);
        assert_eq!(err.status(), -1);
        assert_eq!(rig.bus.write_count(HBR_DONE), 1);
        assert_eq!(rig.plx.call_count(), 0);
    }

    #[test]
    fn test_open_failure() {
        let mut rig = ready_rig();
        rig.plx.fail(FailPoint::DmaOpen, 1);
        let err = rig.port().dsp_burst(0, &mut [0u32; 4]).unwrap_err();
        assert_eq!(err.status(), -2);
        assert_eq!(opens_and_closes(&rig), (1, 0));
        assert_eq!(rig.bus.writes_to(WRT_DSP_DMAC11), vec![DMAC11_ENABLE, DMAC11_DISABLE]);
    }

    #[test]
    fn test_watermark_timeout_closes_channel() {
        let mut rig = Rig::new();
        let err = rig.port().dsp_burst(0, &mut [0u32; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProtocolTimeout);
        assert_eq!(err.status(), -3);
        assert_eq!(opens_and_closes(&rig), (1, 1));
        assert_eq!(rig.bus.reads_of(CSR), 1 + 1000);
    }

    #[test]
    fn test_transfer_failure_still_closes() {
        let mut rig = ready_rig();
        rig.plx.fail(FailPoint::DmaTransfer, 1);
        let err = rig.port().dsp_burst(0, &mut [0u32; 4]).unwrap_err();
        assert_eq!(err.status(), -4);
        assert_eq!(opens_and_closes(&rig), (1, 1));
    }

    #[test]
    fn test_close_in_progress_resets_and_retries() {
        let mut rig = ready_rig();
        rig.plx.fail(FailPoint::DmaCloseInProgress, 1);
        rig.port().dsp_burst(0, &mut [0u32; 4]).unwrap();
        assert_eq!(opens_and_closes(&rig), (1, 2));
        assert_eq!(rig.plx.count(|c| matches!(c, PlxCall::Reset(_))), 1);
    }

    #[test]
    fn test_close_stuck_after_reset() {
        let mut rig = ready_rig();
        rig.plx.fail_always(FailPoint::DmaCloseInProgress);
        let err = rig.port().dsp_burst(0, &mut [0u32; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::HardwareBusy);
        assert_eq!(err.status(), -5);
    }

    #[test]
    fn test_close_error_is_resource_failure() {
        let mut rig = ready_rig();
        rig.plx.fail(FailPoint::DmaClose, 1);
        let err = rig.port().dsp_burst(0, &mut [0u32; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ResourceFailure);
        assert_eq!(err.status(), -5);
        assert_eq!(rig.plx.count(|c| matches!(c, PlxCall::Reset(_))), 0);
    }

    #[test]
    fn test_level_watermark() {
        let mut rig = Rig::new();
        rig.bus.push_reads(RD_WRT_FIFO_WML, [1, 2, 8]);
        let mut out = [0u32; 8];
        rig.port()
            .burst(BurstCodes::FIFO, local::EXT_FIFO, &mut out, None, Watermark::Level(8))
            .unwrap();
        assert_eq!(rig.bus.reads_of(RD_WRT_FIFO_WML), 3);
    }
}
