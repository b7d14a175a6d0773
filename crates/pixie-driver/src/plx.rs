//! PCI bridge vendor library seam
//!
//! The PLX 9054 bridge is driven through a vendor library that enumerates
//! devices, maps the register BAR and runs block DMA from the module's
//! local bus into host memory. [`PlxLibrary`] and [`PlxDevice`] describe
//! exactly the calls the protocol layers make, so discovery and the burst
//! engine can run against [`SysfsPlx`](crate::backends::sysfs::SysfsPlx)
//! on a real host or [`MockPlx`](crate::mock::MockPlx) in tests.

use crate::bus::RegisterBus;
use crate::error::Result;
use pixie_chip::pci::PciLocation;
use std::fmt::Debug;

/// Entry point of the bridge vendor library.
pub trait PlxLibrary: Debug + Send + Sync {
    /// Return the location of the `index`-th bridge matching the IDs, or
    /// `None` once enumeration is exhausted.
    ///
    /// # Errors
    ///
    /// Returns error if the underlying enumeration fails.
    fn find_device(&self, vendor_id: u16, device_id: u16, index: usize) -> Result<Option<PciLocation>>;

    /// Open the bridge at `location`.
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be opened.
    fn open(&self, location: &PciLocation) -> Result<Box<dyn PlxDevice>>;
}

/// An open bridge.
pub trait PlxDevice: Debug + Send {
    /// Bus position this handle was opened at.
    fn location(&self) -> PciLocation;

    /// Map a BAR as a register window.
    ///
    /// # Errors
    ///
    /// Returns error if the BAR cannot be mapped.
    fn map_bar(&mut self, bar: u8) -> Result<Box<dyn RegisterBus>>;

    /// Release a window returned by [`map_bar`](Self::map_bar).
    ///
    /// # Errors
    ///
    /// Returns error if the library refuses the unmap.
    fn unmap_bar(&mut self, window: Box<dyn RegisterBus>) -> Result<()>;

    /// Claim a block-DMA channel.
    ///
    /// # Errors
    ///
    /// Returns error if the channel is unavailable.
    fn dma_open(&mut self, descriptor: &DmaDescriptor) -> Result<DmaChannel>;

    /// Run one local-to-host transfer of `request.byte_count` bytes into `buffer`.
    ///
    /// # Errors
    ///
    /// Returns error on timeout or vendor failure.
    fn dma_transfer(&mut self, channel: DmaChannel, request: &DmaRequest, buffer: &mut [u32]) -> Result<()>;

    /// Release a channel.
    ///
    /// # Errors
    ///
    /// Returns error if the library reports a failure other than a
    /// transfer still in flight.
    fn dma_close(&mut self, channel: DmaChannel) -> Result<DmaCloseStatus>;

    /// Reset the bridge, aborting any DMA in flight.
    ///
    /// # Errors
    ///
    /// Returns error if the reset is refused.
    fn reset(&mut self) -> Result<()>;

    /// Close the device.
    ///
    /// # Errors
    ///
    /// Returns error if the library fails to close the handle.
    fn close(self: Box<Self>) -> Result<()>;
}

/// A claimed block-DMA channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DmaChannel(u8);

impl DmaChannel {
    /// The channel every burst in this crate uses.
    pub const PRIMARY: Self = Self(0);

    /// Wrap a raw channel number.
    #[must_use]
    pub const fn new(number: u8) -> Self {
        Self(number)
    }

    /// Raw channel number.
    #[must_use]
    pub const fn number(self) -> u8 {
        self.0
    }
}

/// Local bus width programmed into a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalBusWidth {
    /// 8-bit local bus.
    Bits8,
    /// 16-bit local bus.
    Bits16,
    /// 32-bit local bus.
    Bits32,
}

impl LocalBusWidth {
    /// Encoding used by the bridge's DMA mode register.
    #[must_use]
    pub const fn encoding(self) -> u8 {
        match self {
            Self::Bits8 => 0,
            Self::Bits16 => 1,
            Self::Bits32 => 2,
        }
    }
}

/// Channel properties set at open time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaDescriptor {
    /// Honour the local READY# input.
    pub ready_input: bool,
    /// Burst on the local bus.
    pub burst: bool,
    /// Burst without the 4-cycle limit.
    pub burst_infinite: bool,
    /// Keep the local address constant (FIFO source).
    pub const_local_address: bool,
    /// Local bus width.
    pub local_bus_width: LocalBusWidth,
}

impl DmaDescriptor {
    /// Settings for draining a module FIFO: ready input, infinite burst,
    /// constant local address, 32-bit local bus.
    pub const FIFO_READOUT: Self = Self {
        ready_input: true,
        burst: true,
        burst_infinite: true,
        const_local_address: true,
        local_bus_width: LocalBusWidth::Bits32,
    };
}

/// Transfer direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaDirection {
    /// Module local bus into host memory.
    LocalToPci,
    /// Host memory onto the module local bus.
    PciToLocal,
}

/// One block transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaRequest {
    /// Direction.
    pub direction: DmaDirection,
    /// Local bus address (FIFO window).
    pub local_address: u32,
    /// Bytes to move; always four times the word count.
    pub byte_count: usize,
    /// Completion timeout in milliseconds.
    pub timeout_ms: u32,
}

impl DmaRequest {
    /// A FIFO readout of `words` 32-bit words from `local_address`.
    #[must_use]
    pub const fn readout(local_address: u32, words: usize, timeout_ms: u32) -> Self {
        Self {
            direction: DmaDirection::LocalToPci,
            local_address,
            byte_count: words * 4,
            timeout_ms,
        }
    }

    /// Number of 32-bit words this request moves.
    #[must_use]
    pub const fn words(&self) -> usize {
        self.byte_count / 4
    }
}

/// Outcome of a successful [`PlxDevice::dma_close`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DmaCloseStatus {
    /// Channel released.
    Closed,
    /// A transfer is still in flight; the bridge must be reset before
    /// the channel can be released.
    InProgress,
}
