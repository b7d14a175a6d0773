//! Recording test doubles for the register bus and the bridge vendor library
//!
//! [`MockBus`] stands in for a module's register window and [`MockPlx`] for
//! the vendor library. Both are cheap to clone; clones share state, so a
//! test can keep one handle for assertions while the system under test
//! owns another.
//!
//! ```
//! use pixie_driver::mock::MockBus;
//! use pixie_driver::RegisterBus;
//! use pixie_driver::chip::regs::CSR;
//!
//! let bus = MockBus::new();
//! bus.push_reads(CSR, [0x40, 0x00]);
//! assert_eq!(bus.read(CSR).unwrap(), 0x40);
//! assert_eq!(bus.read(CSR).unwrap(), 0x00);
//! assert_eq!(bus.reads_of(CSR), 2);
//! ```

mod serial_peer;

pub use serial_peer::{SimulatedSerialPeer, EEPROM_BYTES};

use crate::bus::RegisterBus;
use crate::error::{Operation, PixieError, Result};
use crate::plx::{DmaChannel, DmaCloseStatus, DmaDescriptor, DmaRequest, PlxDevice, PlxLibrary};
use pixie_chip::pci::{PciLocation, PLX_9054_DEVICE_ID, PLX_VENDOR_ID};
use pixie_chip::regs::{RegisterAddress, SERIAL_BUS};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

// ── MockBus ─────────────────────────────────────────────────────────────────

/// One recorded register access.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusOp {
    /// Read of `offset` that returned `value`.
    Read {
        /// Byte offset.
        offset: usize,
        /// Value returned.
        value: u32,
    },
    /// Write of `value` to `offset`.
    Write {
        /// Byte offset.
        offset: usize,
        /// Value written.
        value: u32,
    },
}

impl BusOp {
    /// Offset touched by this access.
    #[must_use]
    pub const fn offset(&self) -> usize {
        match self {
            Self::Read { offset, .. } | Self::Write { offset, .. } => *offset,
        }
    }
}

#[derive(Debug, Default)]
struct BusState {
    registers: HashMap<usize, u32>,
    scripted: HashMap<usize, VecDeque<u32>>,
    log: Vec<BusOp>,
    peer: Option<SimulatedSerialPeer>,
    read_failures: HashMap<usize, Failure>,
    write_failures: HashMap<usize, Failure>,
}

fn trip(failures: &mut HashMap<usize, Failure>, offset: usize) -> bool {
    failures.get_mut(&offset).is_some_and(Failure::trip)
}

fn bus_failure(access: &str, offset: usize) -> PixieError {
    PixieError::resource(Operation::RegisterIo, -1, format!("injected {access} failure at {offset:#x}"))
}

/// In-memory register window recording every access.
///
/// Reads return, in order of preference: the next scripted value for the
/// offset, the simulated serial peer's data line (serial-bus offset only),
/// the last value written or set, or zero. Accesses made to fail with
/// [`fail_reads`](MockBus::fail_reads) or [`fail_writes`](MockBus::fail_writes)
/// are not logged.
#[derive(Debug, Clone, Default)]
pub struct MockBus {
    state: Arc<Mutex<BusState>>,
}

impl MockBus {
    /// Empty window, every register reads zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Window with a serial peer attached to the serial-bus register.
    #[must_use]
    pub fn with_serial_peer(peer: SimulatedSerialPeer) -> Self {
        let bus = Self::new();
        lock(&bus.state).peer = Some(peer);
        bus
    }

    /// Set the persistent value of a register.
    pub fn set_register(&self, reg: RegisterAddress, value: u32) {
        lock(&self.state).registers.insert(reg.offset(), value);
    }

    /// Queue one-shot values returned by the next reads of a register.
    pub fn push_reads(&self, reg: RegisterAddress, values: impl IntoIterator<Item = u32>) {
        lock(&self.state)
            .scripted
            .entry(reg.offset())
            .or_default()
            .extend(values);
    }

    /// Let reads of a register succeed `successes` times, then fail `times` times.
    pub fn fail_reads(&self, reg: RegisterAddress, successes: u32, times: u32) {
        lock(&self.state).read_failures.insert(
            reg.offset(),
            Failure {
                skip: successes,
                remaining: times,
            },
        );
    }

    /// Let writes to a register succeed `successes` times, then fail `times` times.
    pub fn fail_writes(&self, reg: RegisterAddress, successes: u32, times: u32) {
        lock(&self.state).write_failures.insert(
            reg.offset(),
            Failure {
                skip: successes,
                remaining: times,
            },
        );
    }

    /// Scripted reads not yet consumed for a register.
    #[must_use]
    pub fn pending_reads(&self, reg: RegisterAddress) -> usize {
        lock(&self.state)
            .scripted
            .get(&reg.offset())
            .map_or(0, VecDeque::len)
    }

    /// Every access so far, in order.
    #[must_use]
    pub fn log(&self) -> Vec<BusOp> {
        lock(&self.state).log.clone()
    }

    /// Number of accesses so far.
    #[must_use]
    pub fn access_count(&self) -> usize {
        lock(&self.state).log.len()
    }

    /// Forget recorded accesses; register values and scripts are kept.
    pub fn clear_log(&self) {
        lock(&self.state).log.clear();
    }

    /// Values written to a register, in order.
    #[must_use]
    pub fn writes_to(&self, reg: RegisterAddress) -> Vec<u32> {
        lock(&self.state)
            .log
            .iter()
            .filter_map(|op| match op {
                BusOp::Write { offset, value } if *offset == reg.offset() => Some(*value),
                _ => None,
            })
            .collect()
    }

    /// Number of writes to a register.
    #[must_use]
    pub fn write_count(&self, reg: RegisterAddress) -> usize {
        self.writes_to(reg).len()
    }

    /// Number of reads of a register.
    #[must_use]
    pub fn reads_of(&self, reg: RegisterAddress) -> usize {
        lock(&self.state)
            .log
            .iter()
            .filter(|op| matches!(op, BusOp::Read { offset, .. } if *offset == reg.offset()))
            .count()
    }

    /// Snapshot of the attached serial peer.
    #[must_use]
    pub fn serial_peer(&self) -> Option<SimulatedSerialPeer> {
        lock(&self.state).peer.clone()
    }
}

impl RegisterBus for MockBus {
    fn read32(&self, offset: usize) -> Result<u32> {
        let mut state = lock(&self.state);
        if trip(&mut state.read_failures, offset) {
            return Err(bus_failure("read", offset));
        }
        let scripted = state.scripted.get_mut(&offset).and_then(VecDeque::pop_front);
        let value = match (scripted, &state.peer) {
            (Some(v), _) => v,
            (None, Some(peer)) if offset == SERIAL_BUS.offset() => peer.read(),
            (None, _) => state.registers.get(&offset).copied().unwrap_or(0),
        };
        state.log.push(BusOp::Read { offset, value });
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        let mut state = lock(&self.state);
        if trip(&mut state.write_failures, offset) {
            return Err(bus_failure("write", offset));
        }
        state.log.push(BusOp::Write { offset, value });
        state.registers.insert(offset, value);
        if offset == SERIAL_BUS.offset() {
            if let Some(peer) = state.peer.as_mut() {
                peer.write(value);
            }
        }
        Ok(())
    }
}

// ── MockPlx ─────────────────────────────────────────────────────────────────

/// One recorded vendor-library call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlxCall {
    /// `find_device` at an enumeration index.
    FindDevice(usize),
    /// Successful `open` of a device.
    Open(PciLocation),
    /// Successful `map_bar`.
    MapBar(PciLocation, u8),
    /// `unmap_bar`.
    UnmapBar(PciLocation),
    /// `close`.
    Close(PciLocation),
    /// `dma_open`.
    DmaOpen(PciLocation),
    /// `dma_transfer`.
    DmaTransfer {
        /// Device.
        location: PciLocation,
        /// Local source address.
        local_address: u32,
        /// Bytes requested.
        byte_count: usize,
    },
    /// `dma_close`.
    DmaClose(PciLocation),
    /// `reset`.
    Reset(PciLocation),
}

/// Call that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    /// `find_device` at an enumeration index.
    FindDevice(usize),
    /// `open` of the n-th registered device.
    Open(usize),
    /// `map_bar` on the n-th registered device.
    MapBar(usize),
    /// `unmap_bar`.
    UnmapBar,
    /// `close`.
    Close,
    /// `dma_open`.
    DmaOpen,
    /// `dma_transfer`.
    DmaTransfer,
    /// `dma_close` returns an error.
    DmaClose,
    /// `dma_close` reports a transfer still in progress.
    DmaCloseInProgress,
    /// `reset`.
    Reset,
}

#[derive(Debug, Clone, Copy)]
struct Failure {
    skip: u32,
    remaining: u32,
}

impl Failure {
    fn trip(&mut self) -> bool {
        if self.skip > 0 {
            self.skip -= 1;
            return false;
        }
        match self.remaining {
            0 => false,
            u32::MAX => true,
            _ => {
                self.remaining -= 1;
                true
            }
        }
    }
}

#[derive(Debug)]
struct PlxState {
    devices: Vec<(PciLocation, MockBus)>,
    calls: Vec<PlxCall>,
    failures: HashMap<FailPoint, Failure>,
    dma_words: VecDeque<u32>,
    dma_counter: u32,
}

impl PlxState {
    fn trip(&mut self, point: FailPoint) -> bool {
        self.failures.get_mut(&point).is_some_and(Failure::trip)
    }

    fn index_of(&self, location: &PciLocation) -> Option<usize> {
        self.devices.iter().position(|(loc, _)| loc == location)
    }
}

/// Vendor-library double with a call log and per-call failure injection.
///
/// DMA transfers fill the buffer from queued words, then from a counter
/// that increments per word.
#[derive(Debug, Clone)]
pub struct MockPlx {
    state: Arc<Mutex<PlxState>>,
}

impl Default for MockPlx {
    fn default() -> Self {
        Self::new()
    }
}

impl MockPlx {
    /// Library with no devices.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PlxState {
                devices: Vec::new(),
                calls: Vec::new(),
                failures: HashMap::new(),
                dma_words: VecDeque::new(),
                dma_counter: 0,
            })),
        }
    }

    /// Register a bridge whose register window is `bus`.
    #[must_use]
    pub fn with_device(self, location: PciLocation, bus: MockBus) -> Self {
        lock(&self.state).devices.push((location, bus));
        self
    }

    /// Register a bridge at `0000:<bus>:<slot>.0` whose expander reports `slot`.
    #[must_use]
    pub fn with_module_in_slot(self, pci_bus: u8, slot: u8) -> Self {
        let location = PciLocation {
            domain: 0,
            bus: pci_bus,
            slot,
            function: 0,
        };
        let bus = MockBus::with_serial_peer(SimulatedSerialPeer::new().in_slot(slot));
        self.with_device(location, bus)
    }

    /// Make a call fail the next `times` times (`u32::MAX` for always).
    pub fn fail(&self, point: FailPoint, times: u32) {
        self.fail_after(point, 0, times);
    }

    /// Let a call succeed `successes` times, then fail it `times` times.
    pub fn fail_after(&self, point: FailPoint, successes: u32, times: u32) {
        lock(&self.state).failures.insert(
            point,
            Failure {
                skip: successes,
                remaining: times,
            },
        );
    }

    /// Make a call fail every time.
    pub fn fail_always(&self, point: FailPoint) {
        self.fail(point, u32::MAX);
    }

    /// Queue words returned by the next DMA transfers.
    pub fn push_dma_words(&self, words: impl IntoIterator<Item = u32>) {
        lock(&self.state).dma_words.extend(words);
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<PlxCall> {
        lock(&self.state).calls.clone()
    }

    /// Number of calls so far.
    #[must_use]
    pub fn call_count(&self) -> usize {
        lock(&self.state).calls.len()
    }

    /// Number of recorded calls matching a predicate.
    pub fn count(&self, pred: impl Fn(&PlxCall) -> bool) -> usize {
        lock(&self.state).calls.iter().filter(|c| pred(*c)).count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        lock(&self.state).calls.clear();
    }

    /// Register window of the n-th registered device.
    #[must_use]
    pub fn bus(&self, index: usize) -> Option<MockBus> {
        lock(&self.state).devices.get(index).map(|(_, bus)| bus.clone())
    }

    /// Devices opened and not yet closed.
    #[must_use]
    pub fn open_devices(&self) -> usize {
        let opens = self.count(|c| matches!(c, PlxCall::Open(_)));
        let closes = self.count(|c| matches!(c, PlxCall::Close(_)));
        opens.saturating_sub(closes)
    }

    /// Windows mapped and not yet unmapped.
    #[must_use]
    pub fn mapped_windows(&self) -> usize {
        let maps = self.count(|c| matches!(c, PlxCall::MapBar(..)));
        let unmaps = self.count(|c| matches!(c, PlxCall::UnmapBar(_)));
        maps.saturating_sub(unmaps)
    }
}

fn injected(operation: Operation, call: &str) -> PixieError {
    PixieError::resource(operation, -1, format!("injected {call} failure"))
}

impl PlxLibrary for MockPlx {
    fn find_device(&self, vendor_id: u16, device_id: u16, index: usize) -> Result<Option<PciLocation>> {
        let mut state = lock(&self.state);
        state.calls.push(PlxCall::FindDevice(index));
        if state.trip(FailPoint::FindDevice(index)) {
            return Err(injected(Operation::InitSystem, "find"));
        }
        if vendor_id != PLX_VENDOR_ID || device_id != PLX_9054_DEVICE_ID {
            return Ok(None);
        }
        Ok(state.devices.get(index).map(|(loc, _)| *loc))
    }

    fn open(&self, location: &PciLocation) -> Result<Box<dyn PlxDevice>> {
        let mut state = lock(&self.state);
        let index = state.index_of(location).ok_or_else(|| {
            PixieError::resource(Operation::InitSystem, -1, format!("no device at {location}"))
        })?;
        if state.trip(FailPoint::Open(index)) {
            return Err(injected(Operation::InitSystem, "open"));
        }
        state.calls.push(PlxCall::Open(*location));
        Ok(Box::new(MockDevice {
            state: Arc::clone(&self.state),
            location: *location,
            index,
        }))
    }
}

/// Device handle returned by [`MockPlx::open`].
#[derive(Debug)]
struct MockDevice {
    state: Arc<Mutex<PlxState>>,
    location: PciLocation,
    index: usize,
}

impl PlxDevice for MockDevice {
    fn location(&self) -> PciLocation {
        self.location
    }

    fn map_bar(&mut self, bar: u8) -> Result<Box<dyn RegisterBus>> {
        let mut state = lock(&self.state);
        if state.trip(FailPoint::MapBar(self.index)) {
            return Err(injected(Operation::InitSystem, "map"));
        }
        state.calls.push(PlxCall::MapBar(self.location, bar));
        let bus = state.devices[self.index].1.clone();
        Ok(Box::new(bus))
    }

    fn unmap_bar(&mut self, _window: Box<dyn RegisterBus>) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(PlxCall::UnmapBar(self.location));
        if state.trip(FailPoint::UnmapBar) {
            return Err(injected(Operation::CloseModule, "unmap"));
        }
        Ok(())
    }

    fn dma_open(&mut self, _descriptor: &DmaDescriptor) -> Result<DmaChannel> {
        let mut state = lock(&self.state);
        state.calls.push(PlxCall::DmaOpen(self.location));
        if state.trip(FailPoint::DmaOpen) {
            return Err(injected(Operation::DspBurst, "DMA open"));
        }
        Ok(DmaChannel::PRIMARY)
    }

    fn dma_transfer(&mut self, _channel: DmaChannel, request: &DmaRequest, buffer: &mut [u32]) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(PlxCall::DmaTransfer {
            location: self.location,
            local_address: request.local_address,
            byte_count: request.byte_count,
        });
        if state.trip(FailPoint::DmaTransfer) {
            return Err(injected(Operation::DspBurst, "DMA transfer"));
        }
        let words = request.words().min(buffer.len());
        for slot in &mut buffer[..words] {
            *slot = match state.dma_words.pop_front() {
                Some(w) => w,
                None => {
                    let w = state.dma_counter;
                    state.dma_counter = state.dma_counter.wrapping_add(1);
                    w
                }
            };
        }
        Ok(())
    }

    fn dma_close(&mut self, _channel: DmaChannel) -> Result<DmaCloseStatus> {
        let mut state = lock(&self.state);
        state.calls.push(PlxCall::DmaClose(self.location));
        if state.trip(FailPoint::DmaClose) {
            return Err(injected(Operation::DspBurst, "DMA close"));
        }
        if state.trip(FailPoint::DmaCloseInProgress) {
            return Ok(DmaCloseStatus::InProgress);
        }
        Ok(DmaCloseStatus::Closed)
    }

    fn reset(&mut self) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(PlxCall::Reset(self.location));
        if state.trip(FailPoint::Reset) {
            return Err(injected(Operation::DspBurst, "reset"));
        }
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        let mut state = lock(&self.state);
        state.calls.push(PlxCall::Close(self.location));
        if state.trip(FailPoint::Close) {
            return Err(injected(Operation::CloseModule, "close"));
        }
        Ok(())
    }
}
