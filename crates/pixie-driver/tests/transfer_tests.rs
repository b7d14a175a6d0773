//! Data path tests
//!
//! Serial devices, processor memory under the host bus request, block
//! splitting of processor reads, FIFO readout and external memory, driven
//! through [`System`] over a mocked bridge.

use pixie_driver::chip::csr::{EXTFIFO_WML, PCIACTIVE};
use pixie_driver::chip::regs::{
    local, CSR, EXT_MEM_TEST, HBR_DONE, RD_WRT_FIFO_WML, REQUEST_HBR, WRT_DSP_C11, WRT_DSP_II11, WRT_DSP_MMA,
};
use pixie_driver::mock::{FailPoint, MockBus, MockPlx, PlxCall, SimulatedSerialPeer};
use pixie_driver::serial::Eeprom;
use pixie_driver::{ErrorKind, IoDirection, NoDelay, Operation, System, SystemConfig};
use std::sync::Arc;

const BLOCK: usize = 8192;

/// One online module in slot 2, plus its register window.
fn rig() -> (MockPlx, MockBus, System) {
    let plx = MockPlx::new().with_module_in_slot(5, 2);
    let system = System::init(&plx, &[2], SystemConfig::default().with_delay(Arc::new(NoDelay))).unwrap();
    let bus = plx.bus(0).unwrap();
    bus.set_register(CSR, EXTFIFO_WML);
    bus.clear_log();
    plx.clear_calls();
    (plx, bus, system)
}

fn transfers(plx: &MockPlx) -> Vec<(u32, usize)> {
    plx.calls()
        .into_iter()
        .filter_map(|c| match c {
            PlxCall::DmaTransfer {
                local_address,
                byte_count,
                ..
            } => Some((local_address, byte_count)),
            _ => None,
        })
        .collect()
}

fn channels(plx: &MockPlx) -> (usize, usize) {
    (
        plx.count(|c| matches!(c, PlxCall::DmaOpen(_))),
        plx.count(|c| matches!(c, PlxCall::DmaClose(_))),
    )
}

fn hbr_balanced(bus: &MockBus) -> bool {
    bus.write_count(REQUEST_HBR) == bus.write_count(HBR_DONE)
}

#[test]
fn test_eeprom_round_trip_over_serial_bus() {
    let bus = MockBus::with_serial_peer(SimulatedSerialPeer::new());
    let eeprom = Eeprom::new(&bus, &NoDelay);
    eeprom.page_write(64, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
    assert_eq!(eeprom.sequential_read(64, 4).unwrap(), vec![0xDE, 0xAD, 0xBE, 0xEF]);
    assert_eq!(eeprom.read_byte(66).unwrap(), 0xBE);

    let peer = bus.serial_peer().unwrap();
    assert_eq!(&peer.eeprom()[64..68], &[0xDE, 0xAD, 0xBE, 0xEF]);
}

#[test]
fn test_eeprom_through_module() {
    let (_plx, _bus, system) = rig();
    let module = system.module(0).unwrap();
    module.eeprom_write(200, &[1, 2, 3]).unwrap();
    assert_eq!(module.eeprom_read(200, 3).unwrap(), vec![1, 2, 3]);
    assert_eq!(module.read_slot().unwrap(), 2);
}

#[test]
fn test_dsp_write_holds_bus_for_whole_block() {
    let (_plx, bus, mut system) = rig();
    let module = system.module_mut(0).unwrap();
    module.dsp_write(0x4A000, &[1, 2, 3, 4]).unwrap();

    assert_eq!(bus.write_count(REQUEST_HBR), 1);
    assert_eq!(bus.write_count(HBR_DONE), 1);
    assert_eq!(bus.writes_to(EXT_MEM_TEST), vec![0x4A000]);
    assert_eq!(bus.writes_to(WRT_DSP_MMA), vec![1, 2, 3, 4]);
}

#[test]
fn test_failed_dsp_write_releases_bus() {
    let (_plx, bus, mut system) = rig();
    bus.fail_writes(WRT_DSP_MMA, 2, 1);
    let err = system
        .module_mut(0)
        .unwrap()
        .dsp_write(0x4A000, &[1, 2, 3, 4])
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ResourceFailure);
    assert_eq!(bus.writes_to(WRT_DSP_MMA), vec![1, 2]);
    assert!(hbr_balanced(&bus));
}

#[test]
fn test_single_word_read_skips_dma() {
    let (plx, bus, mut system) = rig();
    bus.push_reads(WRT_DSP_MMA, [0x55]);
    let mut word = [0u32; 1];
    system
        .module_mut(0)
        .unwrap()
        .dsp_memory_io(0x4A03F, &mut word, IoDirection::Read)
        .unwrap();
    assert_eq!(word, [0x55]);
    assert_eq!(plx.call_count(), 0);
    assert!(hbr_balanced(&bus));
}

#[test]
fn test_exact_block_is_one_burst() {
    let (plx, bus, mut system) = rig();
    let mut out = vec![0u32; BLOCK];
    system.module_mut(0).unwrap().dsp_read(0x40000, &mut out).unwrap();

    assert_eq!(transfers(&plx), vec![(local::DSP_FIFO, BLOCK * 4)]);
    assert_eq!(bus.writes_to(WRT_DSP_II11), vec![0x40000]);
    assert_eq!(out[..3], [0, 1, 2]);
    assert_eq!(channels(&plx), (1, 1));
    assert!(hbr_balanced(&bus));
}

#[test]
fn test_short_tail_read_word_by_word() {
    let (plx, bus, mut system) = rig();
    let mut out = vec![0u32; BLOCK + 10];
    system.module_mut(0).unwrap().dsp_read(0x40000, &mut out).unwrap();

    assert_eq!(transfers(&plx), vec![(local::DSP_FIFO, BLOCK * 4)]);
    assert!(bus.writes_to(EXT_MEM_TEST).contains(&(0x40000 + 8192)));
    // One channel-11 status read for the burst, then the ten tail words.
    assert_eq!(bus.reads_of(WRT_DSP_MMA), 1 + 10);
    assert!(hbr_balanced(&bus));
}

#[test]
fn test_long_tail_gets_second_burst() {
    let (plx, bus, mut system) = rig();
    let mut out = vec![0u32; BLOCK + 100];
    system.module_mut(0).unwrap().dsp_read(0x40000, &mut out).unwrap();

    assert_eq!(transfers(&plx), vec![(local::DSP_FIFO, BLOCK * 4), (local::DSP_FIFO, 400)]);
    assert_eq!(bus.writes_to(WRT_DSP_II11), vec![0x40000, 0x42000]);
    assert_eq!(bus.writes_to(WRT_DSP_C11), vec![8192, 100]);
    assert_eq!(channels(&plx), (2, 2));
    assert!(hbr_balanced(&bus));
}

#[test]
fn test_failed_transfer_closes_channel() {
    let (plx, bus, mut system) = rig();
    plx.fail(FailPoint::DmaTransfer, 1);
    let err = system
        .module_mut(0)
        .unwrap()
        .dsp_read(0, &mut [0u32; 64])
        .unwrap_err();

    assert_eq!(err.operation(), Some(Operation::DspMemoryIo));
    assert_eq!(err.status(), -2);
    assert_eq!(channels(&plx), (1, 1));
    assert!(hbr_balanced(&bus));
}

#[test]
fn test_stuck_channel_resets_bridge() {
    let (plx, _bus, mut system) = rig();
    plx.fail(FailPoint::DmaCloseInProgress, 1);
    system.module_mut(0).unwrap().dsp_read(0, &mut [0u32; 64]).unwrap();
    assert_eq!(plx.count(|c| matches!(c, PlxCall::Reset(_))), 1);
    assert_eq!(channels(&plx), (1, 2));
}

#[test]
fn test_busy_processor_channel() {
    let (plx, bus, mut system) = rig();
    bus.push_reads(WRT_DSP_MMA, [1 << 11]);
    let err = system
        .module_mut(0)
        .unwrap()
        .dsp_read(0, &mut [0u32; 64])
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HardwareBusy);
    assert_eq!(plx.call_count(), 0);
    assert!(hbr_balanced(&bus));
}

#[test]
fn test_fifo_drain() {
    let (plx, bus, mut system) = rig();
    bus.set_register(RD_WRT_FIFO_WML, 4096);
    plx.push_dma_words([0xA, 0xB, 0xC, 0xD]);

    let module = system.module_mut(0).unwrap();
    assert_eq!(module.fifo_status().unwrap(), 4096);
    let mut out = [0u32; 4];
    module.drain_fifo(&mut out).unwrap();

    assert_eq!(out, [0xA, 0xB, 0xC, 0xD]);
    assert_eq!(transfers(&plx), vec![(local::EXT_FIFO, 16)]);
}

#[test]
fn test_fifo_below_request_times_out() {
    let (plx, bus, mut system) = rig();
    bus.set_register(RD_WRT_FIFO_WML, 3);
    let err = system.module_mut(0).unwrap().drain_fifo(&mut [0u32; 4]).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ProtocolTimeout);
    assert_eq!(err.status(), -2);
    assert_eq!(channels(&plx), (1, 1));
}

#[test]
fn test_external_memory_read_releases_ownership() {
    let (plx, bus, mut system) = rig();
    let mut out = [0u32; 16];
    system
        .module_mut(0)
        .unwrap()
        .external_memory_io(0x100, &mut out, IoDirection::Read)
        .unwrap();

    assert_eq!(transfers(&plx), vec![(local::EXT_MEM, 64)]);
    let csr = bus.writes_to(CSR);
    assert_eq!(csr.first().map(|v| v & PCIACTIVE), Some(PCIACTIVE));
    assert_eq!(csr.last().map(|v| v & PCIACTIVE), Some(0));
}

#[test]
fn test_external_memory_clear_times_out() {
    let (_plx, bus, mut system) = rig();
    bus.set_register(CSR, EXTFIFO_WML | pixie_driver::chip::csr::CLREXTMEM_ACTIVE);
    let err = system
        .module_mut(0)
        .unwrap()
        .clear_external_memory(0, 1024)
        .unwrap_err();
    assert_eq!(err.operation(), Some(Operation::ExternalMemoryClear));
    assert_eq!(err.status(), -1);
}
