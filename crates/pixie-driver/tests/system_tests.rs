//! System lifecycle tests
//!
//! Offline operation, discovery against a mocked chassis, module
//! identification and resource release on every failure path.

use pixie_driver::chip::firmware::Revision;
use pixie_driver::chip::pci::PciLocation;
use pixie_driver::mock::{FailPoint, MockBus, MockPlx, PlxCall, SimulatedSerialPeer};
use pixie_driver::{survey, AdcInfo, ErrorKind, NoDelay, Operation, System, SystemConfig};
use std::sync::Arc;

fn online() -> SystemConfig {
    SystemConfig::default().with_delay(Arc::new(NoDelay))
}

fn location(bus: u8, slot: u8) -> PciLocation {
    PciLocation {
        domain: 0,
        bus,
        slot,
        function: 0,
    }
}

/// One bridge per slot, enumerated in the given order, each identifying
/// as serial 5 revision B.
fn chassis(slots: &[u8]) -> MockPlx {
    slots.iter().zip(5u8..).fold(MockPlx::new(), |plx, (&slot, pci_bus)| {
        let peer = SimulatedSerialPeer::new()
            .in_slot(slot)
            .with_eeprom(0, &[0x05, 0x00, 0x0B]);
        plx.with_device(location(pci_bus, slot), MockBus::with_serial_peer(peer))
    })
}

#[test]
fn test_offline_system_never_touches_library() {
    let plx = MockPlx::new();
    let mut system = System::init(&plx, &[2, 3, 4, 5], SystemConfig::default().with_offline(true)).unwrap();

    let module = system.module_mut(3).unwrap();
    assert!(module.is_offline());
    assert_eq!(module.read_csr().unwrap(), 0);
    assert_eq!(module.read_slot().unwrap(), 5);

    let mut data = [7u32; 100];
    module.dsp_read(0x4A000, &mut data).unwrap();
    assert_eq!(data, [7u32; 100]);
    module.drain_fifo(&mut data).unwrap();
    module.clear_external_memory(0, 1024).unwrap();

    let info = system.read_module_info(0).unwrap();
    assert_eq!(info.revision, Revision::F);
    assert_eq!(info.serial, 1000);
    assert!(info.adc.is_none());

    system.exit().unwrap();
    assert_eq!(plx.call_count(), 0);
}

#[test]
fn test_offline_variants_report_adc() {
    let plx = MockPlx::new();
    for (variant, adc) in [(2, AdcInfo::new(14, 100)), (5, AdcInfo::new(12, 500)), (7, AdcInfo::new(16, 250))] {
        let config = SystemConfig::default().with_offline(true).with_offline_variant(variant);
        let system = System::init(&plx, &[2], config).unwrap();
        assert_eq!(system.module(0).unwrap().info().adc, Some(adc), "variant {variant}");
    }
}

#[test]
fn test_modules_follow_declared_slot_order() {
    // Bridges enumerate as slots 4, 2, 3; the caller declares 2, 3, 4.
    let plx = chassis(&[4, 2, 3]);
    let system = System::init(&plx, &[2, 3, 4], online()).unwrap();

    let slots: Vec<_> = system.modules().iter().map(|m| m.slot()).collect();
    assert_eq!(slots, vec![2, 3, 4]);
    let numbers: Vec<_> = system.modules().iter().map(|m| m.number()).collect();
    assert_eq!(numbers, vec![0, 1, 2]);

    assert_eq!(plx.open_devices(), 3);
    assert_eq!(plx.mapped_windows(), 3);
    system.exit().unwrap();
    assert_eq!(plx.open_devices(), 0);
    assert_eq!(plx.mapped_windows(), 0);
}

#[test]
fn test_identity_read_at_init() {
    let plx = chassis(&[2]);
    let system = System::init(&plx, &[2], online()).unwrap();
    let info = *system.module(0).unwrap().info();
    assert_eq!(info.serial, 5);
    assert_eq!(info.revision, Revision::B);
    assert_eq!(info.adc, Some(AdcInfo::new(12, 100)));
    assert_eq!(info.to_string(), "Rev-B serial 5 (12-bit 100 MSPS)");
}

#[test]
fn test_survey_reports_every_bridge() {
    let plx = chassis(&[7, 2]);
    let bridges = survey(&plx, &NoDelay).unwrap();
    let found: Vec<_> = bridges.iter().map(|b| (b.location, b.slot)).collect();
    assert_eq!(found, vec![(location(5, 7), 7), (location(6, 2), 2)]);
    assert_eq!(plx.open_devices(), 0);
    assert_eq!(plx.mapped_windows(), 0);
}

#[test]
fn test_missing_slot_is_reported() {
    let plx = chassis(&[2, 3]);
    let err = System::init(&plx, &[2, 9], online()).unwrap_err();
    assert_eq!(err.operation(), Some(Operation::InitSystem));
    assert_eq!(err.status(), -10);
    assert_eq!(plx.open_devices(), 0);
}

#[test]
fn test_too_few_bridges() {
    let plx = chassis(&[2]);
    let err = System::init(&plx, &[2, 3], online()).unwrap_err();
    assert_eq!(err.status(), -3);
    assert_eq!(plx.call_count(), plx.count(|c| matches!(c, PlxCall::FindDevice(_))));
}

#[test]
fn test_failed_open_unwinds_opened_modules() {
    let plx = chassis(&[2, 3, 4]);
    // The survey opens every bridge once before the modules are opened.
    plx.fail_after(FailPoint::Open(2), 1, 1);
    let err = System::init(&plx, &[2, 3, 4], online()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ResourceFailure);
    assert_eq!(err.status(), -11);
    assert_eq!(plx.open_devices(), 0);
    assert_eq!(plx.mapped_windows(), 0);
}

#[test]
fn test_failed_map_unwinds_opened_modules() {
    let plx = chassis(&[2, 3]);
    plx.fail_after(FailPoint::MapBar(1), 1, 1);
    let err = System::init(&plx, &[2, 3], online()).unwrap_err();
    assert_eq!(err.status(), -12);
    assert_eq!(plx.open_devices(), 0);
    assert_eq!(plx.mapped_windows(), 0);
}

#[test]
fn test_silent_serial_bus_closes_everything() {
    let plx = chassis(&[3]).with_device(
        location(9, 2),
        MockBus::with_serial_peer(SimulatedSerialPeer::new().unresponsive()),
    );
    let err = System::init(&plx, &[3, 2], online()).unwrap_err();
    assert_eq!(err.operation(), Some(Operation::InitSystem));
    assert_eq!(plx.open_devices(), 0);
    assert_eq!(plx.mapped_windows(), 0);
}

#[test]
fn test_erased_eeprom_still_identifies() {
    let plx = MockPlx::new().with_module_in_slot(5, 2);
    let system = System::init(&plx, &[2], online()).unwrap();
    let info = system.module(0).unwrap().info();
    assert_eq!(info.serial, 0xFFFF);
    assert_eq!(info.revision, Revision::Other(0xFF));
}

#[test]
fn test_close_failure_still_releases() {
    let plx = chassis(&[2, 3]);
    let mut system = System::init(&plx, &[2, 3], online()).unwrap();
    plx.fail(FailPoint::Close, 1);
    let err = system.close_module(0).unwrap_err();
    assert_eq!(err.operation(), Some(Operation::CloseModule));
    assert_eq!(err.status(), -2);
    assert_eq!(plx.mapped_windows(), 1);

    assert!(system.module(0).unwrap().read_csr().is_err());
    system.exit().unwrap();
    assert_eq!(plx.mapped_windows(), 0);
}
