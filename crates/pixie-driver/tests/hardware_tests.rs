//! Tests against a real chassis
//!
//! Run with `cargo test -- --ignored` on a host with Pixie-16 modules in
//! slots 2 and 3.

use pixie_driver::backends::SysfsPlx;
use pixie_driver::{survey, CalibratedDelay, System, SystemConfig};

const SLOTS: &[u8] = &[2, 3];

#[test]
#[ignore] // Requires hardware
fn test_survey_finds_declared_slots() {
    let delay = CalibratedDelay::calibrate().expect("calibration");
    let bridges = survey(&SysfsPlx::new(), &delay).expect("survey");
    for slot in SLOTS {
        assert!(bridges.iter().any(|b| b.slot == *slot), "no module in slot {slot}");
    }
    for bridge in &bridges {
        println!("{} -> slot {}", bridge.location, bridge.slot);
    }
}

#[test]
#[ignore] // Requires hardware
fn test_module_identity() {
    let system = System::init_sysfs(SLOTS, SystemConfig::default()).expect("init");
    for module in system.modules() {
        let info = module.info();
        assert!(info.serial > 0, "module {} has no serial", module.number());
        println!("module {} slot {}: {info}", module.number(), module.slot());
    }
    system.exit().expect("exit");
}

#[test]
#[ignore] // Requires hardware
fn test_eeprom_identity_stable() {
    let mut system = System::init_sysfs(SLOTS, SystemConfig::default()).expect("init");
    let first = *system.module(0).expect("module").info();
    let again = system.read_module_info(0).expect("re-read");
    assert_eq!(first, again);
    system.exit().expect("exit");
}

#[test]
#[ignore] // Requires hardware
fn test_processor_memory_round_trip() {
    let mut system = System::init_sysfs(SLOTS, SystemConfig::default()).expect("init");
    let module = system.module_mut(0).expect("module");
    // Scratch words at the top of the parameter input area.
    let address = 0x4A000 + 0x300;
    let pattern = [0x1234_5678, 0x0BAD_F00D, 0xCAFE_0000, 0x0000_BEEF];
    module.dsp_write(address, &pattern).expect("write");
    let mut back = [0u32; 4];
    module.dsp_read(address, &mut back).expect("read");
    assert_eq!(back, pattern);
    system.exit().expect("exit");
}
