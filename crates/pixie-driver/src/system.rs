//! The system context: every module of one chassis
//!
//! [`System`] owns the [`ModuleHandle`]s; nothing about a module lives in
//! global state. Offline systems are built without touching the vendor
//! library at all.

use crate::boot::{boot_modules, BootFiles, BootPattern};
use crate::config::{DelaySource, SystemConfig};
use crate::discovery;
use crate::error::{Operation, PixieError, Result};
use crate::identity::ModuleInfo;
use crate::module::ModuleHandle;
use crate::plx::PlxLibrary;
use crate::timing::{CalibratedDelay, Delay, NoDelay};
use pixie_chip::pci::{MAX_PXI_SLOTS, PRESET_MAX_MODULES};
use std::sync::Arc;
use tracing::{info, warn};

/// Highest offline variant with a defined identity.
const MAX_OFFLINE_VARIANT: u8 = 7;

/// All modules of one chassis.
#[derive(Debug)]
pub struct System {
    modules: Vec<ModuleHandle>,
    offline: bool,
}

fn validate(slots: &[u8], config: &SystemConfig) -> Result<()> {
    if slots.is_empty() || slots.len() > PRESET_MAX_MODULES {
        return Err(PixieError::invalid_argument(format!(
            "module count {} outside 1..={PRESET_MAX_MODULES}",
            slots.len()
        )));
    }
    if let Some(&slot) = slots.iter().find(|&&s| s == 0 || s > MAX_PXI_SLOTS) {
        return Err(PixieError::invalid_argument(format!(
            "slot {slot} outside 1..={MAX_PXI_SLOTS}"
        )));
    }
    for (i, slot) in slots.iter().enumerate() {
        if slots[..i].contains(slot) {
            return Err(PixieError::invalid_argument(format!("slot {slot} declared twice")));
        }
    }
    if let Some(variant) = config.offline_variant {
        if variant > MAX_OFFLINE_VARIANT {
            return Err(PixieError::invalid_argument(format!(
                "offline variant {variant} outside 0..={MAX_OFFLINE_VARIANT}"
            )));
        }
    }
    Ok(())
}

fn delay_for(config: &SystemConfig) -> Result<Arc<dyn Delay>> {
    match &config.delay {
        DelaySource::Custom(delay) => Ok(Arc::clone(delay)),
        DelaySource::Calibrated if config.offline => Ok(Arc::new(NoDelay)),
        DelaySource::Calibrated => Ok(Arc::new(CalibratedDelay::calibrate()?)),
    }
}

impl System {
    /// Open one module per entry of `slots`; module `k` is the one in
    /// chassis slot `slots[k]`.
    ///
    /// Offline configurations build modules without calling `plx`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for an empty or oversized slot map, an
    /// out-of-range or repeated slot, or an unknown offline variant.
    /// Discovery failures carry the status of the failing phase; a module
    /// whose identity cannot be read fails the init with status -4. No
    /// module stays open after a failed init.
    pub fn init(plx: &dyn PlxLibrary, slots: &[u8], config: SystemConfig) -> Result<Self> {
        validate(slots, &config)?;
        let delay = delay_for(&config)?;

        if config.offline {
            let info = ModuleInfo::offline(config.offline_variant);
            let modules = slots
                .iter()
                .enumerate()
                .map(|(number, &slot)| {
                    ModuleHandle::offline(number, slot, info, Arc::clone(&delay), config.protocol.clone())
                })
                .collect();
            info!("Initialised {} offline module(s)", slots.len());
            return Ok(Self { modules, offline: true });
        }

        let mut modules = discovery::open_modules(plx, slots, &delay, &config.protocol)?;
        let unreadable = modules
            .iter_mut()
            .find_map(|m| m.read_module_info().err().map(|e| (m.number(), e)));
        if let Some((number, e)) = unreadable {
            discovery::close_all(&mut modules);
            return Err(PixieError::resource(
                Operation::InitSystem,
                -4,
                format!("module {number} identity: {e}"),
            ));
        }

        for module in &modules {
            info!("Module {} in slot {}: {}", module.number(), module.slot(), module.info());
        }
        Ok(Self {
            modules,
            offline: false,
        })
    }

    /// [`init`](Self::init) against the host's sysfs PCI tree.
    ///
    /// # Errors
    ///
    /// See [`init`](Self::init).
    pub fn init_sysfs(slots: &[u8], config: SystemConfig) -> Result<Self> {
        let plx = crate::backends::sysfs::SysfsPlx::new();
        Self::init(&plx, slots, config)
    }

    /// Number of modules.
    #[must_use]
    pub fn module_count(&self) -> usize {
        self.modules.len()
    }

    /// True if the system runs without hardware.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        self.offline
    }

    fn invalid(&self, index: usize) -> PixieError {
        PixieError::InvalidIndex {
            index,
            count: self.modules.len(),
        }
    }

    /// Module by number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndex` past the last module.
    pub fn module(&self, index: usize) -> Result<&ModuleHandle> {
        self.modules.get(index).ok_or_else(|| self.invalid(index))
    }

    /// Mutable module by number.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndex` past the last module.
    pub fn module_mut(&mut self, index: usize) -> Result<&mut ModuleHandle> {
        let count = self.modules.len();
        self.modules
            .get_mut(index)
            .ok_or(PixieError::InvalidIndex { index, count })
    }

    /// Every module, in module-number order.
    #[must_use]
    pub fn modules(&self) -> &[ModuleHandle] {
        &self.modules
    }

    /// Every module, mutably. Disjoint modules may be driven from
    /// separate threads through this slice.
    pub fn modules_mut(&mut self) -> &mut [ModuleHandle] {
        &mut self.modules
    }

    /// Boot one module, or every module when `index` equals the module
    /// count.
    ///
    /// # Errors
    ///
    /// Returns `InvalidIndex` past the module count, otherwise see
    /// [`boot_modules`].
    pub fn boot_module(&mut self, index: usize, files: &BootFiles, pattern: BootPattern) -> Result<()> {
        if index == self.modules.len() {
            return boot_modules(&mut self.modules, files, pattern);
        }
        self.module_mut(index)?.boot(files, pattern)
    }

    /// Re-read one module's identity.
    ///
    /// # Errors
    ///
    /// See [`ModuleHandle::read_module_info`].
    pub fn read_module_info(&mut self, index: usize) -> Result<ModuleInfo> {
        self.module_mut(index)?.read_module_info()
    }

    /// Unmap and close one module. Later operations on it fail.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` with status -1 if the unmap failed and -2
    /// if the close failed; the close is attempted either way.
    pub fn close_module(&mut self, index: usize) -> Result<()> {
        self.module_mut(index)?.close()
    }

    /// Close every module. The first failure is returned after the rest
    /// have been closed.
    ///
    /// # Errors
    ///
    /// See [`close_module`](Self::close_module).
    pub fn exit(mut self) -> Result<()> {
        let mut first_error = None;
        for module in &mut self.modules {
            if let Err(e) = module.close() {
                warn!("module {} did not close cleanly: {e}", module.number());
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::mock::{FailPoint, MockBus, MockPlx, SimulatedSerialPeer};
    use pixie_chip::pci::PciLocation;

    fn offline_config() -> SystemConfig {
        SystemConfig::default().with_offline(true)
    }

    fn online_config() -> SystemConfig {
        SystemConfig::default().with_delay(Arc::new(NoDelay))
    }

    /// Bridge in `slot` whose EEPROM identifies serial 5, revision 11.
    fn module_in(plx: MockPlx, pci_bus: u8, slot: u8) -> MockPlx {
        let peer = SimulatedSerialPeer::new()
            .in_slot(slot)
            .with_eeprom(0, &[0x05, 0x00, 0x0B]);
        plx.with_device(
            PciLocation {
                domain: 0,
                bus: pci_bus,
                slot,
                function: 0,
            },
            MockBus::with_serial_peer(peer),
        )
    }

    #[test]
    fn test_offline_init_never_calls_library() {
        let plx = MockPlx::new();
        let system = System::init(&plx, &[2, 3, 4], offline_config()).unwrap();
        assert!(system.is_offline());
        assert_eq!(system.module_count(), 3);
        assert_eq!(system.module(2).unwrap().slot(), 4);
        assert_eq!(plx.call_count(), 0);
        system.exit().unwrap();
        assert_eq!(plx.call_count(), 0);
    }

    #[test]
    fn test_offline_variant_identity() {
        let plx = MockPlx::new();
        let config = offline_config().with_offline_variant(1);
        let mut system = System::init(&plx, &[2], config).unwrap();
        let info = system.read_module_info(0).unwrap();
        assert_eq!(info.serial, 275);
    }

    #[test]
    fn test_slot_map_validation() {
        let plx = MockPlx::new();
        let too_many = [2u8; PRESET_MAX_MODULES + 1];
        for slots in [&[][..], &too_many[..], &[0][..], &[15][..], &[2, 2][..]] {
            let err = System::init(&plx, slots, offline_config()).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidArgument);
        }
        let err = System::init(&plx, &[2], offline_config().with_offline_variant(8)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn test_module_index_checked() {
        let plx = MockPlx::new();
        let mut system = System::init(&plx, &[2], offline_config()).unwrap();
        assert!(matches!(
            system.module(1),
            Err(PixieError::InvalidIndex { index: 1, count: 1 })
        ));
        assert!(system.close_module(3).is_err());
        assert!(system
            .boot_module(2, &BootFiles::default(), BootPattern::COMM_FPGA)
            .is_err());
    }

    #[test]
    fn test_online_init_reads_identity() {
        let plx = module_in(module_in(MockPlx::new(), 5, 3), 6, 2);
        let system = System::init(&plx, &[2, 3], online_config()).unwrap();
        let module = system.module(0).unwrap();
        assert_eq!(module.slot(), 2);
        assert_eq!(module.info().serial, 5);
        assert_eq!(module.info().revision.raw(), 11);
        assert_eq!(plx.open_devices(), 2);
        system.exit().unwrap();
        assert_eq!(plx.open_devices(), 0);
    }

    #[test]
    fn test_silent_module_fails_init() {
        let plx = MockPlx::new().with_device(
            PciLocation {
                domain: 0,
                bus: 5,
                slot: 2,
                function: 0,
            },
            MockBus::with_serial_peer(SimulatedSerialPeer::new().unresponsive()),
        );
        let err = System::init(&plx, &[2], online_config()).unwrap_err();
        assert_eq!(err.status(), -6);
        assert_eq!(plx.open_devices(), 0);
    }

    #[test]
    fn test_close_module_then_use() {
        let plx = module_in(MockPlx::new(), 5, 2);
        let mut system = System::init(&plx, &[2], online_config()).unwrap();
        system.close_module(0).unwrap();
        assert!(system.module(0).unwrap().read_csr().is_err());
        assert_eq!(plx.open_devices(), 0);
        // Closing again is harmless.
        system.close_module(0).unwrap();
        system.exit().unwrap();
    }

    #[test]
    fn test_exit_closes_all_despite_failure() {
        let plx = module_in(module_in(MockPlx::new(), 5, 2), 6, 3);
        let system = System::init(&plx, &[2, 3], online_config()).unwrap();
        plx.fail(FailPoint::UnmapBar, 1);
        let err = system.exit().unwrap_err();
        assert_eq!(err.status(), -1);
        assert_eq!(err.operation(), Some(Operation::CloseModule));
        assert_eq!(plx.open_devices(), 0);
    }
}
