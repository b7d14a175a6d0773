//! One module's resources and its public operations
//!
//! A [`ModuleHandle`] owns the bridge handle and the mapped register window
//! of one module. Whether the module is online or offline is decided once,
//! when the handle is built: an offline handle has no link at all, so every
//! hardware operation returns success without reaching a register.

use crate::boot::BootState;
use crate::bus::RegisterBus;
use crate::config::ProtocolConfig;
use crate::csr;
use crate::error::{Operation, PixieError, Result};
use crate::identity::ModuleInfo;
use crate::plx::PlxDevice;
use crate::serial::{Eeprom, SlotExpander};
use crate::timing::Delay;
use pixie_chip::regs::RegisterAddress;
use std::sync::Arc;

/// Direction of a memory transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IoDirection {
    /// Module to host.
    Read,
    /// Host to module.
    Write,
}

#[derive(Debug)]
enum Link {
    Online {
        device: Box<dyn PlxDevice>,
        window: Box<dyn RegisterBus>,
    },
    Offline,
    Closed,
}

/// Borrowed view of an online module used by the protocol layers.
///
/// Holds the register window by shared reference and the bridge by unique
/// reference, so guards over the window can live across DMA calls.
#[derive(Debug)]
pub(crate) struct Port<'a> {
    pub(crate) bus: &'a dyn RegisterBus,
    pub(crate) device: &'a mut dyn PlxDevice,
    pub(crate) delay: &'a dyn Delay,
    pub(crate) config: &'a ProtocolConfig,
    pub(crate) number: usize,
}

/// An initialised module.
#[derive(Debug)]
pub struct ModuleHandle {
    number: usize,
    slot: u8,
    link: Link,
    delay: Arc<dyn Delay>,
    config: ProtocolConfig,
    info: ModuleInfo,
    pub(crate) boot: BootState,
}

impl ModuleHandle {
    pub(crate) fn online(
        number: usize,
        slot: u8,
        device: Box<dyn PlxDevice>,
        window: Box<dyn RegisterBus>,
        delay: Arc<dyn Delay>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            number,
            slot,
            link: Link::Online { device, window },
            delay,
            config,
            info: ModuleInfo::default(),
            boot: BootState::default(),
        }
    }

    pub(crate) fn offline(
        number: usize,
        slot: u8,
        info: ModuleInfo,
        delay: Arc<dyn Delay>,
        config: ProtocolConfig,
    ) -> Self {
        Self {
            number,
            slot,
            link: Link::Offline,
            delay,
            config,
            info,
            boot: BootState::default(),
        }
    }

    /// Module number (position in the slot map).
    #[must_use]
    pub const fn number(&self) -> usize {
        self.number
    }

    /// Physical chassis slot.
    #[must_use]
    pub const fn slot(&self) -> u8 {
        self.slot
    }

    /// True if the module was configured without hardware.
    #[must_use]
    pub const fn is_offline(&self) -> bool {
        matches!(self.link, Link::Offline)
    }

    /// Identification read at init.
    #[must_use]
    pub const fn info(&self) -> &ModuleInfo {
        &self.info
    }

    pub(crate) fn set_info(&mut self, info: ModuleInfo) {
        self.info = info;
    }

    /// Boot stages completed so far.
    #[must_use]
    pub const fn boot_state(&self) -> BootState {
        self.boot
    }

    /// Protocol constants in effect for this module.
    #[must_use]
    pub const fn protocol(&self) -> &ProtocolConfig {
        &self.config
    }

    fn closed(&self) -> PixieError {
        PixieError::resource(
            Operation::RegisterIo,
            -1,
            format!("module {} has been closed", self.number),
        )
    }

    /// Register window, `None` when offline.
    pub(crate) fn window(&self) -> Result<Option<&dyn RegisterBus>> {
        match &self.link {
            Link::Online { window, .. } => Ok(Some(&**window)),
            Link::Offline => Ok(None),
            Link::Closed => Err(self.closed()),
        }
    }

    /// Protocol view, `None` when offline.
    pub(crate) fn port(&mut self) -> Result<Option<Port<'_>>> {
        if matches!(self.link, Link::Closed) {
            return Err(self.closed());
        }
        match &mut self.link {
            Link::Online { device, window } => Ok(Some(Port {
                bus: &**window,
                device: &mut **device,
                delay: &*self.delay,
                config: &self.config,
                number: self.number,
            })),
            _ => Ok(None),
        }
    }

    /// Delay shared by this module's protocols.
    pub(crate) fn delay(&self) -> &dyn Delay {
        &*self.delay
    }

    // ── Register bus ────────────────────────────────────────────────────────

    /// Read one register. Offline modules read zero.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a write-only register, otherwise an
    /// error if the module is closed or the access is out of range.
    pub fn read_register(&self, reg: RegisterAddress) -> Result<u32> {
        if !reg.is_readable() {
            return Err(PixieError::invalid_argument(format!("{reg} is write-only")));
        }
        match self.window()? {
            Some(bus) => bus.read(reg),
            None => Ok(0),
        }
    }

    /// Write one register. Dropped when offline.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for a read-only register, otherwise an
    /// error if the module is closed or the access is out of range.
    pub fn write_register(&self, reg: RegisterAddress, value: u32) -> Result<()> {
        if !reg.is_writable() {
            return Err(PixieError::invalid_argument(format!("{reg} is read-only")));
        }
        match self.window()? {
            Some(bus) => bus.write(reg, value),
            None => Ok(()),
        }
    }

    // ── CSR ─────────────────────────────────────────────────────────────────

    /// Read the CSR. Offline modules read zero.
    ///
    /// # Errors
    ///
    /// Returns error if the module is closed.
    pub fn read_csr(&self) -> Result<u32> {
        self.window()?.map_or(Ok(0), csr::read)
    }

    /// Write the CSR.
    ///
    /// # Errors
    ///
    /// Returns error if the module is closed.
    pub fn write_csr(&self, value: u32) -> Result<()> {
        self.window()?.map_or(Ok(()), |bus| csr::write(bus, value))
    }

    /// Set CSR bits.
    ///
    /// # Errors
    ///
    /// Returns error if the module is closed.
    pub fn set_csr_bits(&self, mask: u32) -> Result<()> {
        self.window()?.map_or(Ok(()), |bus| csr::set_bits(bus, mask))
    }

    /// Clear CSR bits.
    ///
    /// # Errors
    ///
    /// Returns error if the module is closed.
    pub fn clear_csr_bits(&self, mask: u32) -> Result<()> {
        self.window()?.map_or(Ok(()), |bus| csr::clear_bits(bus, mask))
    }

    /// True while a run is enabled or active. Offline modules never run.
    ///
    /// # Errors
    ///
    /// Returns error if the module is closed.
    pub fn run_active(&self) -> Result<bool> {
        self.window()?.map_or(Ok(false), csr::run_active)
    }

    // ── Serial devices ──────────────────────────────────────────────────────

    /// Read consecutive bytes from the identification EEPROM.
    ///
    /// Offline modules return zeros.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` if the EEPROM does not acknowledge.
    pub fn eeprom_read(&self, address: u16, count: usize) -> Result<Vec<u8>> {
        match self.window()? {
            Some(bus) => Eeprom::new(bus, self.delay()).sequential_read(address, count),
            None => Ok(vec![0; count]),
        }
    }

    /// Write bytes to the identification EEPROM, at most one page per call.
    ///
    /// # Errors
    ///
    /// Returns `InvalidArgument` for more than one page, `ResourceFailure`
    /// if the EEPROM does not acknowledge.
    pub fn eeprom_write(&self, address: u16, bytes: &[u8]) -> Result<()> {
        if bytes.len() > pixie_chip::serial::EEPROM_PAGE_BYTES {
            return Err(PixieError::invalid_argument(format!(
                "{} bytes exceed one EEPROM page",
                bytes.len()
            )));
        }
        match self.window()? {
            Some(bus) => Eeprom::new(bus, self.delay()).page_write(address, bytes),
            None => Ok(()),
        }
    }

    /// Read the chassis slot from the slot-ID expander. Offline modules
    /// report their configured slot.
    ///
    /// # Errors
    ///
    /// Returns `ResourceFailure` if the expander does not acknowledge.
    pub fn read_slot(&self) -> Result<u8> {
        match self.window()? {
            Some(bus) => SlotExpander::new(bus, self.delay()).slot(),
            None => Ok(self.slot),
        }
    }

    // ── Lifetime ────────────────────────────────────────────────────────────

    /// Unmap the window and close the bridge.
    ///
    /// Both steps run even if the first fails. Closing twice is a no-op.
    pub(crate) fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.link, Link::Closed) {
            Link::Online { mut device, window } => {
                let location = device.location();
                let unmapped = device
                    .unmap_bar(window)
                    .map_err(|e| e.within(Operation::CloseModule, -1));
                let closed = device.close().map_err(|e| e.within(Operation::CloseModule, -2));
                tracing::debug!("Closed module {} at {location}", self.number);
                unmapped.and(closed)
            }
            Link::Offline => {
                self.link = Link::Offline;
                Ok(())
            }
            Link::Closed => Ok(()),
        }
    }
}

impl Drop for ModuleHandle {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::warn!("module {} did not close cleanly: {e}", self.number);
        }
    }
}
