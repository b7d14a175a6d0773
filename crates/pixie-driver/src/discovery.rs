//! Bridge discovery and slot matching
//!
//! Modules are declared by chassis slot, but the vendor library enumerates
//! bridges in bus order. Discovery runs in two passes:
//!
//! 1. Survey: open every PLX 9054 bridge, map its register window and read
//!    the slot from the module's slot-ID expander, then close it again.
//! 2. Match: pair each declared slot with a surveyed bridge and open only
//!    those, in module-number order.
//!
//! Any failure unwinds everything opened so far before the error is
//! returned, so no handle or mapping outlives a failed init.

use crate::bus::RegisterBus;
use crate::config::ProtocolConfig;
use crate::error::{Operation, PixieError, Result};
use crate::module::ModuleHandle;
use crate::plx::{PlxDevice, PlxLibrary};
use crate::serial::SlotExpander;
use crate::timing::Delay;
use pixie_chip::pci::{PciLocation, MAX_NUM_MODULES, PLX_9054_DEVICE_ID, PLX_VENDOR_ID, REGISTER_BAR};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Enumeration indices tried before giving up on finding more bridges.
const SEARCH_LIMIT: usize = 256;

/// A bridge found during the survey pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bridge {
    /// Vendor-library enumeration index.
    pub index: usize,
    /// Bus position.
    pub location: PciLocation,
    /// Chassis slot reported by the module.
    pub slot: u8,
}

fn init_error(status: i32, reason: impl Into<String>) -> PixieError {
    PixieError::resource(Operation::InitSystem, status, reason)
}

/// Enumerate bridges, one entry per physical device.
///
/// Multi-function devices show up once per function; only the first
/// function seen is kept.
fn enumerate(plx: &dyn PlxLibrary) -> Vec<(usize, PciLocation)> {
    let mut found: Vec<(usize, PciLocation)> = Vec::new();
    for index in 0..SEARCH_LIMIT {
        let location = match plx.find_device(PLX_VENDOR_ID, PLX_9054_DEVICE_ID, index) {
            Ok(Some(location)) => location,
            Ok(None) => break,
            Err(e) => {
                debug!("Bridge enumeration stopped at index {index}: {e}");
                break;
            }
        };
        if found.iter().any(|(_, seen)| seen.same_device(&location)) {
            continue;
        }
        debug!("Found PLX 9054 bridge {} at {location}", found.len());
        found.push((index, location));
        if found.len() == MAX_NUM_MODULES {
            break;
        }
    }
    found
}

/// Unmap and close one bridge, reporting the first failure.
fn release(mut device: Box<dyn PlxDevice>, window: Box<dyn RegisterBus>, statuses: (i32, i32)) -> Result<()> {
    let location = device.location();
    let unmapped = device
        .unmap_bar(window)
        .map_err(|e| e.within(Operation::InitSystem, statuses.0));
    let closed = device.close().map_err(|e| e.within(Operation::InitSystem, statuses.1));
    if let Err(e) = unmapped.as_ref().and(closed.as_ref()) {
        warn!("Bridge at {location} did not release cleanly: {e}");
    }
    unmapped.and(closed)
}

fn unwind(opened: Vec<(Box<dyn PlxDevice>, Box<dyn RegisterBus>)>) {
    for (device, window) in opened.into_iter().rev() {
        // Failures are logged by release; the original error wins.
        let _ = release(device, window, (-8, -9));
    }
}

fn find(plx: &dyn PlxLibrary, index: usize, status: i32) -> Result<PciLocation> {
    plx.find_device(PLX_VENDOR_ID, PLX_9054_DEVICE_ID, index)
        .map_err(|e| e.within(Operation::InitSystem, status))?
        .ok_or_else(|| init_error(status, format!("bridge {index} disappeared during discovery")))
}

/// Open a bridge and map its register window, closing it again if the
/// mapping fails.
fn open_mapped(
    plx: &dyn PlxLibrary,
    location: &PciLocation,
    statuses: (i32, i32),
) -> Result<(Box<dyn PlxDevice>, Box<dyn RegisterBus>)> {
    let mut device = plx
        .open(location)
        .map_err(|e| e.within(Operation::InitSystem, statuses.0))?;
    match device.map_bar(REGISTER_BAR) {
        Ok(window) => Ok((device, window)),
        Err(e) => {
            if let Err(close) = device.close() {
                warn!("Bridge at {location} did not close after a failed map: {close}");
            }
            Err(e.within(Operation::InitSystem, statuses.1))
        }
    }
}

fn survey_found(plx: &dyn PlxLibrary, found: &[(usize, PciLocation)], delay: &dyn Delay) -> Result<Vec<Bridge>> {
    let mut opened = Vec::with_capacity(found.len());
    let mut bridges = Vec::with_capacity(found.len());

    for &(index, _) in found {
        let step = find(plx, index, -7).and_then(|location| {
            let (device, window) = open_mapped(plx, &location, (-4, -5))?;
            match SlotExpander::new(&*window, delay).slot() {
                Ok(slot) => Ok((location, slot, device, window)),
                Err(e) => {
                    unwind(vec![(device, window)]);
                    Err(e.within(Operation::InitSystem, -6))
                }
            }
        });
        match step {
            Ok((location, slot, device, window)) => {
                debug!("Bridge {index} at {location} is in slot {slot}");
                bridges.push(Bridge { index, location, slot });
                opened.push((device, window));
            }
            Err(e) => {
                unwind(opened);
                return Err(e);
            }
        }
    }

    let mut first_error = None;
    for (device, window) in opened {
        if let Err(e) = release(device, window, (-8, -9)) {
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(bridges), Err)
}

/// Find every bridge and read the chassis slot it sits in.
///
/// Every bridge is closed again before this returns.
///
/// # Errors
///
/// Returns `ResourceFailure` with the status of the failing phase: -2 no
/// bridge found, -4 open, -5 map, -6 slot read, -7 find, -8 unmap, -9
/// close.
pub fn survey(plx: &dyn PlxLibrary, delay: &dyn Delay) -> Result<Vec<Bridge>> {
    let found = enumerate(plx);
    if found.is_empty() {
        return Err(init_error(-2, "no PLX 9054 bridges found"));
    }
    survey_found(plx, &found, delay)
}

/// Open one module per declared slot, in module-number order.
///
/// # Errors
///
/// As [`survey`], plus -3 when fewer bridges than slots are present,
/// -10 when a slot has no bridge, and -11, -12 and -13 for open, map and
/// find failures while opening the matched bridges.
pub(crate) fn open_modules(
    plx: &dyn PlxLibrary,
    slots: &[u8],
    delay: &Arc<dyn Delay>,
    config: &ProtocolConfig,
) -> Result<Vec<ModuleHandle>> {
    let found = enumerate(plx);
    if found.is_empty() {
        return Err(init_error(-2, "no PLX 9054 bridges found"));
    }
    if found.len() < slots.len() {
        return Err(init_error(
            -3,
            format!("found {} bridges for {} declared modules", found.len(), slots.len()),
        ));
    }

    let bridges = survey_found(plx, &found, &**delay)?;

    let matched = slots
        .iter()
        .enumerate()
        .map(|(number, &slot)| {
            bridges
                .iter()
                .find(|b| b.slot == slot)
                .copied()
                .ok_or_else(|| init_error(-10, format!("no bridge in slot {slot} for module {number}")))
        })
        .collect::<Result<Vec<_>>>()?;

    let mut modules: Vec<ModuleHandle> = Vec::with_capacity(matched.len());
    for (number, bridge) in matched.into_iter().enumerate() {
        let opened = find(plx, bridge.index, -13).and_then(|location| open_mapped(plx, &location, (-11, -12)));
        match opened {
            Ok((device, window)) => {
                info!("Module {number} in slot {} at {}", bridge.slot, bridge.location);
                modules.push(ModuleHandle::online(
                    number,
                    bridge.slot,
                    device,
                    window,
                    Arc::clone(delay),
                    config.clone(),
                ));
            }
            Err(e) => {
                close_all(&mut modules);
                return Err(e);
            }
        }
    }
    Ok(modules)
}

/// Close every module, logging failures.
pub(crate) fn close_all(modules: &mut [ModuleHandle]) {
    for module in modules.iter_mut().rev() {
        if let Err(e) = module.close() {
            warn!("module {} did not close cleanly: {e}", module.number());
        }
    }
}
