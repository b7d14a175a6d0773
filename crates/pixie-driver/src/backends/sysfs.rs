//! Bridge access through the Linux sysfs PCI tree
//!
//! Stands in for the PLX vendor library on hosts where its kernel driver is
//! not installed. Bridges are found by their `vendor` and `device`
//! attributes, BAR 2 is mapped from `resource2`, and the bridge is reset
//! through the `reset` node. Without the vendor driver there is no block
//! DMA engine to program, so transfers are carried out as programmed I/O:
//! the source address is read word by word through a private mapping of
//! the register BAR.

use super::mmap::MmapRegion;
use crate::bus::RegisterBus;
use crate::error::{Operation, PixieError, Result};
use crate::plx::{DmaChannel, DmaCloseStatus, DmaDescriptor, DmaRequest, PlxDevice, PlxLibrary};
use pixie_chip::pci::{PciLocation, REGISTER_BAR};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// Default sysfs PCI device directory.
pub const SYSFS_PCI_DEVICES: &str = "/sys/bus/pci/devices";

fn bridge_error(status: i32, reason: impl Into<String>) -> PixieError {
    PixieError::resource(Operation::Bridge, status, reason)
}

/// Read a hex ID attribute such as `0x10b5`.
fn read_id(path: &Path) -> Option<u16> {
    let text = std::fs::read_to_string(path).ok()?;
    let text = text.trim();
    u16::from_str_radix(text.strip_prefix("0x").unwrap_or(text), 16).ok()
}

/// Vendor library backed by sysfs.
#[derive(Debug, Clone)]
pub struct SysfsPlx {
    root: PathBuf,
}

impl Default for SysfsPlx {
    fn default() -> Self {
        Self::new()
    }
}

impl SysfsPlx {
    /// Library over [`SYSFS_PCI_DEVICES`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_root(SYSFS_PCI_DEVICES)
    }

    /// Library over another device directory.
    #[must_use]
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Device directory scanned.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn matching(&self, vendor_id: u16, device_id: u16) -> Result<Vec<PciLocation>> {
        let entries = std::fs::read_dir(&self.root)
            .map_err(|e| bridge_error(-1, format!("cannot list {}: {e}", self.root.display())))?;

        let mut found: Vec<PciLocation> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let location = PciLocation::parse(entry.file_name().to_str()?)?;
                let dir = entry.path();
                let matches = read_id(&dir.join("vendor")) == Some(vendor_id)
                    && read_id(&dir.join("device")) == Some(device_id);
                matches.then_some(location)
            })
            .collect();
        found.sort_unstable();
        Ok(found)
    }
}

impl PlxLibrary for SysfsPlx {
    fn find_device(&self, vendor_id: u16, device_id: u16, index: usize) -> Result<Option<PciLocation>> {
        Ok(self.matching(vendor_id, device_id)?.get(index).copied())
    }

    fn open(&self, location: &PciLocation) -> Result<Box<dyn PlxDevice>> {
        let dir = self.root.join(location.to_string());
        if !dir.is_dir() {
            return Err(bridge_error(-1, format!("{} does not exist", dir.display())));
        }
        debug!("Opened bridge at {location}");
        Ok(Box::new(SysfsDevice {
            dir,
            location: *location,
            source: None,
            channel: None,
        }))
    }
}

/// An open bridge. See [`SysfsPlx`].
#[derive(Debug)]
pub struct SysfsDevice {
    dir: PathBuf,
    location: PciLocation,
    /// Mapping used to read transfer sources.
    source: Option<MmapRegion>,
    channel: Option<(DmaChannel, DmaDescriptor)>,
}

impl SysfsDevice {
    fn source(&mut self) -> Result<&MmapRegion> {
        if self.source.is_none() {
            self.source = Some(MmapRegion::new(&self.dir, self.location, REGISTER_BAR)?);
        }
        self.source
            .as_ref()
            .ok_or_else(|| bridge_error(-1, "transfer source not mapped"))
    }
}

impl PlxDevice for SysfsDevice {
    fn location(&self) -> PciLocation {
        self.location
    }

    fn map_bar(&mut self, bar: u8) -> Result<Box<dyn RegisterBus>> {
        Ok(Box::new(MmapRegion::new(&self.dir, self.location, bar)?))
    }

    fn unmap_bar(&mut self, window: Box<dyn RegisterBus>) -> Result<()> {
        // The mapping is released when the region drops.
        drop(window);
        Ok(())
    }

    fn dma_open(&mut self, descriptor: &DmaDescriptor) -> Result<DmaChannel> {
        if let Some((channel, _)) = self.channel {
            return Err(bridge_error(
                -1,
                format!("DMA channel {} of {} already open", channel.number(), self.location),
            ));
        }
        self.source()?;
        self.channel = Some((DmaChannel::PRIMARY, *descriptor));
        Ok(DmaChannel::PRIMARY)
    }

    fn dma_transfer(&mut self, channel: DmaChannel, request: &DmaRequest, buffer: &mut [u32]) -> Result<()> {
        let descriptor = match self.channel {
            Some((open, descriptor)) if open == channel => descriptor,
            _ => return Err(bridge_error(-1, format!("DMA channel {} is not open", channel.number()))),
        };
        let words = request.words().min(buffer.len());
        let timeout = Duration::from_millis(u64::from(request.timeout_ms));
        let base = usize::try_from(request.local_address)
            .map_err(|_| bridge_error(-1, "local address does not fit the host"))?;
        let source = self.source()?;

        let start = Instant::now();
        for (i, slot) in buffer[..words].iter_mut().enumerate() {
            let offset = if descriptor.const_local_address { base } else { base + 4 * i };
            *slot = source.read32(offset)?;
            if start.elapsed() > timeout {
                return Err(PixieError::timeout(Operation::Bridge, "programmed-I/O transfer", 1, -1));
            }
        }
        trace!("Moved {words} words from {base:#x} in {:?}", start.elapsed());
        Ok(())
    }

    fn dma_close(&mut self, channel: DmaChannel) -> Result<DmaCloseStatus> {
        match self.channel.take() {
            Some((open, _)) if open == channel => Ok(DmaCloseStatus::Closed),
            other => {
                self.channel = other;
                Err(bridge_error(-1, format!("DMA channel {} is not open", channel.number())))
            }
        }
    }

    fn reset(&mut self) -> Result<()> {
        let node = self.dir.join("reset");
        std::fs::write(&node, "1").map_err(|e| bridge_error(-1, format!("cannot reset {}: {e}", self.location)))?;
        self.channel = None;
        debug!("Reset bridge at {}", self.location);
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.source = None;
        if self.channel.is_some() {
            debug!("Closing {} with a DMA channel still open", self.location);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pixie_chip::pci::{PLX_9054_DEVICE_ID, PLX_VENDOR_ID};
    use std::fs::{self, File};
    use std::os::unix::fs::FileExt;

    const FIFO: u32 = 0x20_0000;

    fn fake_bridge(root: &Path, address: &str, vendor: &str, device: &str) -> PathBuf {
        let dir = root.join(address);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("vendor"), format!("{vendor}\n")).unwrap();
        fs::write(dir.join("device"), format!("{device}\n")).unwrap();
        let bar = File::create(dir.join("resource2")).unwrap();
        bar.set_len(u64::from(FIFO) + 0x1000).unwrap();
        dir
    }

    fn tree() -> tempfile::TempDir {
        let root = tempfile::tempdir().unwrap();
        fake_bridge(root.path(), "0000:07:0e.0", "0x10b5", "0x9054");
        fake_bridge(root.path(), "0000:05:0d.0", "0x10b5", "0x9054");
        fake_bridge(root.path(), "0000:00:1f.0", "0x8086", "0x9054");
        root
    }

    #[test]
    fn test_finds_bridges_in_bus_order() {
        let root = tree();
        let plx = SysfsPlx::with_root(root.path());
        let first = plx.find_device(PLX_VENDOR_ID, PLX_9054_DEVICE_ID, 0).unwrap().unwrap();
        let second = plx.find_device(PLX_VENDOR_ID, PLX_9054_DEVICE_ID, 1).unwrap().unwrap();
        assert_eq!(first.to_string(), "0000:05:0d.0");
        assert_eq!(second.to_string(), "0000:07:0e.0");
        assert!(plx.find_device(PLX_VENDOR_ID, PLX_9054_DEVICE_ID, 2).unwrap().is_none());
    }

    #[test]
    fn test_missing_root() {
        let plx = SysfsPlx::with_root("/nonexistent/pci");
        assert!(plx.find_device(PLX_VENDOR_ID, PLX_9054_DEVICE_ID, 0).is_err());
    }

    #[test]
    fn test_register_window_round_trip() {
        let root = tree();
        let plx = SysfsPlx::with_root(root.path());
        let loc = PciLocation::parse("0000:05:0d.0").unwrap();
        let mut device = plx.open(&loc).unwrap();
        let window = device.map_bar(REGISTER_BAR).unwrap();
        window.write32(0x48, 0x1234).unwrap();
        assert_eq!(window.read32(0x48).unwrap(), 0x1234);
        device.unmap_bar(window).unwrap();
        device.close().unwrap();
    }

    #[test]
    fn test_programmed_io_transfer_from_fifo() {
        let root = tree();
        let dir = root.path().join("0000:05:0d.0");
        let bar = fs::OpenOptions::new().write(true).open(dir.join("resource2")).unwrap();
        bar.write_at(&0xCAFE_F00D_u32.to_ne_bytes(), u64::from(FIFO)).unwrap();

        let plx = SysfsPlx::with_root(root.path());
        let mut device = plx.open(&PciLocation::parse("0000:05:0d.0").unwrap()).unwrap();
        let channel = device.dma_open(&DmaDescriptor::FIFO_READOUT).unwrap();
        assert!(device.dma_open(&DmaDescriptor::FIFO_READOUT).is_err());

        let mut out = [0u32; 3];
        device
            .dma_transfer(channel, &DmaRequest::readout(FIFO, 3, 5000), &mut out)
            .unwrap();
        assert_eq!(out, [0xCAFE_F00D; 3]);
        assert_eq!(device.dma_close(channel).unwrap(), DmaCloseStatus::Closed);
        assert!(device.dma_close(channel).is_err());
    }

    #[test]
    fn test_transfer_needs_open_channel() {
        let root = tree();
        let plx = SysfsPlx::with_root(root.path());
        let mut device = plx.open(&PciLocation::parse("0000:05:0d.0").unwrap()).unwrap();
        let mut out = [0u32; 1];
        let err = device
            .dma_transfer(DmaChannel::PRIMARY, &DmaRequest::readout(FIFO, 1, 5000), &mut out)
            .unwrap_err();
        assert_eq!(err.operation(), Some(Operation::Bridge));
    }

    #[test]
    fn test_reset_writes_node() {
        let root = tree();
        let plx = SysfsPlx::with_root(root.path());
        let mut device = plx.open(&PciLocation::parse("0000:05:0d.0").unwrap()).unwrap();
        device.reset().unwrap();
        let written = fs::read_to_string(root.path().join("0000:05:0d.0/reset")).unwrap();
        assert_eq!(written, "1");
    }

    #[test]
    #[ignore] // Requires hardware
    fn test_host_has_bridges() {
        let plx = SysfsPlx::new();
        assert!(plx.find_device(PLX_VENDOR_ID, PLX_9054_DEVICE_ID, 0).unwrap().is_some());
    }
}
