//! Memory-mapped register window
//!
//! BAR 2 of the PLX bridge is mapped straight from its sysfs `resource2`
//! file. All unsafe code in the crate lives here: the mapping itself and the
//! volatile accesses through it.

use crate::bus::RegisterBus;
use crate::error::{Operation, PixieError, Result};
use pixie_chip::pci::PciLocation;
use rustix::mm::{mmap, munmap, MapFlags, ProtFlags};
use std::fs::{File, OpenOptions};
use std::os::unix::io::AsFd;
use std::path::Path;
use std::ptr::NonNull;

/// Memory-mapped PCI BAR of one module
///
/// Provides bounds-checked volatile access to the register window.
#[derive(Debug)]
pub struct MmapRegion {
    ptr: NonNull<u8>,
    size: usize,
    _file: File,
    location: PciLocation,
    bar: u8,
}

impl MmapRegion {
    /// Map `resource{bar}` under a device's sysfs directory
    ///
    /// # Errors
    ///
    /// Returns error if:
    /// - the resource file cannot be opened (device disabled or no permission)
    /// - the BAR has zero size
    /// - mmap fails
    pub fn new(device_dir: &Path, location: PciLocation, bar: u8) -> Result<Self> {
        let path = device_dir.join(format!("resource{bar}"));

        tracing::debug!("Mapping BAR{bar} of {location}: {}", path.display());

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&path)
            .map_err(|e| {
                PixieError::resource(
                    Operation::InitSystem,
                    -5,
                    format!("cannot open {}: {e}. Is the device enabled?", path.display()),
                )
            })?;

        // Truncation acceptable: BAR sizes fit in usize on 64-bit
        #[allow(clippy::cast_possible_truncation)]
        let size = file.metadata()?.len() as usize;

        if size == 0 {
            return Err(PixieError::resource(
                Operation::InitSystem,
                -5,
                format!("BAR{bar} of {location} has zero size"),
            ));
        }

        // SAFETY: mmap preconditions:
        // - fd is valid (just opened) and kept alive in `_file`
        // - size is non-zero (checked above)
        // - offset 0, PROT_READ|PROT_WRITE, MAP_SHARED for device memory
        // - the mapping is released exactly once, in Drop
        let ptr = unsafe {
            mmap(
                std::ptr::null_mut(),
                size,
                ProtFlags::READ | ProtFlags::WRITE,
                MapFlags::SHARED,
                file.as_fd(),
                0,
            )
        }
        .map_err(|e| PixieError::resource(Operation::InitSystem, -5, format!("mmap failed: {e}")))?;

        let ptr = NonNull::new(ptr.cast::<u8>()).ok_or_else(|| {
            PixieError::resource(Operation::InitSystem, -5, "mmap returned a null mapping")
        })?;

        tracing::info!("Mapped BAR{bar} for {location} ({size:#x} bytes at {ptr:p})");

        Ok(Self {
            ptr,
            size,
            _file: file,
            location,
            bar,
        })
    }

    fn check(&self, offset: usize, op: &str) -> Result<()> {
        if offset % 4 != 0 || offset.checked_add(4).map_or(true, |end| end > self.size) {
            return Err(PixieError::resource(
                Operation::RegisterIo,
                -1,
                format!(
                    "{op} outside window: offset={offset:#x}, limit={:#x}",
                    self.size
                ),
            ));
        }
        Ok(())
    }

    /// Window size in bytes
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Bus position of the mapped device
    #[must_use]
    pub const fn location(&self) -> PciLocation {
        self.location
    }

    /// Mapped BAR number
    #[must_use]
    pub const fn bar(&self) -> u8 {
        self.bar
    }
}

impl RegisterBus for MmapRegion {
    fn read32(&self, offset: usize) -> Result<u32> {
        self.check(offset, "read")?;

        // SAFETY: volatile read of a device register.
        // - offset is 4-byte aligned and offset + 4 <= size (checked above)
        // - ptr comes from a successful mmap that lives as long as self
        // - volatile: register reads have side effects and must not be merged
        #[allow(clippy::cast_ptr_alignment)]
        let value = unsafe { self.ptr.as_ptr().add(offset).cast::<u32>().read_volatile() };
        Ok(value)
    }

    fn write32(&self, offset: usize, value: u32) -> Result<()> {
        self.check(offset, "write")?;

        // SAFETY: volatile write of a device register.
        // - offset is 4-byte aligned and offset + 4 <= size (checked above)
        // - ptr comes from a successful mmap that lives as long as self
        // - the store targets device memory, never memory Rust reasons about,
        //   so writing through a shared reference aliases nothing
        #[allow(clippy::cast_ptr_alignment)]
        unsafe {
            self.ptr.as_ptr().add(offset).cast::<u32>().write_volatile(value);
        }
        Ok(())
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        tracing::debug!("Unmapping BAR{} of {}", self.bar, self.location);

        // SAFETY: ptr and size are exactly those returned by / passed to mmap
        // in new(), and the mapping has not been released before.
        unsafe {
            if let Err(e) = munmap(self.ptr.as_ptr().cast(), self.size) {
                tracing::error!("munmap failed during drop: {e}");
            }
        }
    }
}

// SAFETY: MmapRegion owns its mapping exclusively; moving it between threads
// does not invalidate the mapping (the file is moved along with it).
unsafe impl Send for MmapRegion {}

// SAFETY: all accesses are bounds-checked volatile loads and stores of device
// registers; no host-side state is mutated after construction.
unsafe impl Sync for MmapRegion {}
