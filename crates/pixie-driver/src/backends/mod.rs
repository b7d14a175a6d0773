//! Host-side backends
//!
//! - [`mmap`]: BAR mapping through a sysfs `resource` file
//! - [`sysfs`]: the bridge library over `/sys/bus/pci/devices`

pub mod mmap;
pub mod sysfs;

pub use mmap::MmapRegion;
pub use sysfs::SysfsPlx;
