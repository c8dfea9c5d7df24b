//! Host memory registered with one or more devices under a permission mask.

use crate::device::Device;
use crate::error::{Error, Result, check};
use doca_async_sys::ffi;
use std::ffi::c_void;
use tracing::trace;

bitflags::bitflags! {
    /// Access permissions on a memory map. `empty()` is local read-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessFlags: u32 {
        const LOCAL_READ_WRITE = ffi::DOCA_ACCESS_FLAG_LOCAL_READ_WRITE;
        const RDMA_READ = ffi::DOCA_ACCESS_FLAG_RDMA_READ;
        const RDMA_WRITE = ffi::DOCA_ACCESS_FLAG_RDMA_WRITE;
        const RDMA_ATOMIC = ffi::DOCA_ACCESS_FLAG_RDMA_ATOMIC;
        const PCI_READ_WRITE = ffi::DOCA_ACCESS_FLAG_PCI_READ_WRITE;
        const PCI_RELAXED_ORDERING = ffi::DOCA_ACCESS_FLAG_PCI_RELAXED_ORDERING;
    }
}

/// Region of host memory pinned for device access.
///
/// Devices can only be added at construction, never after start. The map
/// keeps the devices it was registered with alive, and every buffer drawn
/// from the map must be dropped before the map.
pub struct MemoryMap {
    raw: *mut ffi::doca_mmap,
    // referenced here so the devices outlive the SDK map handle
    _devices: Vec<Device>,
}

impl MemoryMap {
    /// Registers `len` bytes starting at `region` with the given devices.
    ///
    /// # Safety
    ///
    /// The bytes must remain valid and pinned for the whole lifetime of the
    /// map and everything derived from it.
    pub unsafe fn new(
        devices: &[Device],
        region: *mut u8,
        len: usize,
        permissions: AccessFlags,
    ) -> Result<MemoryMap> {
        if region.is_null() || len == 0 {
            return Err(Error::InvalidValue);
        }
        let mut raw = std::ptr::null_mut();
        check(unsafe { ffi::doca_mmap_create(&mut raw) })?;

        let map = MemoryMap {
            raw,
            _devices: devices.to_vec(),
        };
        unsafe {
            check(ffi::doca_mmap_set_memrange(raw, region as *mut c_void, len))?;
            for dev in devices {
                check(ffi::doca_mmap_add_dev(raw, dev.raw()))?;
            }
            check(ffi::doca_mmap_set_permissions(raw, permissions.bits()))?;
            check(ffi::doca_mmap_start(raw))?;
        }
        trace!(len, "memory map started");
        Ok(map)
    }

    /// Reconstructs a map on a local device from a descriptor exported by
    /// the remote side. The data range is discoverable via [`memrange`].
    ///
    /// [`memrange`]: MemoryMap::memrange
    pub fn from_export(dev: &Device, export_desc: &[u8]) -> Result<MemoryMap> {
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_mmap_create_from_export(
                std::ptr::null_mut(),
                export_desc.as_ptr() as *const c_void,
                export_desc.len(),
                dev.raw(),
                &mut raw,
            )
        })?;
        Ok(MemoryMap {
            raw,
            _devices: vec![dev.clone()],
        })
    }

    /// Finishes construction for maps created by other subsystems (device
    /// emulation): adds devices and permissions, then starts.
    pub(crate) fn adopt_and_start(
        raw: *mut ffi::doca_mmap,
        devices: &[Device],
        permissions: AccessFlags,
    ) -> Result<MemoryMap> {
        let map = MemoryMap {
            raw,
            _devices: devices.to_vec(),
        };
        unsafe {
            for dev in devices {
                check(ffi::doca_mmap_add_dev(raw, dev.raw()))?;
            }
            check(ffi::doca_mmap_set_permissions(raw, permissions.bits()))?;
            check(ffi::doca_mmap_start(raw))?;
        }
        Ok(map)
    }

    /// Opaque descriptor for cross-host transfer of this map.
    pub fn export_pci(&self, dev: &Device) -> Result<Vec<u8>> {
        let mut desc: *const c_void = std::ptr::null();
        let mut len = 0usize;
        check(unsafe { ffi::doca_mmap_export_pci(self.raw, dev.raw(), &mut desc, &mut len) })?;
        let bytes = unsafe { std::slice::from_raw_parts(desc as *const u8, len) };
        Ok(bytes.to_vec())
    }

    /// Base pointer and length of the mapped range.
    pub fn memrange(&self) -> Result<(*mut u8, usize)> {
        let mut addr: *mut c_void = std::ptr::null_mut();
        let mut len = 0usize;
        check(unsafe { ffi::doca_mmap_get_memrange(self.raw, &mut addr, &mut len) })?;
        Ok((addr as *mut u8, len))
    }

    pub(crate) fn raw(&self) -> *mut ffi::doca_mmap {
        self.raw
    }
}

impl Drop for MemoryMap {
    fn drop(&mut self) {
        unsafe {
            ffi::doca_mmap_stop(self.raw);
            ffi::doca_mmap_destroy(self.raw);
        }
    }
}
