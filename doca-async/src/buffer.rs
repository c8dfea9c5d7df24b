//! Reference-counted buffers drawn from an inventory over a memory map.
//!
//! A buffer is a view with two nested ranges: the *memory region* (the full
//! head..tail span) and the *data region* (offset + length inside it). The
//! head space ahead of the data region is used by some engines for header
//! bytes; output buffers start with an empty data region that the completed
//! task extends.
//!
//! The SDK's buffer reference counters are not thread-safe, so all clones
//! and drops must happen on the engine thread, which the `!Send` types
//! enforce.

use crate::error::{Error, Result, check};
use crate::memory_map::MemoryMap;
use doca_async_sys::ffi;
use std::ffi::c_void;

/// Pool of buffer descriptors.
pub struct BufferInventory {
    raw: *mut ffi::doca_buf_inventory,
}

impl BufferInventory {
    pub fn new(num_elements: u32) -> Result<BufferInventory> {
        let mut raw = std::ptr::null_mut();
        check(unsafe { ffi::doca_buf_inventory_create(num_elements, &mut raw) })?;
        let inventory = BufferInventory { raw };
        check(unsafe { ffi::doca_buf_inventory_start(raw) })?;
        Ok(inventory)
    }

    /// Descriptors currently available.
    pub fn num_free(&self) -> Result<u32> {
        let mut free = 0u32;
        check(unsafe { ffi::doca_buf_inventory_get_num_free_elements(self.raw, &mut free) })?;
        Ok(free)
    }

    /// Buffer over `len` bytes at `offset` into the map, with an empty data
    /// region (output buffer shape).
    pub fn buf_by_memory(&self, mmap: &MemoryMap, offset: usize, len: usize) -> Result<Buffer> {
        let (base, span) = mmap.memrange()?;
        if offset + len > span {
            return Err(Error::InvalidValue);
        }
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_buf_inventory_buf_get_by_addr(
                self.raw,
                mmap.raw(),
                base.add(offset) as *mut c_void,
                len,
                &mut raw,
            )
        })?;
        Ok(Buffer { raw })
    }

    /// Buffer whose memory and data regions coincide (input buffer shape).
    pub fn buf_by_data(&self, mmap: &MemoryMap, offset: usize, data_len: usize) -> Result<Buffer> {
        let (base, span) = mmap.memrange()?;
        if offset + data_len > span {
            return Err(Error::InvalidValue);
        }
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_buf_inventory_buf_get_by_data(
                self.raw,
                mmap.raw(),
                base.add(offset) as *mut c_void,
                data_len,
                &mut raw,
            )
        })?;
        Ok(Buffer { raw })
    }

    /// Buffer with explicit memory and data regions.
    pub fn buf_by_args(
        &self,
        mmap: &MemoryMap,
        offset: usize,
        len: usize,
        data_offset: usize,
        data_len: usize,
    ) -> Result<Buffer> {
        let (base, span) = mmap.memrange()?;
        if offset + len > span || data_offset + data_len > len {
            return Err(Error::InvalidValue);
        }
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_buf_inventory_buf_get_by_args(
                self.raw,
                mmap.raw(),
                base.add(offset) as *mut c_void,
                len,
                base.add(offset + data_offset) as *mut c_void,
                data_len,
                &mut raw,
            )
        })?;
        Ok(Buffer { raw })
    }

    /// Independent descriptor over the same region as `src`.
    pub fn duplicate(&self, src: &Buffer) -> Result<Buffer> {
        let mut raw = std::ptr::null_mut();
        check(unsafe { ffi::doca_buf_inventory_buf_dup(self.raw, src.raw, &mut raw) })?;
        Ok(Buffer { raw })
    }
}

impl Drop for BufferInventory {
    fn drop(&mut self) {
        unsafe {
            ffi::doca_buf_inventory_stop(self.raw);
            ffi::doca_buf_inventory_destroy(self.raw);
        }
    }
}

/// Reference-counted view into a memory-map region.
///
/// Cloning increments the SDK reference counter; dropping the last clone
/// returns the descriptor to its inventory.
pub struct Buffer {
    raw: *mut ffi::doca_buf,
}

impl Buffer {
    /// Adopts a buffer handed out by the SDK (managed receive queues).
    pub(crate) fn from_raw(raw: *mut ffi::doca_buf) -> Buffer {
        Buffer { raw }
    }

    pub(crate) fn raw(&self) -> *mut ffi::doca_buf {
        self.raw
    }

    /// The data region.
    pub fn data(&self) -> Result<&[u8]> {
        let mut base: *mut c_void = std::ptr::null_mut();
        let mut len = 0usize;
        unsafe {
            check(ffi::doca_buf_get_data(self.raw, &mut base))?;
            check(ffi::doca_buf_get_data_len(self.raw, &mut len))?;
            Ok(std::slice::from_raw_parts(base as *const u8, len))
        }
    }

    /// Mutable access to the data region.
    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        let mut base: *mut c_void = std::ptr::null_mut();
        let mut len = 0usize;
        unsafe {
            check(ffi::doca_buf_get_data(self.raw, &mut base))?;
            check(ffi::doca_buf_get_data_len(self.raw, &mut len))?;
            Ok(std::slice::from_raw_parts_mut(base as *mut u8, len))
        }
    }

    /// The full memory region, including head and tail space.
    pub fn memory(&self) -> Result<&[u8]> {
        let mut base: *mut c_void = std::ptr::null_mut();
        let mut len = 0usize;
        unsafe {
            check(ffi::doca_buf_get_head(self.raw, &mut base))?;
            check(ffi::doca_buf_get_len(self.raw, &mut len))?;
            Ok(std::slice::from_raw_parts(base as *const u8, len))
        }
    }

    /// Repositions the data region inside the memory region. Does not move
    /// or reallocate bytes.
    pub fn set_data(&mut self, data_offset: usize, data_len: usize) -> Result<()> {
        let mut head: *mut c_void = std::ptr::null_mut();
        unsafe {
            check(ffi::doca_buf_get_head(self.raw, &mut head))?;
            check(ffi::doca_buf_set_data(
                self.raw,
                (head as *mut u8).add(data_offset) as *mut c_void,
                data_len,
            ))
        }
    }

    /// Releases this reference early. Equivalent to dropping the buffer;
    /// the last release returns the descriptor to its inventory.
    pub fn clear(self) {}

    /// Current SDK reference count.
    pub fn refcount(&self) -> Result<u16> {
        let mut count = 0u16;
        check(unsafe { ffi::doca_buf_get_refcount(self.raw, &mut count) })?;
        Ok(count)
    }
}

impl Clone for Buffer {
    fn clone(&self) -> Buffer {
        unsafe { ffi::doca_buf_inc_refcount(self.raw, std::ptr::null_mut()) };
        Buffer { raw: self.raw }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        unsafe { ffi::doca_buf_dec_refcount(self.raw, std::ptr::null_mut()) };
    }
}
