//! Memory maps and reference-counted buffers.

use super::*;
use std::cell::{Cell, RefCell};
use std::ffi::c_void;

pub struct doca_mmap {
    pub(crate) base: Cell<*mut u8>,
    pub(crate) len: Cell<usize>,
    pub(crate) permissions: Cell<u32>,
    pub(crate) devices: RefCell<Vec<*mut doca_dev>>,
    pub(crate) started: Cell<bool>,
    // backing for maps created over emulated-device host regions; kept so the
    // bytes live exactly as long as the map
    pub(crate) backing: RefCell<Option<Box<[u8]>>>,
}

#[repr(C)]
struct ExportDesc {
    magic: u64,
    base: *mut u8,
    len: usize,
}

const EXPORT_MAGIC: u64 = 0x444f_4341_4d4d_4150;

pub unsafe fn doca_mmap_create(mmap: *mut *mut doca_mmap) -> doca_error_t {
    let handle = Box::new(doca_mmap {
        base: Cell::new(std::ptr::null_mut()),
        len: Cell::new(0),
        permissions: Cell::new(DOCA_ACCESS_FLAG_LOCAL_READ_ONLY),
        devices: RefCell::new(Vec::new()),
        started: Cell::new(false),
        backing: RefCell::new(None),
    });
    unsafe { *mmap = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_destroy(mmap: *mut doca_mmap) -> doca_error_t {
    if mmap.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(mmap) });
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_set_memrange(
    mmap: *mut doca_mmap,
    addr: *mut c_void,
    len: usize,
) -> doca_error_t {
    unsafe {
        if (*mmap).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        (*mmap).base.set(addr as *mut u8);
        (*mmap).len.set(len);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_get_memrange(
    mmap: *const doca_mmap,
    addr: *mut *mut c_void,
    len: *mut usize,
) -> doca_error_t {
    unsafe {
        *addr = (*mmap).base.get() as *mut c_void;
        *len = (*mmap).len.get();
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_add_dev(mmap: *mut doca_mmap, dev: *mut doca_dev) -> doca_error_t {
    unsafe {
        if (*mmap).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        (*mmap).devices.borrow_mut().push(dev);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_set_permissions(mmap: *mut doca_mmap, permissions: u32) -> doca_error_t {
    unsafe {
        if (*mmap).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        (*mmap).permissions.set(permissions);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_start(mmap: *mut doca_mmap) -> doca_error_t {
    unsafe {
        if (*mmap).base.get().is_null() || (*mmap).len.get() == 0 {
            return DOCA_ERROR_INVALID_VALUE;
        }
        (*mmap).started.set(true);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_stop(mmap: *mut doca_mmap) -> doca_error_t {
    unsafe { (*mmap).started.set(false) };
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_export_pci(
    mmap: *mut doca_mmap,
    _dev: *mut doca_dev,
    export_desc: *mut *const c_void,
    export_desc_len: *mut usize,
) -> doca_error_t {
    unsafe {
        if !(*mmap).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        let desc = Box::new(ExportDesc {
            magic: EXPORT_MAGIC,
            base: (*mmap).base.get(),
            len: (*mmap).len.get(),
        });
        *export_desc = Box::into_raw(desc) as *const c_void;
        *export_desc_len = std::mem::size_of::<ExportDesc>();
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_mmap_create_from_export(
    _user_data: *mut doca_data,
    export_desc: *const c_void,
    export_desc_len: usize,
    dev: *mut doca_dev,
    mmap: *mut *mut doca_mmap,
) -> doca_error_t {
    if export_desc.is_null() || export_desc_len < std::mem::size_of::<ExportDesc>() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        let desc = &*(export_desc as *const ExportDesc);
        if desc.magic != EXPORT_MAGIC {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let handle = Box::new(doca_mmap {
            base: Cell::new(desc.base),
            len: Cell::new(desc.len),
            permissions: Cell::new(DOCA_ACCESS_FLAG_LOCAL_READ_WRITE),
            devices: RefCell::new(vec![dev]),
            started: Cell::new(true),
            backing: RefCell::new(None),
        });
        *mmap = Box::into_raw(handle);
    }
    DOCA_SUCCESS
}

// ── buffer inventory ────────────────────────────────────────

pub struct doca_buf_inventory {
    num_elements: u32,
    free_elements: Cell<u32>,
    started: Cell<bool>,
}

pub struct doca_buf {
    refcount: Cell<u16>,
    inventory: *mut doca_buf_inventory,
    pub(crate) head: *mut u8,
    pub(crate) len: usize,
    pub(crate) data_off: Cell<usize>,
    pub(crate) data_len: Cell<usize>,
}

impl doca_buf {
    /// Buffer outside any inventory; dropping the last reference frees it
    /// without touching pool accounting. Used by managed receive queues.
    pub(crate) fn unpooled(head: *mut u8, len: usize, data_len: usize) -> *mut doca_buf {
        Box::into_raw(Box::new(doca_buf {
            refcount: Cell::new(1),
            inventory: std::ptr::null_mut(),
            head,
            len,
            data_off: Cell::new(0),
            data_len: Cell::new(data_len),
        }))
    }

    pub(crate) fn data_ptr(&self) -> *mut u8 {
        unsafe { self.head.add(self.data_off.get()) }
    }

    pub(crate) fn data_slice(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.data_ptr(), self.data_len.get()) }
    }

    /// Writable capacity from the data offset to the end of the memory
    /// region.
    pub(crate) fn tail_capacity(&self) -> usize {
        self.len - self.data_off.get()
    }

    pub(crate) fn write_at_data(&self, bytes: &[u8]) -> doca_error_t {
        if bytes.len() > self.tail_capacity() {
            return DOCA_ERROR_TOO_BIG;
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.data_ptr(), bytes.len());
        }
        self.data_len.set(bytes.len());
        DOCA_SUCCESS
    }
}

pub unsafe fn doca_buf_inventory_create(
    num_elements: u32,
    inventory: *mut *mut doca_buf_inventory,
) -> doca_error_t {
    if num_elements == 0 {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_buf_inventory {
        num_elements,
        free_elements: Cell::new(num_elements),
        started: Cell::new(false),
    });
    unsafe { *inventory = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_inventory_destroy(inventory: *mut doca_buf_inventory) -> doca_error_t {
    if inventory.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(inventory) });
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_inventory_start(inventory: *mut doca_buf_inventory) -> doca_error_t {
    unsafe { (*inventory).started.set(true) };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_inventory_stop(inventory: *mut doca_buf_inventory) -> doca_error_t {
    unsafe { (*inventory).started.set(false) };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_inventory_get_num_free_elements(
    inventory: *const doca_buf_inventory,
    num_free: *mut u32,
) -> doca_error_t {
    unsafe { *num_free = (*inventory).free_elements.get() };
    DOCA_SUCCESS
}

unsafe fn inventory_alloc(
    inventory: *mut doca_buf_inventory,
    mmap: *mut doca_mmap,
    head: *mut u8,
    len: usize,
    data_off: usize,
    data_len: usize,
    buf: *mut *mut doca_buf,
) -> doca_error_t {
    unsafe {
        if !(*inventory).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        if !(*mmap).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        let base = (*mmap).base.get();
        let span = (*mmap).len.get();
        if head < base {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let offset = head as usize - base as usize;
        if offset + len > span || data_off + data_len > len {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let free = (*inventory).free_elements.get();
        if free == 0 {
            return DOCA_ERROR_NO_MEMORY;
        }
        (*inventory).free_elements.set(free - 1);

        let handle = Box::new(doca_buf {
            refcount: Cell::new(1),
            inventory,
            head,
            len,
            data_off: Cell::new(data_off),
            data_len: Cell::new(data_len),
        });
        *buf = Box::into_raw(handle);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_inventory_buf_get_by_addr(
    inventory: *mut doca_buf_inventory,
    mmap: *mut doca_mmap,
    addr: *mut c_void,
    len: usize,
    buf: *mut *mut doca_buf,
) -> doca_error_t {
    unsafe { inventory_alloc(inventory, mmap, addr as *mut u8, len, 0, 0, buf) }
}

pub unsafe fn doca_buf_inventory_buf_get_by_data(
    inventory: *mut doca_buf_inventory,
    mmap: *mut doca_mmap,
    data: *mut c_void,
    data_len: usize,
    buf: *mut *mut doca_buf,
) -> doca_error_t {
    unsafe { inventory_alloc(inventory, mmap, data as *mut u8, data_len, 0, data_len, buf) }
}

pub unsafe fn doca_buf_inventory_buf_get_by_args(
    inventory: *mut doca_buf_inventory,
    mmap: *mut doca_mmap,
    addr: *mut c_void,
    len: usize,
    data: *mut c_void,
    data_len: usize,
    buf: *mut *mut doca_buf,
) -> doca_error_t {
    let data_off = data as usize - addr as usize;
    unsafe { inventory_alloc(inventory, mmap, addr as *mut u8, len, data_off, data_len, buf) }
}

pub unsafe fn doca_buf_inventory_buf_dup(
    inventory: *mut doca_buf_inventory,
    src: *const doca_buf,
    dst: *mut *mut doca_buf,
) -> doca_error_t {
    unsafe {
        let free = (*inventory).free_elements.get();
        if free == 0 {
            return DOCA_ERROR_NO_MEMORY;
        }
        (*inventory).free_elements.set(free - 1);
        let handle = Box::new(doca_buf {
            refcount: Cell::new(1),
            inventory,
            head: (*src).head,
            len: (*src).len,
            data_off: Cell::new((*src).data_off.get()),
            data_len: Cell::new((*src).data_len.get()),
        });
        *dst = Box::into_raw(handle);
    }
    DOCA_SUCCESS
}

// ── buffer accessors ────────────────────────────────────────

pub unsafe fn doca_buf_inc_refcount(buf: *mut doca_buf, refcount: *mut u16) -> doca_error_t {
    unsafe {
        let n = (*buf).refcount.get() + 1;
        (*buf).refcount.set(n);
        if !refcount.is_null() {
            *refcount = n;
        }
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_dec_refcount(buf: *mut doca_buf, refcount: *mut u16) -> doca_error_t {
    unsafe {
        let n = (*buf).refcount.get() - 1;
        (*buf).refcount.set(n);
        if !refcount.is_null() {
            *refcount = n;
        }
        if n == 0 {
            let inventory = (*buf).inventory;
            if !inventory.is_null() {
                let free = (*inventory).free_elements.get();
                (*inventory)
                    .free_elements
                    .set((free + 1).min((*inventory).num_elements));
            }
            drop(Box::from_raw(buf));
        }
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_get_refcount(buf: *const doca_buf, refcount: *mut u16) -> doca_error_t {
    unsafe { *refcount = (*buf).refcount.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_get_head(buf: *const doca_buf, head: *mut *mut c_void) -> doca_error_t {
    unsafe { *head = (*buf).head as *mut c_void };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_get_len(buf: *const doca_buf, len: *mut usize) -> doca_error_t {
    unsafe { *len = (*buf).len };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_get_data(buf: *const doca_buf, data: *mut *mut c_void) -> doca_error_t {
    unsafe { *data = (*buf).data_ptr() as *mut c_void };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_get_data_len(buf: *const doca_buf, data_len: *mut usize) -> doca_error_t {
    unsafe { *data_len = (*buf).data_len.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_buf_set_data(
    buf: *mut doca_buf,
    data: *mut c_void,
    data_len: usize,
) -> doca_error_t {
    unsafe {
        let head = (*buf).head as usize;
        if (data as usize) < head {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let offset = data as usize - head;
        if offset + data_len > (*buf).len {
            return DOCA_ERROR_INVALID_VALUE;
        }
        (*buf).data_off.set(offset);
        (*buf).data_len.set(data_len);
    }
    DOCA_SUCCESS
}
