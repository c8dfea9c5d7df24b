//! PCI device emulation: type builders, representors, hotplug and host
//! memory regions.

use super::*;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CStr, CString, c_char, c_void};

pub type doca_devemu_pci_hotplug_state = u32;
pub const DOCA_DEVEMU_PCI_HP_STATE_POWER_OFF: doca_devemu_pci_hotplug_state = 0;
pub const DOCA_DEVEMU_PCI_HP_STATE_UNPLUG_IN_PROGRESS: doca_devemu_pci_hotplug_state = 1;
pub const DOCA_DEVEMU_PCI_HP_STATE_PLUG_IN_PROGRESS: doca_devemu_pci_hotplug_state = 2;
pub const DOCA_DEVEMU_PCI_HP_STATE_POWER_ON: doca_devemu_pci_hotplug_state = 3;

pub type doca_devemu_pci_bar_mem_type = u32;
pub const DOCA_DEVEMU_PCI_BAR_MEM_TYPE_32_BIT: doca_devemu_pci_bar_mem_type = 0;
pub const DOCA_DEVEMU_PCI_BAR_MEM_TYPE_64_BIT: doca_devemu_pci_bar_mem_type = 1;

pub type doca_devemu_pci_hotplug_state_change_cb_t =
    unsafe extern "C" fn(*mut doca_devemu_pci_dev, doca_data);

#[allow(dead_code)]
enum BarRegion {
    Memory { id: u8, log_sz: u8, mem_type: doca_devemu_pci_bar_mem_type, prefetchable: bool },
    Io { id: u8, log_sz: u8 },
    DbByOffset { id: u8, start_addr: u64, size: u64, log_db_size: u8, log_stride_size: u8 },
    DbByData { id: u8, start_addr: u64, size: u64, log_db_size: u8, db_id_msbyte: u16, db_id_lsbyte: u16 },
    MsixTable { id: u8, start_addr: u64, size: u64 },
    MsixPba { id: u8, start_addr: u64, size: u64 },
    Stateful { id: u8, start_addr: u64, size: u64 },
}

#[allow(dead_code)]
pub struct doca_devemu_pci_type {
    name: String,
    dev: Cell<*mut doca_dev>,
    device_id: Cell<u16>,
    vendor_id: Cell<u16>,
    subsystem_id: Cell<u16>,
    subsystem_vendor_id: Cell<u16>,
    revision_id: Cell<u8>,
    class_code: Cell<u32>,
    num_msix: Cell<u16>,
    num_db: Cell<u16>,
    bars: RefCell<Vec<BarRegion>>,
    started: Cell<bool>,
    rep_seq: Cell<u32>,
}

pub unsafe fn doca_devemu_pci_type_create(
    name: *const c_char,
    pci_type: *mut *mut doca_devemu_pci_type,
) -> doca_error_t {
    if name.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    let handle = Box::new(doca_devemu_pci_type {
        name,
        dev: Cell::new(std::ptr::null_mut()),
        device_id: Cell::new(0),
        vendor_id: Cell::new(0),
        subsystem_id: Cell::new(0),
        subsystem_vendor_id: Cell::new(0),
        revision_id: Cell::new(0),
        class_code: Cell::new(0),
        num_msix: Cell::new(0),
        num_db: Cell::new(0),
        bars: RefCell::new(Vec::new()),
        started: Cell::new(false),
        rep_seq: Cell::new(0),
    });
    unsafe { *pci_type = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_type_destroy(pci_type: *mut doca_devemu_pci_type) -> doca_error_t {
    if pci_type.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(pci_type) });
    DOCA_SUCCESS
}

macro_rules! type_setter {
    ($fn_name:ident, $field:ident, $ty:ty) => {
        pub unsafe fn $fn_name(
            pci_type: *mut doca_devemu_pci_type,
            value: $ty,
        ) -> doca_error_t {
            unsafe {
                if (*pci_type).started.get() {
                    return DOCA_ERROR_BAD_STATE;
                }
                (*pci_type).$field.set(value);
            }
            DOCA_SUCCESS
        }
    };
}

type_setter!(doca_devemu_pci_type_set_device_id, device_id, u16);
type_setter!(doca_devemu_pci_type_set_vendor_id, vendor_id, u16);
type_setter!(doca_devemu_pci_type_set_subsystem_id, subsystem_id, u16);
type_setter!(doca_devemu_pci_type_set_subsystem_vendor_id, subsystem_vendor_id, u16);
type_setter!(doca_devemu_pci_type_set_revision_id, revision_id, u8);
type_setter!(doca_devemu_pci_type_set_class_code, class_code, u32);
type_setter!(doca_devemu_pci_type_set_num_msix, num_msix, u16);
type_setter!(doca_devemu_pci_type_set_num_db, num_db, u16);

pub unsafe fn doca_devemu_pci_type_set_dev(
    pci_type: *mut doca_devemu_pci_type,
    dev: *mut doca_dev,
) -> doca_error_t {
    unsafe {
        if (*pci_type).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        (*pci_type).dev.set(dev);
    }
    DOCA_SUCCESS
}

unsafe fn push_bar(pci_type: *mut doca_devemu_pci_type, region: BarRegion) -> doca_error_t {
    unsafe {
        if (*pci_type).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        (*pci_type).bars.borrow_mut().push(region);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_type_set_memory_bar_conf(
    pci_type: *mut doca_devemu_pci_type,
    id: u8,
    log_sz: u8,
    mem_type: doca_devemu_pci_bar_mem_type,
    prefetchable: u8,
) -> doca_error_t {
    unsafe {
        push_bar(
            pci_type,
            BarRegion::Memory { id, log_sz, mem_type, prefetchable: prefetchable != 0 },
        )
    }
}

pub unsafe fn doca_devemu_pci_type_set_io_bar_conf(
    pci_type: *mut doca_devemu_pci_type,
    id: u8,
    log_sz: u8,
) -> doca_error_t {
    unsafe { push_bar(pci_type, BarRegion::Io { id, log_sz }) }
}

pub unsafe fn doca_devemu_pci_type_set_bar_db_region_by_offset_conf(
    pci_type: *mut doca_devemu_pci_type,
    id: u8,
    start_addr: u64,
    size: u64,
    log_db_size: u8,
    log_stride_size: u8,
) -> doca_error_t {
    unsafe {
        push_bar(
            pci_type,
            BarRegion::DbByOffset { id, start_addr, size, log_db_size, log_stride_size },
        )
    }
}

pub unsafe fn doca_devemu_pci_type_set_bar_db_region_by_data_conf(
    pci_type: *mut doca_devemu_pci_type,
    id: u8,
    start_addr: u64,
    size: u64,
    log_db_size: u8,
    db_id_msbyte: u16,
    db_id_lsbyte: u16,
) -> doca_error_t {
    unsafe {
        push_bar(
            pci_type,
            BarRegion::DbByData { id, start_addr, size, log_db_size, db_id_msbyte, db_id_lsbyte },
        )
    }
}

pub unsafe fn doca_devemu_pci_type_set_bar_msix_table_region_conf(
    pci_type: *mut doca_devemu_pci_type,
    id: u8,
    start_addr: u64,
    size: u64,
) -> doca_error_t {
    unsafe { push_bar(pci_type, BarRegion::MsixTable { id, start_addr, size }) }
}

pub unsafe fn doca_devemu_pci_type_set_bar_msix_pba_region_conf(
    pci_type: *mut doca_devemu_pci_type,
    id: u8,
    start_addr: u64,
    size: u64,
) -> doca_error_t {
    unsafe { push_bar(pci_type, BarRegion::MsixPba { id, start_addr, size }) }
}

pub unsafe fn doca_devemu_pci_type_set_bar_stateful_region_conf(
    pci_type: *mut doca_devemu_pci_type,
    id: u8,
    start_addr: u64,
    size: u64,
) -> doca_error_t {
    unsafe { push_bar(pci_type, BarRegion::Stateful { id, start_addr, size }) }
}

pub unsafe fn doca_devemu_pci_type_start(pci_type: *mut doca_devemu_pci_type) -> doca_error_t {
    unsafe {
        if (*pci_type).dev.get().is_null() {
            return DOCA_ERROR_BAD_STATE;
        }
        (*pci_type).started.set(true);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_type_stop(pci_type: *mut doca_devemu_pci_type) -> doca_error_t {
    unsafe { (*pci_type).started.set(false) };
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_type_is_started(
    pci_type: *const doca_devemu_pci_type,
    started: *mut u8,
) -> doca_error_t {
    unsafe { *started = (*pci_type).started.get() as u8 };
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_type_create_rep(
    pci_type: *mut doca_devemu_pci_type,
    rep: *mut *mut doca_dev_rep,
) -> doca_error_t {
    unsafe {
        if !(*pci_type).started.get() {
            return DOCA_ERROR_BAD_STATE;
        }
        let seq = (*pci_type).rep_seq.get();
        (*pci_type).rep_seq.set(seq + 1);
        let vuid = CString::new(format!("EMU{}{:04}", (*pci_type).name, seq))
            .unwrap_or_else(|_| CString::new("EMUREP").unwrap());
        let info = register_emulated_rep(vuid, pci_type);
        doca_dev_rep_open(info, rep)
    }
}

// ── emulated device context ─────────────────────────────────

#[repr(C)]
pub struct doca_devemu_pci_dev {
    pub(crate) base: doca_ctx,
    pci_type: *mut doca_devemu_pci_type,
    rep: *mut doca_dev_rep,
    hotplug_state: Cell<doca_devemu_pci_hotplug_state>,
    hotplug_cb: Cell<Option<doca_devemu_pci_hotplug_state_change_cb_t>>,
    hotplug_cb_user_data: Cell<doca_data>,
    host_regions: RefCell<HashMap<u64, Box<[u8]>>>,
}

pub unsafe fn doca_devemu_pci_dev_create(
    pci_type: *mut doca_devemu_pci_type,
    rep: *mut doca_dev_rep,
    pe: *mut doca_pe,
    pci_dev: *mut *mut doca_devemu_pci_dev,
) -> doca_error_t {
    if pci_type.is_null() || rep.is_null() || pe.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_devemu_pci_dev {
        base: doca_ctx::new(CtxKind::PciDev),
        pci_type,
        rep,
        hotplug_state: Cell::new(DOCA_DEVEMU_PCI_HP_STATE_POWER_OFF),
        hotplug_cb: Cell::new(None),
        hotplug_cb_user_data: Cell::new(doca_data::null()),
        host_regions: RefCell::new(HashMap::new()),
    });
    // this context type arrives pre-connected to its engine
    handle.base.pe.set(pe);
    unsafe { *pci_dev = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_dev_destroy(pci_dev: *mut doca_devemu_pci_dev) -> doca_error_t {
    if pci_dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(pci_dev) });
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_dev_as_ctx(pci_dev: *mut doca_devemu_pci_dev) -> *mut doca_ctx {
    pci_dev as *mut doca_ctx
}

pub unsafe fn doca_devemu_pci_dev_get_hotplug_state(
    pci_dev: *const doca_devemu_pci_dev,
    state: *mut doca_devemu_pci_hotplug_state,
) -> doca_error_t {
    unsafe { *state = (*pci_dev).hotplug_state.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_dev_event_hotplug_state_change_register(
    pci_dev: *mut doca_devemu_pci_dev,
    cb: doca_devemu_pci_hotplug_state_change_cb_t,
    user_data: doca_data,
) -> doca_error_t {
    unsafe {
        (*pci_dev).hotplug_cb.set(Some(cb));
        (*pci_dev).hotplug_cb_user_data.set(user_data);
    }
    DOCA_SUCCESS
}

unsafe fn hotplug_transition(
    pci_dev: *mut doca_devemu_pci_dev,
    transient: doca_devemu_pci_hotplug_state,
    target: doca_devemu_pci_hotplug_state,
) -> doca_error_t {
    unsafe {
        if (*pci_dev).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        (*pci_dev).hotplug_state.set(transient);
        pe_enqueue((*pci_dev).base.pe.get(), move || unsafe {
            (*pci_dev).hotplug_state.set(target);
            if let Some(cb) = (*pci_dev).hotplug_cb.get() {
                cb(pci_dev, (*pci_dev).hotplug_cb_user_data.get());
            }
        });
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_devemu_pci_dev_hotplug(pci_dev: *mut doca_devemu_pci_dev) -> doca_error_t {
    unsafe {
        hotplug_transition(
            pci_dev,
            DOCA_DEVEMU_PCI_HP_STATE_PLUG_IN_PROGRESS,
            DOCA_DEVEMU_PCI_HP_STATE_POWER_ON,
        )
    }
}

pub unsafe fn doca_devemu_pci_dev_hotunplug(pci_dev: *mut doca_devemu_pci_dev) -> doca_error_t {
    unsafe {
        hotplug_transition(
            pci_dev,
            DOCA_DEVEMU_PCI_HP_STATE_UNPLUG_IN_PROGRESS,
            DOCA_DEVEMU_PCI_HP_STATE_POWER_OFF,
        )
    }
}

fn region_ptr(
    regions: &mut HashMap<u64, Box<[u8]>>,
    iova: u64,
    len: usize,
) -> *mut u8 {
    let backing = regions
        .entry(iova)
        .or_insert_with(|| vec![0u8; len].into_boxed_slice());
    backing.as_mut_ptr()
}

/// Maps the host-iova range of an emulated device. The returned map is not
/// yet started so devices and permissions can still be attached.
pub unsafe fn doca_devemu_pci_mmap_create(
    pci_dev: *mut doca_devemu_pci_dev,
    iova: u64,
    len: usize,
    mmap: *mut *mut doca_mmap,
) -> doca_error_t {
    if pci_dev.is_null() || len == 0 {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        let base = {
            let mut regions = (*pci_dev).host_regions.borrow_mut();
            let backing = regions
                .entry(iova)
                .or_insert_with(|| vec![0u8; len].into_boxed_slice());
            if backing.len() < len {
                return DOCA_ERROR_INVALID_VALUE;
            }
            backing.as_mut_ptr()
        };
        let status = doca_mmap_create(mmap);
        if status != DOCA_SUCCESS {
            return status;
        }
        doca_mmap_set_memrange(*mmap, base as *mut c_void, len)
    }
}

/// Test hook: the "host side" view of an emulated device's memory at `iova`.
pub fn host_region_slice(
    pci_dev: *mut doca_devemu_pci_dev,
    iova: u64,
    len: usize,
) -> *mut u8 {
    unsafe { region_ptr(&mut (*pci_dev).host_regions.borrow_mut(), iova, len) }
}
