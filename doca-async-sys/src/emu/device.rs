//! Device and representor discovery.
//!
//! The emulated machine exposes two devices: `0000:03:00.0` / `mlx5_0` with
//! every capability, and `0000:03:00.1` / `mlx5_1` with only the DMA and
//! RDMA engines, so capability-mismatch paths stay reachable in tests.

use super::*;
use std::cell::RefCell;
use std::ffi::{CStr, CString, c_char};

pub const DOCA_DEVINFO_PCI_ADDR_SIZE: usize = 13;
pub const DOCA_DEVINFO_IBDEV_NAME_SIZE: usize = 64;
pub const DOCA_DEVINFO_REP_PCI_ADDR_SIZE: usize = 13;
pub const DOCA_DEVINFO_REP_VUID_SIZE: usize = 128;

pub type doca_devinfo_rep_filter = u32;
pub const DOCA_DEVINFO_REP_FILTER_ALL: doca_devinfo_rep_filter = 0;
pub const DOCA_DEVINFO_REP_FILTER_NET: doca_devinfo_rep_filter = 1;
pub const DOCA_DEVINFO_REP_FILTER_EMULATED: doca_devinfo_rep_filter = 2;

#[derive(Clone, Copy, Default)]
pub(crate) struct DeviceCaps {
    pub compress_deflate: bool,
    pub comch_server: bool,
    pub comch_client: bool,
    pub dma: bool,
    pub rdma: bool,
    pub aes_gcm: bool,
    pub sha: bool,
    pub erasure_coding: bool,
    pub sync_event_pci: bool,
    pub eth_rxq: bool,
    pub eth_txq: bool,
    pub devemu_mgmt: bool,
    pub devemu_hotplug: bool,
}

pub struct doca_devinfo {
    pci_addr: CString,
    ibdev_name: CString,
    pub(crate) caps: DeviceCaps,
}

pub struct doca_dev {
    pub(crate) info: *mut doca_devinfo,
}

pub struct doca_devinfo_rep {
    pci_addr: CString,
    vuid: CString,
    filter_class: doca_devinfo_rep_filter,
    pub(crate) emulated_type: *mut doca_devemu_pci_type,
}

pub struct doca_dev_rep {
    pub(crate) info: *mut doca_devinfo_rep,
}

thread_local! {
    static DEVINFOS: RefCell<Vec<*mut doca_devinfo>> = RefCell::new(Vec::new());
    static REP_INFOS: RefCell<Vec<*mut doca_devinfo_rep>> = RefCell::new(Vec::new());
}

fn all_caps() -> DeviceCaps {
    DeviceCaps {
        compress_deflate: true,
        comch_server: true,
        comch_client: true,
        dma: true,
        rdma: true,
        aes_gcm: true,
        sha: true,
        erasure_coding: true,
        sync_event_pci: true,
        eth_rxq: true,
        eth_txq: true,
        devemu_mgmt: true,
        devemu_hotplug: true,
    }
}

fn seed_devinfos(list: &mut Vec<*mut doca_devinfo>) {
    list.push(Box::into_raw(Box::new(doca_devinfo {
        pci_addr: CString::new("0000:03:00.0").unwrap(),
        ibdev_name: CString::new("mlx5_0").unwrap(),
        caps: all_caps(),
    })));
    list.push(Box::into_raw(Box::new(doca_devinfo {
        pci_addr: CString::new("0000:03:00.1").unwrap(),
        ibdev_name: CString::new("mlx5_1").unwrap(),
        caps: DeviceCaps {
            dma: true,
            rdma: true,
            ..DeviceCaps::default()
        },
    })));
}

fn with_devinfos<R>(f: impl FnOnce(&[*mut doca_devinfo]) -> R) -> R {
    DEVINFOS.with(|cell| {
        let mut list = cell.borrow_mut();
        if list.is_empty() {
            seed_devinfos(&mut list);
        }
        f(&list)
    })
}

fn seed_rep_infos(list: &mut Vec<*mut doca_devinfo_rep>) {
    list.push(Box::into_raw(Box::new(doca_devinfo_rep {
        pci_addr: CString::new("0000:b1:00.0").unwrap(),
        vuid: CString::new("MT2333XZ0AREP0").unwrap(),
        filter_class: DOCA_DEVINFO_REP_FILTER_NET,
        emulated_type: std::ptr::null_mut(),
    })));
}

/// Called by the PCI emulation when a new representor is spawned for an
/// emulated device type.
pub(crate) fn register_emulated_rep(
    vuid: CString,
    emulated_type: *mut doca_devemu_pci_type,
) -> *mut doca_devinfo_rep {
    let seq = REP_INFOS.with(|cell| cell.borrow().len());
    let info = Box::into_raw(Box::new(doca_devinfo_rep {
        pci_addr: CString::new(format!("0000:e0:{:02x}.0", seq & 0xff)).unwrap(),
        vuid,
        filter_class: DOCA_DEVINFO_REP_FILTER_EMULATED,
        emulated_type,
    }));
    REP_INFOS.with(|cell| cell.borrow_mut().push(info));
    info
}

fn with_rep_infos<R>(f: impl FnOnce(&[*mut doca_devinfo_rep]) -> R) -> R {
    REP_INFOS.with(|cell| {
        let mut list = cell.borrow_mut();
        if list.is_empty() {
            seed_rep_infos(&mut list);
        }
        f(&list)
    })
}

// ── devinfo list ────────────────────────────────────────────

pub unsafe fn doca_devinfo_create_list(
    dev_list: *mut *mut *mut doca_devinfo,
    nb_devs: *mut u32,
) -> doca_error_t {
    let snapshot: Box<[*mut doca_devinfo]> = with_devinfos(|infos| infos.to_vec().into());
    unsafe {
        *nb_devs = snapshot.len() as u32;
        *dev_list = Box::into_raw(snapshot) as *mut *mut doca_devinfo;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_devinfo_destroy_list(dev_list: *mut *mut doca_devinfo) -> doca_error_t {
    if dev_list.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let len = with_devinfos(|infos| infos.len());
    unsafe {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
            dev_list, len,
        )));
    }
    DOCA_SUCCESS
}

unsafe fn copy_cstr(src: &CStr, dst: *mut c_char, cap: usize) -> doca_error_t {
    let bytes = src.to_bytes_with_nul();
    if bytes.len() > cap {
        return DOCA_ERROR_TOO_BIG;
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr() as *const c_char, dst, bytes.len());
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_devinfo_get_pci_addr_str(
    devinfo: *const doca_devinfo,
    pci_addr: *mut c_char,
) -> doca_error_t {
    unsafe { copy_cstr(&(*devinfo).pci_addr, pci_addr, DOCA_DEVINFO_PCI_ADDR_SIZE) }
}

pub unsafe fn doca_devinfo_get_ibdev_name(
    devinfo: *const doca_devinfo,
    ibdev_name: *mut c_char,
    size: u32,
) -> doca_error_t {
    unsafe { copy_cstr(&(*devinfo).ibdev_name, ibdev_name, size as usize) }
}

pub unsafe fn doca_dev_open(devinfo: *mut doca_devinfo, dev: *mut *mut doca_dev) -> doca_error_t {
    if devinfo.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        *dev = Box::into_raw(Box::new(doca_dev { info: devinfo }));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_dev_close(dev: *mut doca_dev) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(dev) });
    DOCA_SUCCESS
}

pub unsafe fn doca_dev_as_devinfo(dev: *const doca_dev) -> *mut doca_devinfo {
    unsafe { (*dev).info }
}

// ── representors ────────────────────────────────────────────

pub unsafe fn doca_devinfo_rep_create_list(
    dev: *mut doca_dev,
    filter: doca_devinfo_rep_filter,
    rep_list: *mut *mut *mut doca_devinfo_rep,
    nb_reps: *mut u32,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let snapshot: Box<[*mut doca_devinfo_rep]> = with_rep_infos(|infos| {
        infos
            .iter()
            .copied()
            .filter(|&info| unsafe {
                filter == DOCA_DEVINFO_REP_FILTER_ALL || (*info).filter_class == filter
            })
            .collect()
    });
    unsafe {
        *nb_reps = snapshot.len() as u32;
        *rep_list = Box::into_raw(snapshot) as *mut *mut doca_devinfo_rep;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_devinfo_rep_destroy_list(
    rep_list: *mut *mut doca_devinfo_rep,
    nb_reps: u32,
) -> doca_error_t {
    if rep_list.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        drop(Box::from_raw(std::ptr::slice_from_raw_parts_mut(
            rep_list,
            nb_reps as usize,
        )));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_devinfo_rep_get_pci_addr_str(
    rep_info: *const doca_devinfo_rep,
    pci_addr: *mut c_char,
) -> doca_error_t {
    unsafe { copy_cstr(&(*rep_info).pci_addr, pci_addr, DOCA_DEVINFO_REP_PCI_ADDR_SIZE) }
}

pub unsafe fn doca_devinfo_rep_get_vuid(
    rep_info: *const doca_devinfo_rep,
    vuid: *mut c_char,
    size: u32,
) -> doca_error_t {
    unsafe { copy_cstr(&(*rep_info).vuid, vuid, size as usize) }
}

pub unsafe fn doca_dev_rep_open(
    rep_info: *mut doca_devinfo_rep,
    rep: *mut *mut doca_dev_rep,
) -> doca_error_t {
    if rep_info.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        *rep = Box::into_raw(Box::new(doca_dev_rep { info: rep_info }));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_dev_rep_close(rep: *mut doca_dev_rep) -> doca_error_t {
    if rep.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(rep) });
    DOCA_SUCCESS
}

// ── capability queries ──────────────────────────────────────

macro_rules! cap_fn {
    ($name:ident, $field:ident) => {
        pub unsafe fn $name(devinfo: *const doca_devinfo) -> doca_error_t {
            if unsafe { (*devinfo).caps.$field } {
                DOCA_SUCCESS
            } else {
                DOCA_ERROR_NOT_SUPPORTED
            }
        }
    };
}

cap_fn!(doca_compress_cap_task_compress_deflate_is_supported, compress_deflate);
cap_fn!(doca_compress_cap_task_decompress_deflate_is_supported, compress_deflate);
cap_fn!(doca_comch_cap_server_is_supported, comch_server);
cap_fn!(doca_comch_cap_client_is_supported, comch_client);
cap_fn!(doca_dma_cap_task_memcpy_is_supported, dma);
cap_fn!(doca_rdma_cap_task_send_is_supported, rdma);
cap_fn!(doca_aes_gcm_cap_task_encrypt_is_supported, aes_gcm);
cap_fn!(doca_sha_cap_task_hash_is_supported, sha);
cap_fn!(doca_ec_cap_task_create_is_supported, erasure_coding);
cap_fn!(doca_sync_event_cap_is_export_to_remote_pci_supported, sync_event_pci);
cap_fn!(doca_devemu_pci_cap_is_mgmt_supported, devemu_mgmt);
cap_fn!(doca_devemu_pci_cap_is_hotplug_supported, devemu_hotplug);

pub unsafe fn doca_eth_rxq_cap_is_type_supported(
    devinfo: *const doca_devinfo,
    _type: u32,
) -> doca_error_t {
    if unsafe { (*devinfo).caps.eth_rxq } {
        DOCA_SUCCESS
    } else {
        DOCA_ERROR_NOT_SUPPORTED
    }
}

pub unsafe fn doca_eth_txq_cap_is_type_supported(
    devinfo: *const doca_devinfo,
    _type: u32,
) -> doca_error_t {
    if unsafe { (*devinfo).caps.eth_txq } {
        DOCA_SUCCESS
    } else {
        DOCA_ERROR_NOT_SUPPORTED
    }
}
