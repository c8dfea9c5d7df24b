//! Device discovery by PCI address, IB device name, or capability set.

use crate::error::{Error, Result, check};
use doca_async_sys::ffi;
use std::ffi::{CStr, c_char};
use std::rc::Rc;
use tracing::trace;

/// Offload engine a device may or may not carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    CompressDeflate,
    ComchServer,
    ComchClient,
    Dma,
    Rdma,
    AesGcm,
    Sha,
    ErasureCoding,
    SyncEventPci,
    EthRxq,
    EthTxq,
    DevemuMgmt,
    DevemuHotplug,
}

fn capability_supported(devinfo: *mut ffi::doca_devinfo, cap: Capability) -> bool {
    let err = unsafe {
        match cap {
            Capability::CompressDeflate => {
                ffi::doca_compress_cap_task_compress_deflate_is_supported(devinfo)
            }
            Capability::ComchServer => ffi::doca_comch_cap_server_is_supported(devinfo),
            Capability::ComchClient => ffi::doca_comch_cap_client_is_supported(devinfo),
            Capability::Dma => ffi::doca_dma_cap_task_memcpy_is_supported(devinfo),
            Capability::Rdma => ffi::doca_rdma_cap_task_send_is_supported(devinfo),
            Capability::AesGcm => ffi::doca_aes_gcm_cap_task_encrypt_is_supported(devinfo),
            Capability::Sha => ffi::doca_sha_cap_task_hash_is_supported(devinfo),
            Capability::ErasureCoding => ffi::doca_ec_cap_task_create_is_supported(devinfo),
            Capability::SyncEventPci => {
                ffi::doca_sync_event_cap_is_export_to_remote_pci_supported(devinfo)
            }
            Capability::EthRxq => {
                ffi::doca_eth_rxq_cap_is_type_supported(devinfo, ffi::DOCA_ETH_RXQ_TYPE_REGULAR)
            }
            Capability::EthTxq => {
                ffi::doca_eth_txq_cap_is_type_supported(devinfo, ffi::DOCA_ETH_TXQ_TYPE_REGULAR)
            }
            Capability::DevemuMgmt => ffi::doca_devemu_pci_cap_is_mgmt_supported(devinfo),
            Capability::DevemuHotplug => ffi::doca_devemu_pci_cap_is_hotplug_supported(devinfo),
        }
    };
    err == ffi::DOCA_SUCCESS
}

struct DeviceInner {
    raw: *mut ffi::doca_dev,
}

impl Drop for DeviceInner {
    fn drop(&mut self) {
        unsafe { ffi::doca_dev_close(self.raw) };
    }
}

/// Opened hardware device, shared by every context and mapping built from
/// it. The underlying SDK handle closes when the last sharer goes away.
#[derive(Clone)]
pub struct Device {
    inner: Rc<DeviceInner>,
}

impl Device {
    /// First device whose PCI address matches and which carries all of the
    /// required capabilities.
    pub fn find_by_pci_addr(pci_addr: &str, required_caps: &[Capability]) -> Result<Device> {
        Self::find(
            |devinfo| devinfo_pci_addr(devinfo).as_deref() == Some(pci_addr),
            required_caps,
        )
    }

    /// First device whose IB device name matches and which carries all of
    /// the required capabilities.
    pub fn find_by_ibdev_name(ibdev_name: &str, required_caps: &[Capability]) -> Result<Device> {
        Self::find(
            |devinfo| devinfo_ibdev_name(devinfo).as_deref() == Some(ibdev_name),
            required_caps,
        )
    }

    /// First device carrying all of the required capabilities.
    pub fn find_by_capabilities(required_caps: &[Capability]) -> Result<Device> {
        Self::find(|_| true, required_caps)
    }

    fn find(
        matches: impl Fn(*mut ffi::doca_devinfo) -> bool,
        required_caps: &[Capability],
    ) -> Result<Device> {
        let mut list: *mut *mut ffi::doca_devinfo = std::ptr::null_mut();
        let mut count: u32 = 0;
        check(unsafe { ffi::doca_devinfo_create_list(&mut list, &mut count) })?;

        let mut found = Err(Error::NotFound);
        for i in 0..count as usize {
            let devinfo = unsafe { *list.add(i) };
            if !matches(devinfo) {
                continue;
            }
            if !required_caps
                .iter()
                .all(|&cap| capability_supported(devinfo, cap))
            {
                continue;
            }
            let mut raw = std::ptr::null_mut();
            let err = unsafe { ffi::doca_dev_open(devinfo, &mut raw) };
            if err == ffi::DOCA_SUCCESS {
                trace!(pci = ?devinfo_pci_addr(devinfo), "device opened");
                found = Ok(Device {
                    inner: Rc::new(DeviceInner { raw }),
                });
                break;
            }
        }

        unsafe { ffi::doca_devinfo_destroy_list(list) };
        found
    }

    pub fn has_capability(&self, cap: Capability) -> bool {
        capability_supported(self.as_devinfo(), cap)
    }

    pub fn has_capabilities(&self, caps: &[Capability]) -> bool {
        caps.iter().all(|&cap| self.has_capability(cap))
    }

    pub(crate) fn raw(&self) -> *mut ffi::doca_dev {
        self.inner.raw
    }

    pub(crate) fn as_devinfo(&self) -> *mut ffi::doca_devinfo {
        unsafe { ffi::doca_dev_as_devinfo(self.inner.raw) }
    }
}

fn devinfo_pci_addr(devinfo: *mut ffi::doca_devinfo) -> Option<String> {
    let mut buf = [0 as c_char; ffi::DOCA_DEVINFO_PCI_ADDR_SIZE];
    let err = unsafe { ffi::doca_devinfo_get_pci_addr_str(devinfo, buf.as_mut_ptr()) };
    if err != ffi::DOCA_SUCCESS {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned(),
    )
}

fn devinfo_ibdev_name(devinfo: *mut ffi::doca_devinfo) -> Option<String> {
    let mut buf = [0 as c_char; ffi::DOCA_DEVINFO_IBDEV_NAME_SIZE];
    let err = unsafe {
        ffi::doca_devinfo_get_ibdev_name(devinfo, buf.as_mut_ptr(), buf.len() as u32)
    };
    if err != ffi::DOCA_SUCCESS {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned(),
    )
}

// ── representors ────────────────────────────────────────────

/// Filter on the representor list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RepFilter {
    #[default]
    All,
    Net,
    Emulated,
}

impl RepFilter {
    fn raw(self) -> ffi::doca_devinfo_rep_filter {
        match self {
            RepFilter::All => ffi::DOCA_DEVINFO_REP_FILTER_ALL,
            RepFilter::Net => ffi::DOCA_DEVINFO_REP_FILTER_NET,
            RepFilter::Emulated => ffi::DOCA_DEVINFO_REP_FILTER_EMULATED,
        }
    }
}

struct RepresentorInner {
    raw: *mut ffi::doca_dev_rep,
}

impl Drop for RepresentorInner {
    fn drop(&mut self) {
        unsafe { ffi::doca_dev_rep_close(self.raw) };
    }
}

/// Representor handle for server-side ends of inter-host messaging and for
/// emulated devices. Shared like [`Device`].
#[derive(Clone)]
pub struct DeviceRepresentor {
    inner: Rc<RepresentorInner>,
}

impl DeviceRepresentor {
    pub fn find_by_pci_addr(dev: &Device, pci_addr: &str, filter: RepFilter) -> Result<Self> {
        Self::find(dev, filter, |rep_info| {
            rep_pci_addr(rep_info).as_deref() == Some(pci_addr)
        })
    }

    pub fn find_by_vuid(dev: &Device, vuid: &str, filter: RepFilter) -> Result<Self> {
        Self::find(dev, filter, |rep_info| {
            rep_vuid(rep_info).as_deref() == Some(vuid)
        })
    }

    fn find(
        dev: &Device,
        filter: RepFilter,
        matches: impl Fn(*mut ffi::doca_devinfo_rep) -> bool,
    ) -> Result<Self> {
        let mut list: *mut *mut ffi::doca_devinfo_rep = std::ptr::null_mut();
        let mut count: u32 = 0;
        check(unsafe {
            ffi::doca_devinfo_rep_create_list(dev.raw(), filter.raw(), &mut list, &mut count)
        })?;

        let mut found = Err(Error::NotFound);
        for i in 0..count as usize {
            let rep_info = unsafe { *list.add(i) };
            if !matches(rep_info) {
                continue;
            }
            let mut raw = std::ptr::null_mut();
            if unsafe { ffi::doca_dev_rep_open(rep_info, &mut raw) } == ffi::DOCA_SUCCESS {
                found = Ok(DeviceRepresentor {
                    inner: Rc::new(RepresentorInner { raw }),
                });
                break;
            }
        }

        unsafe { ffi::doca_devinfo_rep_destroy_list(list, count) };
        found
    }

    pub(crate) fn from_raw(raw: *mut ffi::doca_dev_rep) -> Self {
        DeviceRepresentor {
            inner: Rc::new(RepresentorInner { raw }),
        }
    }

    pub(crate) fn raw(&self) -> *mut ffi::doca_dev_rep {
        self.inner.raw
    }
}

fn rep_pci_addr(rep_info: *mut ffi::doca_devinfo_rep) -> Option<String> {
    let mut buf = [0 as c_char; ffi::DOCA_DEVINFO_REP_PCI_ADDR_SIZE];
    let err = unsafe { ffi::doca_devinfo_rep_get_pci_addr_str(rep_info, buf.as_mut_ptr()) };
    if err != ffi::DOCA_SUCCESS {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned(),
    )
}

fn rep_vuid(rep_info: *mut ffi::doca_devinfo_rep) -> Option<String> {
    let mut buf = [0 as c_char; ffi::DOCA_DEVINFO_REP_VUID_SIZE];
    let err = unsafe { ffi::doca_devinfo_rep_get_vuid(rep_info, buf.as_mut_ptr(), buf.len() as u32) };
    if err != ffi::DOCA_SUCCESS {
        return None;
    }
    Some(
        unsafe { CStr::from_ptr(buf.as_ptr()) }
            .to_string_lossy()
            .into_owned(),
    )
}
