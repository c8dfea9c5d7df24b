//! PCI device emulation: typed-device builders, representors, and the
//! emulated device context with hotplug and host memory mapping.

use crate::coro::{Receptacle, ValueFuture};
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture};
use crate::device::{Device, DeviceRepresentor};
use crate::engine::ProgressEngine;
use crate::error::{Error, Result, check};
use crate::memory_map::{AccessFlags, MemoryMap};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::ffi::{CString, c_void};
use std::rc::{Rc, Weak};

/// Hotplug state of an emulated device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HotplugState {
    PowerOff,
    UnplugInProgress,
    PlugInProgress,
    PowerOn,
}

impl HotplugState {
    fn from_raw(raw: ffi::doca_devemu_pci_hotplug_state) -> HotplugState {
        match raw {
            ffi::DOCA_DEVEMU_PCI_HP_STATE_UNPLUG_IN_PROGRESS => HotplugState::UnplugInProgress,
            ffi::DOCA_DEVEMU_PCI_HP_STATE_PLUG_IN_PROGRESS => HotplugState::PlugInProgress,
            ffi::DOCA_DEVEMU_PCI_HP_STATE_POWER_ON => HotplugState::PowerOn,
            _ => HotplugState::PowerOff,
        }
    }
}

/// BAR memory type for [`PciType::set_memory_bar_conf`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarMemType {
    Mem32Bit,
    Mem64Bit,
}

/// Reusable descriptor of an emulated PCI device type: identity, interrupt
/// budget, and BAR layout. Start it, then create representors from it.
pub struct PciType {
    raw: *mut ffi::doca_devemu_pci_type,
    dev: RefCell<Option<Device>>,
}

impl PciType {
    pub fn new(name: &str) -> Result<PciType> {
        let name = CString::new(name).map_err(|_| Error::InvalidValue)?;
        let mut raw = std::ptr::null_mut();
        check(unsafe { ffi::doca_devemu_pci_type_create(name.as_ptr(), &mut raw) })?;
        Ok(PciType {
            raw,
            dev: RefCell::new(None),
        })
    }

    pub fn is_hotplug_supported(&self, dev: &Device) -> bool {
        (unsafe { ffi::doca_devemu_pci_cap_is_hotplug_supported(dev.as_devinfo()) })
            == ffi::DOCA_SUCCESS
    }

    pub fn is_mgmt_supported(&self, dev: &Device) -> bool {
        (unsafe { ffi::doca_devemu_pci_cap_is_mgmt_supported(dev.as_devinfo()) })
            == ffi::DOCA_SUCCESS
    }

    pub fn set_dev(&self, dev: Device) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_dev(self.raw, dev.raw()) })?;
        *self.dev.borrow_mut() = Some(dev);
        Ok(self)
    }

    pub fn set_device_id(&self, device_id: u16) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_device_id(self.raw, device_id) })?;
        Ok(self)
    }

    pub fn set_vendor_id(&self, vendor_id: u16) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_vendor_id(self.raw, vendor_id) })?;
        Ok(self)
    }

    pub fn set_subsystem_id(&self, subsystem_id: u16) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_subsystem_id(self.raw, subsystem_id) })?;
        Ok(self)
    }

    pub fn set_subsystem_vendor_id(&self, subsystem_vid: u16) -> Result<&Self> {
        check(unsafe {
            ffi::doca_devemu_pci_type_set_subsystem_vendor_id(self.raw, subsystem_vid)
        })?;
        Ok(self)
    }

    pub fn set_revision_id(&self, revision_id: u8) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_revision_id(self.raw, revision_id) })?;
        Ok(self)
    }

    pub fn set_class_code(&self, class_code: u32) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_class_code(self.raw, class_code) })?;
        Ok(self)
    }

    pub fn set_num_msix(&self, num_msix: u16) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_num_msix(self.raw, num_msix) })?;
        Ok(self)
    }

    pub fn set_num_db(&self, num_db: u16) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_num_db(self.raw, num_db) })?;
        Ok(self)
    }

    pub fn set_memory_bar_conf(
        &self,
        id: u8,
        log_sz: u8,
        mem_type: BarMemType,
        prefetchable: bool,
    ) -> Result<&Self> {
        let mem_type = match mem_type {
            BarMemType::Mem32Bit => ffi::DOCA_DEVEMU_PCI_BAR_MEM_TYPE_32_BIT,
            BarMemType::Mem64Bit => ffi::DOCA_DEVEMU_PCI_BAR_MEM_TYPE_64_BIT,
        };
        check(unsafe {
            ffi::doca_devemu_pci_type_set_memory_bar_conf(
                self.raw,
                id,
                log_sz,
                mem_type,
                prefetchable as u8,
            )
        })?;
        Ok(self)
    }

    pub fn set_io_bar_conf(&self, id: u8, log_sz: u8) -> Result<&Self> {
        check(unsafe { ffi::doca_devemu_pci_type_set_io_bar_conf(self.raw, id, log_sz) })?;
        Ok(self)
    }

    pub fn set_bar_db_region_by_offset_conf(
        &self,
        id: u8,
        start_addr: u64,
        size: u64,
        log_db_size: u8,
        log_stride_size: u8,
    ) -> Result<&Self> {
        check(unsafe {
            ffi::doca_devemu_pci_type_set_bar_db_region_by_offset_conf(
                self.raw,
                id,
                start_addr,
                size,
                log_db_size,
                log_stride_size,
            )
        })?;
        Ok(self)
    }

    #[allow(clippy::too_many_arguments)]
    pub fn set_bar_db_region_by_data_conf(
        &self,
        id: u8,
        start_addr: u64,
        size: u64,
        log_db_size: u8,
        db_id_msbyte: u16,
        db_id_lsbyte: u16,
    ) -> Result<&Self> {
        check(unsafe {
            ffi::doca_devemu_pci_type_set_bar_db_region_by_data_conf(
                self.raw,
                id,
                start_addr,
                size,
                log_db_size,
                db_id_msbyte,
                db_id_lsbyte,
            )
        })?;
        Ok(self)
    }

    pub fn set_bar_msix_table_region_conf(
        &self,
        id: u8,
        start_addr: u64,
        size: u64,
    ) -> Result<&Self> {
        check(unsafe {
            ffi::doca_devemu_pci_type_set_bar_msix_table_region_conf(self.raw, id, start_addr, size)
        })?;
        Ok(self)
    }

    pub fn set_bar_msix_pba_region_conf(
        &self,
        id: u8,
        start_addr: u64,
        size: u64,
    ) -> Result<&Self> {
        check(unsafe {
            ffi::doca_devemu_pci_type_set_bar_msix_pba_region_conf(self.raw, id, start_addr, size)
        })?;
        Ok(self)
    }

    pub fn set_bar_stateful_region_conf(
        &self,
        id: u8,
        start_addr: u64,
        size: u64,
    ) -> Result<&Self> {
        check(unsafe {
            ffi::doca_devemu_pci_type_set_bar_stateful_region_conf(self.raw, id, start_addr, size)
        })?;
        Ok(self)
    }

    pub fn start(&self) -> Result<()> {
        check(unsafe { ffi::doca_devemu_pci_type_start(self.raw) })
    }

    pub fn stop(&self) -> Result<()> {
        check(unsafe { ffi::doca_devemu_pci_type_stop(self.raw) })
    }

    pub fn is_started(&self) -> Result<bool> {
        let mut started = 0u8;
        check(unsafe { ffi::doca_devemu_pci_type_is_started(self.raw, &mut started) })?;
        Ok(started != 0)
    }

    /// Spawns a representor of this (started) type, from which an emulated
    /// device context can be opened.
    pub fn create_representor(&self) -> Result<DeviceRepresentor> {
        let mut raw = std::ptr::null_mut();
        check(unsafe { ffi::doca_devemu_pci_type_create_rep(self.raw, &mut raw) })?;
        Ok(DeviceRepresentor::from_raw(raw))
    }

    pub(crate) fn raw(&self) -> *mut ffi::doca_devemu_pci_type {
        self.raw
    }
}

impl Drop for PciType {
    fn drop(&mut self) {
        unsafe { ffi::doca_devemu_pci_type_destroy(self.raw) };
    }
}

/// Event-routing hook for hotplug state changes; freed with the handle.
struct HotplugHook {
    target: Weak<PciDev>,
}

/// Emulated PCI device context opened on a representor.
pub struct PciDev {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_devemu_pci_dev>,
    hook: Cell<*mut HotplugHook>,
    _rep: DeviceRepresentor,
    plug_rx: RefCell<Option<Rc<Receptacle<HotplugState>>>>,
    unplug_rx: RefCell<Option<Rc<Receptacle<HotplugState>>>>,
}

impl PciDev {
    /// Opens an emulated device on `rep` and starts its context. The SDK
    /// creates this context type already connected to the engine.
    pub fn create(
        engine: &ProgressEngine,
        pci_type: &PciType,
        rep: DeviceRepresentor,
    ) -> Result<CreateCtxFuture<PciDev>> {
        let mut handle = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_devemu_pci_dev_create(
                pci_type.raw(),
                rep.raw(),
                engine.inner().pe(),
                &mut handle,
            )
        })?;
        engine.create_context(true, move |core| {
            let ctx = Rc::new_cyclic(|weak_self| PciDev {
                core,
                handle: Cell::new(handle),
                hook: Cell::new(Box::into_raw(Box::new(HotplugHook {
                    target: weak_self.clone(),
                }))),
                _rep: rep,
                plug_rx: RefCell::new(None),
                unplug_rx: RefCell::new(None),
            });
            check(unsafe {
                ffi::doca_devemu_pci_dev_event_hotplug_state_change_register(
                    handle,
                    hotplug_state_change,
                    ffi::doca_data {
                        ptr: ctx.hook.get() as *mut c_void,
                    },
                )
            })?;
            Ok(ctx)
        })
    }

    pub fn hotplug_state(&self) -> Result<HotplugState> {
        let mut raw = ffi::DOCA_DEVEMU_PCI_HP_STATE_POWER_OFF;
        check(unsafe { ffi::doca_devemu_pci_dev_get_hotplug_state(self.handle.get(), &mut raw) })?;
        Ok(HotplugState::from_raw(raw))
    }

    /// Plugs the device into the host; resolves once it reached power-on.
    pub fn hotplug(&self) -> ValueFuture<HotplugState> {
        let future = ValueFuture::create_space();
        *self.plug_rx.borrow_mut() = Some(future.receptacle().clone());
        let err = unsafe { ffi::doca_devemu_pci_dev_hotplug(self.handle.get()) };
        if err != ffi::DOCA_SUCCESS {
            self.plug_rx.borrow_mut().take();
            return ValueFuture::from_error(Error::from_raw(err));
        }
        future
    }

    /// Unplugs the device; resolves once it reached power-off.
    pub fn hotunplug(&self) -> ValueFuture<HotplugState> {
        let future = ValueFuture::create_space();
        *self.unplug_rx.borrow_mut() = Some(future.receptacle().clone());
        let err = unsafe { ffi::doca_devemu_pci_dev_hotunplug(self.handle.get()) };
        if err != ffi::DOCA_SUCCESS {
            self.unplug_rx.borrow_mut().take();
            return ValueFuture::from_error(Error::from_raw(err));
        }
        future
    }

    /// Maps the host-iova range of the emulated device for DMA from the
    /// given devices.
    pub fn remote_mmap(
        &self,
        devices: &[Device],
        host_iova: u64,
        len: usize,
        permissions: AccessFlags,
    ) -> Result<MemoryMap> {
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_devemu_pci_mmap_create(self.handle.get(), host_iova, len, &mut raw)
        })?;
        MemoryMap::adopt_and_start(raw, devices, permissions)
    }

    fn signal_hotplug_state(&self, state: HotplugState) {
        let waiter = match state {
            HotplugState::PowerOn => self.plug_rx.borrow_mut().take(),
            HotplugState::PowerOff => self.unplug_rx.borrow_mut().take(),
            _ => None,
        };
        if let Some(waiter) = waiter {
            waiter.fulfill(state);
        }
    }
}

impl ContextOps for PciDev {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_devemu_pci_dev_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_devemu_pci_dev_destroy(handle) };
        }
        let hook = self.hook.replace(std::ptr::null_mut());
        if !hook.is_null() {
            drop(unsafe { Box::from_raw(hook) });
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for PciDev {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn hotplug_state_change(
    pci_dev: *mut ffi::doca_devemu_pci_dev,
    user_data: ffi::doca_data,
) {
    let hook = unsafe { user_data.ptr } as *mut HotplugHook;
    if hook.is_null() {
        return;
    }
    let Some(ctx) = (unsafe { &*hook }).target.upgrade() else {
        return;
    };
    let mut raw = ffi::DOCA_DEVEMU_PCI_HP_STATE_POWER_OFF;
    if unsafe { ffi::doca_devemu_pci_dev_get_hotplug_state(pci_dev, &mut raw) }
        != ffi::DOCA_SUCCESS
    {
        return;
    }
    ctx.signal_hotplug_state(HotplugState::from_raw(raw));
}
