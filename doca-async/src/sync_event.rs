//! Sync events: a shared 64-bit counter with offloaded get/notify/wait
//! operations, exportable across PCI or the network.

use crate::coro::StatusFuture;
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture};
use crate::device::Device;
use crate::engine::ProgressEngine;
use crate::error::{Result, check};
use crate::offload::{complete, complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

/// Where notifications for the event may originate.
pub enum PublisherLocation<'a> {
    Device(&'a Device),
    RemotePci,
    RemoteNet,
}

/// Where waits on the event may run.
pub enum SubscriberLocation<'a> {
    Device(&'a Device),
    RemotePci,
}

pub struct SyncEvent {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_sync_event>,
    // keeps referenced devices alive for as long as the SDK handle
    _devices: Vec<Device>,
}

impl SyncEvent {
    /// Creates a started sync event with the given publisher and subscriber
    /// locations.
    pub fn create(
        engine: &ProgressEngine,
        publishers: &[PublisherLocation<'_>],
        subscribers: &[SubscriberLocation<'_>],
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<SyncEvent>> {
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_sync_event_create(&mut handle) })?;

        let mut devices = Vec::new();
        unsafe {
            for publisher in publishers {
                match publisher {
                    PublisherLocation::Device(dev) => {
                        check(ffi::doca_sync_event_add_publisher_location_dev(
                            handle,
                            dev.raw(),
                        ))?;
                        devices.push((*dev).clone());
                    }
                    PublisherLocation::RemotePci => {
                        check(ffi::doca_sync_event_add_publisher_location_remote_pci(handle))?;
                    }
                    PublisherLocation::RemoteNet => {
                        check(ffi::doca_sync_event_add_publisher_location_remote_net(handle))?;
                    }
                }
            }
            for subscriber in subscribers {
                match subscriber {
                    SubscriberLocation::Device(dev) => {
                        check(ffi::doca_sync_event_add_subscriber_location_dev(
                            handle,
                            dev.raw(),
                        ))?;
                        devices.push((*dev).clone());
                    }
                    SubscriberLocation::RemotePci => {
                        check(ffi::doca_sync_event_add_subscriber_location_remote_pci(
                            handle,
                        ))?;
                    }
                }
            }
        }

        engine.create_context(false, move |core| {
            let ctx = Rc::new(SyncEvent {
                core,
                handle: Cell::new(handle),
                _devices: devices,
            });
            ctx.init_task_confs(max_tasks)?;
            Ok(ctx)
        })
    }

    /// Reconstructs an exported sync event on a local device (remote-PCI
    /// import path).
    pub fn from_export(
        engine: &ProgressEngine,
        dev: &Device,
        export_data: &[u8],
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<SyncEvent>> {
        let mut handle = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_sync_event_create_from_export(
                dev.raw(),
                export_data.as_ptr(),
                export_data.len(),
                &mut handle,
            )
        })?;
        let dev = dev.clone();
        engine.create_context(false, move |core| {
            let ctx = Rc::new(SyncEvent {
                core,
                handle: Cell::new(handle),
                _devices: vec![dev],
            });
            ctx.init_task_confs(max_tasks)?;
            Ok(ctx)
        })
    }

    fn init_task_confs(&self, max_tasks: u32) -> Result<()> {
        let handle = self.handle.get();
        unsafe {
            check(ffi::doca_sync_event_task_get_set_conf(
                handle,
                get_completion,
                get_completion,
                max_tasks,
            ))?;
            check(ffi::doca_sync_event_task_notify_add_set_conf(
                handle,
                notify_add_completion,
                notify_add_completion,
                max_tasks,
            ))?;
            check(ffi::doca_sync_event_task_notify_set_set_conf(
                handle,
                notify_set_completion,
                notify_set_completion,
                max_tasks,
            ))?;
            check(ffi::doca_sync_event_task_wait_eq_set_conf(
                handle,
                wait_eq_completion,
                wait_eq_completion,
                max_tasks,
            ))?;
            check(ffi::doca_sync_event_task_wait_neq_set_conf(
                handle,
                wait_neq_completion,
                wait_neq_completion,
                max_tasks,
            ))?;
        }
        Ok(())
    }

    /// Reads the current value.
    pub fn get(&self) -> StatusFuture<u64> {
        let handle = self.handle.get();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_sync_event_task_get_alloc_init(handle, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_sync_event_task_get_as_task(task))
        })
    }

    /// Atomically adds `inc_value`; resolves to the value before the add.
    pub fn notify_add(&self, inc_value: u64) -> StatusFuture<u64> {
        let handle = self.handle.get();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_sync_event_task_notify_add_alloc_init(
                handle, inc_value, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_sync_event_task_notify_add_as_task(task))
        })
    }

    /// Sets the value.
    pub fn notify_set(&self, set_value: u64) -> StatusFuture {
        let handle = self.handle.get();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_sync_event_task_notify_set_alloc_init(
                handle, set_value, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_sync_event_task_notify_set_as_task(task))
        })
    }

    /// Completes once `value & mask == wait_value & mask`.
    pub fn wait_eq(&self, wait_value: u64, mask: u64) -> StatusFuture {
        let handle = self.handle.get();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_sync_event_task_wait_eq_alloc_init(
                handle, wait_value, mask, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_sync_event_task_wait_eq_as_task(task))
        })
    }

    /// Completes once `value & mask != wait_value & mask`.
    pub fn wait_neq(&self, wait_value: u64, mask: u64) -> StatusFuture {
        let handle = self.handle.get();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_sync_event_task_wait_neq_alloc_init(
                handle, wait_value, mask, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_sync_event_task_wait_neq_as_task(task))
        })
    }

    /// Opaque byte-string for re-creating this event on a remote network
    /// peer.
    pub fn export_to_remote_net(&self) -> Result<Vec<u8>> {
        let mut data: *const u8 = std::ptr::null();
        let mut len = 0usize;
        check(unsafe {
            ffi::doca_sync_event_export_to_remote_net(self.handle.get(), &mut data, &mut len)
        })?;
        Ok(unsafe { std::slice::from_raw_parts(data, len) }.to_vec())
    }

    /// Opaque byte-string for re-creating this event across PCI.
    pub fn export_to_remote_pci(&self, dev: &Device) -> Result<Vec<u8>> {
        let mut data: *const u8 = std::ptr::null();
        let mut len = 0usize;
        check(unsafe {
            ffi::doca_sync_event_export_to_remote_pci(
                self.handle.get(),
                dev.raw(),
                &mut data,
                &mut len,
            )
        })?;
        Ok(unsafe { std::slice::from_raw_parts(data, len) }.to_vec())
    }
}

impl ContextOps for SyncEvent {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_sync_event_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_sync_event_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for SyncEvent {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

/// Remote handle to an exported sync event, for RDMA verbs to operate on.
pub struct SyncEventRemoteNet {
    raw: *mut ffi::doca_sync_event_remote_net,
    _dev: Device,
}

impl SyncEventRemoteNet {
    pub fn from_export(dev: &Device, export_data: &[u8]) -> Result<SyncEventRemoteNet> {
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_sync_event_remote_net_create_from_export(
                dev.raw(),
                export_data.as_ptr(),
                export_data.len(),
                &mut raw,
            )
        })?;
        Ok(SyncEventRemoteNet {
            raw,
            _dev: dev.clone(),
        })
    }

    pub(crate) fn raw(&self) -> *mut ffi::doca_sync_event_remote_net {
        self.raw
    }
}

impl Drop for SyncEventRemoteNet {
    fn drop(&mut self) {
        unsafe { ffi::doca_sync_event_remote_net_destroy(self.raw) };
    }
}

unsafe extern "C" fn get_completion(
    task: *mut ffi::doca_sync_event_task_get,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_sync_event_task_get_as_task(task);
        complete(task_user_data, base, || unsafe {
            ffi::doca_sync_event_task_get_get_value(task)
        });
    }
}

unsafe extern "C" fn notify_add_completion(
    task: *mut ffi::doca_sync_event_task_notify_add,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_sync_event_task_notify_add_as_task(task);
        complete(task_user_data, base, || unsafe {
            ffi::doca_sync_event_task_notify_add_get_fetched(task)
        });
    }
}

unsafe extern "C" fn notify_set_completion(
    task: *mut ffi::doca_sync_event_task_notify_set,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_sync_event_task_notify_set_as_task(task)) };
}

unsafe extern "C" fn wait_eq_completion(
    task: *mut ffi::doca_sync_event_task_wait_eq,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_sync_event_task_wait_eq_as_task(task)) };
}

unsafe extern "C" fn wait_neq_completion(
    task: *mut ffi::doca_sync_event_task_wait_neq,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_sync_event_task_wait_neq_as_task(task)) };
}
