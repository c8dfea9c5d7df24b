//! DMA offload: device-driven memcpy between mapped buffers.

use crate::buffer::Buffer;
use crate::coro::StatusFuture;
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture};
use crate::device::{Capability, Device};
use crate::engine::ProgressEngine;
use crate::error::{Error, Result, check};
use crate::offload::{complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

pub struct Dma {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_dma>,
    _dev: Device,
}

impl Dma {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Dma>> {
        engine.create_context(false, move |core| Dma::new(core, dev, max_tasks))
    }

    fn new(core: ContextCore, dev: Device, max_tasks: u32) -> Result<Rc<Dma>> {
        if !dev.has_capability(Capability::Dma) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_dma_create(dev.raw(), &mut handle) })?;
        let ctx = Rc::new(Dma {
            core,
            handle: Cell::new(handle),
            _dev: dev,
        });
        check(unsafe {
            ffi::doca_dma_task_memcpy_set_conf(
                handle,
                memcpy_completion,
                memcpy_completion,
                max_tasks,
            )
        })?;
        Ok(ctx)
    }

    /// Copies the source data region into the destination buffer.
    pub fn memcpy(&self, src: &Buffer, dst: &mut Buffer) -> StatusFuture {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err =
                ffi::doca_dma_task_memcpy_alloc_init(handle, src, dst, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_dma_task_memcpy_as_task(task))
        })
    }
}

impl ContextOps for Dma {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_dma_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_dma_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Dma {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn memcpy_completion(
    task: *mut ffi::doca_dma_task_memcpy,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_dma_task_memcpy_as_task(task)) };
}
