//! SHA offload: one-shot and segmented hashing.

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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaAlgorithm {
    Sha1,
    Sha256,
    Sha512,
}

impl ShaAlgorithm {
    fn raw(self) -> ffi::doca_sha_algorithm {
        match self {
            ShaAlgorithm::Sha1 => ffi::DOCA_SHA_ALGORITHM_SHA1,
            ShaAlgorithm::Sha256 => ffi::DOCA_SHA_ALGORITHM_SHA256,
            ShaAlgorithm::Sha512 => ffi::DOCA_SHA_ALGORITHM_SHA512,
        }
    }
}

pub struct Sha {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_sha>,
    _dev: Device,
}

impl Sha {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Sha>> {
        engine.create_context(false, move |core| Sha::new(core, dev, max_tasks))
    }

    fn new(core: ContextCore, dev: Device, max_tasks: u32) -> Result<Rc<Sha>> {
        if !dev.has_capability(Capability::Sha) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_sha_create(dev.raw(), &mut handle) })?;
        let ctx = Rc::new(Sha {
            core,
            handle: Cell::new(handle),
            _dev: dev,
        });
        unsafe {
            check(ffi::doca_sha_task_hash_set_conf(
                handle,
                hash_completion,
                hash_completion,
                max_tasks,
            ))?;
            check(ffi::doca_sha_task_partial_hash_set_conf(
                handle,
                partial_hash_completion,
                partial_hash_completion,
                max_tasks,
            ))?;
        }
        Ok(ctx)
    }

    /// Hashes the source data region; the digest lands in the destination
    /// data region.
    pub fn hash(&self, algorithm: ShaAlgorithm, src: &Buffer, dst: &mut Buffer) -> StatusFuture {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_sha_task_hash_alloc_init(
                handle,
                algorithm.raw(),
                src,
                dst,
                user_data,
                &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_sha_task_hash_as_task(task))
        })
    }

    /// Feeds one segment of a multi-part hash. The digest is produced on the
    /// segment submitted with `final_segment`.
    pub fn partial_hash(
        &self,
        algorithm: ShaAlgorithm,
        src: &Buffer,
        dst: &mut Buffer,
        final_segment: bool,
    ) -> StatusFuture {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_sha_task_partial_hash_alloc_init(
                handle,
                algorithm.raw(),
                src,
                dst,
                user_data,
                &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            if final_segment {
                let err = ffi::doca_sha_task_partial_hash_set_is_final_buf(task);
                if err != ffi::DOCA_SUCCESS {
                    ffi::doca_task_free(ffi::doca_sha_task_partial_hash_as_task(task));
                    return Err(err);
                }
            }
            Ok(ffi::doca_sha_task_partial_hash_as_task(task))
        })
    }
}

impl ContextOps for Sha {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_sha_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_sha_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Sha {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn hash_completion(
    task: *mut ffi::doca_sha_task_hash,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_sha_task_hash_as_task(task)) };
}

unsafe extern "C" fn partial_hash_completion(
    task: *mut ffi::doca_sha_task_partial_hash,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_sha_task_partial_hash_as_task(task)) };
}
