//! Producer end of the producer/consumer fast path.

use super::RemoteConsumerRegistry;
use crate::buffer::Buffer;
use crate::coro::StatusFuture;
use crate::ctx::{
    ContextCore, ContextOps, ContextParent, CreateCtxFuture, DependentContexts, create_child,
};
use crate::error::{Error, Result, check};
use crate::offload::{complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

/// Child context of a connection; sends data buffers to a remote consumer
/// referenced by id.
pub struct Producer {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_comch_producer>,
    remote_flags: Rc<RemoteConsumerRegistry>,
}

impl Producer {
    pub(crate) fn create_on<P: ContextParent + 'static>(
        parent: &Rc<P>,
        registry: &DependentContexts,
        conn: *mut ffi::doca_comch_connection,
        remote_flags: Rc<RemoteConsumerRegistry>,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Producer>> {
        create_child(parent, registry, move |core| {
            let mut handle = std::ptr::null_mut();
            check(unsafe { ffi::doca_comch_producer_create(conn, &mut handle) })?;
            check(unsafe {
                ffi::doca_comch_producer_task_send_set_conf(
                    handle,
                    producer_send_completion,
                    producer_send_completion,
                    max_tasks,
                )
            })?;
            Ok(Rc::new(Producer {
                core,
                handle: Cell::new(handle),
                remote_flags,
            }))
        })
    }

    /// Sends a buffer to the remote consumer, with up to a small bound of
    /// immediate data. Refuses synchronously with `NotConnected` when the
    /// remote consumer has been signalled expired.
    pub fn send(
        &self,
        buf: &Buffer,
        immediate_data: &[u8],
        remote_consumer_id: u32,
    ) -> StatusFuture {
        if self.remote_flags.is_expired(remote_consumer_id) {
            return StatusFuture::from_error(Error::NotConnected);
        }
        let handle = self.handle.get();
        let buf = buf.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_comch_producer_task_send_alloc_init(
                handle,
                buf,
                if immediate_data.is_empty() {
                    std::ptr::null()
                } else {
                    immediate_data.as_ptr()
                },
                immediate_data.len() as u32,
                remote_consumer_id,
                &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            let base = ffi::doca_comch_producer_task_send_as_task(task);
            ffi::doca_task_set_user_data(base, user_data);
            Ok(base)
        })
    }
}

impl ContextOps for Producer {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_comch_producer_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_comch_producer_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Producer {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn producer_send_completion(
    task: *mut ffi::doca_comch_producer_task_send,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_comch_producer_task_send_as_task(task)) };
}
