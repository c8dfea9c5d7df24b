//! Consumer end of the producer/consumer fast path.

use crate::buffer::Buffer;
use crate::coro::StatusFuture;
use crate::ctx::{
    ContextCore, ContextOps, ContextParent, CreateCtxFuture, DependentContexts, create_child,
};
use crate::error::{Result, check};
use crate::memory_map::MemoryMap;
use crate::offload::{complete, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

/// Completion record of a posted receive.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerRecv {
    /// Immediate data carried alongside the buffer (small, fixed upper
    /// bound set by the SDK).
    pub immediate_data: Vec<u8>,
    /// Id of the producer that filled the buffer.
    pub producer_id: u32,
}

/// Child context of a connection; receives data buffers posted by the
/// remote producer. Buffers posted here must come from the memory map the
/// consumer was created with.
pub struct Consumer {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_comch_consumer>,
}

impl Consumer {
    pub(crate) fn create_on<P: ContextParent + 'static>(
        parent: &Rc<P>,
        registry: &DependentContexts,
        conn: *mut ffi::doca_comch_connection,
        user_mmap: &MemoryMap,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Consumer>> {
        let mmap = user_mmap.raw();
        create_child(parent, registry, move |core| {
            let mut handle = std::ptr::null_mut();
            check(unsafe { ffi::doca_comch_consumer_create(conn, mmap, &mut handle) })?;
            check(unsafe {
                ffi::doca_comch_consumer_task_post_recv_set_conf(
                    handle,
                    post_recv_completion,
                    post_recv_completion,
                    max_tasks,
                )
            })?;
            Ok(Rc::new(Consumer {
                core,
                handle: Cell::new(handle),
            }))
        })
    }

    /// Local id announced to the remote side.
    pub fn id(&self) -> Result<u32> {
        let mut id = 0u32;
        check(unsafe { ffi::doca_comch_consumer_get_id(self.handle.get(), &mut id) })?;
        Ok(id)
    }

    /// Posts a buffer for the remote producer to fill. The buffer must stay
    /// alive until the future resolves.
    pub fn post_recv(&self, buf: &mut Buffer) -> StatusFuture<ConsumerRecv> {
        let handle = self.handle.get();
        let buf = buf.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_comch_consumer_task_post_recv_alloc_init(handle, buf, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            let base = ffi::doca_comch_consumer_task_post_recv_as_task(task);
            ffi::doca_task_set_user_data(base, user_data);
            Ok(base)
        })
    }
}

impl ContextOps for Consumer {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_comch_consumer_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_comch_consumer_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Consumer {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn post_recv_completion(
    task: *mut ffi::doca_comch_consumer_task_post_recv,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_comch_consumer_task_post_recv_as_task(task);
        complete(task_user_data, base, || unsafe {
            let imm_ptr = ffi::doca_comch_consumer_task_post_recv_get_imm_data(task);
            let imm_len = ffi::doca_comch_consumer_task_post_recv_get_imm_data_len(task);
            let immediate_data = if imm_ptr.is_null() || imm_len == 0 {
                Vec::new()
            } else {
                std::slice::from_raw_parts(imm_ptr, imm_len as usize).to_vec()
            };
            ConsumerRecv {
                immediate_data,
                producer_id: ffi::doca_comch_consumer_task_post_recv_get_producer_id(task),
            }
        });
    }
}
