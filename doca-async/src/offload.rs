//! The task-offload adapter: one shape for every task family.
//!
//! A submitted task carries a raw strong reference to its receptacle as SDK
//! user-data. The completion callback reclaims that reference, reads the
//! task's status (and any per-task payload), frees the task, and wakes the
//! waiter. Allocation failures resolve the future immediately without ever
//! touching the engine.

use crate::coro::{Receptacle, StatusFuture};
use crate::ctx::ContextCore;
use crate::error::Error;
use doca_async_sys::ffi;
use std::ffi::c_void;
use std::rc::Rc;

/// Allocates a task via `alloc_init`, packing the receptacle address as the
/// task's user-data, and submits it through the engine's retry ladder.
///
/// `alloc_init` receives the packed user-data and returns the base task
/// handle, or the raw allocation error, in which case the returned future
/// is already resolved with that error and the user-data reference has been
/// reclaimed by this function.
pub(crate) fn status_offload<Extra: 'static>(
    core: &ContextCore,
    alloc_init: impl FnOnce(ffi::doca_data) -> Result<*mut ffi::doca_task, ffi::doca_error_t>,
) -> StatusFuture<Extra> {
    let future = StatusFuture::create_space();
    let receptacle = future.receptacle().clone();

    let engine = match core.engine() {
        Ok(engine) => engine,
        Err(err) => {
            receptacle.set_error(err);
            return future;
        }
    };

    let user_data = ffi::doca_data {
        ptr: Rc::into_raw(receptacle.clone()) as *mut c_void,
    };

    match alloc_init(user_data) {
        Ok(task) => engine.submit_task(task, receptacle),
        Err(raw) => {
            // no callback will ever see this task; take the reference back
            drop(unsafe { Rc::from_raw(user_data.ptr as *const Receptacle<Extra>) });
            receptacle.set_error(Error::from_raw(raw));
        }
    }

    future
}

/// Completion tail shared by every callback: reclaims the receptacle
/// reference from the task user-data, extracts the per-task payload on
/// success, frees the task, and wakes the waiter.
///
/// `extra` runs before the task is freed so it may still read task fields.
pub(crate) unsafe fn complete<Extra: 'static>(
    task_user_data: ffi::doca_data,
    task: *mut ffi::doca_task,
    extra: impl FnOnce() -> Extra,
) {
    let raw = unsafe { task_user_data.ptr } as *const Receptacle<Extra>;
    if raw.is_null() {
        unsafe { ffi::doca_task_free(task) };
        return;
    }
    let receptacle = unsafe { Rc::from_raw(raw) };

    let status = unsafe { ffi::doca_task_get_status(task) };
    if status == ffi::DOCA_SUCCESS {
        let payload = extra();
        unsafe { ffi::doca_task_free(task) };
        receptacle.set_value(payload);
    } else {
        unsafe { ffi::doca_task_free(task) };
        receptacle.set_error(Error::from_raw(status));
    }
    receptacle.wake();
}

/// Completion callback for plain status tasks (no per-task payload).
pub(crate) unsafe fn complete_plain(task_user_data: ffi::doca_data, task: *mut ffi::doca_task) {
    unsafe { complete::<()>(task_user_data, task, || ()) };
}
