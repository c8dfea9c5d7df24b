//! SHA engine backed by real digests.

use super::*;
use sha2::{Digest, Sha256, Sha512};
use std::cell::{Cell, RefCell};

pub type doca_sha_algorithm = u32;
pub const DOCA_SHA_ALGORITHM_SHA1: doca_sha_algorithm = 0;
pub const DOCA_SHA_ALGORITHM_SHA256: doca_sha_algorithm = 1;
pub const DOCA_SHA_ALGORITHM_SHA512: doca_sha_algorithm = 2;

enum PartialState {
    Sha256(Sha256),
    Sha512(Sha512),
}

#[repr(C)]
pub struct doca_sha {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    hash_conf: TaskConf<doca_sha_task_hash>,
    partial_conf: TaskConf<doca_sha_task_partial_hash>,
    partial_state: RefCell<Option<PartialState>>,
}

#[repr(C)]
pub struct doca_sha_task_hash {
    pub(crate) task: doca_task,
    algorithm: doca_sha_algorithm,
    src: *mut doca_buf,
    dst: *mut doca_buf,
}

#[repr(C)]
pub struct doca_sha_task_partial_hash {
    pub(crate) task: doca_task,
    algorithm: doca_sha_algorithm,
    src: *mut doca_buf,
    dst: *mut doca_buf,
    is_final: Cell<bool>,
}

pub type doca_sha_task_hash_completion_cb_t =
    unsafe extern "C" fn(*mut doca_sha_task_hash, doca_data, doca_data);
pub type doca_sha_task_partial_hash_completion_cb_t =
    unsafe extern "C" fn(*mut doca_sha_task_partial_hash, doca_data, doca_data);

pub unsafe fn doca_sha_create(dev: *mut doca_dev, sha: *mut *mut doca_sha) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_sha {
        base: doca_ctx::new(CtxKind::Plain),
        dev,
        hash_conf: TaskConf::new(),
        partial_conf: TaskConf::new(),
        partial_state: RefCell::new(None),
    });
    unsafe { *sha = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_sha_destroy(sha: *mut doca_sha) -> doca_error_t {
    if sha.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(sha) });
    DOCA_SUCCESS
}

pub unsafe fn doca_sha_as_ctx(sha: *mut doca_sha) -> *mut doca_ctx {
    sha as *mut doca_ctx
}

pub unsafe fn doca_sha_task_hash_set_conf(
    sha: *mut doca_sha,
    success_cb: doca_sha_task_hash_completion_cb_t,
    error_cb: doca_sha_task_hash_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*sha).hash_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_sha_task_partial_hash_set_conf(
    sha: *mut doca_sha,
    success_cb: doca_sha_task_partial_hash_completion_cb_t,
    error_cb: doca_sha_task_partial_hash_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*sha).partial_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

unsafe fn one_shot_digest(
    algorithm: doca_sha_algorithm,
    src: *mut doca_buf,
    dst: *mut doca_buf,
) -> doca_error_t {
    unsafe {
        let input = (*src).data_slice();
        match algorithm {
            DOCA_SHA_ALGORITHM_SHA256 => (*dst).write_at_data(&Sha256::digest(input)),
            DOCA_SHA_ALGORITHM_SHA512 => (*dst).write_at_data(&Sha512::digest(input)),
            _ => DOCA_ERROR_NOT_SUPPORTED,
        }
    }
}

pub unsafe fn doca_sha_task_hash_alloc_init(
    sha: *mut doca_sha,
    algorithm: doca_sha_algorithm,
    src: *mut doca_buf,
    dst: *mut doca_buf,
    user_data: doca_data,
    task: *mut *mut doca_sha_task_hash,
) -> doca_error_t {
    unsafe {
        if (*sha).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_sha_task_hash {
            task: doca_task::new(sha as *mut doca_ctx, task_free_as::<doca_sha_task_hash>),
            algorithm,
            src,
            dst,
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let status = one_shot_digest((*typed).algorithm, (*typed).src, (*typed).dst);
            (*typed).task.status.set(status);
            (*sha).hash_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

unsafe fn partial_digest(sha: *mut doca_sha, task: *mut doca_sha_task_partial_hash) -> doca_error_t {
    unsafe {
        let input = (*(*task).src).data_slice();
        let mut state = (*sha).partial_state.borrow_mut();
        match (&mut *state, (*task).algorithm) {
            (Some(PartialState::Sha256(hasher)), DOCA_SHA_ALGORITHM_SHA256) => {
                hasher.update(input)
            }
            (Some(PartialState::Sha512(hasher)), DOCA_SHA_ALGORITHM_SHA512) => {
                hasher.update(input)
            }
            (Some(_), _) => return DOCA_ERROR_INVALID_VALUE,
            (slot @ None, DOCA_SHA_ALGORITHM_SHA256) => {
                let mut hasher = Sha256::new();
                hasher.update(input);
                *slot = Some(PartialState::Sha256(hasher));
            }
            (slot @ None, DOCA_SHA_ALGORITHM_SHA512) => {
                let mut hasher = Sha512::new();
                hasher.update(input);
                *slot = Some(PartialState::Sha512(hasher));
            }
            (None, _) => return DOCA_ERROR_NOT_SUPPORTED,
        }

        if (*task).is_final.get() {
            let status = match state.take() {
                Some(PartialState::Sha256(hasher)) => {
                    (*(*task).dst).write_at_data(&hasher.finalize())
                }
                Some(PartialState::Sha512(hasher)) => {
                    (*(*task).dst).write_at_data(&hasher.finalize())
                }
                None => DOCA_ERROR_UNEXPECTED,
            };
            if status != DOCA_SUCCESS {
                return status;
            }
        }
        DOCA_SUCCESS
    }
}

pub unsafe fn doca_sha_task_partial_hash_alloc_init(
    sha: *mut doca_sha,
    algorithm: doca_sha_algorithm,
    src: *mut doca_buf,
    dst: *mut doca_buf,
    user_data: doca_data,
    task: *mut *mut doca_sha_task_partial_hash,
) -> doca_error_t {
    unsafe {
        if (*sha).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_sha_task_partial_hash {
            task: doca_task::new(
                sha as *mut doca_ctx,
                task_free_as::<doca_sha_task_partial_hash>,
            ),
            algorithm,
            src,
            dst,
            is_final: Cell::new(false),
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let status = partial_digest(sha, typed);
            (*typed).task.status.set(status);
            (*sha).partial_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_sha_task_partial_hash_set_is_final_buf(
    task: *mut doca_sha_task_partial_hash,
) -> doca_error_t {
    unsafe { (*task).is_final.set(true) };
    DOCA_SUCCESS
}

pub unsafe fn doca_sha_task_hash_as_task(task: *mut doca_sha_task_hash) -> *mut doca_task {
    task as *mut doca_task
}

pub unsafe fn doca_sha_task_partial_hash_as_task(
    task: *mut doca_sha_task_partial_hash,
) -> *mut doca_task {
    task as *mut doca_task
}
