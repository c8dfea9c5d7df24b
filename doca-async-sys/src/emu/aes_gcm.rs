//! AES-GCM engine.
//!
//! Structural test double: ciphertext is the payload followed by a
//! deterministic tag frame. It exercises key lifetimes, buffer plumbing and
//! tag-size accounting without claiming to be cryptography.

use super::*;
use std::ffi::c_void;

pub type doca_aes_gcm_key_type = u32;
pub const DOCA_AES_GCM_KEY_128: doca_aes_gcm_key_type = 1;
pub const DOCA_AES_GCM_KEY_256: doca_aes_gcm_key_type = 2;

#[repr(C)]
pub struct doca_aes_gcm {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    encrypt_conf: TaskConf<doca_aes_gcm_task_encrypt>,
    decrypt_conf: TaskConf<doca_aes_gcm_task_decrypt>,
}

pub struct doca_aes_gcm_key {
    key_byte: u8,
}

macro_rules! aes_gcm_task_type {
    ($task:ident, $cb:ident) => {
        #[repr(C)]
        pub struct $task {
            pub(crate) task: doca_task,
            src: *mut doca_buf,
            dst: *mut doca_buf,
            key: *mut doca_aes_gcm_key,
            #[allow(dead_code)]
            iv: Vec<u8>,
            tag_size: u32,
            #[allow(dead_code)]
            aad_size: u32,
        }

        pub type $cb = unsafe extern "C" fn(*mut $task, doca_data, doca_data);
    };
}

aes_gcm_task_type!(doca_aes_gcm_task_encrypt, doca_aes_gcm_task_encrypt_completion_cb_t);
aes_gcm_task_type!(doca_aes_gcm_task_decrypt, doca_aes_gcm_task_decrypt_completion_cb_t);

pub unsafe fn doca_aes_gcm_create(
    dev: *mut doca_dev,
    aes_gcm: *mut *mut doca_aes_gcm,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_aes_gcm {
        base: doca_ctx::new(CtxKind::Plain),
        dev,
        encrypt_conf: TaskConf::new(),
        decrypt_conf: TaskConf::new(),
    });
    unsafe { *aes_gcm = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_aes_gcm_destroy(aes_gcm: *mut doca_aes_gcm) -> doca_error_t {
    if aes_gcm.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(aes_gcm) });
    DOCA_SUCCESS
}

pub unsafe fn doca_aes_gcm_as_ctx(aes_gcm: *mut doca_aes_gcm) -> *mut doca_ctx {
    aes_gcm as *mut doca_ctx
}

pub unsafe fn doca_aes_gcm_key_create(
    _aes_gcm: *mut doca_aes_gcm,
    raw_key: *const c_void,
    key_type: doca_aes_gcm_key_type,
    key: *mut *mut doca_aes_gcm_key,
) -> doca_error_t {
    let key_len = match key_type {
        DOCA_AES_GCM_KEY_128 => 16,
        DOCA_AES_GCM_KEY_256 => 32,
        _ => return DOCA_ERROR_INVALID_VALUE,
    };
    unsafe {
        let bytes = std::slice::from_raw_parts(raw_key as *const u8, key_len);
        let key_byte = bytes.iter().fold(0u8, |acc, &b| acc ^ b);
        *key = Box::into_raw(Box::new(doca_aes_gcm_key { key_byte }));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_aes_gcm_key_destroy(key: *mut doca_aes_gcm_key) -> doca_error_t {
    if key.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(key) });
    DOCA_SUCCESS
}

macro_rules! aes_gcm_set_conf {
    ($fn_name:ident, $conf:ident, $cb:ident, $task:ident) => {
        pub unsafe fn $fn_name(
            aes_gcm: *mut doca_aes_gcm,
            success_cb: $cb,
            error_cb: $cb,
            num_tasks: u32,
        ) -> doca_error_t {
            unsafe { (*aes_gcm).$conf.set(success_cb, error_cb, num_tasks) };
            DOCA_SUCCESS
        }
    };
}

aes_gcm_set_conf!(
    doca_aes_gcm_task_encrypt_set_conf,
    encrypt_conf,
    doca_aes_gcm_task_encrypt_completion_cb_t,
    doca_aes_gcm_task_encrypt
);
aes_gcm_set_conf!(
    doca_aes_gcm_task_decrypt_set_conf,
    decrypt_conf,
    doca_aes_gcm_task_decrypt_completion_cb_t,
    doca_aes_gcm_task_decrypt
);

unsafe fn run_encrypt(task: *mut doca_aes_gcm_task_encrypt) -> doca_error_t {
    unsafe {
        let src = (*(*task).src).data_slice();
        let dst = (*task).dst;
        let tag_size = (*task).tag_size as usize;
        let total = src.len() + tag_size;
        if total > (*dst).tail_capacity() {
            return DOCA_ERROR_TOO_BIG;
        }
        let key_byte = (*(*task).key).key_byte;
        let out = std::slice::from_raw_parts_mut((*dst).data_ptr(), total);
        out[..src.len()].copy_from_slice(src);
        for slot in &mut out[src.len()..] {
            *slot = 0xa5 ^ key_byte;
        }
        (*dst).data_len.set(total);
        DOCA_SUCCESS
    }
}

unsafe fn run_decrypt(task: *mut doca_aes_gcm_task_decrypt) -> doca_error_t {
    unsafe {
        let src = (*(*task).src).data_slice();
        let dst = (*task).dst;
        let tag_size = (*task).tag_size as usize;
        if src.len() < tag_size {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let key_byte = (*(*task).key).key_byte;
        let (payload, tag) = src.split_at(src.len() - tag_size);
        if tag.iter().any(|&b| b != 0xa5 ^ key_byte) {
            return DOCA_ERROR_IO_FAILED;
        }
        (*dst).write_at_data(payload)
    }
}

macro_rules! aes_gcm_alloc_init {
    ($fn_name:ident, $task:ident, $conf:ident, $op:ident) => {
        pub unsafe fn $fn_name(
            aes_gcm: *mut doca_aes_gcm,
            src: *mut doca_buf,
            dst: *mut doca_buf,
            key: *mut doca_aes_gcm_key,
            iv: *const u8,
            iv_len: u32,
            tag_size: u32,
            aad_size: u32,
            user_data: doca_data,
            task: *mut *mut $task,
        ) -> doca_error_t {
            unsafe {
                if (*aes_gcm).base.state.get() != DOCA_CTX_STATE_RUNNING {
                    return DOCA_ERROR_BAD_STATE;
                }
                if key.is_null() {
                    return DOCA_ERROR_INVALID_VALUE;
                }
                let iv = if iv.is_null() {
                    Vec::new()
                } else {
                    std::slice::from_raw_parts(iv, iv_len as usize).to_vec()
                };
                let typed = Box::into_raw(Box::new($task {
                    task: doca_task::new(aes_gcm as *mut doca_ctx, task_free_as::<$task>),
                    src,
                    dst,
                    key,
                    iv,
                    tag_size,
                    aad_size,
                }));
                (*typed).task.user_data.set(user_data);
                *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
                    let status = $op(typed);
                    (*typed).task.status.set(status);
                    (*aes_gcm).$conf.complete(typed, &raw mut (*typed).task);
                }));
                *task = typed;
            }
            DOCA_SUCCESS
        }
    };
}

aes_gcm_alloc_init!(
    doca_aes_gcm_task_encrypt_alloc_init,
    doca_aes_gcm_task_encrypt,
    encrypt_conf,
    run_encrypt
);
aes_gcm_alloc_init!(
    doca_aes_gcm_task_decrypt_alloc_init,
    doca_aes_gcm_task_decrypt,
    decrypt_conf,
    run_decrypt
);

pub unsafe fn doca_aes_gcm_task_encrypt_as_task(
    task: *mut doca_aes_gcm_task_encrypt,
) -> *mut doca_task {
    task as *mut doca_task
}

pub unsafe fn doca_aes_gcm_task_decrypt_as_task(
    task: *mut doca_aes_gcm_task_decrypt,
) -> *mut doca_task {
    task as *mut doca_task
}
