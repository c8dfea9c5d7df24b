//! AES-GCM offload.
//!
//! Keys back-reference their context; the context defers its own SDK stop
//! until every loaded key has been dropped, so key handles never outlive
//! the engine that validated them.

use crate::buffer::Buffer;
use crate::coro::StatusFuture;
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture, request_raw_stop};
use crate::device::{Capability, Device};
use crate::engine::ProgressEngine;
use crate::error::{Error, Result, check};
use crate::offload::{complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::rc::{Rc, Weak};
use tracing::error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AesGcmKeyType {
    Aes128,
    Aes256,
}

impl AesGcmKeyType {
    fn raw(self) -> ffi::doca_aes_gcm_key_type {
        match self {
            AesGcmKeyType::Aes128 => ffi::DOCA_AES_GCM_KEY_128,
            AesGcmKeyType::Aes256 => ffi::DOCA_AES_GCM_KEY_256,
        }
    }

    fn key_len(self) -> usize {
        match self {
            AesGcmKeyType::Aes128 => 16,
            AesGcmKeyType::Aes256 => 32,
        }
    }
}

pub struct AesGcm {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_aes_gcm>,
    weak_self: Weak<AesGcm>,
    _dev: Device,
    loaded_keys: Cell<u32>,
    stop_requested: Cell<bool>,
}

impl AesGcm {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<AesGcm>> {
        engine.create_context(false, move |core| AesGcm::new(core, dev, max_tasks))
    }

    fn new(core: ContextCore, dev: Device, max_tasks: u32) -> Result<Rc<AesGcm>> {
        if !dev.has_capability(Capability::AesGcm) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_aes_gcm_create(dev.raw(), &mut handle) })?;
        let ctx = Rc::new_cyclic(|weak_self| AesGcm {
            core,
            handle: Cell::new(handle),
            weak_self: weak_self.clone(),
            _dev: dev,
            loaded_keys: Cell::new(0),
            stop_requested: Cell::new(false),
        });
        unsafe {
            check(ffi::doca_aes_gcm_task_encrypt_set_conf(
                handle,
                encrypt_completion,
                encrypt_completion,
                max_tasks,
            ))?;
            check(ffi::doca_aes_gcm_task_decrypt_set_conf(
                handle,
                decrypt_completion,
                decrypt_completion,
                max_tasks,
            ))?;
        }
        Ok(ctx)
    }

    /// Loads key material of the declared type. The key length is validated
    /// against the type before the SDK ever sees it.
    pub fn load_key(&self, key_data: &[u8], key_type: AesGcmKeyType) -> Result<AesGcmKey> {
        if key_data.len() != key_type.key_len() {
            return Err(Error::InvalidValue);
        }
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_aes_gcm_key_create(
                self.handle.get(),
                key_data.as_ptr() as *const std::ffi::c_void,
                key_type.raw(),
                &mut raw,
            )
        })?;
        self.loaded_keys.set(self.loaded_keys.get() + 1);
        Ok(AesGcmKey {
            raw: Cell::new(raw),
            parent: self.weak_self.clone(),
        })
    }

    /// Encrypts the plaintext data region into `dst`, appending a `tag_size`
    /// byte authentication tag. The first `aad_size` bytes are
    /// authenticated without encryption.
    pub fn encrypt(
        &self,
        plaintext: &Buffer,
        dst: &mut Buffer,
        key: &AesGcmKey,
        iv: &[u8],
        tag_size: u32,
        aad_size: u32,
    ) -> StatusFuture {
        self.crypt_task(plaintext, dst, key, iv, tag_size, aad_size, true)
    }

    /// Decrypts and authenticates `encrypted` into `dst`.
    pub fn decrypt(
        &self,
        encrypted: &Buffer,
        dst: &mut Buffer,
        key: &AesGcmKey,
        iv: &[u8],
        tag_size: u32,
        aad_size: u32,
    ) -> StatusFuture {
        self.crypt_task(encrypted, dst, key, iv, tag_size, aad_size, false)
    }

    #[allow(clippy::too_many_arguments)]
    fn crypt_task(
        &self,
        src: &Buffer,
        dst: &mut Buffer,
        key: &AesGcmKey,
        iv: &[u8],
        tag_size: u32,
        aad_size: u32,
        encrypt: bool,
    ) -> StatusFuture {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        let key = key.raw.get();
        status_offload(&self.core, |user_data| unsafe {
            let mut base = std::ptr::null_mut();
            let err = if encrypt {
                let mut task = std::ptr::null_mut();
                let err = ffi::doca_aes_gcm_task_encrypt_alloc_init(
                    handle,
                    src,
                    dst,
                    key,
                    iv.as_ptr(),
                    iv.len() as u32,
                    tag_size,
                    aad_size,
                    user_data,
                    &mut task,
                );
                if err == ffi::DOCA_SUCCESS {
                    base = ffi::doca_aes_gcm_task_encrypt_as_task(task);
                }
                err
            } else {
                let mut task = std::ptr::null_mut();
                let err = ffi::doca_aes_gcm_task_decrypt_alloc_init(
                    handle,
                    src,
                    dst,
                    key,
                    iv.as_ptr(),
                    iv.len() as u32,
                    tag_size,
                    aad_size,
                    user_data,
                    &mut task,
                );
                if err == ffi::DOCA_SUCCESS {
                    base = ffi::doca_aes_gcm_task_decrypt_as_task(task);
                }
                err
            };
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(base)
        })
    }

    fn signal_key_destroyed(&self) {
        let remaining = self.loaded_keys.get().saturating_sub(1);
        self.loaded_keys.set(remaining);
        if remaining == 0 && self.stop_requested.get() {
            if let Err(err) = request_raw_stop(self.as_raw_ctx()) {
                error!(%err, "unable to stop aes-gcm context after last key was dropped");
            }
        }
    }
}

impl ContextOps for AesGcm {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_aes_gcm_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_aes_gcm_destroy(handle) };
        }
    }

    fn request_stop(&self) -> Result<()> {
        if self.loaded_keys.get() > 0 {
            // deferred until the last key is dropped
            self.stop_requested.set(true);
            return Ok(());
        }
        request_raw_stop(self.as_raw_ctx())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for AesGcm {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

/// Loaded key material. Dropping the key notifies the owning context, which
/// may complete a deferred stop.
pub struct AesGcmKey {
    raw: Cell<*mut ffi::doca_aes_gcm_key>,
    parent: Weak<AesGcm>,
}

impl AesGcmKey {
    /// Destroys the key early; dropping has the same effect.
    pub fn clear(self) {}
}

impl Drop for AesGcmKey {
    fn drop(&mut self) {
        let raw = self.raw.replace(std::ptr::null_mut());
        if raw.is_null() {
            return;
        }
        unsafe { ffi::doca_aes_gcm_key_destroy(raw) };
        if let Some(parent) = self.parent.upgrade() {
            parent.signal_key_destroyed();
        }
    }
}

unsafe extern "C" fn encrypt_completion(
    task: *mut ffi::doca_aes_gcm_task_encrypt,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_aes_gcm_task_encrypt_as_task(task)) };
}

unsafe extern "C" fn decrypt_completion(
    task: *mut ffi::doca_aes_gcm_task_decrypt,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_aes_gcm_task_decrypt_as_task(task)) };
}
