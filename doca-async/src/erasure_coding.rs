//! Erasure-coding offload.
//!
//! Blocks must be a multiple of 64 bytes. Redundancy blocks are numbered
//! consecutively after the payload blocks: with data blocks 0..k, the first
//! redundancy block has index k. During recovery, the available blocks are
//! concatenated in ascending index order, exactly `data_block_count` of
//! them; superfluous redundancy blocks must be left out or the buffer
//! geometry will not match the recovery matrix.
//!
//! A matrix is only usable with the context that created it.

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

/// Encoding geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EcMatrixType {
    Cauchy,
    Vandermonde,
}

impl EcMatrixType {
    fn raw(self) -> ffi::doca_ec_matrix_type {
        match self {
            EcMatrixType::Cauchy => ffi::DOCA_EC_MATRIX_TYPE_CAUCHY,
            EcMatrixType::Vandermonde => ffi::DOCA_EC_MATRIX_TYPE_VANDERMONDE,
        }
    }
}

/// Encoding matrix used to create redundancy blocks and to derive update
/// and recovery matrices.
pub struct EcCodingMatrix {
    raw: *mut ffi::doca_ec_matrix,
    data_block_count: usize,
    rdnc_block_count: usize,
}

impl EcCodingMatrix {
    pub fn data_block_count(&self) -> usize {
        self.data_block_count
    }

    pub fn rdnc_block_count(&self) -> usize {
        self.rdnc_block_count
    }
}

impl Drop for EcCodingMatrix {
    fn drop(&mut self) {
        unsafe { ffi::doca_ec_matrix_destroy(self.raw) };
    }
}

/// Recovery matrix for a specific set of missing block indices.
pub struct EcRecoverMatrix {
    raw: *mut ffi::doca_ec_matrix,
}

impl Drop for EcRecoverMatrix {
    fn drop(&mut self) {
        unsafe { ffi::doca_ec_matrix_destroy(self.raw) };
    }
}

/// Update matrix for recalculating redundancy when specific data blocks
/// change.
pub struct EcUpdateMatrix {
    raw: *mut ffi::doca_ec_matrix,
}

impl Drop for EcUpdateMatrix {
    fn drop(&mut self) {
        unsafe { ffi::doca_ec_matrix_destroy(self.raw) };
    }
}

pub struct Ec {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_ec>,
    _dev: Device,
}

impl Ec {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Ec>> {
        engine.create_context(false, move |core| Ec::new(core, dev, max_tasks))
    }

    fn new(core: ContextCore, dev: Device, max_tasks: u32) -> Result<Rc<Ec>> {
        if !dev.has_capability(Capability::ErasureCoding) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_ec_create(dev.raw(), &mut handle) })?;
        let ctx = Rc::new(Ec {
            core,
            handle: Cell::new(handle),
            _dev: dev,
        });
        unsafe {
            check(ffi::doca_ec_task_create_set_conf(
                handle,
                create_completion,
                create_completion,
                max_tasks,
            ))?;
            check(ffi::doca_ec_task_update_set_conf(
                handle,
                update_completion,
                update_completion,
                max_tasks,
            ))?;
            check(ffi::doca_ec_task_recover_set_conf(
                handle,
                recover_completion,
                recover_completion,
                max_tasks,
            ))?;
        }
        Ok(ctx)
    }

    /// Encoding matrix for the given geometry.
    pub fn coding_matrix(
        &self,
        matrix_type: EcMatrixType,
        data_block_count: usize,
        rdnc_block_count: usize,
    ) -> Result<EcCodingMatrix> {
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_ec_matrix_create(
                self.handle.get(),
                matrix_type.raw(),
                data_block_count,
                rdnc_block_count,
                &mut raw,
            )
        })?;
        Ok(EcCodingMatrix {
            raw,
            data_block_count,
            rdnc_block_count,
        })
    }

    /// Recovery matrix for the given missing payload/redundancy indices.
    pub fn recover_matrix(
        &self,
        coding_matrix: &EcCodingMatrix,
        missing_indices: &[u32],
    ) -> Result<EcRecoverMatrix> {
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_ec_matrix_create_recover(
                self.handle.get(),
                coding_matrix.raw,
                missing_indices.as_ptr(),
                missing_indices.len(),
                &mut raw,
            )
        })?;
        Ok(EcRecoverMatrix { raw })
    }

    /// Update matrix for the given changed data-block indices.
    pub fn update_matrix(
        &self,
        coding_matrix: &EcCodingMatrix,
        update_indices: &[u32],
    ) -> Result<EcUpdateMatrix> {
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_ec_matrix_create_update(
                self.handle.get(),
                coding_matrix.raw,
                update_indices.as_ptr(),
                update_indices.len(),
                &mut raw,
            )
        })?;
        Ok(EcUpdateMatrix { raw })
    }

    /// Calculates redundancy blocks for the payload in
    /// `original_data_blocks`.
    pub fn create(
        &self,
        coding_matrix: &EcCodingMatrix,
        original_data_blocks: &Buffer,
        rdnc_blocks: &mut Buffer,
    ) -> StatusFuture {
        let handle = self.handle.get();
        let matrix = coding_matrix.raw;
        let src = original_data_blocks.raw();
        let dst = rdnc_blocks.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_ec_task_create_alloc_init(
                handle, matrix, src, dst, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_ec_task_create_as_task(task))
        })
    }

    /// Recovers the missing data blocks from the surviving blocks in
    /// `available_blocks` (ascending index order, `data_block_count` of
    /// them).
    pub fn recover(
        &self,
        recover_matrix: &EcRecoverMatrix,
        available_blocks: &Buffer,
        recovered_data_blocks: &mut Buffer,
    ) -> StatusFuture {
        let handle = self.handle.get();
        let matrix = recover_matrix.raw;
        let src = available_blocks.raw();
        let dst = recovered_data_blocks.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_ec_task_recover_alloc_init(
                handle, matrix, src, dst, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_ec_task_recover_as_task(task))
        })
    }

    /// Recalculates redundancy for changed data blocks. The source carries
    /// an (old, new) block pair per updated index in ascending order,
    /// followed by the current redundancy blocks.
    pub fn update(
        &self,
        update_matrix: &EcUpdateMatrix,
        original_updated_and_rdnc_blocks: &Buffer,
        updated_rdnc_blocks: &mut Buffer,
    ) -> StatusFuture {
        let handle = self.handle.get();
        let matrix = update_matrix.raw;
        let src = original_updated_and_rdnc_blocks.raw();
        let dst = updated_rdnc_blocks.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_ec_task_update_alloc_init(
                handle, matrix, src, dst, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_ec_task_update_as_task(task))
        })
    }
}

impl ContextOps for Ec {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_ec_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_ec_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Ec {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn create_completion(
    task: *mut ffi::doca_ec_task_create,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_ec_task_create_as_task(task)) };
}

unsafe extern "C" fn update_completion(
    task: *mut ffi::doca_ec_task_update,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_ec_task_update_as_task(task)) };
}

unsafe extern "C" fn recover_completion(
    task: *mut ffi::doca_ec_task_recover,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_ec_task_recover_as_task(task)) };
}
