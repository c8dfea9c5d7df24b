//! Compression offload: deflate both ways plus the two LZ4 decompress
//! flavors, each reporting per-task checksums.

use crate::buffer::Buffer;
use crate::coro::StatusFuture;
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture};
use crate::device::{Capability, Device};
use crate::engine::ProgressEngine;
use crate::error::{Error, Result, check};
use crate::offload::{complete, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::rc::Rc;

/// Checksums calculated by the engine alongside a (de)compression.
/// Deflate tasks fill CRC32 and Adler32; LZ4 tasks fill xxHash.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CompressChecksums {
    pub crc: u32,
    pub adler: u32,
    pub xxh: u32,
}

/// Compression context.
pub struct Compress {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_compress>,
    _dev: Device,
}

impl Compress {
    /// Creates a started compression context on the engine.
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Compress>> {
        engine.create_context(false, move |core| Compress::new(core, dev, max_tasks))
    }

    fn new(core: ContextCore, dev: Device, max_tasks: u32) -> Result<Rc<Compress>> {
        if !dev.has_capability(Capability::CompressDeflate) {
            return Err(Error::NotSupported);
        }

        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_compress_create(dev.raw(), &mut handle) })?;
        let ctx = Rc::new(Compress {
            core,
            handle: Cell::new(handle),
            _dev: dev,
        });

        unsafe {
            check(ffi::doca_compress_task_compress_deflate_set_conf(
                handle,
                compress_deflate_completion,
                compress_deflate_completion,
                max_tasks,
            ))?;
            check(ffi::doca_compress_task_decompress_deflate_set_conf(
                handle,
                decompress_deflate_completion,
                decompress_deflate_completion,
                max_tasks,
            ))?;
            check(ffi::doca_compress_task_decompress_lz4_stream_set_conf(
                handle,
                decompress_lz4_stream_completion,
                decompress_lz4_stream_completion,
                max_tasks,
            ))?;
            check(ffi::doca_compress_task_decompress_lz4_block_set_conf(
                handle,
                decompress_lz4_block_completion,
                decompress_lz4_block_completion,
                max_tasks,
            ))?;
        }
        Ok(ctx)
    }

    /// Deflate-compresses `src` into `dst`. On completion the destination
    /// data region covers the compressed bytes.
    pub fn compress(&self, src: &Buffer, dst: &mut Buffer) -> StatusFuture<CompressChecksums> {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_compress_task_compress_deflate_alloc_init(
                handle, src, dst, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_compress_task_compress_deflate_as_task(task))
        })
    }

    /// Deflate-decompresses `src` into `dst`.
    pub fn decompress(&self, src: &Buffer, dst: &mut Buffer) -> StatusFuture<CompressChecksums> {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_compress_task_decompress_deflate_alloc_init(
                handle, src, dst, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_compress_task_decompress_deflate_as_task(task))
        })
    }

    /// Decompresses an LZ4 frame stream.
    pub fn decompress_lz4_stream(
        &self,
        has_block_checksum: bool,
        are_blocks_independent: bool,
        src: &Buffer,
        dst: &mut Buffer,
    ) -> StatusFuture<CompressChecksums> {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_compress_task_decompress_lz4_stream_alloc_init(
                handle,
                has_block_checksum as u8,
                are_blocks_independent as u8,
                src,
                dst,
                user_data,
                &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_compress_task_decompress_lz4_stream_as_task(task))
        })
    }

    /// Decompresses a single LZ4 block.
    pub fn decompress_lz4_block(
        &self,
        src: &Buffer,
        dst: &mut Buffer,
    ) -> StatusFuture<CompressChecksums> {
        let handle = self.handle.get();
        let src = src.raw();
        let dst = dst.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_compress_task_decompress_lz4_block_alloc_init(
                handle, src, dst, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_compress_task_decompress_lz4_block_as_task(task))
        })
    }
}

impl ContextOps for Compress {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_compress_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_compress_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Compress {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn compress_deflate_completion(
    task: *mut ffi::doca_compress_task_compress_deflate,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_compress_task_compress_deflate_as_task(task);
        complete(task_user_data, base, || unsafe {
            CompressChecksums {
                crc: ffi::doca_compress_task_compress_deflate_get_crc_cs(task),
                adler: ffi::doca_compress_task_compress_deflate_get_adler_cs(task),
                xxh: 0,
            }
        });
    }
}

unsafe extern "C" fn decompress_deflate_completion(
    task: *mut ffi::doca_compress_task_decompress_deflate,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_compress_task_decompress_deflate_as_task(task);
        complete(task_user_data, base, || unsafe {
            CompressChecksums {
                crc: ffi::doca_compress_task_decompress_deflate_get_crc_cs(task),
                adler: ffi::doca_compress_task_decompress_deflate_get_adler_cs(task),
                xxh: 0,
            }
        });
    }
}

unsafe extern "C" fn decompress_lz4_stream_completion(
    task: *mut ffi::doca_compress_task_decompress_lz4_stream,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_compress_task_decompress_lz4_stream_as_task(task);
        complete(task_user_data, base, || unsafe {
            CompressChecksums {
                crc: 0,
                adler: 0,
                xxh: ffi::doca_compress_task_decompress_lz4_stream_get_xxh_cs(task),
            }
        });
    }
}

unsafe extern "C" fn decompress_lz4_block_completion(
    task: *mut ffi::doca_compress_task_decompress_lz4_block,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_compress_task_decompress_lz4_block_as_task(task);
        complete(task_user_data, base, || unsafe {
            CompressChecksums {
                crc: 0,
                adler: 0,
                xxh: ffi::doca_compress_task_decompress_lz4_block_get_xxh_cs(task),
            }
        });
    }
}
