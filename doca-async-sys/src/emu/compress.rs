//! Compression engine.
//!
//! Deflate runs through a real raw-deflate codec so round trips are honest;
//! the LZ4 task families report `DOCA_ERROR_NOT_SUPPORTED`, like silicon
//! without the LZ4 engine.

use super::*;
use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};
use std::cell::Cell;

#[repr(C)]
pub struct doca_compress {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    compress_deflate_conf: TaskConf<doca_compress_task_compress_deflate>,
    decompress_deflate_conf: TaskConf<doca_compress_task_decompress_deflate>,
}

macro_rules! deflate_task_type {
    ($task:ident, $cb:ident) => {
        #[repr(C)]
        pub struct $task {
            pub(crate) task: doca_task,
            src: *mut doca_buf,
            dst: *mut doca_buf,
            crc: Cell<u32>,
            adler: Cell<u32>,
        }

        pub type $cb = unsafe extern "C" fn(*mut $task, doca_data, doca_data);
    };
}

deflate_task_type!(
    doca_compress_task_compress_deflate,
    doca_compress_task_compress_deflate_completion_cb_t
);
deflate_task_type!(
    doca_compress_task_decompress_deflate,
    doca_compress_task_decompress_deflate_completion_cb_t
);

fn adler32(data: &[u8]) -> u32 {
    const MOD: u32 = 65521;
    let mut a: u32 = 1;
    let mut b: u32 = 0;
    for chunk in data.chunks(5552) {
        for &byte in chunk {
            a += byte as u32;
            b += a;
        }
        a %= MOD;
        b %= MOD;
    }
    (b << 16) | a
}

fn crc32(data: &[u8]) -> u32 {
    let mut crc = flate2::Crc::new();
    crc.update(data);
    crc.sum()
}

pub unsafe fn doca_compress_create(
    dev: *mut doca_dev,
    compress: *mut *mut doca_compress,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_compress {
        base: doca_ctx::new(CtxKind::Plain),
        dev,
        compress_deflate_conf: TaskConf::new(),
        decompress_deflate_conf: TaskConf::new(),
    });
    unsafe { *compress = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_compress_destroy(compress: *mut doca_compress) -> doca_error_t {
    if compress.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(compress) });
    DOCA_SUCCESS
}

pub unsafe fn doca_compress_as_ctx(compress: *mut doca_compress) -> *mut doca_ctx {
    compress as *mut doca_ctx
}

pub unsafe fn doca_compress_task_compress_deflate_set_conf(
    compress: *mut doca_compress,
    success_cb: doca_compress_task_compress_deflate_completion_cb_t,
    error_cb: doca_compress_task_compress_deflate_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*compress).compress_deflate_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_compress_task_decompress_deflate_set_conf(
    compress: *mut doca_compress,
    success_cb: doca_compress_task_decompress_deflate_completion_cb_t,
    error_cb: doca_compress_task_decompress_deflate_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*compress).decompress_deflate_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

unsafe fn deflate_compress(src: *mut doca_buf, dst: *mut doca_buf) -> (doca_error_t, u32, u32) {
    unsafe {
        let input = (*src).data_slice();
        let out =
            std::slice::from_raw_parts_mut((*dst).data_ptr(), (*dst).tail_capacity());
        let mut codec = Compress::new(Compression::default(), false);
        match codec.compress(input, out, FlushCompress::Finish) {
            Ok(Status::StreamEnd) => {
                (*dst).data_len.set(codec.total_out() as usize);
                (DOCA_SUCCESS, crc32(input), adler32(input))
            }
            Ok(_) => (DOCA_ERROR_TOO_BIG, 0, 0),
            Err(_) => (DOCA_ERROR_IO_FAILED, 0, 0),
        }
    }
}

unsafe fn deflate_decompress(src: *mut doca_buf, dst: *mut doca_buf) -> (doca_error_t, u32, u32) {
    unsafe {
        let input = (*src).data_slice();
        let out =
            std::slice::from_raw_parts_mut((*dst).data_ptr(), (*dst).tail_capacity());
        let mut codec = Decompress::new(false);
        match codec.decompress(input, out, FlushDecompress::Finish) {
            Ok(Status::StreamEnd) => {
                let produced = codec.total_out() as usize;
                (*dst).data_len.set(produced);
                let output = std::slice::from_raw_parts((*dst).data_ptr(), produced);
                (DOCA_SUCCESS, crc32(output), adler32(output))
            }
            Ok(_) => (DOCA_ERROR_TOO_BIG, 0, 0),
            Err(_) => (DOCA_ERROR_IO_FAILED, 0, 0),
        }
    }
}

macro_rules! deflate_alloc_init {
    ($fn_name:ident, $task:ident, $conf:ident, $op:ident) => {
        pub unsafe fn $fn_name(
            compress: *mut doca_compress,
            src: *mut doca_buf,
            dst: *mut doca_buf,
            user_data: doca_data,
            task: *mut *mut $task,
        ) -> doca_error_t {
            unsafe {
                if (*compress).base.state.get() != DOCA_CTX_STATE_RUNNING {
                    return DOCA_ERROR_BAD_STATE;
                }
                let typed = Box::into_raw(Box::new($task {
                    task: doca_task::new(compress as *mut doca_ctx, task_free_as::<$task>),
                    src,
                    dst,
                    crc: Cell::new(0),
                    adler: Cell::new(0),
                }));
                (*typed).task.user_data.set(user_data);
                *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
                    let (status, crc, adler) = $op((*typed).src, (*typed).dst);
                    (*typed).task.status.set(status);
                    (*typed).crc.set(crc);
                    (*typed).adler.set(adler);
                    (*compress).$conf.complete(typed, &raw mut (*typed).task);
                }));
                *task = typed;
            }
            DOCA_SUCCESS
        }
    };
}

deflate_alloc_init!(
    doca_compress_task_compress_deflate_alloc_init,
    doca_compress_task_compress_deflate,
    compress_deflate_conf,
    deflate_compress
);
deflate_alloc_init!(
    doca_compress_task_decompress_deflate_alloc_init,
    doca_compress_task_decompress_deflate,
    decompress_deflate_conf,
    deflate_decompress
);

macro_rules! deflate_task_accessors {
    ($as_task:ident, $get_crc:ident, $get_adler:ident, $task:ident) => {
        pub unsafe fn $as_task(task: *mut $task) -> *mut doca_task {
            task as *mut doca_task
        }

        pub unsafe fn $get_crc(task: *const $task) -> u32 {
            unsafe { (*task).crc.get() }
        }

        pub unsafe fn $get_adler(task: *const $task) -> u32 {
            unsafe { (*task).adler.get() }
        }
    };
}

deflate_task_accessors!(
    doca_compress_task_compress_deflate_as_task,
    doca_compress_task_compress_deflate_get_crc_cs,
    doca_compress_task_compress_deflate_get_adler_cs,
    doca_compress_task_compress_deflate
);
deflate_task_accessors!(
    doca_compress_task_decompress_deflate_as_task,
    doca_compress_task_decompress_deflate_get_crc_cs,
    doca_compress_task_decompress_deflate_get_adler_cs,
    doca_compress_task_decompress_deflate
);

// ── LZ4 families (no engine in the emulated device) ─────────

macro_rules! lz4_task_family {
    ($task:ident, $cb:ident, $set_conf:ident, $as_task:ident, $get_xxh:ident) => {
        #[repr(C)]
        pub struct $task {
            pub(crate) task: doca_task,
            xxh: Cell<u32>,
        }

        pub type $cb = unsafe extern "C" fn(*mut $task, doca_data, doca_data);

        pub unsafe fn $set_conf(
            _compress: *mut doca_compress,
            _success_cb: $cb,
            _error_cb: $cb,
            _num_tasks: u32,
        ) -> doca_error_t {
            DOCA_SUCCESS
        }

        pub unsafe fn $as_task(task: *mut $task) -> *mut doca_task {
            task as *mut doca_task
        }

        pub unsafe fn $get_xxh(task: *const $task) -> u32 {
            unsafe { (*task).xxh.get() }
        }
    };
}

lz4_task_family!(
    doca_compress_task_decompress_lz4_stream,
    doca_compress_task_decompress_lz4_stream_completion_cb_t,
    doca_compress_task_decompress_lz4_stream_set_conf,
    doca_compress_task_decompress_lz4_stream_as_task,
    doca_compress_task_decompress_lz4_stream_get_xxh_cs
);
lz4_task_family!(
    doca_compress_task_decompress_lz4_block,
    doca_compress_task_decompress_lz4_block_completion_cb_t,
    doca_compress_task_decompress_lz4_block_set_conf,
    doca_compress_task_decompress_lz4_block_as_task,
    doca_compress_task_decompress_lz4_block_get_xxh_cs
);

pub unsafe fn doca_compress_task_decompress_lz4_stream_alloc_init(
    _compress: *mut doca_compress,
    _has_block_checksum: u8,
    _are_blocks_independent: u8,
    _src: *mut doca_buf,
    _dst: *mut doca_buf,
    _user_data: doca_data,
    _task: *mut *mut doca_compress_task_decompress_lz4_stream,
) -> doca_error_t {
    DOCA_ERROR_NOT_SUPPORTED
}

pub unsafe fn doca_compress_task_decompress_lz4_block_alloc_init(
    _compress: *mut doca_compress,
    _src: *mut doca_buf,
    _dst: *mut doca_buf,
    _user_data: doca_data,
    _task: *mut *mut doca_compress_task_decompress_lz4_block,
) -> doca_error_t {
    DOCA_ERROR_NOT_SUPPORTED
}
