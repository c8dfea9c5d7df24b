//! Erasure-coding engine: GF(2^8) Cauchy coding, like the hardware, so
//! recovery tests operate on real redundancy blocks.

use super::*;
use std::sync::OnceLock;

pub type doca_ec_matrix_type = u32;
pub const DOCA_EC_MATRIX_TYPE_CAUCHY: doca_ec_matrix_type = 1;
pub const DOCA_EC_MATRIX_TYPE_VANDERMONDE: doca_ec_matrix_type = 2;

pub const DOCA_EC_BLOCK_ALIGNMENT: usize = 64;

// ── GF(2^8) arithmetic (polynomial 0x11d) ───────────────────

fn gf_tables() -> &'static ([u8; 256], [u8; 512]) {
    static TABLES: OnceLock<([u8; 256], [u8; 512])> = OnceLock::new();
    TABLES.get_or_init(|| {
        let mut log = [0u8; 256];
        let mut exp = [0u8; 512];
        let mut x: u16 = 1;
        for i in 0..255 {
            exp[i] = x as u8;
            log[x as usize] = i as u8;
            x <<= 1;
            if x & 0x100 != 0 {
                x ^= 0x11d;
            }
        }
        for i in 255..512 {
            exp[i] = exp[i - 255];
        }
        (log, exp)
    })
}

fn gf_mul(a: u8, b: u8) -> u8 {
    if a == 0 || b == 0 {
        return 0;
    }
    let (log, exp) = gf_tables();
    exp[log[a as usize] as usize + log[b as usize] as usize]
}

fn gf_inv(a: u8) -> u8 {
    let (log, exp) = gf_tables();
    exp[255 - log[a as usize] as usize]
}

/// In-place Gauss-Jordan inversion over GF(2^8). Returns false on a singular
/// matrix.
fn gf_invert(matrix: &mut [Vec<u8>]) -> bool {
    let n = matrix.len();
    let mut inverse: Vec<Vec<u8>> = (0..n)
        .map(|i| (0..n).map(|j| (i == j) as u8).collect())
        .collect();

    for col in 0..n {
        let pivot = (col..n).find(|&row| matrix[row][col] != 0);
        let Some(pivot) = pivot else {
            return false;
        };
        matrix.swap(col, pivot);
        inverse.swap(col, pivot);

        let scale = gf_inv(matrix[col][col]);
        for j in 0..n {
            matrix[col][j] = gf_mul(matrix[col][j], scale);
            inverse[col][j] = gf_mul(inverse[col][j], scale);
        }

        for row in 0..n {
            if row == col || matrix[row][col] == 0 {
                continue;
            }
            let factor = matrix[row][col];
            for j in 0..n {
                matrix[row][j] ^= gf_mul(factor, matrix[col][j]);
                inverse[row][j] ^= gf_mul(factor, inverse[col][j]);
            }
        }
    }

    matrix.clone_from_slice(&inverse);
    true
}

// ── matrices ────────────────────────────────────────────────

enum MatrixKind {
    Coding,
    Update { updates: Vec<u32> },
    Recover { missing: Vec<u32> },
}

pub struct doca_ec_matrix {
    kind: MatrixKind,
    data_block_count: usize,
    rdnc_block_count: usize,
    /// rdnc_block_count x data_block_count Cauchy coefficients
    coefficients: Vec<Vec<u8>>,
}

fn cauchy_coefficients(data_block_count: usize, rdnc_block_count: usize) -> Vec<Vec<u8>> {
    (0..rdnc_block_count)
        .map(|r| {
            let x = (data_block_count + r) as u8;
            (0..data_block_count)
                .map(|c| gf_inv(x ^ c as u8))
                .collect()
        })
        .collect()
}

pub unsafe fn doca_ec_matrix_create(
    _ec: *mut doca_ec,
    matrix_type: doca_ec_matrix_type,
    data_block_count: usize,
    rdnc_block_count: usize,
    matrix: *mut *mut doca_ec_matrix,
) -> doca_error_t {
    if matrix_type != DOCA_EC_MATRIX_TYPE_CAUCHY && matrix_type != DOCA_EC_MATRIX_TYPE_VANDERMONDE
    {
        return DOCA_ERROR_INVALID_VALUE;
    }
    if data_block_count == 0
        || rdnc_block_count == 0
        || data_block_count + rdnc_block_count > 256
    {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_ec_matrix {
        kind: MatrixKind::Coding,
        data_block_count,
        rdnc_block_count,
        coefficients: cauchy_coefficients(data_block_count, rdnc_block_count),
    });
    unsafe { *matrix = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_ec_matrix_create_recover(
    _ec: *mut doca_ec,
    coding_matrix: *const doca_ec_matrix,
    missing_indices: *const u32,
    n_missing: usize,
    matrix: *mut *mut doca_ec_matrix,
) -> doca_error_t {
    unsafe {
        if n_missing == 0 || n_missing > (*coding_matrix).rdnc_block_count {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let missing = std::slice::from_raw_parts(missing_indices, n_missing).to_vec();
        let handle = Box::new(doca_ec_matrix {
            kind: MatrixKind::Recover { missing },
            data_block_count: (*coding_matrix).data_block_count,
            rdnc_block_count: (*coding_matrix).rdnc_block_count,
            coefficients: (*coding_matrix).coefficients.clone(),
        });
        *matrix = Box::into_raw(handle);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_ec_matrix_create_update(
    _ec: *mut doca_ec,
    coding_matrix: *const doca_ec_matrix,
    update_indices: *const u32,
    n_updates: usize,
    matrix: *mut *mut doca_ec_matrix,
) -> doca_error_t {
    unsafe {
        if n_updates == 0 || n_updates > (*coding_matrix).data_block_count {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let updates = std::slice::from_raw_parts(update_indices, n_updates).to_vec();
        let handle = Box::new(doca_ec_matrix {
            kind: MatrixKind::Update { updates },
            data_block_count: (*coding_matrix).data_block_count,
            rdnc_block_count: (*coding_matrix).rdnc_block_count,
            coefficients: (*coding_matrix).coefficients.clone(),
        });
        *matrix = Box::into_raw(handle);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_ec_matrix_destroy(matrix: *mut doca_ec_matrix) -> doca_error_t {
    if matrix.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(matrix) });
    DOCA_SUCCESS
}

// ── context ─────────────────────────────────────────────────

#[repr(C)]
pub struct doca_ec {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    create_conf: TaskConf<doca_ec_task_create>,
    update_conf: TaskConf<doca_ec_task_update>,
    recover_conf: TaskConf<doca_ec_task_recover>,
}

pub unsafe fn doca_ec_create(dev: *mut doca_dev, ec: *mut *mut doca_ec) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_ec {
        base: doca_ctx::new(CtxKind::Plain),
        dev,
        create_conf: TaskConf::new(),
        update_conf: TaskConf::new(),
        recover_conf: TaskConf::new(),
    });
    unsafe { *ec = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_ec_destroy(ec: *mut doca_ec) -> doca_error_t {
    if ec.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(ec) });
    DOCA_SUCCESS
}

pub unsafe fn doca_ec_as_ctx(ec: *mut doca_ec) -> *mut doca_ctx {
    ec as *mut doca_ctx
}

// ── task execution ──────────────────────────────────────────

fn block_size_for(total: usize, blocks: usize) -> Option<usize> {
    if blocks == 0 || total % blocks != 0 {
        return None;
    }
    let size = total / blocks;
    if size == 0 || size % DOCA_EC_BLOCK_ALIGNMENT != 0 {
        return None;
    }
    Some(size)
}

unsafe fn run_create(matrix: *const doca_ec_matrix, src: *mut doca_buf, dst: *mut doca_buf) -> doca_error_t {
    unsafe {
        let m = &*matrix;
        if !matches!(m.kind, MatrixKind::Coding) {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let data = (*src).data_slice();
        let Some(block) = block_size_for(data.len(), m.data_block_count) else {
            return DOCA_ERROR_INVALID_VALUE;
        };
        let mut out = vec![0u8; block * m.rdnc_block_count];
        for (r, row) in m.coefficients.iter().enumerate() {
            let rdnc = &mut out[r * block..(r + 1) * block];
            for (c, &coeff) in row.iter().enumerate() {
                let data_block = &data[c * block..(c + 1) * block];
                for (o, &d) in rdnc.iter_mut().zip(data_block) {
                    *o ^= gf_mul(coeff, d);
                }
            }
        }
        (*dst).write_at_data(&out)
    }
}

unsafe fn run_recover(matrix: *const doca_ec_matrix, src: *mut doca_buf, dst: *mut doca_buf) -> doca_error_t {
    unsafe {
        let m = &*matrix;
        let MatrixKind::Recover { missing } = &m.kind else {
            return DOCA_ERROR_INVALID_VALUE;
        };
        let k = m.data_block_count;
        let available = (*src).data_slice();
        let Some(block) = block_size_for(available.len(), k) else {
            return DOCA_ERROR_INVALID_VALUE;
        };

        // the first k surviving block indices, in ascending order, must match
        // the available blocks handed to us
        let surviving: Vec<usize> = (0..k + m.rdnc_block_count)
            .filter(|i| !missing.contains(&(*i as u32)))
            .take(k)
            .collect();
        if surviving.len() < k {
            return DOCA_ERROR_INVALID_VALUE;
        }

        let mut decode: Vec<Vec<u8>> = surviving
            .iter()
            .map(|&idx| {
                if idx < k {
                    (0..k).map(|j| (j == idx) as u8).collect()
                } else {
                    m.coefficients[idx - k].clone()
                }
            })
            .collect();
        if !gf_invert(&mut decode) {
            return DOCA_ERROR_IO_FAILED;
        }

        let mut missing_data: Vec<u32> = missing.iter().copied().filter(|&i| (i as usize) < k).collect();
        missing_data.sort_unstable();

        let mut out = vec![0u8; block * missing_data.len()];
        for (slot, &idx) in missing_data.iter().enumerate() {
            let row = &decode[idx as usize];
            let target = &mut out[slot * block..(slot + 1) * block];
            for (j, &coeff) in row.iter().enumerate() {
                let source = &available[j * block..(j + 1) * block];
                for (o, &s) in target.iter_mut().zip(source) {
                    *o ^= gf_mul(coeff, s);
                }
            }
        }
        (*dst).write_at_data(&out)
    }
}

unsafe fn run_update(matrix: *const doca_ec_matrix, src: *mut doca_buf, dst: *mut doca_buf) -> doca_error_t {
    unsafe {
        let m = &*matrix;
        let MatrixKind::Update { updates } = &m.kind else {
            return DOCA_ERROR_INVALID_VALUE;
        };
        let r = m.rdnc_block_count;
        let u = updates.len();
        let data = (*src).data_slice();
        let Some(block) = block_size_for(data.len(), 2 * u + r) else {
            return DOCA_ERROR_INVALID_VALUE;
        };

        // src layout: (old, new) pair per updated block in ascending index
        // order, followed by the current redundancy blocks
        let mut out = data[2 * u * block..].to_vec();
        let mut sorted: Vec<u32> = updates.clone();
        sorted.sort_unstable();
        for (pair, &idx) in sorted.iter().enumerate() {
            let old = &data[2 * pair * block..(2 * pair + 1) * block];
            let new = &data[(2 * pair + 1) * block..(2 * pair + 2) * block];
            for (row, coeffs) in m.coefficients.iter().enumerate() {
                let coeff = coeffs[idx as usize];
                let target = &mut out[row * block..(row + 1) * block];
                for ((o, &a), &b) in target.iter_mut().zip(old).zip(new) {
                    *o ^= gf_mul(coeff, a ^ b);
                }
            }
        }
        (*dst).write_at_data(&out)
    }
}

macro_rules! ec_task_family {
    ($task:ident, $cb:ident, $set_conf:ident, $alloc_init:ident, $as_task:ident, $conf:ident, $op:ident) => {
        #[repr(C)]
        pub struct $task {
            pub(crate) task: doca_task,
            matrix: *const doca_ec_matrix,
            src: *mut doca_buf,
            dst: *mut doca_buf,
        }

        pub type $cb = unsafe extern "C" fn(*mut $task, doca_data, doca_data);

        pub unsafe fn $set_conf(
            ec: *mut doca_ec,
            success_cb: $cb,
            error_cb: $cb,
            num_tasks: u32,
        ) -> doca_error_t {
            unsafe { (*ec).$conf.set(success_cb, error_cb, num_tasks) };
            DOCA_SUCCESS
        }

        pub unsafe fn $alloc_init(
            ec: *mut doca_ec,
            matrix: *const doca_ec_matrix,
            src: *mut doca_buf,
            dst: *mut doca_buf,
            user_data: doca_data,
            task: *mut *mut $task,
        ) -> doca_error_t {
            unsafe {
                if (*ec).base.state.get() != DOCA_CTX_STATE_RUNNING {
                    return DOCA_ERROR_BAD_STATE;
                }
                if matrix.is_null() {
                    return DOCA_ERROR_INVALID_VALUE;
                }
                let typed = Box::into_raw(Box::new($task {
                    task: doca_task::new(ec as *mut doca_ctx, task_free_as::<$task>),
                    matrix,
                    src,
                    dst,
                }));
                (*typed).task.user_data.set(user_data);
                *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
                    let status = $op((*typed).matrix, (*typed).src, (*typed).dst);
                    (*typed).task.status.set(status);
                    (*ec).$conf.complete(typed, &raw mut (*typed).task);
                }));
                *task = typed;
            }
            DOCA_SUCCESS
        }

        pub unsafe fn $as_task(task: *mut $task) -> *mut doca_task {
            task as *mut doca_task
        }
    };
}

ec_task_family!(
    doca_ec_task_create,
    doca_ec_task_create_completion_cb_t,
    doca_ec_task_create_set_conf,
    doca_ec_task_create_alloc_init,
    doca_ec_task_create_as_task,
    create_conf,
    run_create
);
ec_task_family!(
    doca_ec_task_update,
    doca_ec_task_update_completion_cb_t,
    doca_ec_task_update_set_conf,
    doca_ec_task_update_alloc_init,
    doca_ec_task_update_as_task,
    update_conf,
    run_update
);
ec_task_family!(
    doca_ec_task_recover,
    doca_ec_task_recover_completion_cb_t,
    doca_ec_task_recover_set_conf,
    doca_ec_task_recover_alloc_init,
    doca_ec_task_recover_as_task,
    recover_conf,
    run_recover
);
