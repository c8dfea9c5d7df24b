//! DMA engine: memcpy between mapped buffers.

use super::*;

#[repr(C)]
pub struct doca_dma {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    memcpy_conf: TaskConf<doca_dma_task_memcpy>,
}

#[repr(C)]
pub struct doca_dma_task_memcpy {
    pub(crate) task: doca_task,
    src: *mut doca_buf,
    dst: *mut doca_buf,
}

pub type doca_dma_task_memcpy_completion_cb_t =
    unsafe extern "C" fn(*mut doca_dma_task_memcpy, doca_data, doca_data);

pub unsafe fn doca_dma_create(dev: *mut doca_dev, dma: *mut *mut doca_dma) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_dma {
        base: doca_ctx::new(CtxKind::Plain),
        dev,
        memcpy_conf: TaskConf::new(),
    });
    unsafe { *dma = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_dma_destroy(dma: *mut doca_dma) -> doca_error_t {
    if dma.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(dma) });
    DOCA_SUCCESS
}

pub unsafe fn doca_dma_as_ctx(dma: *mut doca_dma) -> *mut doca_ctx {
    dma as *mut doca_ctx
}

pub unsafe fn doca_dma_task_memcpy_set_conf(
    dma: *mut doca_dma,
    success_cb: doca_dma_task_memcpy_completion_cb_t,
    error_cb: doca_dma_task_memcpy_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*dma).memcpy_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_dma_task_memcpy_alloc_init(
    dma: *mut doca_dma,
    src: *mut doca_buf,
    dst: *mut doca_buf,
    user_data: doca_data,
    task: *mut *mut doca_dma_task_memcpy,
) -> doca_error_t {
    unsafe {
        if (*dma).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_dma_task_memcpy {
            task: doca_task::new(dma as *mut doca_ctx, task_free_as::<doca_dma_task_memcpy>),
            src,
            dst,
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let status = (*(*typed).dst).write_at_data((*(*typed).src).data_slice());
            (*typed).task.status.set(status);
            (*dma).memcpy_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_dma_task_memcpy_as_task(task: *mut doca_dma_task_memcpy) -> *mut doca_task {
    task as *mut doca_task
}
