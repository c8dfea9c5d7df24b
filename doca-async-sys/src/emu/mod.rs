//! Software model of the DOCA contract.
//!
//! Everything here is strictly single-threaded and pointer-based so the
//! surface matches what bindgen generates for the real SDK. State shared
//! between endpoint pairs (comch name registry, RDMA connection blobs, the
//! ethernet loopback wire) is thread-local, which both matches the SDK's
//! documented thread model and isolates parallel test threads from each
//! other.

// contract-fidelity fields (queue sizes, device backrefs, transport knobs)
// are stored even where the emulation takes no decision on them
#![allow(dead_code)]

mod aes_gcm;
mod comch;
mod compress;
mod devemu;
mod device;
mod dma;
mod ec;
mod eth;
mod mem;
mod rdma;
mod sha;
mod sync_event;

pub use aes_gcm::*;
pub use comch::*;
pub use compress::*;
pub use devemu::*;
pub use device::*;
pub use dma::*;
pub use ec::*;
pub use eth::*;
pub use mem::*;
pub use rdma::*;
pub use sha::*;
pub use sync_event::*;

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ffi::c_void;

// ── error codes ─────────────────────────────────────────────

pub type doca_error_t = i32;

pub const DOCA_SUCCESS: doca_error_t = 0;
pub const DOCA_ERROR_UNKNOWN: doca_error_t = 1;
pub const DOCA_ERROR_NOT_PERMITTED: doca_error_t = 2;
pub const DOCA_ERROR_IN_USE: doca_error_t = 3;
pub const DOCA_ERROR_NOT_SUPPORTED: doca_error_t = 4;
pub const DOCA_ERROR_AGAIN: doca_error_t = 5;
pub const DOCA_ERROR_INVALID_VALUE: doca_error_t = 6;
pub const DOCA_ERROR_NO_MEMORY: doca_error_t = 7;
pub const DOCA_ERROR_INITIALIZATION: doca_error_t = 8;
pub const DOCA_ERROR_SHUTDOWN: doca_error_t = 9;
pub const DOCA_ERROR_CONNECTION_RESET: doca_error_t = 10;
pub const DOCA_ERROR_CONNECTION_ABORTED: doca_error_t = 11;
pub const DOCA_ERROR_CONNECTION_INPROGRESS: doca_error_t = 12;
pub const DOCA_ERROR_NOT_CONNECTED: doca_error_t = 13;
pub const DOCA_ERROR_DRIVER: doca_error_t = 14;
pub const DOCA_ERROR_OPERATING_SYSTEM: doca_error_t = 15;
pub const DOCA_ERROR_BAD_STATE: doca_error_t = 16;
pub const DOCA_ERROR_UNSUPPORTED_VERSION: doca_error_t = 17;
pub const DOCA_ERROR_FULL: doca_error_t = 18;
pub const DOCA_ERROR_EMPTY: doca_error_t = 19;
pub const DOCA_ERROR_IN_PROGRESS: doca_error_t = 20;
pub const DOCA_ERROR_TOO_BIG: doca_error_t = 21;
pub const DOCA_ERROR_NOT_FOUND: doca_error_t = 22;
pub const DOCA_ERROR_IO_FAILED: doca_error_t = 23;
pub const DOCA_ERROR_UNEXPECTED: doca_error_t = 24;

// ── common types ────────────────────────────────────────────

/// Callback routing blob carried by engines, contexts, connections and tasks.
#[repr(C)]
#[derive(Clone, Copy)]
pub union doca_data {
    pub ptr: *mut c_void,
    pub u64_: u64,
}

impl doca_data {
    pub(crate) fn null() -> Self {
        doca_data { u64_: 0 }
    }
}

pub type doca_event_handle_t = i32;
pub const doca_event_invalid_handle: doca_event_handle_t = -1;

pub type doca_ctx_states = u32;
pub const DOCA_CTX_STATE_IDLE: doca_ctx_states = 0;
pub const DOCA_CTX_STATE_STARTING: doca_ctx_states = 1;
pub const DOCA_CTX_STATE_RUNNING: doca_ctx_states = 2;
pub const DOCA_CTX_STATE_STOPPING: doca_ctx_states = 3;

pub type doca_ctx_state_changed_callback_t = unsafe extern "C" fn(
    user_data: doca_data,
    ctx: *mut doca_ctx,
    prev_state: doca_ctx_states,
    next_state: doca_ctx_states,
);

// memory access permissions
pub const DOCA_ACCESS_FLAG_LOCAL_READ_ONLY: u32 = 0;
pub const DOCA_ACCESS_FLAG_LOCAL_READ_WRITE: u32 = 1;
pub const DOCA_ACCESS_FLAG_RDMA_READ: u32 = 2;
pub const DOCA_ACCESS_FLAG_RDMA_WRITE: u32 = 4;
pub const DOCA_ACCESS_FLAG_RDMA_ATOMIC: u32 = 8;
pub const DOCA_ACCESS_FLAG_PCI_READ_WRITE: u32 = 16;
pub const DOCA_ACCESS_FLAG_PCI_RELAXED_ORDERING: u32 = 32;

/// Scatter element for LSO sends.
#[repr(C)]
pub struct doca_gather_list {
    pub addr: *mut c_void,
    pub len: usize,
    pub next: *mut doca_gather_list,
}

// ── progress engine ─────────────────────────────────────────

pub struct doca_pe {
    queue: RefCell<VecDeque<Box<dyn FnOnce()>>>,
    efd: i32,
    armed: Cell<bool>,
    inflight: Cell<usize>,
}

pub unsafe fn doca_pe_create(pe: *mut *mut doca_pe) -> doca_error_t {
    let efd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK) };
    if efd < 0 {
        return DOCA_ERROR_OPERATING_SYSTEM;
    }

    let handle = Box::new(doca_pe {
        queue: RefCell::new(VecDeque::new()),
        efd,
        armed: Cell::new(false),
        inflight: Cell::new(0),
    });
    unsafe { *pe = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_pe_destroy(pe: *mut doca_pe) -> doca_error_t {
    if pe.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let pe = unsafe { Box::from_raw(pe) };
    unsafe { libc::close(pe.efd) };
    DOCA_SUCCESS
}

pub unsafe fn doca_pe_get_notification_handle(
    pe: *const doca_pe,
    handle: *mut doca_event_handle_t,
) -> doca_error_t {
    unsafe { *handle = (*pe).efd };
    DOCA_SUCCESS
}

pub unsafe fn doca_pe_request_notification(pe: *const doca_pe) -> doca_error_t {
    unsafe {
        (*pe).armed.set(true);
        // a completion may already be queued; fire immediately so the edge
        // is not lost between arm and wait
        if !(*pe).queue.borrow().is_empty() {
            signal_efd((*pe).efd);
        }
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_pe_clear_notification(
    pe: *const doca_pe,
    _handle: doca_event_handle_t,
) -> doca_error_t {
    unsafe {
        (*pe).armed.set(false);
        let mut counter = 0u64;
        libc::read(
            (*pe).efd,
            (&mut counter) as *mut u64 as *mut c_void,
            std::mem::size_of::<u64>(),
        );
    }
    DOCA_SUCCESS
}

/// Runs at most one queued completion. Returns 1 if one ran.
pub unsafe fn doca_pe_progress(pe: *const doca_pe) -> u8 {
    let next = unsafe { (*pe).queue.borrow_mut().pop_front() };
    match next {
        Some(completion) => {
            completion();
            1
        }
        None => 0,
    }
}

pub unsafe fn doca_pe_get_num_inflight_tasks(
    pe: *const doca_pe,
    num: *mut usize,
) -> doca_error_t {
    unsafe { *num = (*pe).inflight.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_pe_connect_ctx(pe: *mut doca_pe, ctx: *mut doca_ctx) -> doca_error_t {
    if pe.is_null() || ctx.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        if (*ctx).state.get() != DOCA_CTX_STATE_IDLE {
            return DOCA_ERROR_BAD_STATE;
        }
        (*ctx).pe.set(pe);
    }
    DOCA_SUCCESS
}

fn signal_efd(efd: i32) {
    let one: u64 = 1;
    unsafe {
        libc::write(
            efd,
            (&one) as *const u64 as *const c_void,
            std::mem::size_of::<u64>(),
        );
    }
}

pub(crate) unsafe fn pe_enqueue(pe: *mut doca_pe, completion: impl FnOnce() + 'static) {
    if pe.is_null() {
        return;
    }
    unsafe {
        (*pe).queue.borrow_mut().push_back(Box::new(completion));
        if (*pe).armed.get() {
            signal_efd((*pe).efd);
        }
    }
}

// ── context base ────────────────────────────────────────────

#[derive(Clone, Copy, PartialEq, Eq)]
pub(crate) enum CtxKind {
    Plain,
    SyncEvent,
    ComchServer,
    ComchClient,
    ComchConsumer,
    ComchProducer,
    Rdma,
    EthRxq,
    EthTxq,
    PciDev,
}

/// Common head of every emulated context type. Typed contexts embed this as
/// their first field so `as_ctx` casts are address-preserving, like the C
/// containers they model.
#[repr(C)]
pub struct doca_ctx {
    pub(crate) kind: CtxKind,
    pub(crate) state: Cell<doca_ctx_states>,
    pub(crate) user_data: Cell<doca_data>,
    pub(crate) state_cb: Cell<Option<doca_ctx_state_changed_callback_t>>,
    pub(crate) pe: Cell<*mut doca_pe>,
    pub(crate) inflight: Cell<usize>,
}

impl doca_ctx {
    pub(crate) fn new(kind: CtxKind) -> Self {
        doca_ctx {
            kind,
            state: Cell::new(DOCA_CTX_STATE_IDLE),
            user_data: Cell::new(doca_data::null()),
            state_cb: Cell::new(None),
            pe: Cell::new(std::ptr::null_mut()),
            inflight: Cell::new(0),
        }
    }
}

/// Applies a state transition and fires the registered state callback.
///
/// The callback may destroy the context on the transition to idle, so the
/// context must not be touched after the callback returns.
pub(crate) unsafe fn ctx_set_state(ctx: *mut doca_ctx, next: doca_ctx_states) {
    unsafe {
        let prev = (*ctx).state.replace(next);
        let cb = (*ctx).state_cb.get();
        let user_data = (*ctx).user_data.get();
        if let Some(cb) = cb {
            cb(user_data, ctx, prev, next);
        }
    }
}

pub unsafe fn doca_ctx_set_user_data(ctx: *mut doca_ctx, user_data: doca_data) -> doca_error_t {
    unsafe { (*ctx).user_data.set(user_data) };
    DOCA_SUCCESS
}

pub unsafe fn doca_ctx_get_user_data(
    ctx: *const doca_ctx,
    user_data: *mut doca_data,
) -> doca_error_t {
    unsafe { *user_data = (*ctx).user_data.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_ctx_set_state_changed_cb(
    ctx: *mut doca_ctx,
    cb: doca_ctx_state_changed_callback_t,
) -> doca_error_t {
    unsafe { (*ctx).state_cb.set(Some(cb)) };
    DOCA_SUCCESS
}

pub unsafe fn doca_ctx_get_state(
    ctx: *const doca_ctx,
    state: *mut doca_ctx_states,
) -> doca_error_t {
    unsafe { *state = (*ctx).state.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_ctx_get_num_inflight_tasks(
    ctx: *const doca_ctx,
    num: *mut usize,
) -> doca_error_t {
    unsafe { *num = (*ctx).inflight.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_ctx_start(ctx: *mut doca_ctx) -> doca_error_t {
    if ctx.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        if (*ctx).state.get() != DOCA_CTX_STATE_IDLE {
            return DOCA_ERROR_BAD_STATE;
        }
        if (*ctx).pe.get().is_null() {
            return DOCA_ERROR_BAD_STATE;
        }

        let pre_start = match (*ctx).kind {
            CtxKind::ComchClient => comch::client_pre_start(ctx),
            _ => DOCA_SUCCESS,
        };
        if pre_start != DOCA_SUCCESS {
            return pre_start;
        }

        // sync events reach running synchronously; every other context takes
        // the asynchronous path through the completion queue
        if (*ctx).kind == CtxKind::SyncEvent {
            ctx_set_state(ctx, DOCA_CTX_STATE_STARTING);
            ctx_set_state(ctx, DOCA_CTX_STATE_RUNNING);
            return DOCA_SUCCESS;
        }

        ctx_set_state(ctx, DOCA_CTX_STATE_STARTING);
        let pe = (*ctx).pe.get();
        pe_enqueue(pe, move || unsafe {
            // a stop issued while the start was still queued wins; the
            // per-kind hook runs first so whatever the running state
            // implies (a client's connection, a queue's wire attachment)
            // already exists when the state callback fires
            if (*ctx).state.get() == DOCA_CTX_STATE_STARTING {
                ctx_on_running(ctx);
                ctx_set_state(ctx, DOCA_CTX_STATE_RUNNING);
            }
        });
        DOCA_ERROR_IN_PROGRESS
    }
}

unsafe fn ctx_on_running(ctx: *mut doca_ctx) {
    unsafe {
        match (*ctx).kind {
            CtxKind::ComchServer => comch::server_on_running(ctx),
            CtxKind::ComchClient => comch::client_on_running(ctx),
            CtxKind::ComchConsumer => comch::consumer_on_running(ctx),
            CtxKind::ComchProducer => comch::producer_on_running(ctx),
            CtxKind::EthRxq => eth::rxq_on_running(ctx),
            _ => {}
        }
    }
}

pub unsafe fn doca_ctx_stop(ctx: *mut doca_ctx) -> doca_error_t {
    if ctx.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        match (*ctx).state.get() {
            DOCA_CTX_STATE_RUNNING | DOCA_CTX_STATE_STARTING => {}
            DOCA_CTX_STATE_STOPPING => return DOCA_ERROR_IN_PROGRESS,
            _ => return DOCA_ERROR_BAD_STATE,
        }

        // flush hooks run before the stopping transition so pending task
        // completions are queued ahead of the idle transition
        match (*ctx).kind {
            CtxKind::ComchClient => comch::client_on_stop(ctx),
            CtxKind::ComchServer => comch::server_on_stop(ctx),
            CtxKind::ComchConsumer => comch::consumer_on_stop(ctx),
            CtxKind::ComchProducer => comch::producer_on_stop(ctx),
            CtxKind::Rdma => rdma::rdma_on_stop(ctx),
            CtxKind::EthRxq => eth::rxq_on_stop(ctx),
            CtxKind::SyncEvent => sync_event::sync_event_on_stop(ctx),
            _ => {}
        }

        ctx_set_state(ctx, DOCA_CTX_STATE_STOPPING);
        let pe = (*ctx).pe.get();
        pe_enqueue(pe, move || unsafe {
            ctx_set_state(ctx, DOCA_CTX_STATE_IDLE);
        });
        DOCA_ERROR_IN_PROGRESS
    }
}

// ── tasks ───────────────────────────────────────────────────

/// Common head of every typed task, embedded as the first field.
#[repr(C)]
pub struct doca_task {
    pub(crate) user_data: Cell<doca_data>,
    pub(crate) status: Cell<doca_error_t>,
    pub(crate) ctx: *mut doca_ctx,
    pub(crate) exec: RefCell<Option<Box<dyn FnOnce()>>>,
    pub(crate) free: unsafe fn(*mut doca_task),
}

impl doca_task {
    pub(crate) fn new(ctx: *mut doca_ctx, free: unsafe fn(*mut doca_task)) -> Self {
        doca_task {
            user_data: Cell::new(doca_data::null()),
            status: Cell::new(DOCA_ERROR_IN_PROGRESS),
            ctx,
            exec: RefCell::new(None),
            free,
        }
    }
}

pub(crate) unsafe fn task_free_as<T>(task: *mut doca_task) {
    drop(unsafe { Box::from_raw(task as *mut T) });
}

pub unsafe fn doca_task_submit(task: *mut doca_task) -> doca_error_t {
    if task.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    if testing::take_submit_again() {
        return DOCA_ERROR_AGAIN;
    }
    unsafe {
        let exec = (*task).exec.borrow_mut().take();
        let Some(exec) = exec else {
            return DOCA_ERROR_BAD_STATE;
        };

        let ctx = (*task).ctx;
        (*ctx).inflight.set((*ctx).inflight.get() + 1);
        let pe = (*ctx).pe.get();
        if !pe.is_null() {
            (*pe).inflight.set((*pe).inflight.get() + 1);
        }
        exec();
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_task_free(task: *mut doca_task) {
    if !task.is_null() {
        unsafe { ((*task).free)(task) };
    }
}

pub unsafe fn doca_task_get_status(task: *const doca_task) -> doca_error_t {
    unsafe { (*task).status.get() }
}

pub unsafe fn doca_task_set_user_data(task: *mut doca_task, user_data: doca_data) -> doca_error_t {
    unsafe { (*task).user_data.set(user_data) };
    DOCA_SUCCESS
}

pub unsafe fn doca_task_get_user_data(task: *const doca_task) -> doca_data {
    unsafe { (*task).user_data.get() }
}

/// Queues the typed completion callback for a finished task on its context's
/// engine. `status` must already be stored in the task.
pub(crate) unsafe fn complete_task<T: 'static>(
    typed: *mut T,
    base: *mut doca_task,
    success_cb: Option<unsafe extern "C" fn(*mut T, doca_data, doca_data)>,
    error_cb: Option<unsafe extern "C" fn(*mut T, doca_data, doca_data)>,
) {
    unsafe {
        let ctx = (*base).ctx;
        let pe = (*ctx).pe.get();
        pe_enqueue(pe, move || unsafe {
            (*ctx).inflight.set((*ctx).inflight.get() - 1);
            if !pe.is_null() {
                (*pe).inflight.set((*pe).inflight.get() - 1);
            }
            let status = (*base).status.get();
            let task_user_data = (*base).user_data.get();
            let ctx_user_data = (*ctx).user_data.get();
            let cb = if status == DOCA_SUCCESS { success_cb } else { error_cb };
            if let Some(cb) = cb {
                cb(typed, task_user_data, ctx_user_data);
            }
        });
    }
}

/// Per-task-family completion configuration registered on a context before
/// start.
pub(crate) struct TaskConf<T> {
    pub(crate) success: Cell<Option<unsafe extern "C" fn(*mut T, doca_data, doca_data)>>,
    pub(crate) error: Cell<Option<unsafe extern "C" fn(*mut T, doca_data, doca_data)>>,
    pub(crate) num_tasks: Cell<u32>,
}

impl<T> TaskConf<T> {
    pub(crate) fn new() -> Self {
        TaskConf {
            success: Cell::new(None),
            error: Cell::new(None),
            num_tasks: Cell::new(0),
        }
    }

    pub(crate) fn set(
        &self,
        success: unsafe extern "C" fn(*mut T, doca_data, doca_data),
        error: unsafe extern "C" fn(*mut T, doca_data, doca_data),
        num_tasks: u32,
    ) {
        self.success.set(Some(success));
        self.error.set(Some(error));
        self.num_tasks.set(num_tasks);
    }

    pub(crate) unsafe fn complete(&self, typed: *mut T, base: *mut doca_task)
    where
        T: 'static,
    {
        unsafe { complete_task(typed, base, self.success.get(), self.error.get()) };
    }
}

// ── test hooks ──────────────────────────────────────────────

pub(crate) mod testing {
    use std::cell::Cell;

    thread_local! {
        static SUBMIT_AGAIN: Cell<u32> = const { Cell::new(0) };
    }

    /// Makes the next `count` task submissions on this thread report
    /// back-pressure (`DOCA_ERROR_AGAIN`).
    pub fn inject_submit_again(count: u32) {
        SUBMIT_AGAIN.with(|c| c.set(count));
    }

    pub(crate) fn take_submit_again() -> bool {
        SUBMIT_AGAIN.with(|c| {
            let n = c.get();
            if n > 0 {
                c.set(n - 1);
                true
            } else {
                false
            }
        })
    }

    pub use crate::emu::devemu::host_region_slice as devemu_host_region;
    pub use crate::emu::eth::inject_packet as eth_inject_packet;
}
