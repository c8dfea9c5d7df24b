//! Sync events: shared 64-bit cells with masked-wait completion.

use super::*;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

pub(crate) struct SyncCell {
    value: Cell<u64>,
    waiters: RefCell<Vec<Waiter>>,
}

struct Waiter {
    wait_value: u64,
    mask: u64,
    negated: bool,
    complete: Box<dyn FnOnce()>,
}

impl SyncCell {
    fn new() -> Rc<Self> {
        Rc::new(SyncCell {
            value: Cell::new(0),
            waiters: RefCell::new(Vec::new()),
        })
    }

    pub(crate) fn get(&self) -> u64 {
        self.value.get()
    }

    pub(crate) fn set(&self, value: u64) {
        self.value.set(value);
        self.check_waiters();
    }

    pub(crate) fn fetch_add(&self, add: u64) -> u64 {
        let old = self.value.get();
        self.value.set(old.wrapping_add(add));
        self.check_waiters();
        old
    }

    fn satisfied(&self, waiter: &Waiter) -> bool {
        let masked = self.value.get() & waiter.mask;
        (masked == waiter.wait_value & waiter.mask) != waiter.negated
    }

    fn check_waiters(&self) {
        let mut pending = self.waiters.borrow_mut();
        let mut remaining = Vec::with_capacity(pending.len());
        for waiter in pending.drain(..) {
            if self.satisfied(&waiter) {
                (waiter.complete)();
            } else {
                remaining.push(waiter);
            }
        }
        *pending = remaining;
    }
}

thread_local! {
    static EXPORTED_CELLS: RefCell<HashMap<u64, Rc<SyncCell>>> = RefCell::new(HashMap::new());
    static NEXT_EXPORT_ID: Cell<u64> = const { Cell::new(1) };
}

const SYNC_EXPORT_MAGIC: u64 = 0x444f_4341_5345_5631;

fn export_cell(cell: &Rc<SyncCell>) -> Box<[u8]> {
    let id = NEXT_EXPORT_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    });
    EXPORTED_CELLS.with(|map| map.borrow_mut().insert(id, cell.clone()));
    let mut blob = Vec::with_capacity(16);
    blob.extend_from_slice(&SYNC_EXPORT_MAGIC.to_ne_bytes());
    blob.extend_from_slice(&id.to_ne_bytes());
    blob.into_boxed_slice()
}

fn import_cell(data: *const u8, len: usize) -> Option<Rc<SyncCell>> {
    if data.is_null() || len < 16 {
        return None;
    }
    let blob = unsafe { std::slice::from_raw_parts(data, 16) };
    let magic = u64::from_ne_bytes(blob[..8].try_into().unwrap());
    if magic != SYNC_EXPORT_MAGIC {
        return None;
    }
    let id = u64::from_ne_bytes(blob[8..].try_into().unwrap());
    EXPORTED_CELLS.with(|map| map.borrow().get(&id).cloned())
}

// ── context ─────────────────────────────────────────────────

#[repr(C)]
pub struct doca_sync_event {
    pub(crate) base: doca_ctx,
    pub(crate) cell: Rc<SyncCell>,
    get_conf: TaskConf<doca_sync_event_task_get>,
    notify_add_conf: TaskConf<doca_sync_event_task_notify_add>,
    notify_set_conf: TaskConf<doca_sync_event_task_notify_set>,
    wait_eq_conf: TaskConf<doca_sync_event_task_wait_eq>,
    wait_neq_conf: TaskConf<doca_sync_event_task_wait_neq>,
}

fn new_sync_event(cell: Rc<SyncCell>) -> Box<doca_sync_event> {
    Box::new(doca_sync_event {
        base: doca_ctx::new(CtxKind::SyncEvent),
        cell,
        get_conf: TaskConf::new(),
        notify_add_conf: TaskConf::new(),
        notify_set_conf: TaskConf::new(),
        wait_eq_conf: TaskConf::new(),
        wait_neq_conf: TaskConf::new(),
    })
}

pub unsafe fn doca_sync_event_create(event: *mut *mut doca_sync_event) -> doca_error_t {
    unsafe { *event = Box::into_raw(new_sync_event(SyncCell::new())) };
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_create_from_export(
    dev: *mut doca_dev,
    data: *const u8,
    len: usize,
    event: *mut *mut doca_sync_event,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let Some(cell) = import_cell(data, len) else {
        return DOCA_ERROR_INVALID_VALUE;
    };
    unsafe { *event = Box::into_raw(new_sync_event(cell)) };
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_destroy(event: *mut doca_sync_event) -> doca_error_t {
    if event.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(event) });
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_as_ctx(event: *mut doca_sync_event) -> *mut doca_ctx {
    event as *mut doca_ctx
}

pub(crate) unsafe fn sync_event_on_stop(ctx: *mut doca_ctx) {
    let event = ctx as *mut doca_sync_event;
    // flush waiters that can no longer be satisfied
    unsafe {
        let waiters = std::mem::take(&mut *(&(*event).cell).waiters.borrow_mut());
        drop(waiters);
    }
}

// location registration: locations have no behavioral difference in the
// emulation, the cell is reachable from every side of the process
pub unsafe fn doca_sync_event_add_publisher_location_dev(
    _event: *mut doca_sync_event,
    dev: *mut doca_dev,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_add_publisher_location_remote_pci(
    _event: *mut doca_sync_event,
) -> doca_error_t {
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_add_publisher_location_remote_net(
    _event: *mut doca_sync_event,
) -> doca_error_t {
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_add_subscriber_location_dev(
    _event: *mut doca_sync_event,
    dev: *mut doca_dev,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_add_subscriber_location_remote_pci(
    _event: *mut doca_sync_event,
) -> doca_error_t {
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_export_to_remote_net(
    event: *mut doca_sync_event,
    data: *mut *const u8,
    len: *mut usize,
) -> doca_error_t {
    unsafe {
        let blob = export_cell(&(*event).cell);
        *len = blob.len();
        *data = Box::into_raw(blob) as *const u8;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_export_to_remote_pci(
    event: *mut doca_sync_event,
    dev: *mut doca_dev,
    data: *mut *const u8,
    len: *mut usize,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe { doca_sync_event_export_to_remote_net(event, data, len) }
}

// ── remote-net handle ───────────────────────────────────────

pub struct doca_sync_event_remote_net {
    pub(crate) cell: Rc<SyncCell>,
}

pub unsafe fn doca_sync_event_remote_net_create_from_export(
    dev: *mut doca_dev,
    data: *const u8,
    len: usize,
    remote: *mut *mut doca_sync_event_remote_net,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let Some(cell) = import_cell(data, len) else {
        return DOCA_ERROR_INVALID_VALUE;
    };
    unsafe { *remote = Box::into_raw(Box::new(doca_sync_event_remote_net { cell })) };
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_remote_net_destroy(
    remote: *mut doca_sync_event_remote_net,
) -> doca_error_t {
    if remote.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(remote) });
    DOCA_SUCCESS
}

// ── tasks ───────────────────────────────────────────────────

#[repr(C)]
pub struct doca_sync_event_task_get {
    pub(crate) task: doca_task,
    value: Cell<u64>,
}

#[repr(C)]
pub struct doca_sync_event_task_notify_add {
    pub(crate) task: doca_task,
    inc_value: u64,
    fetched: Cell<u64>,
}

#[repr(C)]
pub struct doca_sync_event_task_notify_set {
    pub(crate) task: doca_task,
    set_value: u64,
}

#[repr(C)]
pub struct doca_sync_event_task_wait_eq {
    pub(crate) task: doca_task,
    wait_value: u64,
    mask: u64,
}

#[repr(C)]
pub struct doca_sync_event_task_wait_neq {
    pub(crate) task: doca_task,
    wait_value: u64,
    mask: u64,
}

macro_rules! sync_event_cb_type {
    ($cb:ident, $task:ident) => {
        pub type $cb = unsafe extern "C" fn(*mut $task, doca_data, doca_data);
    };
}

sync_event_cb_type!(doca_sync_event_task_get_completion_cb_t, doca_sync_event_task_get);
sync_event_cb_type!(
    doca_sync_event_task_notify_add_completion_cb_t,
    doca_sync_event_task_notify_add
);
sync_event_cb_type!(
    doca_sync_event_task_notify_set_completion_cb_t,
    doca_sync_event_task_notify_set
);
sync_event_cb_type!(doca_sync_event_task_wait_eq_completion_cb_t, doca_sync_event_task_wait_eq);
sync_event_cb_type!(
    doca_sync_event_task_wait_neq_completion_cb_t,
    doca_sync_event_task_wait_neq
);

macro_rules! sync_event_set_conf {
    ($fn_name:ident, $conf:ident, $cb:ident) => {
        pub unsafe fn $fn_name(
            event: *mut doca_sync_event,
            success_cb: $cb,
            error_cb: $cb,
            num_tasks: u32,
        ) -> doca_error_t {
            unsafe { (*event).$conf.set(success_cb, error_cb, num_tasks) };
            DOCA_SUCCESS
        }
    };
}

sync_event_set_conf!(
    doca_sync_event_task_get_set_conf,
    get_conf,
    doca_sync_event_task_get_completion_cb_t
);
sync_event_set_conf!(
    doca_sync_event_task_notify_add_set_conf,
    notify_add_conf,
    doca_sync_event_task_notify_add_completion_cb_t
);
sync_event_set_conf!(
    doca_sync_event_task_notify_set_set_conf,
    notify_set_conf,
    doca_sync_event_task_notify_set_completion_cb_t
);
sync_event_set_conf!(
    doca_sync_event_task_wait_eq_set_conf,
    wait_eq_conf,
    doca_sync_event_task_wait_eq_completion_cb_t
);
sync_event_set_conf!(
    doca_sync_event_task_wait_neq_set_conf,
    wait_neq_conf,
    doca_sync_event_task_wait_neq_completion_cb_t
);

unsafe fn sync_task_running(event: *mut doca_sync_event) -> bool {
    unsafe { (*event).base.state.get() == DOCA_CTX_STATE_RUNNING }
}

pub unsafe fn doca_sync_event_task_get_alloc_init(
    event: *mut doca_sync_event,
    user_data: doca_data,
    task: *mut *mut doca_sync_event_task_get,
) -> doca_error_t {
    unsafe {
        if !sync_task_running(event) {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_sync_event_task_get {
            task: doca_task::new(
                event as *mut doca_ctx,
                task_free_as::<doca_sync_event_task_get>,
            ),
            value: Cell::new(0),
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            (*typed).value.set((*event).cell.get());
            (*typed).task.status.set(DOCA_SUCCESS);
            (*event).get_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_task_get_get_value(task: *const doca_sync_event_task_get) -> u64 {
    unsafe { (*task).value.get() }
}

pub unsafe fn doca_sync_event_task_notify_add_alloc_init(
    event: *mut doca_sync_event,
    inc_value: u64,
    user_data: doca_data,
    task: *mut *mut doca_sync_event_task_notify_add,
) -> doca_error_t {
    unsafe {
        if !sync_task_running(event) {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_sync_event_task_notify_add {
            task: doca_task::new(
                event as *mut doca_ctx,
                task_free_as::<doca_sync_event_task_notify_add>,
            ),
            inc_value,
            fetched: Cell::new(0),
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let fetched = (*event).cell.fetch_add((*typed).inc_value);
            (*typed).fetched.set(fetched);
            (*typed).task.status.set(DOCA_SUCCESS);
            (*event).notify_add_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_sync_event_task_notify_add_get_fetched(
    task: *const doca_sync_event_task_notify_add,
) -> u64 {
    unsafe { (*task).fetched.get() }
}

pub unsafe fn doca_sync_event_task_notify_set_alloc_init(
    event: *mut doca_sync_event,
    set_value: u64,
    user_data: doca_data,
    task: *mut *mut doca_sync_event_task_notify_set,
) -> doca_error_t {
    unsafe {
        if !sync_task_running(event) {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_sync_event_task_notify_set {
            task: doca_task::new(
                event as *mut doca_ctx,
                task_free_as::<doca_sync_event_task_notify_set>,
            ),
            set_value,
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            (*event).cell.set((*typed).set_value);
            (*typed).task.status.set(DOCA_SUCCESS);
            (*event).notify_set_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

macro_rules! sync_event_wait_alloc_init {
    ($fn_name:ident, $task:ident, $conf:ident, $negated:expr) => {
        pub unsafe fn $fn_name(
            event: *mut doca_sync_event,
            wait_value: u64,
            mask: u64,
            user_data: doca_data,
            task: *mut *mut $task,
        ) -> doca_error_t {
            unsafe {
                if !sync_task_running(event) {
                    return DOCA_ERROR_BAD_STATE;
                }
                let typed = Box::into_raw(Box::new($task {
                    task: doca_task::new(event as *mut doca_ctx, task_free_as::<$task>),
                    wait_value,
                    mask,
                }));
                (*typed).task.user_data.set(user_data);
                *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
                    let complete = Box::new(move || unsafe {
                        (*typed).task.status.set(DOCA_SUCCESS);
                        (*event).$conf.complete(typed, &raw mut (*typed).task);
                    });
                    let waiter = Waiter {
                        wait_value: (*typed).wait_value,
                        mask: (*typed).mask,
                        negated: $negated,
                        complete,
                    };
                    if (*event).cell.satisfied(&waiter) {
                        (waiter.complete)();
                    } else {
                        (&(*event).cell).waiters.borrow_mut().push(waiter);
                    }
                }));
                *task = typed;
            }
            DOCA_SUCCESS
        }
    };
}

sync_event_wait_alloc_init!(
    doca_sync_event_task_wait_eq_alloc_init,
    doca_sync_event_task_wait_eq,
    wait_eq_conf,
    false
);
sync_event_wait_alloc_init!(
    doca_sync_event_task_wait_neq_alloc_init,
    doca_sync_event_task_wait_neq,
    wait_neq_conf,
    true
);

macro_rules! sync_event_as_task {
    ($fn_name:ident, $task:ident) => {
        pub unsafe fn $fn_name(task: *mut $task) -> *mut doca_task {
            task as *mut doca_task
        }
    };
}

sync_event_as_task!(doca_sync_event_task_get_as_task, doca_sync_event_task_get);
sync_event_as_task!(doca_sync_event_task_notify_add_as_task, doca_sync_event_task_notify_add);
sync_event_as_task!(doca_sync_event_task_notify_set_as_task, doca_sync_event_task_notify_set);
sync_event_as_task!(doca_sync_event_task_wait_eq_as_task, doca_sync_event_task_wait_eq);
sync_event_as_task!(doca_sync_event_task_wait_neq_as_task, doca_sync_event_task_wait_neq);
