//! Ethernet Rx/Tx queues over an in-process loopback wire.
//!
//! A Tx send is broadcast to every running Rx queue on the thread, which is
//! how a virtual device pair behaves with no switch in between.

use super::*;
use std::cell::{Cell, RefCell};
use std::collections::VecDeque;

pub type doca_eth_rxq_type = u32;
pub const DOCA_ETH_RXQ_TYPE_CYCLIC: doca_eth_rxq_type = 0;
pub const DOCA_ETH_RXQ_TYPE_REGULAR: doca_eth_rxq_type = 1;
pub const DOCA_ETH_RXQ_TYPE_MANAGED_MEMPOOL: doca_eth_rxq_type = 2;

pub type doca_eth_txq_type = u32;
pub const DOCA_ETH_TXQ_TYPE_REGULAR: doca_eth_txq_type = 0;

pub type doca_event_batch_events_number = u32;
pub const DOCA_EVENT_BATCH_EVENTS_NUMBER_1: doca_event_batch_events_number = 1;
pub const DOCA_EVENT_BATCH_EVENTS_NUMBER_32: doca_event_batch_events_number = 32;
pub const DOCA_EVENT_BATCH_EVENTS_NUMBER_128: doca_event_batch_events_number = 128;

pub struct doca_eth_rxq_event_managed_recv {
    _opaque: [u8; 0],
}
pub struct doca_eth_rxq_event_batch_managed_recv {
    _opaque: [u8; 0],
}

pub type doca_eth_rxq_event_managed_recv_cb_t =
    unsafe extern "C" fn(*mut doca_eth_rxq_event_managed_recv, *mut doca_buf, doca_data);
pub type doca_eth_rxq_event_batch_managed_recv_cb_t = unsafe extern "C" fn(
    *mut doca_eth_rxq_event_batch_managed_recv,
    u16,
    doca_data,
    doca_error_t,
    *mut *mut doca_buf,
);

thread_local! {
    static RUNNING_RXQS: RefCell<Vec<*mut doca_eth_rxq>> = RefCell::new(Vec::new());
    static NEXT_FLOW_QUEUE_ID: Cell<u16> = const { Cell::new(1) };
}

#[repr(C)]
pub struct doca_eth_rxq {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    max_burst_size: u32,
    max_packet_size: u32,
    rxq_type: Cell<doca_eth_rxq_type>,
    pkt_mmap: Cell<*mut doca_mmap>,
    pkt_offset: Cell<u32>,
    pkt_size: Cell<u32>,
    alloc_cursor: Cell<u32>,
    flow_queue_id: Cell<u16>,
    recv_conf: TaskConf<doca_eth_rxq_task_recv>,
    pending_recv: RefCell<VecDeque<*mut doca_eth_rxq_task_recv>>,
    managed_cb: Cell<Option<doca_eth_rxq_event_managed_recv_cb_t>>,
    managed_user_data: Cell<doca_data>,
    batch_cb: Cell<Option<doca_eth_rxq_event_batch_managed_recv_cb_t>>,
    batch_user_data: Cell<doca_data>,
}

#[repr(C)]
pub struct doca_eth_rxq_task_recv {
    pub(crate) task: doca_task,
    dst: *mut doca_buf,
}

pub type doca_eth_rxq_task_recv_completion_cb_t =
    unsafe extern "C" fn(*mut doca_eth_rxq_task_recv, doca_data, doca_data);

pub unsafe fn doca_eth_rxq_create(
    dev: *mut doca_dev,
    max_burst_size: u32,
    max_packet_size: u32,
    rxq: *mut *mut doca_eth_rxq,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_eth_rxq {
        base: doca_ctx::new(CtxKind::EthRxq),
        dev,
        max_burst_size,
        max_packet_size,
        rxq_type: Cell::new(DOCA_ETH_RXQ_TYPE_REGULAR),
        pkt_mmap: Cell::new(std::ptr::null_mut()),
        pkt_offset: Cell::new(0),
        pkt_size: Cell::new(0),
        alloc_cursor: Cell::new(0),
        flow_queue_id: Cell::new(0),
        recv_conf: TaskConf::new(),
        pending_recv: RefCell::new(VecDeque::new()),
        managed_cb: Cell::new(None),
        managed_user_data: Cell::new(doca_data::null()),
        batch_cb: Cell::new(None),
        batch_user_data: Cell::new(doca_data::null()),
    });
    unsafe { *rxq = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_destroy(rxq: *mut doca_eth_rxq) -> doca_error_t {
    if rxq.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    RUNNING_RXQS.with(|list| list.borrow_mut().retain(|&q| q != rxq));
    drop(unsafe { Box::from_raw(rxq) });
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_as_doca_ctx(rxq: *mut doca_eth_rxq) -> *mut doca_ctx {
    rxq as *mut doca_ctx
}

pub unsafe fn doca_eth_rxq_set_type(
    rxq: *mut doca_eth_rxq,
    rxq_type: doca_eth_rxq_type,
) -> doca_error_t {
    unsafe { (*rxq).rxq_type.set(rxq_type) };
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_set_pkt_buf(
    rxq: *mut doca_eth_rxq,
    mmap: *mut doca_mmap,
    offset: u32,
    size: u32,
) -> doca_error_t {
    unsafe {
        (*rxq).pkt_mmap.set(mmap);
        (*rxq).pkt_offset.set(offset);
        (*rxq).pkt_size.set(size);
    }
    DOCA_SUCCESS
}

macro_rules! rxq_setter {
    ($fn_name:ident, $ty:ty) => {
        pub unsafe fn $fn_name(_rxq: *mut doca_eth_rxq, _value: $ty) -> doca_error_t {
            DOCA_SUCCESS
        }
    };
}

rxq_setter!(doca_eth_rxq_set_metadata_num, u8);
rxq_setter!(doca_eth_rxq_set_flow_tag, u8);
rxq_setter!(doca_eth_rxq_set_rx_hash, u8);
rxq_setter!(doca_eth_rxq_set_packet_headroom, u16);
rxq_setter!(doca_eth_rxq_set_packet_tailroom, u16);
rxq_setter!(doca_eth_rxq_set_timestamp, u8);
rxq_setter!(doca_eth_rxq_set_max_recv_buf_list_len, u32);

pub unsafe fn doca_eth_rxq_get_flow_queue_id(
    rxq: *const doca_eth_rxq,
    queue_id: *mut u16,
) -> doca_error_t {
    unsafe { *queue_id = (*rxq).flow_queue_id.get() };
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_event_managed_recv_register(
    rxq: *mut doca_eth_rxq,
    user_data: doca_data,
    cb: doca_eth_rxq_event_managed_recv_cb_t,
) -> doca_error_t {
    unsafe {
        (*rxq).managed_cb.set(Some(cb));
        (*rxq).managed_user_data.set(user_data);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_event_batch_managed_recv_register(
    rxq: *mut doca_eth_rxq,
    _events_number_max: doca_event_batch_events_number,
    _events_number_min: doca_event_batch_events_number,
    user_data: doca_data,
    cb: doca_eth_rxq_event_batch_managed_recv_cb_t,
) -> doca_error_t {
    unsafe {
        (*rxq).batch_cb.set(Some(cb));
        (*rxq).batch_user_data.set(user_data);
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_task_recv_set_conf(
    rxq: *mut doca_eth_rxq,
    success_cb: doca_eth_rxq_task_recv_completion_cb_t,
    error_cb: doca_eth_rxq_task_recv_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*rxq).recv_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_task_recv_alloc_init(
    rxq: *mut doca_eth_rxq,
    dst: *mut doca_buf,
    user_data: doca_data,
    task: *mut *mut doca_eth_rxq_task_recv,
) -> doca_error_t {
    unsafe {
        if (*rxq).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_eth_rxq_task_recv {
            task: doca_task::new(rxq as *mut doca_ctx, task_free_as::<doca_eth_rxq_task_recv>),
            dst,
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            (*rxq).pending_recv.borrow_mut().push_back(typed);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_rxq_task_recv_as_task(task: *mut doca_eth_rxq_task_recv) -> *mut doca_task {
    task as *mut doca_task
}

pub(crate) unsafe fn rxq_on_running(ctx: *mut doca_ctx) {
    let rxq = ctx as *mut doca_eth_rxq;
    unsafe {
        let id = NEXT_FLOW_QUEUE_ID.with(|c| {
            let id = c.get();
            c.set(id + 1);
            id
        });
        (*rxq).flow_queue_id.set(id);
    }
    RUNNING_RXQS.with(|list| list.borrow_mut().push(rxq));
}

pub(crate) unsafe fn rxq_on_stop(ctx: *mut doca_ctx) {
    let rxq = ctx as *mut doca_eth_rxq;
    RUNNING_RXQS.with(|list| list.borrow_mut().retain(|&q| q != rxq));
    unsafe {
        let pending = std::mem::take(&mut *(*rxq).pending_recv.borrow_mut());
        for typed in pending {
            (*typed).task.status.set(DOCA_ERROR_NOT_CONNECTED);
            (*rxq).recv_conf.complete(typed, &raw mut (*typed).task);
        }
    }
}

/// Allocates a packet buffer from the queue's mempool region. Managed
/// buffers are not inventory-backed; the refcount drop frees them directly.
unsafe fn rxq_alloc_pkt_buf(rxq: *mut doca_eth_rxq, bytes: &[u8]) -> Option<*mut doca_buf> {
    unsafe {
        let mmap = (*rxq).pkt_mmap.get();
        if mmap.is_null() {
            return None;
        }
        let region_size = (*rxq).pkt_size.get();
        let slot = (*rxq).max_packet_size.max(1);
        if region_size < slot || bytes.len() > slot as usize {
            return None;
        }
        let slots = region_size / slot;
        let cursor = (*rxq).alloc_cursor.get();
        (*rxq).alloc_cursor.set((cursor + 1) % slots);
        let offset = (*rxq).pkt_offset.get() + cursor * slot;
        let head = (*mmap).base.get().add(offset as usize);
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), head, bytes.len());

        Some(doca_buf::unpooled(head, slot as usize, bytes.len()))
    }
}

pub(crate) unsafe fn deliver_packet(bytes: &[u8]) {
    let rxqs: Vec<*mut doca_eth_rxq> = RUNNING_RXQS.with(|list| list.borrow().clone());
    for rxq in rxqs {
        unsafe {
            match (*rxq).rxq_type.get() {
                DOCA_ETH_RXQ_TYPE_MANAGED_MEMPOOL => {
                    if let Some(cb) = (*rxq).batch_cb.get() {
                        let Some(buf) = rxq_alloc_pkt_buf(rxq, bytes) else {
                            continue;
                        };
                        let user_data = (*rxq).batch_user_data.get();
                        pe_enqueue((*rxq).base.pe.get(), move || unsafe {
                            let mut array = [buf];
                            cb(
                                std::ptr::null_mut(),
                                1,
                                user_data,
                                DOCA_SUCCESS,
                                array.as_mut_ptr(),
                            );
                        });
                    } else if let Some(cb) = (*rxq).managed_cb.get() {
                        let Some(buf) = rxq_alloc_pkt_buf(rxq, bytes) else {
                            continue;
                        };
                        let user_data = (*rxq).managed_user_data.get();
                        pe_enqueue((*rxq).base.pe.get(), move || unsafe {
                            cb(std::ptr::null_mut(), buf, user_data);
                        });
                    }
                }
                _ => {
                    let next = (*rxq).pending_recv.borrow_mut().pop_front();
                    if let Some(typed) = next {
                        let status = (*(*typed).dst).write_at_data(bytes);
                        (*typed).task.status.set(status);
                        (*rxq).recv_conf.complete(typed, &raw mut (*typed).task);
                    }
                }
            }
        }
    }
}

/// Feeds a raw frame into every running receive queue, as if it arrived on
/// the wire.
pub fn inject_packet(bytes: &[u8]) {
    unsafe { deliver_packet(bytes) };
}

// ── Tx ──────────────────────────────────────────────────────

#[repr(C)]
pub struct doca_eth_txq {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    max_burst_size: u32,
    send_conf: TaskConf<doca_eth_txq_task_send>,
    lso_conf: TaskConf<doca_eth_txq_task_lso_send>,
}

#[repr(C)]
pub struct doca_eth_txq_task_send {
    pub(crate) task: doca_task,
    pkt: *mut doca_buf,
}

#[repr(C)]
pub struct doca_eth_txq_task_lso_send {
    pub(crate) task: doca_task,
    payload: *mut doca_buf,
    // header chain flattened at alloc time; the caller's gather list does
    // not have to survive submission retries
    header_bytes: Vec<u8>,
}

pub type doca_eth_txq_task_send_completion_cb_t =
    unsafe extern "C" fn(*mut doca_eth_txq_task_send, doca_data, doca_data);
pub type doca_eth_txq_task_lso_send_completion_cb_t =
    unsafe extern "C" fn(*mut doca_eth_txq_task_lso_send, doca_data, doca_data);

pub unsafe fn doca_eth_txq_create(
    dev: *mut doca_dev,
    max_burst_size: u32,
    txq: *mut *mut doca_eth_txq,
) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_eth_txq {
        base: doca_ctx::new(CtxKind::EthTxq),
        dev,
        max_burst_size,
        send_conf: TaskConf::new(),
        lso_conf: TaskConf::new(),
    });
    unsafe { *txq = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_txq_destroy(txq: *mut doca_eth_txq) -> doca_error_t {
    if txq.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(txq) });
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_txq_as_doca_ctx(txq: *mut doca_eth_txq) -> *mut doca_ctx {
    txq as *mut doca_ctx
}

macro_rules! txq_setter {
    ($fn_name:ident, $ty:ty) => {
        pub unsafe fn $fn_name(_txq: *mut doca_eth_txq, _value: $ty) -> doca_error_t {
            DOCA_SUCCESS
        }
    };
}

txq_setter!(doca_eth_txq_set_type, doca_eth_txq_type);
txq_setter!(doca_eth_txq_set_max_send_buf_list_len, u32);
txq_setter!(doca_eth_txq_set_metadata_num, u8);
txq_setter!(doca_eth_txq_set_mss, u16);
txq_setter!(doca_eth_txq_set_max_lso_header_size, u16);
txq_setter!(doca_eth_txq_set_l3_chksum_offload, u8);
txq_setter!(doca_eth_txq_set_l4_chksum_offload, u8);
txq_setter!(doca_eth_txq_set_wait_on_time_offload, u8);

pub unsafe fn doca_eth_txq_task_send_set_conf(
    txq: *mut doca_eth_txq,
    success_cb: doca_eth_txq_task_send_completion_cb_t,
    error_cb: doca_eth_txq_task_send_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*txq).send_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_txq_task_lso_send_set_conf(
    txq: *mut doca_eth_txq,
    success_cb: doca_eth_txq_task_lso_send_completion_cb_t,
    error_cb: doca_eth_txq_task_lso_send_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*txq).lso_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_txq_task_send_alloc_init(
    txq: *mut doca_eth_txq,
    pkt: *mut doca_buf,
    user_data: doca_data,
    task: *mut *mut doca_eth_txq_task_send,
) -> doca_error_t {
    unsafe {
        if (*txq).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_eth_txq_task_send {
            task: doca_task::new(txq as *mut doca_ctx, task_free_as::<doca_eth_txq_task_send>),
            pkt,
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let bytes = (*(*typed).pkt).data_slice().to_vec();
            deliver_packet(&bytes);
            (*typed).task.status.set(DOCA_SUCCESS);
            (*txq).send_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_txq_task_lso_send_alloc_init(
    txq: *mut doca_eth_txq,
    payload: *mut doca_buf,
    headers: *mut doca_gather_list,
    user_data: doca_data,
    task: *mut *mut doca_eth_txq_task_lso_send,
) -> doca_error_t {
    unsafe {
        if (*txq).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let mut header_bytes = Vec::new();
        let mut header = headers;
        while !header.is_null() {
            let part = std::slice::from_raw_parts((*header).addr as *const u8, (*header).len);
            header_bytes.extend_from_slice(part);
            header = (*header).next;
        }
        let typed = Box::into_raw(Box::new(doca_eth_txq_task_lso_send {
            task: doca_task::new(
                txq as *mut doca_ctx,
                task_free_as::<doca_eth_txq_task_lso_send>,
            ),
            payload,
            header_bytes,
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let mut frame = (*typed).header_bytes.clone();
            frame.extend_from_slice((*(*typed).payload).data_slice());
            deliver_packet(&frame);
            (*typed).task.status.set(DOCA_SUCCESS);
            (*txq).lso_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_eth_txq_task_send_as_task(task: *mut doca_eth_txq_task_send) -> *mut doca_task {
    task as *mut doca_task
}

pub unsafe fn doca_eth_txq_task_lso_send_as_task(
    task: *mut doca_eth_txq_task_lso_send,
) -> *mut doca_task {
    task as *mut doca_task
}
