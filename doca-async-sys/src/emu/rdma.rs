//! RDMA: out-of-band and CM connection establishment plus the verb set.
//!
//! Connections pair up inside the process through blob/port registries;
//! verbs move bytes with plain memory operations. Receives are posted on the
//! context (shared receive queue), not on a connection, matching the SDK.

use super::*;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString, c_char, c_void};

pub type doca_be32_t = u32;

pub type doca_rdma_transport_type = u32;
pub const DOCA_RDMA_TRANSPORT_TYPE_RC: doca_rdma_transport_type = 0;
pub const DOCA_RDMA_TRANSPORT_TYPE_DC: doca_rdma_transport_type = 1;

pub type doca_rdma_addr_type = u32;
pub const DOCA_RDMA_ADDR_TYPE_IPV4: doca_rdma_addr_type = 0;
pub const DOCA_RDMA_ADDR_TYPE_IPV6: doca_rdma_addr_type = 1;
pub const DOCA_RDMA_ADDR_TYPE_GID: doca_rdma_addr_type = 2;

pub type doca_rdma_opcode_t = u32;
pub const DOCA_RDMA_OPCODE_RECV_SEND: doca_rdma_opcode_t = 0;
pub const DOCA_RDMA_OPCODE_RECV_SEND_WITH_IMM: doca_rdma_opcode_t = 1;
pub const DOCA_RDMA_OPCODE_RECV_WRITE_WITH_IMM: doca_rdma_opcode_t = 2;

pub type doca_rdma_connection_request_cb_t =
    unsafe extern "C" fn(*mut doca_rdma_connection, doca_data);
pub type doca_rdma_connection_state_cb_t =
    unsafe extern "C" fn(*mut doca_rdma_connection, doca_data, doca_data);

struct RdmaDelivery {
    bytes: Vec<u8>,
    imm: Option<doca_be32_t>,
    opcode: doca_rdma_opcode_t,
}

pub struct doca_rdma_connection {
    rdma: *mut doca_rdma,
    peer: Cell<*mut doca_rdma_connection>,
    user_data: Cell<doca_data>,
    connected: Cell<bool>,
}

pub struct doca_rdma_addr {
    addr_type: doca_rdma_addr_type,
    address: CString,
    port: u16,
}

#[repr(C)]
pub struct doca_rdma {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    permissions: Cell<u32>,
    gid_index: Cell<u32>,
    max_num_connections: Cell<u16>,
    transport: Cell<doca_rdma_transport_type>,
    request_cb: Cell<Option<doca_rdma_connection_request_cb_t>>,
    established_cb: Cell<Option<doca_rdma_connection_state_cb_t>>,
    failure_cb: Cell<Option<doca_rdma_connection_state_cb_t>>,
    disconnected_cb: Cell<Option<doca_rdma_connection_state_cb_t>>,
    listen_port: Cell<Option<u16>>,
    connections: RefCell<Vec<*mut doca_rdma_connection>>,
    inbox: RefCell<VecDeque<RdmaDelivery>>,
    pending_recv: RefCell<VecDeque<*mut doca_rdma_task_receive>>,
    send_conf: TaskConf<doca_rdma_task_send>,
    send_imm_conf: TaskConf<doca_rdma_task_send_imm>,
    receive_conf: TaskConf<doca_rdma_task_receive>,
    read_conf: TaskConf<doca_rdma_task_read>,
    write_conf: TaskConf<doca_rdma_task_write>,
    write_imm_conf: TaskConf<doca_rdma_task_write_imm>,
    cmp_swp_conf: TaskConf<doca_rdma_task_atomic_cmp_swp>,
    fetch_add_conf: TaskConf<doca_rdma_task_atomic_fetch_add>,
    se_get_conf: TaskConf<doca_rdma_task_remote_net_sync_event_get>,
    se_set_conf: TaskConf<doca_rdma_task_remote_net_sync_event_notify_set>,
    se_add_conf: TaskConf<doca_rdma_task_remote_net_sync_event_notify_add>,
}

thread_local! {
    static EXPORTS: RefCell<HashMap<u64, *mut doca_rdma_connection>> =
        RefCell::new(HashMap::new());
    static LISTENERS: RefCell<HashMap<u16, *mut doca_rdma>> = RefCell::new(HashMap::new());
    static NEXT_EXPORT: Cell<u64> = const { Cell::new(1) };
}

const RDMA_EXPORT_MAGIC: u64 = 0x444f_4341_5244_4d41;

pub unsafe fn doca_rdma_create(dev: *mut doca_dev, rdma: *mut *mut doca_rdma) -> doca_error_t {
    if dev.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_rdma {
        base: doca_ctx::new(CtxKind::Rdma),
        dev,
        permissions: Cell::new(DOCA_ACCESS_FLAG_LOCAL_READ_WRITE),
        gid_index: Cell::new(0),
        max_num_connections: Cell::new(1),
        transport: Cell::new(DOCA_RDMA_TRANSPORT_TYPE_RC),
        request_cb: Cell::new(None),
        established_cb: Cell::new(None),
        failure_cb: Cell::new(None),
        disconnected_cb: Cell::new(None),
        listen_port: Cell::new(None),
        connections: RefCell::new(Vec::new()),
        inbox: RefCell::new(VecDeque::new()),
        pending_recv: RefCell::new(VecDeque::new()),
        send_conf: TaskConf::new(),
        send_imm_conf: TaskConf::new(),
        receive_conf: TaskConf::new(),
        read_conf: TaskConf::new(),
        write_conf: TaskConf::new(),
        write_imm_conf: TaskConf::new(),
        cmp_swp_conf: TaskConf::new(),
        fetch_add_conf: TaskConf::new(),
        se_get_conf: TaskConf::new(),
        se_set_conf: TaskConf::new(),
        se_add_conf: TaskConf::new(),
    });
    unsafe { *rdma = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_destroy(rdma: *mut doca_rdma) -> doca_error_t {
    if rdma.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        // connection objects outlive the context (they are intentionally
        // leaked); sever them so late disconnects cannot reach back in
        for conn in (*rdma).connections.borrow().iter().copied() {
            (*conn).connected.set(false);
            (*conn).peer.set(std::ptr::null_mut());
        }
        drop(Box::from_raw(rdma));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_as_ctx(rdma: *mut doca_rdma) -> *mut doca_ctx {
    rdma as *mut doca_ctx
}

pub unsafe fn doca_rdma_set_permissions(rdma: *mut doca_rdma, permissions: u32) -> doca_error_t {
    unsafe { (*rdma).permissions.set(permissions) };
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_set_gid_index(rdma: *mut doca_rdma, gid_index: u32) -> doca_error_t {
    unsafe { (*rdma).gid_index.set(gid_index) };
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_set_max_num_connections(
    rdma: *mut doca_rdma,
    max_num_connections: u16,
) -> doca_error_t {
    unsafe { (*rdma).max_num_connections.set(max_num_connections) };
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_set_transport_type(
    rdma: *mut doca_rdma,
    transport: doca_rdma_transport_type,
) -> doca_error_t {
    unsafe { (*rdma).transport.set(transport) };
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_set_connection_state_callbacks(
    rdma: *mut doca_rdma,
    request_cb: doca_rdma_connection_request_cb_t,
    established_cb: doca_rdma_connection_state_cb_t,
    failure_cb: doca_rdma_connection_state_cb_t,
    disconnected_cb: doca_rdma_connection_state_cb_t,
) -> doca_error_t {
    unsafe {
        (*rdma).request_cb.set(Some(request_cb));
        (*rdma).established_cb.set(Some(established_cb));
        (*rdma).failure_cb.set(Some(failure_cb));
        (*rdma).disconnected_cb.set(Some(disconnected_cb));
    }
    DOCA_SUCCESS
}

pub(crate) unsafe fn rdma_on_stop(ctx: *mut doca_ctx) {
    let rdma = ctx as *mut doca_rdma;
    unsafe {
        if let Some(port) = (*rdma).listen_port.take() {
            LISTENERS.with(|map| {
                map.borrow_mut().remove(&port);
            });
        }
        for conn in (*rdma).connections.borrow().iter().copied() {
            (*conn).connected.set(false);
            let peer = (*conn).peer.get();
            if !peer.is_null() {
                (*peer).connected.set(false);
            }
        }
        let pending = std::mem::take(&mut *(*rdma).pending_recv.borrow_mut());
        for typed in pending {
            (*typed).task.status.set(DOCA_ERROR_NOT_CONNECTED);
            (*rdma).receive_conf.complete(typed, &raw mut (*typed).task);
        }
    }
}

fn new_connection(rdma: *mut doca_rdma) -> *mut doca_rdma_connection {
    let conn = Box::into_raw(Box::new(doca_rdma_connection {
        rdma,
        peer: Cell::new(std::ptr::null_mut()),
        user_data: Cell::new(doca_data::null()),
        connected: Cell::new(false),
    }));
    unsafe { (*rdma).connections.borrow_mut().push(conn) };
    conn
}

// ── out-of-band establishment ───────────────────────────────

pub unsafe fn doca_rdma_export(
    rdma: *mut doca_rdma,
    details: *mut *const c_void,
    details_len: *mut usize,
    connection: *mut *mut doca_rdma_connection,
) -> doca_error_t {
    unsafe {
        if (*rdma).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let conn = new_connection(rdma);
        let id = NEXT_EXPORT.with(|c| {
            let id = c.get();
            c.set(id + 1);
            id
        });
        EXPORTS.with(|map| {
            map.borrow_mut().insert(id, conn);
        });
        let mut blob = Vec::with_capacity(16);
        blob.extend_from_slice(&RDMA_EXPORT_MAGIC.to_ne_bytes());
        blob.extend_from_slice(&id.to_ne_bytes());
        let blob = blob.into_boxed_slice();
        *details_len = blob.len();
        *details = Box::into_raw(blob) as *const c_void;
        *connection = conn;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_connect(
    rdma: *mut doca_rdma,
    details: *const c_void,
    details_len: usize,
    connection: *mut doca_rdma_connection,
) -> doca_error_t {
    if details.is_null() || details_len < 16 {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        if (*rdma).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let blob = std::slice::from_raw_parts(details as *const u8, 16);
        let magic = u64::from_ne_bytes(blob[..8].try_into().unwrap());
        if magic != RDMA_EXPORT_MAGIC {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let id = u64::from_ne_bytes(blob[8..].try_into().unwrap());
        let peer = EXPORTS.with(|map| map.borrow().get(&id).copied());
        let Some(peer) = peer else {
            return DOCA_ERROR_NOT_FOUND;
        };
        (*connection).peer.set(peer);
        (*peer).peer.set(connection);
        (*connection).connected.set(true);
        (*peer).connected.set(true);
    }
    DOCA_SUCCESS
}

// ── connection-manager establishment ────────────────────────

pub unsafe fn doca_rdma_addr_create(
    addr_type: doca_rdma_addr_type,
    address: *const c_char,
    port: u16,
    addr: *mut *mut doca_rdma_addr,
) -> doca_error_t {
    if address.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let address = unsafe { CStr::from_ptr(address) }.to_owned();
    unsafe {
        *addr = Box::into_raw(Box::new(doca_rdma_addr {
            addr_type,
            address,
            port,
        }));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_addr_destroy(addr: *mut doca_rdma_addr) -> doca_error_t {
    if addr.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(addr) });
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_addr_get_params(
    addr: *const doca_rdma_addr,
    addr_type: *mut doca_rdma_addr_type,
    address: *mut *const c_char,
    port: *mut u16,
) -> doca_error_t {
    unsafe {
        *addr_type = (*addr).addr_type;
        *address = (*addr).address.as_ptr();
        *port = (*addr).port;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_start_listen_to_port(rdma: *mut doca_rdma, port: u16) -> doca_error_t {
    unsafe {
        if (*rdma).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let occupied = LISTENERS.with(|map| map.borrow().contains_key(&port));
        if occupied {
            return DOCA_ERROR_IN_USE;
        }
        LISTENERS.with(|map| {
            map.borrow_mut().insert(port, rdma);
        });
        (*rdma).listen_port.set(Some(port));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_connect_to_addr(
    rdma: *mut doca_rdma,
    addr: *const doca_rdma_addr,
    connection_user_data: doca_data,
) -> doca_error_t {
    unsafe {
        if (*rdma).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let port = (*addr).port;
        let listener = LISTENERS.with(|map| map.borrow().get(&port).copied());
        let Some(listener) = listener else {
            return DOCA_ERROR_NOT_FOUND;
        };

        let client_conn = new_connection(rdma);
        (*client_conn).user_data.set(connection_user_data);
        let server_conn = new_connection(listener);
        (*client_conn).peer.set(server_conn);
        (*server_conn).peer.set(client_conn);

        pe_enqueue((*listener).base.pe.get(), move || unsafe {
            if let Some(cb) = (*listener).request_cb.get() {
                cb(server_conn, (*listener).base.user_data.get());
            }
        });
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_connection_set_user_data(
    connection: *mut doca_rdma_connection,
    user_data: doca_data,
) -> doca_error_t {
    unsafe { (*connection).user_data.set(user_data) };
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_connection_accept(connection: *mut doca_rdma_connection) -> doca_error_t {
    unsafe {
        let peer = (*connection).peer.get();
        if peer.is_null() {
            return DOCA_ERROR_BAD_STATE;
        }
        (*connection).connected.set(true);
        (*peer).connected.set(true);

        for conn in [connection, peer] {
            let rdma = (*conn).rdma;
            pe_enqueue((*rdma).base.pe.get(), move || unsafe {
                if let Some(cb) = (*rdma).established_cb.get() {
                    cb(conn, (*conn).user_data.get(), (*rdma).base.user_data.get());
                }
            });
        }
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_connection_disconnect(
    connection: *mut doca_rdma_connection,
) -> doca_error_t {
    unsafe {
        if !(*connection).connected.replace(false) {
            return DOCA_SUCCESS;
        }
        let peer = (*connection).peer.get();
        if !peer.is_null() && (*peer).connected.replace(false) {
            let rdma = (*peer).rdma;
            pe_enqueue((*rdma).base.pe.get(), move || unsafe {
                if let Some(cb) = (*rdma).disconnected_cb.get() {
                    cb(peer, (*peer).user_data.get(), (*rdma).base.user_data.get());
                }
            });
        }
    }
    DOCA_SUCCESS
}

// ── receive ─────────────────────────────────────────────────

#[repr(C)]
pub struct doca_rdma_task_receive {
    pub(crate) task: doca_task,
    dst: *mut doca_buf,
    imm: Cell<doca_be32_t>,
    opcode: Cell<doca_rdma_opcode_t>,
}

pub type doca_rdma_task_receive_completion_cb_t =
    unsafe extern "C" fn(*mut doca_rdma_task_receive, doca_data, doca_data);

pub unsafe fn doca_rdma_task_receive_set_conf(
    rdma: *mut doca_rdma,
    success_cb: doca_rdma_task_receive_completion_cb_t,
    error_cb: doca_rdma_task_receive_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*rdma).receive_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

unsafe fn receive_deliver(
    rdma: *mut doca_rdma,
    typed: *mut doca_rdma_task_receive,
    delivery: RdmaDelivery,
) {
    unsafe {
        let status = if delivery.bytes.is_empty() {
            DOCA_SUCCESS
        } else {
            (*(*typed).dst).write_at_data(&delivery.bytes)
        };
        (*typed).task.status.set(status);
        (*typed).imm.set(delivery.imm.unwrap_or(0));
        (*typed).opcode.set(delivery.opcode);
        (*rdma).receive_conf.complete(typed, &raw mut (*typed).task);
    }
}

pub unsafe fn doca_rdma_task_receive_alloc_init(
    rdma: *mut doca_rdma,
    dst: *mut doca_buf,
    user_data: doca_data,
    task: *mut *mut doca_rdma_task_receive,
) -> doca_error_t {
    unsafe {
        if (*rdma).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_rdma_task_receive {
            task: doca_task::new(rdma as *mut doca_ctx, task_free_as::<doca_rdma_task_receive>),
            dst,
            imm: Cell::new(0),
            opcode: Cell::new(DOCA_RDMA_OPCODE_RECV_SEND),
        }));
        (*typed).task.user_data.set(user_data);
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let next = (*rdma).inbox.borrow_mut().pop_front();
            match next {
                Some(delivery) => receive_deliver(rdma, typed, delivery),
                None => (*rdma).pending_recv.borrow_mut().push_back(typed),
            }
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_rdma_task_receive_as_task(task: *mut doca_rdma_task_receive) -> *mut doca_task {
    task as *mut doca_task
}

pub unsafe fn doca_rdma_task_receive_get_result_immediate_data(
    task: *const doca_rdma_task_receive,
) -> doca_be32_t {
    unsafe { (*task).imm.get() }
}

pub unsafe fn doca_rdma_task_receive_get_result_opcode(
    task: *const doca_rdma_task_receive,
) -> doca_rdma_opcode_t {
    unsafe { (*task).opcode.get() }
}

// ── data-moving verbs ───────────────────────────────────────

unsafe fn deliver_to_peer(conn: *mut doca_rdma_connection, delivery: RdmaDelivery) {
    unsafe {
        let peer = (*conn).peer.get();
        let target = (*peer).rdma;
        pe_enqueue((*target).base.pe.get(), move || unsafe {
            if (*target).base.state.get() != DOCA_CTX_STATE_RUNNING {
                return;
            }
            let next = (*target).pending_recv.borrow_mut().pop_front();
            match next {
                Some(waiting) => receive_deliver(target, waiting, delivery),
                None => (*target).inbox.borrow_mut().push_back(delivery),
            }
        });
    }
}

macro_rules! rdma_verb_task {
    ($task:ident, $cb:ident, $set_conf:ident, $as_task:ident, $conf:ident,
     { $($field:ident : $ty:ty),* $(,)? }) => {
        #[repr(C)]
        pub struct $task {
            pub(crate) task: doca_task,
            conn: *mut doca_rdma_connection,
            $($field: $ty,)*
        }

        pub type $cb = unsafe extern "C" fn(*mut $task, doca_data, doca_data);

        pub unsafe fn $set_conf(
            rdma: *mut doca_rdma,
            success_cb: $cb,
            error_cb: $cb,
            num_tasks: u32,
        ) -> doca_error_t {
            unsafe { (*rdma).$conf.set(success_cb, error_cb, num_tasks) };
            DOCA_SUCCESS
        }

        pub unsafe fn $as_task(task: *mut $task) -> *mut doca_task {
            task as *mut doca_task
        }
    };
}

macro_rules! rdma_verb_alloc_init {
    ($fn_name:ident, $task:ident, $conf:ident,
     ( $($param:ident : $pty:ty),* ), $run:expr) => {
        pub unsafe fn $fn_name(
            rdma: *mut doca_rdma,
            connection: *mut doca_rdma_connection,
            $($param: $pty,)*
            user_data: doca_data,
            task: *mut *mut $task,
        ) -> doca_error_t {
            unsafe {
                if (*rdma).base.state.get() != DOCA_CTX_STATE_RUNNING {
                    return DOCA_ERROR_BAD_STATE;
                }
                if connection.is_null() {
                    return DOCA_ERROR_INVALID_VALUE;
                }
                let typed = Box::into_raw(Box::new($task {
                    task: doca_task::new(rdma as *mut doca_ctx, task_free_as::<$task>),
                    conn: connection,
                    $($param,)*
                }));
                (*typed).task.user_data.set(user_data);
                let run: unsafe fn(*mut doca_rdma, *mut $task) -> doca_error_t = $run;
                *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
                    let status = if !(*(*typed).conn).connected.get() {
                        DOCA_ERROR_NOT_CONNECTED
                    } else {
                        run(rdma, typed)
                    };
                    (*typed).task.status.set(status);
                    (*rdma).$conf.complete(typed, &raw mut (*typed).task);
                }));
                *task = typed;
            }
            DOCA_SUCCESS
        }
    };
}

rdma_verb_task!(
    doca_rdma_task_send,
    doca_rdma_task_send_completion_cb_t,
    doca_rdma_task_send_set_conf,
    doca_rdma_task_send_as_task,
    send_conf,
    { src: *mut doca_buf }
);
rdma_verb_alloc_init!(
    doca_rdma_task_send_alloc_init,
    doca_rdma_task_send,
    send_conf,
    (src: *mut doca_buf),
    |_rdma, typed| unsafe {
        deliver_to_peer(
            (*typed).conn,
            RdmaDelivery {
                bytes: (*(*typed).src).data_slice().to_vec(),
                imm: None,
                opcode: DOCA_RDMA_OPCODE_RECV_SEND,
            },
        );
        DOCA_SUCCESS
    }
);

rdma_verb_task!(
    doca_rdma_task_send_imm,
    doca_rdma_task_send_imm_completion_cb_t,
    doca_rdma_task_send_imm_set_conf,
    doca_rdma_task_send_imm_as_task,
    send_imm_conf,
    { src: *mut doca_buf, imm: doca_be32_t }
);
rdma_verb_alloc_init!(
    doca_rdma_task_send_imm_alloc_init,
    doca_rdma_task_send_imm,
    send_imm_conf,
    (src: *mut doca_buf, imm: doca_be32_t),
    |_rdma, typed| unsafe {
        deliver_to_peer(
            (*typed).conn,
            RdmaDelivery {
                bytes: (*(*typed).src).data_slice().to_vec(),
                imm: Some((*typed).imm),
                opcode: DOCA_RDMA_OPCODE_RECV_SEND_WITH_IMM,
            },
        );
        DOCA_SUCCESS
    }
);

rdma_verb_task!(
    doca_rdma_task_read,
    doca_rdma_task_read_completion_cb_t,
    doca_rdma_task_read_set_conf,
    doca_rdma_task_read_as_task,
    read_conf,
    { src: *mut doca_buf, dst: *mut doca_buf }
);
rdma_verb_alloc_init!(
    doca_rdma_task_read_alloc_init,
    doca_rdma_task_read,
    read_conf,
    (src: *mut doca_buf, dst: *mut doca_buf),
    |_rdma, typed| unsafe { (*(*typed).dst).write_at_data((*(*typed).src).data_slice()) }
);

rdma_verb_task!(
    doca_rdma_task_write,
    doca_rdma_task_write_completion_cb_t,
    doca_rdma_task_write_set_conf,
    doca_rdma_task_write_as_task,
    write_conf,
    { src: *mut doca_buf, dst: *mut doca_buf }
);
rdma_verb_alloc_init!(
    doca_rdma_task_write_alloc_init,
    doca_rdma_task_write,
    write_conf,
    (src: *mut doca_buf, dst: *mut doca_buf),
    |_rdma, typed| unsafe { (*(*typed).dst).write_at_data((*(*typed).src).data_slice()) }
);

rdma_verb_task!(
    doca_rdma_task_write_imm,
    doca_rdma_task_write_imm_completion_cb_t,
    doca_rdma_task_write_imm_set_conf,
    doca_rdma_task_write_imm_as_task,
    write_imm_conf,
    { src: *mut doca_buf, dst: *mut doca_buf, imm: doca_be32_t }
);
rdma_verb_alloc_init!(
    doca_rdma_task_write_imm_alloc_init,
    doca_rdma_task_write_imm,
    write_imm_conf,
    (src: *mut doca_buf, dst: *mut doca_buf, imm: doca_be32_t),
    |_rdma, typed| unsafe {
        let status = (*(*typed).dst).write_at_data((*(*typed).src).data_slice());
        if status != DOCA_SUCCESS {
            return status;
        }
        deliver_to_peer(
            (*typed).conn,
            RdmaDelivery {
                bytes: Vec::new(),
                imm: Some((*typed).imm),
                opcode: DOCA_RDMA_OPCODE_RECV_WRITE_WITH_IMM,
            },
        );
        DOCA_SUCCESS
    }
);

unsafe fn atomic_u64(buf: *mut doca_buf) -> Result<*mut u8, doca_error_t> {
    unsafe {
        if (*buf).data_len.get() < 8 && (*buf).tail_capacity() < 8 {
            return Err(DOCA_ERROR_INVALID_VALUE);
        }
        Ok((*buf).data_ptr())
    }
}

rdma_verb_task!(
    doca_rdma_task_atomic_cmp_swp,
    doca_rdma_task_atomic_cmp_swp_completion_cb_t,
    doca_rdma_task_atomic_cmp_swp_set_conf,
    doca_rdma_task_atomic_cmp_swp_as_task,
    cmp_swp_conf,
    { dst: *mut doca_buf, result: *mut doca_buf, cmp_data: u64, swap_data: u64 }
);
rdma_verb_alloc_init!(
    doca_rdma_task_atomic_cmp_swp_alloc_init,
    doca_rdma_task_atomic_cmp_swp,
    cmp_swp_conf,
    (dst: *mut doca_buf, result: *mut doca_buf, cmp_data: u64, swap_data: u64),
    |_rdma, typed| unsafe {
        let target = match atomic_u64((*typed).dst) {
            Ok(ptr) => ptr,
            Err(status) => return status,
        };
        let mut old = [0u8; 8];
        std::ptr::copy_nonoverlapping(target, old.as_mut_ptr(), 8);
        let old_value = u64::from_ne_bytes(old);
        if old_value == (*typed).cmp_data {
            let new = (*typed).swap_data.to_ne_bytes();
            std::ptr::copy_nonoverlapping(new.as_ptr(), target, 8);
        }
        (*(*typed).result).write_at_data(&old)
    }
);

rdma_verb_task!(
    doca_rdma_task_atomic_fetch_add,
    doca_rdma_task_atomic_fetch_add_completion_cb_t,
    doca_rdma_task_atomic_fetch_add_set_conf,
    doca_rdma_task_atomic_fetch_add_as_task,
    fetch_add_conf,
    { dst: *mut doca_buf, result: *mut doca_buf, add_data: u64 }
);
rdma_verb_alloc_init!(
    doca_rdma_task_atomic_fetch_add_alloc_init,
    doca_rdma_task_atomic_fetch_add,
    fetch_add_conf,
    (dst: *mut doca_buf, result: *mut doca_buf, add_data: u64),
    |_rdma, typed| unsafe {
        let target = match atomic_u64((*typed).dst) {
            Ok(ptr) => ptr,
            Err(status) => return status,
        };
        let mut old = [0u8; 8];
        std::ptr::copy_nonoverlapping(target, old.as_mut_ptr(), 8);
        let old_value = u64::from_ne_bytes(old);
        let new = old_value.wrapping_add((*typed).add_data).to_ne_bytes();
        std::ptr::copy_nonoverlapping(new.as_ptr(), target, 8);
        (*(*typed).result).write_at_data(&old)
    }
);

// ── remote sync-event verbs ─────────────────────────────────

rdma_verb_task!(
    doca_rdma_task_remote_net_sync_event_get,
    doca_rdma_task_remote_net_sync_event_get_completion_cb_t,
    doca_rdma_task_remote_net_sync_event_get_set_conf,
    doca_rdma_task_remote_net_sync_event_get_as_task,
    se_get_conf,
    { event: *mut doca_sync_event_remote_net, dst: *mut doca_buf }
);
rdma_verb_alloc_init!(
    doca_rdma_task_remote_net_sync_event_get_alloc_init,
    doca_rdma_task_remote_net_sync_event_get,
    se_get_conf,
    (event: *mut doca_sync_event_remote_net, dst: *mut doca_buf),
    |_rdma, typed| unsafe {
        let value = (*(*typed).event).cell.get();
        (*(*typed).dst).write_at_data(&value.to_ne_bytes())
    }
);

rdma_verb_task!(
    doca_rdma_task_remote_net_sync_event_notify_set,
    doca_rdma_task_remote_net_sync_event_notify_set_completion_cb_t,
    doca_rdma_task_remote_net_sync_event_notify_set_set_conf,
    doca_rdma_task_remote_net_sync_event_notify_set_as_task,
    se_set_conf,
    { event: *mut doca_sync_event_remote_net, src: *mut doca_buf }
);
rdma_verb_alloc_init!(
    doca_rdma_task_remote_net_sync_event_notify_set_alloc_init,
    doca_rdma_task_remote_net_sync_event_notify_set,
    se_set_conf,
    (event: *mut doca_sync_event_remote_net, src: *mut doca_buf),
    |_rdma, typed| unsafe {
        let data = (*(*typed).src).data_slice();
        if data.len() < 8 {
            return DOCA_ERROR_INVALID_VALUE;
        }
        let value = u64::from_ne_bytes(data[..8].try_into().unwrap());
        (*(*typed).event).cell.set(value);
        DOCA_SUCCESS
    }
);

rdma_verb_task!(
    doca_rdma_task_remote_net_sync_event_notify_add,
    doca_rdma_task_remote_net_sync_event_notify_add_completion_cb_t,
    doca_rdma_task_remote_net_sync_event_notify_add_set_conf,
    doca_rdma_task_remote_net_sync_event_notify_add_as_task,
    se_add_conf,
    { event: *mut doca_sync_event_remote_net, result: *mut doca_buf, add_data: u64 }
);
rdma_verb_alloc_init!(
    doca_rdma_task_remote_net_sync_event_notify_add_alloc_init,
    doca_rdma_task_remote_net_sync_event_notify_add,
    se_add_conf,
    (event: *mut doca_sync_event_remote_net, result: *mut doca_buf, add_data: u64),
    |_rdma, typed| unsafe {
        let old = (*(*typed).event).cell.fetch_add((*typed).add_data);
        (*(*typed).result).write_at_data(&old.to_ne_bytes())
    }
);
