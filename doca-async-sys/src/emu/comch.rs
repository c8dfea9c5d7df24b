//! Inter-host messaging (comch): servers, clients, connections, and the
//! producer/consumer fast path.
//!
//! Client and server ends pair up through a thread-local name registry, the
//! in-process stand-in for the PCIe channel between host and DPU. Connection
//! objects are leaked once created; both context ends may hold queued events
//! referencing them, and the few dozen bytes per test are not worth a
//! use-after-free hazard in a test double.

use super::*;
use std::cell::{Cell, RefCell};
use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, c_char, c_void};

pub struct doca_comch_event_msg_recv {
    _opaque: [u8; 0],
}
pub struct doca_comch_event_connection_status_changed {
    _opaque: [u8; 0],
}
pub struct doca_comch_event_consumer {
    _opaque: [u8; 0],
}

pub type doca_comch_task_send_completion_cb_t =
    unsafe extern "C" fn(*mut doca_comch_task_send, doca_data, doca_data);
pub type doca_comch_event_msg_recv_cb_t = unsafe extern "C" fn(
    *mut doca_comch_event_msg_recv,
    *mut u8,
    u32,
    *mut doca_comch_connection,
);
pub type doca_comch_event_connection_status_changed_cb_t = unsafe extern "C" fn(
    *mut doca_comch_event_connection_status_changed,
    *mut doca_comch_connection,
    u8,
);
pub type doca_comch_event_consumer_cb_t =
    unsafe extern "C" fn(*mut doca_comch_event_consumer, *mut doca_comch_connection, u32);

#[derive(Clone, Copy)]
pub(crate) enum ChannelOwner {
    Server(*mut doca_comch_server),
    Client(*mut doca_comch_client),
}

pub struct doca_comch_connection {
    owner: ChannelOwner,
    peer: Cell<*mut doca_comch_connection>,
    connected: Cell<bool>,
    consumers: RefCell<Vec<*mut doca_comch_consumer>>,
}

#[repr(C)]
pub struct doca_comch_server {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    rep: *mut doca_dev_rep,
    name: String,
    send_conf: TaskConf<doca_comch_task_send>,
    msg_recv_cb: Cell<Option<doca_comch_event_msg_recv_cb_t>>,
    connect_cb: Cell<Option<doca_comch_event_connection_status_changed_cb_t>>,
    disconnect_cb: Cell<Option<doca_comch_event_connection_status_changed_cb_t>>,
    new_consumer_cb: Cell<Option<doca_comch_event_consumer_cb_t>>,
    expired_consumer_cb: Cell<Option<doca_comch_event_consumer_cb_t>>,
    max_msg_size: Cell<u32>,
    recv_queue_size: Cell<u32>,
    connections: RefCell<Vec<*mut doca_comch_connection>>,
}

#[repr(C)]
pub struct doca_comch_client {
    pub(crate) base: doca_ctx,
    dev: *mut doca_dev,
    name: String,
    send_conf: TaskConf<doca_comch_task_send>,
    msg_recv_cb: Cell<Option<doca_comch_event_msg_recv_cb_t>>,
    new_consumer_cb: Cell<Option<doca_comch_event_consumer_cb_t>>,
    expired_consumer_cb: Cell<Option<doca_comch_event_consumer_cb_t>>,
    max_msg_size: Cell<u32>,
    recv_queue_size: Cell<u32>,
    connection: Cell<*mut doca_comch_connection>,
}

thread_local! {
    static SERVERS: RefCell<HashMap<String, *mut doca_comch_server>> =
        RefCell::new(HashMap::new());
    static NEXT_CHANNEL_ID: Cell<u32> = const { Cell::new(1) };
}

fn next_channel_id() -> u32 {
    NEXT_CHANNEL_ID.with(|c| {
        let id = c.get();
        c.set(id + 1);
        id
    })
}

unsafe fn owner_pe(owner: ChannelOwner) -> *mut doca_pe {
    unsafe {
        match owner {
            ChannelOwner::Server(server) => (*server).base.pe.get(),
            ChannelOwner::Client(client) => (*client).base.pe.get(),
        }
    }
}

// ── server ──────────────────────────────────────────────────

pub unsafe fn doca_comch_server_create(
    dev: *mut doca_dev,
    rep: *mut doca_dev_rep,
    name: *const c_char,
    server: *mut *mut doca_comch_server,
) -> doca_error_t {
    if dev.is_null() || rep.is_null() || name.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    let handle = Box::new(doca_comch_server {
        base: doca_ctx::new(CtxKind::ComchServer),
        dev,
        rep,
        name,
        send_conf: TaskConf::new(),
        msg_recv_cb: Cell::new(None),
        connect_cb: Cell::new(None),
        disconnect_cb: Cell::new(None),
        new_consumer_cb: Cell::new(None),
        expired_consumer_cb: Cell::new(None),
        max_msg_size: Cell::new(4080),
        recv_queue_size: Cell::new(16),
        connections: RefCell::new(Vec::new()),
    });
    unsafe { *server = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_destroy(server: *mut doca_comch_server) -> doca_error_t {
    if server.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    SERVERS.with(|map| unsafe {
        let mut map = map.borrow_mut();
        if map.get(&(*server).name).copied() == Some(server) {
            map.remove(&(*server).name);
        }
    });
    unsafe {
        // connection objects outlive the context (they are intentionally
        // leaked); sever them so late peer-side hooks cannot reach back in
        for conn in (*server).connections.borrow().iter().copied() {
            sever_connection(conn);
        }
        drop(Box::from_raw(server));
    }
    DOCA_SUCCESS
}

unsafe fn sever_connection(conn: *mut doca_comch_connection) {
    unsafe {
        (*conn).connected.set(false);
        let peer = (*conn).peer.replace(std::ptr::null_mut());
        if !peer.is_null() {
            (*peer).connected.set(false);
            (*peer).peer.set(std::ptr::null_mut());
        }
    }
}

pub unsafe fn doca_comch_server_as_ctx(server: *mut doca_comch_server) -> *mut doca_ctx {
    server as *mut doca_ctx
}

pub(crate) unsafe fn server_on_running(ctx: *mut doca_ctx) {
    let server = ctx as *mut doca_comch_server;
    SERVERS.with(|map| unsafe {
        map.borrow_mut().insert((*server).name.clone(), server);
    });
}

pub(crate) unsafe fn server_on_stop(ctx: *mut doca_ctx) {
    let server = ctx as *mut doca_comch_server;
    SERVERS.with(|map| unsafe {
        let mut map = map.borrow_mut();
        if map.get(&(*server).name).copied() == Some(server) {
            map.remove(&(*server).name);
        }
    });
    unsafe {
        let connections = std::mem::take(&mut *(*server).connections.borrow_mut());
        for conn in connections {
            disconnect_pair(conn);
        }
    }
}

pub unsafe fn doca_comch_server_set_max_msg_size(
    server: *mut doca_comch_server,
    size: u32,
) -> doca_error_t {
    unsafe { (*server).max_msg_size.set(size) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_set_recv_queue_size(
    server: *mut doca_comch_server,
    size: u32,
) -> doca_error_t {
    unsafe { (*server).recv_queue_size.set(size) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_event_msg_recv_register(
    server: *mut doca_comch_server,
    cb: doca_comch_event_msg_recv_cb_t,
) -> doca_error_t {
    unsafe { (*server).msg_recv_cb.set(Some(cb)) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_event_connection_status_changed_register(
    server: *mut doca_comch_server,
    connect_cb: doca_comch_event_connection_status_changed_cb_t,
    disconnect_cb: doca_comch_event_connection_status_changed_cb_t,
) -> doca_error_t {
    unsafe {
        (*server).connect_cb.set(Some(connect_cb));
        (*server).disconnect_cb.set(Some(disconnect_cb));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_event_consumer_register(
    server: *mut doca_comch_server,
    new_cb: doca_comch_event_consumer_cb_t,
    expired_cb: doca_comch_event_consumer_cb_t,
) -> doca_error_t {
    unsafe {
        (*server).new_consumer_cb.set(Some(new_cb));
        (*server).expired_consumer_cb.set(Some(expired_cb));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_get_server_ctx(
    connection: *const doca_comch_connection,
) -> *mut doca_comch_server {
    unsafe {
        match (*connection).owner {
            ChannelOwner::Server(server) => server,
            ChannelOwner::Client(_) => std::ptr::null_mut(),
        }
    }
}

unsafe fn disconnect_pair(conn: *mut doca_comch_connection) {
    unsafe {
        if !(*conn).connected.replace(false) {
            return;
        }
        let peer = (*conn).peer.get();
        if peer.is_null() {
            return;
        }
        (*peer).connected.set(false);
        // the peer's owner hears about the disconnection asynchronously
        match (*peer).owner {
            ChannelOwner::Server(server) => {
                let pe = (*server).base.pe.get();
                pe_enqueue(pe, move || unsafe {
                    if let Some(cb) = (*server).disconnect_cb.get() {
                        cb(std::ptr::null_mut(), peer, 1);
                    }
                });
            }
            // clients observe server-side disconnects on their next operation
            ChannelOwner::Client(_) => {}
        }
    }
}

pub unsafe fn doca_comch_server_disconnect(
    server: *mut doca_comch_server,
    connection: *mut doca_comch_connection,
) -> doca_error_t {
    unsafe {
        (*server)
            .connections
            .borrow_mut()
            .retain(|&c| c != connection);
        disconnect_pair(connection);
    }
    DOCA_SUCCESS
}

// ── client ──────────────────────────────────────────────────

pub unsafe fn doca_comch_client_create(
    dev: *mut doca_dev,
    name: *const c_char,
    client: *mut *mut doca_comch_client,
) -> doca_error_t {
    if dev.is_null() || name.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let name = unsafe { CStr::from_ptr(name) }.to_string_lossy().into_owned();
    let handle = Box::new(doca_comch_client {
        base: doca_ctx::new(CtxKind::ComchClient),
        dev,
        name,
        send_conf: TaskConf::new(),
        msg_recv_cb: Cell::new(None),
        new_consumer_cb: Cell::new(None),
        expired_consumer_cb: Cell::new(None),
        max_msg_size: Cell::new(4080),
        recv_queue_size: Cell::new(16),
        connection: Cell::new(std::ptr::null_mut()),
    });
    unsafe { *client = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_client_destroy(client: *mut doca_comch_client) -> doca_error_t {
    if client.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    unsafe {
        let conn = (*client).connection.get();
        if !conn.is_null() {
            sever_connection(conn);
        }
        drop(Box::from_raw(client));
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_client_as_ctx(client: *mut doca_comch_client) -> *mut doca_ctx {
    client as *mut doca_ctx
}

pub(crate) unsafe fn client_pre_start(ctx: *mut doca_ctx) -> doca_error_t {
    let client = ctx as *mut doca_comch_client;
    let found = SERVERS.with(|map| {
        let name = unsafe { (*client).name.as_str() };
        map.borrow()
            .get(name)
            .copied()
            .is_some_and(|server| unsafe { (*server).base.state.get() == DOCA_CTX_STATE_RUNNING })
    });
    if found { DOCA_SUCCESS } else { DOCA_ERROR_NOT_FOUND }
}

pub(crate) unsafe fn client_on_running(ctx: *mut doca_ctx) {
    let client = ctx as *mut doca_comch_client;
    let lookup = SERVERS.with(|map| unsafe { map.borrow().get(&(*client).name).copied() });
    unsafe {
        let Some(server) = lookup else {
            return;
        };

        let client_conn = Box::into_raw(Box::new(doca_comch_connection {
            owner: ChannelOwner::Client(client),
            peer: Cell::new(std::ptr::null_mut()),
            connected: Cell::new(true),
            consumers: RefCell::new(Vec::new()),
        }));
        let server_conn = Box::into_raw(Box::new(doca_comch_connection {
            owner: ChannelOwner::Server(server),
            peer: Cell::new(client_conn),
            connected: Cell::new(true),
            consumers: RefCell::new(Vec::new()),
        }));
        (*client_conn).peer.set(server_conn);
        (*client).connection.set(client_conn);
        (*server).connections.borrow_mut().push(server_conn);

        let pe = (*server).base.pe.get();
        pe_enqueue(pe, move || unsafe {
            if (*server_conn).connected.get() {
                if let Some(cb) = (*server).connect_cb.get() {
                    cb(std::ptr::null_mut(), server_conn, 1);
                }
            }
        });
    }
}

pub(crate) unsafe fn client_on_stop(ctx: *mut doca_ctx) {
    let client = ctx as *mut doca_comch_client;
    unsafe {
        let conn = (*client).connection.get();
        if !conn.is_null() {
            // the server removes the connection from its own registry when
            // the disconnect event fires
            let peer = (*conn).peer.get();
            if !peer.is_null() {
                if let ChannelOwner::Server(server) = (*peer).owner {
                    (*server).connections.borrow_mut().retain(|&c| c != peer);
                }
            }
            disconnect_pair(conn);
        }
    }
}

pub unsafe fn doca_comch_client_get_client_ctx(
    connection: *const doca_comch_connection,
) -> *mut doca_comch_client {
    unsafe {
        match (*connection).owner {
            ChannelOwner::Client(client) => client,
            ChannelOwner::Server(_) => std::ptr::null_mut(),
        }
    }
}

pub unsafe fn doca_comch_client_get_connection(
    client: *const doca_comch_client,
    connection: *mut *mut doca_comch_connection,
) -> doca_error_t {
    unsafe {
        let conn = (*client).connection.get();
        if conn.is_null() {
            return DOCA_ERROR_NOT_CONNECTED;
        }
        *connection = conn;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_client_set_max_msg_size(
    client: *mut doca_comch_client,
    size: u32,
) -> doca_error_t {
    unsafe { (*client).max_msg_size.set(size) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_client_set_recv_queue_size(
    client: *mut doca_comch_client,
    size: u32,
) -> doca_error_t {
    unsafe { (*client).recv_queue_size.set(size) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_client_event_msg_recv_register(
    client: *mut doca_comch_client,
    cb: doca_comch_event_msg_recv_cb_t,
) -> doca_error_t {
    unsafe { (*client).msg_recv_cb.set(Some(cb)) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_client_event_consumer_register(
    client: *mut doca_comch_client,
    new_cb: doca_comch_event_consumer_cb_t,
    expired_cb: doca_comch_event_consumer_cb_t,
) -> doca_error_t {
    unsafe {
        (*client).new_consumer_cb.set(Some(new_cb));
        (*client).expired_consumer_cb.set(Some(expired_cb));
    }
    DOCA_SUCCESS
}

// ── message send tasks ──────────────────────────────────────

#[repr(C)]
pub struct doca_comch_task_send {
    pub(crate) task: doca_task,
    conn: *mut doca_comch_connection,
    bytes: Vec<u8>,
}

unsafe fn comch_send_alloc(
    ctx: *mut doca_ctx,
    conf_owner: ChannelOwner,
    conn: *mut doca_comch_connection,
    msg: *const c_void,
    len: usize,
    max_msg_size: u32,
    task: *mut *mut doca_comch_task_send,
) -> doca_error_t {
    unsafe {
        if (*ctx).state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        if conn.is_null() || msg.is_null() {
            return DOCA_ERROR_INVALID_VALUE;
        }
        if len > max_msg_size as usize {
            return DOCA_ERROR_TOO_BIG;
        }
        let bytes = std::slice::from_raw_parts(msg as *const u8, len).to_vec();
        let typed = Box::into_raw(Box::new(doca_comch_task_send {
            task: doca_task::new(ctx, task_free_as::<doca_comch_task_send>),
            conn,
            bytes,
        }));
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let conn = (*typed).conn;
            let conf = match conf_owner {
                ChannelOwner::Server(server) => &(*server).send_conf,
                ChannelOwner::Client(client) => &(*client).send_conf,
            };
            if !(*conn).connected.get() {
                (*typed).task.status.set(DOCA_ERROR_NOT_CONNECTED);
                conf.complete(typed, &raw mut (*typed).task);
                return;
            }

            let peer = (*conn).peer.get();
            let payload = (*typed).bytes.clone();
            let peer_owner = (*peer).owner;
            pe_enqueue(owner_pe(peer_owner), move || unsafe {
                let mut payload = payload;
                let cb = match peer_owner {
                    ChannelOwner::Server(server) => (*server).msg_recv_cb.get(),
                    ChannelOwner::Client(client) => (*client).msg_recv_cb.get(),
                };
                if let Some(cb) = cb {
                    cb(
                        std::ptr::null_mut(),
                        payload.as_mut_ptr(),
                        payload.len() as u32,
                        peer,
                    );
                }
            });

            (*typed).task.status.set(DOCA_SUCCESS);
            conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_task_send_set_conf(
    server: *mut doca_comch_server,
    success_cb: doca_comch_task_send_completion_cb_t,
    error_cb: doca_comch_task_send_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*server).send_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_client_task_send_set_conf(
    client: *mut doca_comch_client,
    success_cb: doca_comch_task_send_completion_cb_t,
    error_cb: doca_comch_task_send_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*client).send_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_server_task_send_alloc_init(
    server: *mut doca_comch_server,
    connection: *mut doca_comch_connection,
    msg: *const c_void,
    len: usize,
    task: *mut *mut doca_comch_task_send,
) -> doca_error_t {
    unsafe {
        comch_send_alloc(
            server as *mut doca_ctx,
            ChannelOwner::Server(server),
            connection,
            msg,
            len,
            (*server).max_msg_size.get(),
            task,
        )
    }
}

pub unsafe fn doca_comch_client_task_send_alloc_init(
    client: *mut doca_comch_client,
    connection: *mut doca_comch_connection,
    msg: *const c_void,
    len: usize,
    task: *mut *mut doca_comch_task_send,
) -> doca_error_t {
    unsafe {
        comch_send_alloc(
            client as *mut doca_ctx,
            ChannelOwner::Client(client),
            connection,
            msg,
            len,
            (*client).max_msg_size.get(),
            task,
        )
    }
}

pub unsafe fn doca_comch_task_send_as_task(task: *mut doca_comch_task_send) -> *mut doca_task {
    task as *mut doca_task
}

// ── consumer ────────────────────────────────────────────────

struct Delivery {
    bytes: Vec<u8>,
    imm: Vec<u8>,
    producer_id: u32,
}

#[repr(C)]
pub struct doca_comch_consumer {
    pub(crate) base: doca_ctx,
    conn: *mut doca_comch_connection,
    mmap: *mut doca_mmap,
    id: Cell<u32>,
    post_recv_conf: TaskConf<doca_comch_consumer_task_post_recv>,
    pending: RefCell<VecDeque<*mut doca_comch_consumer_task_post_recv>>,
    inbox: RefCell<VecDeque<Delivery>>,
}

#[repr(C)]
pub struct doca_comch_consumer_task_post_recv {
    pub(crate) task: doca_task,
    buf: *mut doca_buf,
    imm: RefCell<Vec<u8>>,
    producer_id: Cell<u32>,
}

pub type doca_comch_consumer_task_post_recv_completion_cb_t =
    unsafe extern "C" fn(*mut doca_comch_consumer_task_post_recv, doca_data, doca_data);

pub unsafe fn doca_comch_consumer_create(
    connection: *mut doca_comch_connection,
    mmap: *mut doca_mmap,
    consumer: *mut *mut doca_comch_consumer,
) -> doca_error_t {
    if connection.is_null() || mmap.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_comch_consumer {
        base: doca_ctx::new(CtxKind::ComchConsumer),
        conn: connection,
        mmap,
        id: Cell::new(0),
        post_recv_conf: TaskConf::new(),
        pending: RefCell::new(VecDeque::new()),
        inbox: RefCell::new(VecDeque::new()),
    });
    unsafe { *consumer = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_consumer_destroy(consumer: *mut doca_comch_consumer) -> doca_error_t {
    if consumer.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(consumer) });
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_consumer_as_ctx(consumer: *mut doca_comch_consumer) -> *mut doca_ctx {
    consumer as *mut doca_ctx
}

pub unsafe fn doca_comch_consumer_get_id(
    consumer: *const doca_comch_consumer,
    id: *mut u32,
) -> doca_error_t {
    unsafe { *id = (*consumer).id.get() };
    DOCA_SUCCESS
}

pub(crate) unsafe fn consumer_on_running(ctx: *mut doca_ctx) {
    let consumer = ctx as *mut doca_comch_consumer;
    unsafe {
        let id = next_channel_id();
        (*consumer).id.set(id);
        let conn = (*consumer).conn;
        (*conn).consumers.borrow_mut().push(consumer);

        let peer = (*conn).peer.get();
        if peer.is_null() {
            return;
        }
        let peer_owner = (*peer).owner;
        pe_enqueue(owner_pe(peer_owner), move || unsafe {
            let cb = match peer_owner {
                ChannelOwner::Server(server) => (*server).new_consumer_cb.get(),
                ChannelOwner::Client(client) => (*client).new_consumer_cb.get(),
            };
            if let Some(cb) = cb {
                cb(std::ptr::null_mut(), peer, id);
            }
        });
    }
}

pub(crate) unsafe fn consumer_on_stop(ctx: *mut doca_ctx) {
    let consumer = ctx as *mut doca_comch_consumer;
    unsafe {
        let conn = (*consumer).conn;
        (*conn).consumers.borrow_mut().retain(|&c| c != consumer);

        // pending receives cannot complete anymore
        let pending = std::mem::take(&mut *(*consumer).pending.borrow_mut());
        for typed in pending {
            (*typed).task.status.set(DOCA_ERROR_NOT_CONNECTED);
            (*consumer)
                .post_recv_conf
                .complete(typed, &raw mut (*typed).task);
        }

        let peer = (*conn).peer.get();
        if peer.is_null() {
            return;
        }
        let id = (*consumer).id.get();
        let peer_owner = (*peer).owner;
        pe_enqueue(owner_pe(peer_owner), move || unsafe {
            let cb = match peer_owner {
                ChannelOwner::Server(server) => (*server).expired_consumer_cb.get(),
                ChannelOwner::Client(client) => (*client).expired_consumer_cb.get(),
            };
            if let Some(cb) = cb {
                cb(std::ptr::null_mut(), peer, id);
            }
        });
    }
}

pub unsafe fn doca_comch_consumer_task_post_recv_set_conf(
    consumer: *mut doca_comch_consumer,
    success_cb: doca_comch_consumer_task_post_recv_completion_cb_t,
    error_cb: doca_comch_consumer_task_post_recv_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*consumer).post_recv_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

unsafe fn consumer_deliver(
    consumer: *mut doca_comch_consumer,
    typed: *mut doca_comch_consumer_task_post_recv,
    delivery: Delivery,
) {
    unsafe {
        let status = (*(*typed).buf).write_at_data(&delivery.bytes);
        (*typed).task.status.set(status);
        *(*typed).imm.borrow_mut() = delivery.imm;
        (*typed).producer_id.set(delivery.producer_id);
        (*consumer)
            .post_recv_conf
            .complete(typed, &raw mut (*typed).task);
    }
}

pub unsafe fn doca_comch_consumer_task_post_recv_alloc_init(
    consumer: *mut doca_comch_consumer,
    buf: *mut doca_buf,
    task: *mut *mut doca_comch_consumer_task_post_recv,
) -> doca_error_t {
    unsafe {
        if (*consumer).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let typed = Box::into_raw(Box::new(doca_comch_consumer_task_post_recv {
            task: doca_task::new(
                consumer as *mut doca_ctx,
                task_free_as::<doca_comch_consumer_task_post_recv>,
            ),
            buf,
            imm: RefCell::new(Vec::new()),
            producer_id: Cell::new(0),
        }));
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let next = (*consumer).inbox.borrow_mut().pop_front();
            match next {
                Some(delivery) => consumer_deliver(consumer, typed, delivery),
                None => (*consumer).pending.borrow_mut().push_back(typed),
            }
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_consumer_task_post_recv_as_task(
    task: *mut doca_comch_consumer_task_post_recv,
) -> *mut doca_task {
    task as *mut doca_task
}

pub unsafe fn doca_comch_consumer_task_post_recv_get_imm_data(
    task: *const doca_comch_consumer_task_post_recv,
) -> *const u8 {
    unsafe { (*task).imm.borrow().as_ptr() }
}

pub unsafe fn doca_comch_consumer_task_post_recv_get_imm_data_len(
    task: *const doca_comch_consumer_task_post_recv,
) -> u32 {
    unsafe { (*task).imm.borrow().len() as u32 }
}

pub unsafe fn doca_comch_consumer_task_post_recv_get_producer_id(
    task: *const doca_comch_consumer_task_post_recv,
) -> u32 {
    unsafe { (*task).producer_id.get() }
}

// ── producer ────────────────────────────────────────────────

#[repr(C)]
pub struct doca_comch_producer {
    pub(crate) base: doca_ctx,
    conn: *mut doca_comch_connection,
    id: Cell<u32>,
    send_conf: TaskConf<doca_comch_producer_task_send>,
}

#[repr(C)]
pub struct doca_comch_producer_task_send {
    pub(crate) task: doca_task,
    buf: *mut doca_buf,
    imm: Vec<u8>,
    consumer_id: u32,
}

pub type doca_comch_producer_task_send_completion_cb_t =
    unsafe extern "C" fn(*mut doca_comch_producer_task_send, doca_data, doca_data);

pub unsafe fn doca_comch_producer_create(
    connection: *mut doca_comch_connection,
    producer: *mut *mut doca_comch_producer,
) -> doca_error_t {
    if connection.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    let handle = Box::new(doca_comch_producer {
        base: doca_ctx::new(CtxKind::ComchProducer),
        conn: connection,
        id: Cell::new(0),
        send_conf: TaskConf::new(),
    });
    unsafe { *producer = Box::into_raw(handle) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_producer_destroy(producer: *mut doca_comch_producer) -> doca_error_t {
    if producer.is_null() {
        return DOCA_ERROR_INVALID_VALUE;
    }
    drop(unsafe { Box::from_raw(producer) });
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_producer_as_ctx(producer: *mut doca_comch_producer) -> *mut doca_ctx {
    producer as *mut doca_ctx
}

pub(crate) unsafe fn producer_on_running(ctx: *mut doca_ctx) {
    let producer = ctx as *mut doca_comch_producer;
    unsafe { (*producer).id.set(next_channel_id()) };
}

pub(crate) unsafe fn producer_on_stop(_ctx: *mut doca_ctx) {}

pub unsafe fn doca_comch_producer_task_send_set_conf(
    producer: *mut doca_comch_producer,
    success_cb: doca_comch_producer_task_send_completion_cb_t,
    error_cb: doca_comch_producer_task_send_completion_cb_t,
    num_tasks: u32,
) -> doca_error_t {
    unsafe { (*producer).send_conf.set(success_cb, error_cb, num_tasks) };
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_producer_task_send_alloc_init(
    producer: *mut doca_comch_producer,
    buf: *mut doca_buf,
    imm_data: *const u8,
    imm_len: u32,
    consumer_id: u32,
    task: *mut *mut doca_comch_producer_task_send,
) -> doca_error_t {
    unsafe {
        if (*producer).base.state.get() != DOCA_CTX_STATE_RUNNING {
            return DOCA_ERROR_BAD_STATE;
        }
        let imm = if imm_data.is_null() {
            Vec::new()
        } else {
            std::slice::from_raw_parts(imm_data, imm_len as usize).to_vec()
        };
        let typed = Box::into_raw(Box::new(doca_comch_producer_task_send {
            task: doca_task::new(
                producer as *mut doca_ctx,
                task_free_as::<doca_comch_producer_task_send>,
            ),
            buf,
            imm,
            consumer_id,
        }));
        *(*typed).task.exec.borrow_mut() = Some(Box::new(move || unsafe {
            let conn = (*producer).conn;
            if !(*conn).connected.get() {
                (*typed).task.status.set(DOCA_ERROR_NOT_CONNECTED);
                (*producer).send_conf.complete(typed, &raw mut (*typed).task);
                return;
            }
            let peer = (*conn).peer.get();
            let wanted = (*typed).consumer_id;
            let target = {
                let consumers = (*peer).consumers.borrow();
                consumers
                    .iter()
                    .copied()
                    .find(|&c| unsafe { (*c).id.get() == wanted })
            };
            let Some(target) = target else {
                (*typed).task.status.set(DOCA_ERROR_NOT_FOUND);
                (*producer).send_conf.complete(typed, &raw mut (*typed).task);
                return;
            };

            let delivery = Delivery {
                bytes: (*(*typed).buf).data_slice().to_vec(),
                imm: (*typed).imm.clone(),
                producer_id: (*producer).id.get(),
            };
            pe_enqueue((*target).base.pe.get(), move || unsafe {
                if (*target).base.state.get() != DOCA_CTX_STATE_RUNNING {
                    return;
                }
                let next = (*target).pending.borrow_mut().pop_front();
                match next {
                    Some(waiting) => consumer_deliver(target, waiting, delivery),
                    None => (*target).inbox.borrow_mut().push_back(delivery),
                }
            });

            (*typed).task.status.set(DOCA_SUCCESS);
            (*producer).send_conf.complete(typed, &raw mut (*typed).task);
        }));
        *task = typed;
    }
    DOCA_SUCCESS
}

pub unsafe fn doca_comch_producer_task_send_as_task(
    task: *mut doca_comch_producer_task_send,
) -> *mut doca_task {
    task as *mut doca_task
}
