//! Messaging server context and its per-client connections.

use super::consumer::Consumer;
use super::producer::Producer;
use super::{ConnectionState, RemoteConsumerRegistry};
use crate::coro::{AccepterQueue, Receptacle, StatusFuture, ValueFuture};
use crate::ctx::{
    ContextCore, ContextId, ContextOps, ContextParent, CreateCtxFuture, DependentContexts,
    request_raw_stop, resolve_ctx,
};
use crate::device::{Capability, Device, DeviceRepresentor};
use crate::engine::{EngineInner, ProgressEngine};
use crate::error::{Error, Result, check};
use crate::memory_map::MemoryMap;
use crate::offload::{complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::{CString, c_void};
use std::rc::{Rc, Weak};
use tracing::{debug, error, warn};

/// Sizing knobs of a messaging server.
#[derive(Debug, Clone)]
pub struct ServerLimits {
    pub num_send_tasks: u32,
    pub max_msg_size: u32,
    pub recv_queue_size: u32,
}

impl Default for ServerLimits {
    fn default() -> Self {
        ServerLimits {
            num_send_tasks: 1024,
            max_msg_size: 4080,
            recv_queue_size: 16,
        }
    }
}

/// One of potentially many connections to a server: message channel,
/// remote-consumer announcements, and parent of producer/consumer children.
pub struct ServerConnection {
    raw: *mut ffi::doca_comch_connection,
    server: Weak<Server>,
    weak_self: Weak<ServerConnection>,
    state: Cell<ConnectionState>,
    messages: AccepterQueue<Vec<u8>>,
    remote_consumers: AccepterQueue<u32>,
    children: DependentContexts,
    remote_flags: Rc<RemoteConsumerRegistry>,
    disconnect_rx: RefCell<Option<Rc<Receptacle<()>>>>,
}

impl ServerConnection {
    fn new(raw: *mut ffi::doca_comch_connection, server: &Rc<Server>) -> Rc<ServerConnection> {
        Rc::new_cyclic(|weak_self| ServerConnection {
            raw,
            server: Rc::downgrade(server),
            weak_self: weak_self.clone(),
            state: Cell::new(ConnectionState::Connected),
            messages: AccepterQueue::new(),
            remote_consumers: AccepterQueue::new(),
            children: DependentContexts::new(),
            remote_flags: RemoteConsumerRegistry::new(),
            disconnect_rx: RefCell::new(None),
        })
    }

    /// Sends a message to the connected client.
    pub fn send(&self, message: &[u8]) -> StatusFuture {
        if self.state.get() != ConnectionState::Connected {
            return StatusFuture::from_error(Error::NotConnected);
        }
        let Some(server) = self.server.upgrade() else {
            return StatusFuture::from_error(Error::Unexpected);
        };
        let server_handle = server.handle.get();
        let conn = self.raw;
        status_offload(&server.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_comch_server_task_send_alloc_init(
                server_handle,
                conn,
                message.as_ptr() as *const c_void,
                message.len(),
                &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            let base = ffi::doca_comch_task_send_as_task(task);
            ffi::doca_task_set_user_data(base, user_data);
            Ok(base)
        })
    }

    /// Receives a message from the connected client. Fails with
    /// `NotConnected` once the connection is gone and the buffered messages
    /// are drained.
    pub fn msg_recv(&self) -> ValueFuture<Vec<u8>> {
        self.messages.accept()
    }

    /// Waits for the client to announce a consumer; resolves to the remote
    /// consumer id usable with a producer.
    pub fn accept_consumer(&self) -> ValueFuture<u32> {
        self.remote_consumers.accept()
    }

    /// Creates a consumer child that receives data buffers from the client,
    /// placed in `user_mmap`.
    pub fn create_consumer(
        &self,
        user_mmap: &MemoryMap,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Consumer>> {
        let this = self.weak_self.upgrade().ok_or(Error::Unexpected)?;
        Consumer::create_on(&this, &self.children, self.raw, user_mmap, max_tasks)
    }

    /// Creates a producer child that sends data buffers to consumers on the
    /// client side.
    pub fn create_producer(&self, max_tasks: u32) -> Result<CreateCtxFuture<Producer>> {
        let this = self.weak_self.upgrade().ok_or(Error::Unexpected)?;
        Producer::create_on(
            &this,
            &self.children,
            self.raw,
            self.remote_flags.clone(),
            max_tasks,
        )
    }

    /// Orderly disconnect: children stop first, then the SDK-level
    /// disconnect runs, then the returned future resolves.
    pub fn disconnect(&self) -> ValueFuture<()> {
        if self.state.get() == ConnectionState::Connected {
            self.state.set(ConnectionState::Disconnecting);
            self.children.stop_all();
            self.disconnect_if_able();
        }
        if self.state.get() == ConnectionState::Disconnected {
            return ValueFuture::from_value(());
        }
        let receptacle = {
            let mut slot = self.disconnect_rx.borrow_mut();
            slot.get_or_insert_with(Receptacle::new).clone()
        };
        ValueFuture::from_receptacle(receptacle)
    }

    fn disconnect_if_able(&self) {
        if !self.children.is_empty() {
            return;
        }
        let Some(server) = self.server.upgrade() else {
            return;
        };
        debug!("disconnecting server connection");
        let err = unsafe { ffi::doca_comch_server_disconnect(server.handle.get(), self.raw) };
        if err == ffi::DOCA_SUCCESS {
            self.signal_disconnect();
        } else {
            error!(
                err = %Error::from_raw(err),
                "could not disconnect server connection"
            );
        }
    }

    pub(crate) fn signal_message(&self, message: Vec<u8>) {
        self.messages.supply(message);
    }

    pub(crate) fn signal_new_consumer(&self, consumer_id: u32) {
        self.remote_consumers.supply(consumer_id);
    }

    pub(crate) fn signal_expired_consumer(&self, consumer_id: u32) {
        self.remote_flags.mark_expired(consumer_id);
    }

    /// Transition to disconnected: queues terminate, the server forgets the
    /// connection (possibly dropping its last owning reference), and any
    /// disconnect waiter resumes last.
    pub(crate) fn signal_disconnect(&self) {
        if self.state.get() == ConnectionState::Disconnected {
            warn!("server connection marked disconnected twice");
            return;
        }
        self.state.set(ConnectionState::Disconnected);
        self.messages.disconnect();
        self.remote_consumers.disconnect();

        let waiter = self.disconnect_rx.borrow_mut().take();
        if let Some(server) = self.server.upgrade() {
            server.signal_disconnect(self.raw);
        }
        if let Some(waiter) = waiter {
            waiter.fulfill(());
        }
    }
}

impl ContextParent for ServerConnection {
    fn signal_stopped_child(&self, child: ContextId) {
        self.children.remove(child);
        if self.state.get() == ConnectionState::Disconnecting {
            self.disconnect_if_able();
        }
    }

    fn engine(&self) -> Weak<EngineInner> {
        self.server
            .upgrade()
            .map(|server| server.core.engine_weak())
            .unwrap_or_default()
    }
}

impl Drop for ServerConnection {
    fn drop(&mut self) {
        if self.state.get() != ConnectionState::Disconnected {
            error!("server connection dropped before it was disconnected");
        }
    }
}

/// Scope wrapper delivering automatic disconnection through RAII.
pub struct ScopedServerConnection {
    conn: Option<Rc<ServerConnection>>,
}

impl From<Rc<ServerConnection>> for ScopedServerConnection {
    fn from(conn: Rc<ServerConnection>) -> Self {
        ScopedServerConnection { conn: Some(conn) }
    }
}

impl std::ops::Deref for ScopedServerConnection {
    type Target = ServerConnection;

    fn deref(&self) -> &ServerConnection {
        self.conn.as_ref().expect("connection already consumed")
    }
}

impl Drop for ScopedServerConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            drop(conn.disconnect());
        }
    }
}

/// Messaging server context; accepts client connections.
pub struct Server {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_comch_server>,
    weak_self: Weak<Server>,
    _dev: Device,
    _rep: DeviceRepresentor,
    connections: AccepterQueue<Rc<ServerConnection>, ScopedServerConnection>,
    open_connections: RefCell<HashMap<usize, Rc<ServerConnection>>>,
    stop_requested: Cell<bool>,
}

impl Server {
    pub fn create(
        engine: &ProgressEngine,
        name: &str,
        dev: Device,
        rep: DeviceRepresentor,
        limits: &ServerLimits,
    ) -> Result<CreateCtxFuture<Server>> {
        let name = CString::new(name).map_err(|_| Error::InvalidValue)?;
        let limits = limits.clone();
        engine.create_context(false, move |core| Server::new(core, name, dev, rep, &limits))
    }

    fn new(
        core: ContextCore,
        name: CString,
        dev: Device,
        rep: DeviceRepresentor,
        limits: &ServerLimits,
    ) -> Result<Rc<Server>> {
        if !dev.has_capability(Capability::ComchServer) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_comch_server_create(dev.raw(), rep.raw(), name.as_ptr(), &mut handle)
        })?;
        let ctx = Rc::new_cyclic(|weak_self| Server {
            core,
            handle: Cell::new(handle),
            weak_self: weak_self.clone(),
            _dev: dev,
            _rep: rep,
            connections: AccepterQueue::new(),
            open_connections: RefCell::new(HashMap::new()),
            stop_requested: Cell::new(false),
        });
        unsafe {
            check(ffi::doca_comch_server_task_send_set_conf(
                handle,
                send_completion,
                send_completion,
                limits.num_send_tasks,
            ))?;
            check(ffi::doca_comch_server_event_msg_recv_register(
                handle,
                msg_recv_event,
            ))?;
            check(ffi::doca_comch_server_event_connection_status_changed_register(
                handle,
                connection_event,
                disconnection_event,
            ))?;
            check(ffi::doca_comch_server_event_consumer_register(
                handle,
                new_consumer_event,
                expired_consumer_event,
            ))?;
            check(ffi::doca_comch_server_set_max_msg_size(
                handle,
                limits.max_msg_size,
            ))?;
            check(ffi::doca_comch_server_set_recv_queue_size(
                handle,
                limits.recv_queue_size,
            ))?;
        }
        Ok(ctx)
    }

    /// Accepts a client connection, delivered pre-wrapped for automatic
    /// disconnection. Fails with `NotConnected` once the server stopped.
    pub fn accept(&self) -> ValueFuture<ScopedServerConnection> {
        self.connections.accept()
    }

    pub fn open_connection_count(&self) -> usize {
        self.open_connections.borrow().len()
    }

    fn stop_if_able(&self) {
        if !self.open_connections.borrow().is_empty() {
            return;
        }
        if let Err(err) = request_raw_stop(self.as_raw_ctx()) {
            error!(%err, "unable to stop messaging server");
        }
    }

    fn signal_disconnect(&self, conn: *mut ffi::doca_comch_connection) {
        let removed = self.open_connections.borrow_mut().remove(&(conn as usize));
        if removed.is_none() {
            error!("disconnect signal for unknown connection");
        }
        if self.stop_requested.get() {
            self.stop_if_able();
        }
    }
}

impl ContextOps for Server {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_comch_server_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_comch_server_destroy(handle) };
        }
    }

    fn state_changed(&self, _prev: ffi::doca_ctx_states, next: ffi::doca_ctx_states) {
        if next == ffi::DOCA_CTX_STATE_IDLE {
            // no more connections are forthcoming
            self.connections.disconnect();
        }
    }

    /// A server stops in cascade: mark the stop, disconnect every open
    /// connection (stopping their children first), and only stop the SDK
    /// handle once the registry is empty.
    fn request_stop(&self) -> Result<()> {
        self.stop_requested.set(true);
        let snapshot: Vec<Rc<ServerConnection>> =
            self.open_connections.borrow().values().cloned().collect();
        for conn in snapshot {
            drop(conn.disconnect());
        }
        self.stop_if_able();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

// ── callback routing ────────────────────────────────────────

fn resolve_server(conn: *mut ffi::doca_comch_connection) -> Option<Rc<Server>> {
    let handle = unsafe { ffi::doca_comch_server_get_server_ctx(conn) };
    if handle.is_null() {
        return None;
    }
    let raw_ctx = unsafe { ffi::doca_comch_server_as_ctx(handle) };
    let ctx = unsafe { resolve_ctx(raw_ctx) }?;
    let server = ctx.as_any().downcast_ref::<Server>()?;
    server.weak_self.upgrade()
}

fn resolve_connection(conn: *mut ffi::doca_comch_connection) -> Option<Rc<ServerConnection>> {
    let server = resolve_server(conn)?;
    let found = server.open_connections.borrow().get(&(conn as usize)).cloned();
    found
}

unsafe extern "C" fn send_completion(
    task: *mut ffi::doca_comch_task_send,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_comch_task_send_as_task(task)) };
}

unsafe extern "C" fn connection_event(
    _event: *mut ffi::doca_comch_event_connection_status_changed,
    conn: *mut ffi::doca_comch_connection,
    change_successful: u8,
) {
    if change_successful == 0 {
        warn!("unsuccessful connection attempt");
        return;
    }
    let Some(server) = resolve_server(conn) else {
        error!("connection to unknown server, bailing out");
        return;
    };
    let connection = ServerConnection::new(conn, &server);
    server
        .open_connections
        .borrow_mut()
        .insert(conn as usize, connection.clone());
    server.connections.supply(connection);
}

unsafe extern "C" fn disconnection_event(
    _event: *mut ffi::doca_comch_event_connection_status_changed,
    conn: *mut ffi::doca_comch_connection,
    change_successful: u8,
) {
    if change_successful == 0 {
        warn!("unsuccessful disconnection attempt");
        return;
    }
    match resolve_connection(conn) {
        // the client went away; the connection is already gone at the SDK
        // level, all that is left is our own transition
        Some(connection) => connection.signal_disconnect(),
        None => warn!("disconnection event for unknown connection"),
    }
}

unsafe extern "C" fn msg_recv_event(
    _event: *mut ffi::doca_comch_event_msg_recv,
    recv_buffer: *mut u8,
    msg_len: u32,
    conn: *mut ffi::doca_comch_connection,
) {
    match resolve_connection(conn) {
        Some(connection) => {
            let message =
                unsafe { std::slice::from_raw_parts(recv_buffer, msg_len as usize) }.to_vec();
            connection.signal_message(message);
        }
        None => error!("message on unknown or expired connection"),
    }
}

unsafe extern "C" fn new_consumer_event(
    _event: *mut ffi::doca_comch_event_consumer,
    conn: *mut ffi::doca_comch_connection,
    remote_consumer_id: u32,
) {
    match resolve_connection(conn) {
        Some(connection) => connection.signal_new_consumer(remote_consumer_id),
        None => error!("new consumer on unknown or expired connection"),
    }
}

unsafe extern "C" fn expired_consumer_event(
    _event: *mut ffi::doca_comch_event_consumer,
    conn: *mut ffi::doca_comch_connection,
    remote_consumer_id: u32,
) {
    if let Some(connection) = resolve_connection(conn) {
        connection.signal_expired_consumer(remote_consumer_id);
    }
}

