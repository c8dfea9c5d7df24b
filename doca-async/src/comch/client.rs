//! Messaging client context.
//!
//! Structurally a server connection fused with its own context: the client's
//! state machine drives the connection state, and the message queue,
//! remote-consumer queue, and child producer/consumer registry match the
//! server side exactly.

use super::consumer::Consumer;
use super::producer::Producer;
use super::RemoteConsumerRegistry;
use crate::coro::{AccepterQueue, StatusFuture, ValueFuture};
use crate::ctx::{
    ContextCore, ContextId, ContextOps, ContextParent, CreateCtxFuture, DependentContexts,
    request_raw_stop, resolve_ctx,
};
use crate::device::{Capability, Device};
use crate::engine::{EngineInner, ProgressEngine};
use crate::error::{Error, Result, check};
use crate::memory_map::MemoryMap;
use crate::offload::{complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::ffi::{CString, c_void};
use std::rc::{Rc, Weak};
use tracing::error;

/// Messaging client; connects to the server published under the same name.
pub struct Client {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_comch_client>,
    weak_self: Weak<Client>,
    _dev: Device,
    connection: Cell<*mut ffi::doca_comch_connection>,
    messages: AccepterQueue<Vec<u8>>,
    remote_consumers: AccepterQueue<u32>,
    children: DependentContexts,
    remote_flags: Rc<RemoteConsumerRegistry>,
    stop_requested: Cell<bool>,
}

impl Client {
    pub fn create(
        engine: &ProgressEngine,
        name: &str,
        dev: Device,
        num_send_tasks: u32,
    ) -> Result<CreateCtxFuture<Client>> {
        let name = CString::new(name).map_err(|_| Error::InvalidValue)?;
        engine.create_context(false, move |core| Client::new(core, name, dev, num_send_tasks))
    }

    fn new(
        core: ContextCore,
        name: CString,
        dev: Device,
        num_send_tasks: u32,
    ) -> Result<Rc<Client>> {
        if !dev.has_capability(Capability::ComchClient) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_comch_client_create(dev.raw(), name.as_ptr(), &mut handle) })?;
        let ctx = Rc::new_cyclic(|weak_self| Client {
            core,
            handle: Cell::new(handle),
            weak_self: weak_self.clone(),
            _dev: dev,
            connection: Cell::new(std::ptr::null_mut()),
            messages: AccepterQueue::new(),
            remote_consumers: AccepterQueue::new(),
            children: DependentContexts::new(),
            remote_flags: RemoteConsumerRegistry::new(),
            stop_requested: Cell::new(false),
        });
        unsafe {
            check(ffi::doca_comch_client_task_send_set_conf(
                handle,
                send_completion,
                send_completion,
                num_send_tasks,
            ))?;
            check(ffi::doca_comch_client_event_msg_recv_register(
                handle,
                msg_recv_event,
            ))?;
            check(ffi::doca_comch_client_event_consumer_register(
                handle,
                new_consumer_event,
                expired_consumer_event,
            ))?;
        }
        Ok(ctx)
    }

    fn connected(&self) -> bool {
        self.core.is_running() && !self.connection.get().is_null()
    }

    /// Sends a message to the server.
    pub fn send(&self, message: &[u8]) -> StatusFuture {
        if !self.connected() {
            return StatusFuture::from_error(Error::NotConnected);
        }
        let handle = self.handle.get();
        let conn = self.connection.get();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_comch_client_task_send_alloc_init(
                handle,
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

    /// Receives a message from the server.
    pub fn msg_recv(&self) -> ValueFuture<Vec<u8>> {
        self.messages.accept()
    }

    /// Waits for the server to announce a consumer.
    pub fn accept_consumer(&self) -> ValueFuture<u32> {
        self.remote_consumers.accept()
    }

    /// Creates a consumer child receiving into `user_mmap`.
    pub fn create_consumer(
        &self,
        user_mmap: &MemoryMap,
        max_tasks: u32,
    ) -> Result<CreateCtxFuture<Consumer>> {
        if !self.connected() {
            return Err(Error::NotConnected);
        }
        let this = self.weak_self.upgrade().ok_or(Error::Unexpected)?;
        Consumer::create_on(
            &this,
            &self.children,
            self.connection.get(),
            user_mmap,
            max_tasks,
        )
    }

    /// Creates a producer child sending to server-side consumers.
    pub fn create_producer(&self, max_tasks: u32) -> Result<CreateCtxFuture<Producer>> {
        if !self.connected() {
            return Err(Error::NotConnected);
        }
        let this = self.weak_self.upgrade().ok_or(Error::Unexpected)?;
        Producer::create_on(
            &this,
            &self.children,
            self.connection.get(),
            self.remote_flags.clone(),
            max_tasks,
        )
    }

    fn stop_if_able(&self) {
        if !self.children.is_empty() {
            return;
        }
        if let Err(err) = request_raw_stop(self.as_raw_ctx()) {
            error!(%err, "unable to stop messaging client");
        }
    }

    fn signal_message(&self, message: Vec<u8>) {
        self.messages.supply(message);
    }

    fn signal_new_consumer(&self, consumer_id: u32) {
        self.remote_consumers.supply(consumer_id);
    }

    fn signal_expired_consumer(&self, consumer_id: u32) {
        self.remote_flags.mark_expired(consumer_id);
    }
}

impl ContextParent for Client {
    fn signal_stopped_child(&self, child: ContextId) {
        self.children.remove(child);
        if self.stop_requested.get() {
            self.stop_if_able();
        }
    }

    fn engine(&self) -> Weak<EngineInner> {
        self.core.engine_weak()
    }
}

impl ContextOps for Client {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_comch_client_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_comch_client_destroy(handle) };
        }
    }

    fn state_changed(&self, _prev: ffi::doca_ctx_states, next: ffi::doca_ctx_states) {
        match next {
            ffi::DOCA_CTX_STATE_RUNNING => {
                let mut conn = std::ptr::null_mut();
                let err =
                    unsafe { ffi::doca_comch_client_get_connection(self.handle.get(), &mut conn) };
                if err == ffi::DOCA_SUCCESS {
                    self.connection.set(conn);
                } else {
                    error!(
                        err = %Error::from_raw(err),
                        "client running but connection is unavailable"
                    );
                }
            }
            ffi::DOCA_CTX_STATE_IDLE => {
                self.connection.set(std::ptr::null_mut());
                self.messages.disconnect();
                self.remote_consumers.disconnect();
            }
            _ => {}
        }
    }

    /// Client stop cascades like the server's: children first, then the SDK
    /// stop once the registry drained.
    fn request_stop(&self) -> Result<()> {
        self.stop_requested.set(true);
        self.children.stop_all();
        self.stop_if_able();
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

// ── callback routing ────────────────────────────────────────

fn resolve_client(conn: *mut ffi::doca_comch_connection) -> Option<Rc<Client>> {
    let handle = unsafe { ffi::doca_comch_client_get_client_ctx(conn) };
    if handle.is_null() {
        return None;
    }
    let raw_ctx = unsafe { ffi::doca_comch_client_as_ctx(handle) };
    let ctx = unsafe { resolve_ctx(raw_ctx) }?;
    let client = ctx.as_any().downcast_ref::<Client>()?;
    client.weak_self.upgrade()
}

unsafe extern "C" fn send_completion(
    task: *mut ffi::doca_comch_task_send,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_comch_task_send_as_task(task)) };
}

unsafe extern "C" fn msg_recv_event(
    _event: *mut ffi::doca_comch_event_msg_recv,
    recv_buffer: *mut u8,
    msg_len: u32,
    conn: *mut ffi::doca_comch_connection,
) {
    match resolve_client(conn) {
        Some(client) => {
            let message =
                unsafe { std::slice::from_raw_parts(recv_buffer, msg_len as usize) }.to_vec();
            client.signal_message(message);
        }
        None => error!("message for unknown or stopped client"),
    }
}

unsafe extern "C" fn new_consumer_event(
    _event: *mut ffi::doca_comch_event_consumer,
    conn: *mut ffi::doca_comch_connection,
    remote_consumer_id: u32,
) {
    match resolve_client(conn) {
        Some(client) => client.signal_new_consumer(remote_consumer_id),
        None => error!("new consumer for unknown or stopped client"),
    }
}

unsafe extern "C" fn expired_consumer_event(
    _event: *mut ffi::doca_comch_event_consumer,
    conn: *mut ffi::doca_comch_connection,
    remote_consumer_id: u32,
) {
    if let Some(client) = resolve_client(conn) {
        client.signal_expired_consumer(remote_consumer_id);
    }
}
