//! RDMA offload: connection establishment out-of-band or through the
//! connection manager, and the verb set on established connections.
//!
//! Receive is the only verb whose future carries extra data: the immediate
//! value, converted from network order.

use crate::buffer::Buffer;
use crate::coro::{Receptacle, StatusFuture, ValueFuture};
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture};
use crate::device::{Capability, Device};
use crate::engine::ProgressEngine;
use crate::error::{Error, Result, check};
use crate::memory_map::AccessFlags;
use crate::offload::{complete, complete_plain, status_offload};
use crate::sync_event::SyncEventRemoteNet;
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::{Cell, RefCell};
use std::ffi::{CString, c_void};
use std::rc::{Rc, Weak};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransportType {
    #[default]
    Rc,
    Dc,
}

/// Configuration of an RDMA context.
#[derive(Clone)]
pub struct RdmaConfig {
    pub permissions: AccessFlags,
    pub gid_index: Option<u32>,
    pub max_tasks: u32,
    pub max_num_connections: u16,
    pub transport_type: TransportType,
}

impl Default for RdmaConfig {
    fn default() -> Self {
        RdmaConfig {
            permissions: AccessFlags::LOCAL_READ_WRITE,
            gid_index: None,
            max_tasks: 16,
            max_num_connections: 1,
            transport_type: TransportType::Rc,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrType {
    Ipv4,
    Ipv6,
    Gid,
}

/// Address for CM connections.
pub struct RdmaAddress {
    raw: *mut ffi::doca_rdma_addr,
}

impl RdmaAddress {
    pub fn new(addr_type: AddrType, address: &str, port: u16) -> Result<RdmaAddress> {
        let address = CString::new(address).map_err(|_| Error::InvalidValue)?;
        let raw_type = match addr_type {
            AddrType::Ipv4 => ffi::DOCA_RDMA_ADDR_TYPE_IPV4,
            AddrType::Ipv6 => ffi::DOCA_RDMA_ADDR_TYPE_IPV6,
            AddrType::Gid => ffi::DOCA_RDMA_ADDR_TYPE_GID,
        };
        let mut raw = std::ptr::null_mut();
        check(unsafe { ffi::doca_rdma_addr_create(raw_type, address.as_ptr(), port, &mut raw) })?;
        Ok(RdmaAddress { raw })
    }

    pub(crate) fn raw(&self) -> *const ffi::doca_rdma_addr {
        self.raw
    }
}

impl Drop for RdmaAddress {
    fn drop(&mut self) {
        unsafe { ffi::doca_rdma_addr_destroy(self.raw) };
    }
}

struct ConnectionInner {
    raw: *mut ffi::doca_rdma_connection,
    rdma: Rc<Rdma>,
    connected: Cell<bool>,
    details: Vec<u8>,
}

impl Drop for ConnectionInner {
    fn drop(&mut self) {
        unsafe { ffi::doca_rdma_connection_disconnect(self.raw) };
    }
}

/// One RDMA endpoint pair. Obtained from [`Rdma::export_connection`],
/// [`Rdma::listen`], or [`Rdma::connect_addr`]; most verbs run here.
pub struct RdmaConnection {
    inner: Rc<ConnectionInner>,
}

impl RdmaConnection {
    /// Out-of-band connection details to hand to the peer (when not using
    /// the connection manager).
    pub fn details(&self) -> &[u8] {
        &self.inner.details
    }

    /// Establishes the connection using the peer's exported details.
    pub fn connect(&self, remote_details: &[u8]) -> Result<()> {
        check(unsafe {
            ffi::doca_rdma_connect(
                self.inner.rdma.handle.get(),
                remote_details.as_ptr() as *const c_void,
                remote_details.len(),
                self.inner.raw,
            )
        })?;
        self.inner.connected.set(true);
        Ok(())
    }

    fn rdma(&self) -> &Rdma {
        &self.inner.rdma
    }

    fn guard(&self) -> Option<Error> {
        if !self.inner.rdma.core.is_running() || !self.inner.connected.get() {
            return Some(Error::NotConnected);
        }
        None
    }

    /// IB send verb.
    pub fn send(&self, src: &Buffer) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let src = src.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_send_alloc_init(rdma, conn, src, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_send_as_task(task))
        })
    }

    /// IB send verb with immediate data.
    pub fn send_imm(&self, src: &Buffer, immediate_data: u32) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let src = src.raw();
        let imm = immediate_data.to_be();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err =
                ffi::doca_rdma_task_send_imm_alloc_init(rdma, conn, src, imm, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_send_imm_as_task(task))
        })
    }

    /// IB receive verb; must be posted before the remote sends. Resolves to
    /// the immediate value carried by the matching send or write (zero when
    /// there was none), in host byte order.
    pub fn receive(&self, dest: &mut Buffer) -> StatusFuture<u32> {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let dest = dest.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_receive_alloc_init(rdma, dest, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_receive_as_task(task))
        })
    }

    /// IB read verb: remote memory into a local buffer.
    pub fn read(&self, src: &Buffer, dest: &mut Buffer) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let src = src.raw();
        let dest = dest.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err =
                ffi::doca_rdma_task_read_alloc_init(rdma, conn, src, dest, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_read_as_task(task))
        })
    }

    /// IB write verb: local buffer into remote memory.
    pub fn write(&self, src: &Buffer, dest: &mut Buffer) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let src = src.raw();
        let dest = dest.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err =
                ffi::doca_rdma_task_write_alloc_init(rdma, conn, src, dest, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_write_as_task(task))
        })
    }

    /// IB write verb with immediate data; the peer observes the immediate on
    /// a posted receive.
    pub fn write_imm(&self, src: &Buffer, dest: &mut Buffer, immediate_data: u32) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let src = src.raw();
        let dest = dest.raw();
        let imm = immediate_data.to_be();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_write_imm_alloc_init(
                rdma, conn, src, dest, imm, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_write_imm_as_task(task))
        })
    }

    /// Atomic compare-and-swap on a remote 8-byte location; `result`
    /// receives the prior value.
    pub fn atomic_cmp_swp(
        &self,
        dst: &mut Buffer,
        result: &mut Buffer,
        cmp_data: u64,
        swap_data: u64,
    ) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let dst = dst.raw();
        let result = result.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_atomic_cmp_swp_alloc_init(
                rdma, conn, dst, result, cmp_data, swap_data, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_atomic_cmp_swp_as_task(task))
        })
    }

    /// Atomic fetch-and-add on a remote 8-byte location; `result` receives
    /// the prior value.
    pub fn atomic_fetch_add(
        &self,
        dst: &mut Buffer,
        result: &mut Buffer,
        add_data: u64,
    ) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let dst = dst.raw();
        let result = result.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_atomic_fetch_add_alloc_init(
                rdma, conn, dst, result, add_data, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_atomic_fetch_add_as_task(task))
        })
    }

    /// Reads a remote sync event's value into `dst` (8 bytes).
    pub fn remote_net_sync_event_get(
        &self,
        event: &SyncEventRemoteNet,
        dst: &mut Buffer,
    ) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let event = event.raw();
        let dst = dst.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_remote_net_sync_event_get_alloc_init(
                rdma, conn, event, dst, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_remote_net_sync_event_get_as_task(task))
        })
    }

    /// Sets a remote sync event to the 8-byte value in `src`.
    pub fn remote_net_sync_event_notify_set(
        &self,
        event: &SyncEventRemoteNet,
        src: &Buffer,
    ) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let event = event.raw();
        let src = src.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_remote_net_sync_event_notify_set_alloc_init(
                rdma, conn, event, src, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_remote_net_sync_event_notify_set_as_task(task))
        })
    }

    /// Adds to a remote sync event; `result` receives the prior value.
    pub fn remote_net_sync_event_notify_add(
        &self,
        event: &SyncEventRemoteNet,
        result: &mut Buffer,
        add_data: u64,
    ) -> StatusFuture {
        if let Some(err) = self.guard() {
            return StatusFuture::from_error(err);
        }
        let rdma = self.rdma().handle.get();
        let conn = self.inner.raw;
        let event = event.raw();
        let result = result.raw();
        status_offload(&self.rdma().core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_rdma_task_remote_net_sync_event_notify_add_alloc_init(
                rdma, conn, event, result, add_data, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_rdma_task_remote_net_sync_event_notify_add_as_task(task))
        })
    }
}

/// RDMA offload context.
pub struct Rdma {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_rdma>,
    weak_self: Weak<Rdma>,
    _dev: Device,
    // single CM listener per context, keyed only for diagnostics
    listener: RefCell<Option<(u16, Rc<Receptacle<RdmaConnection>>)>>,
}

impl Rdma {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        config: RdmaConfig,
    ) -> Result<CreateCtxFuture<Rdma>> {
        engine.create_context(false, move |core| Rdma::new(core, dev, config))
    }

    fn new(core: ContextCore, dev: Device, config: RdmaConfig) -> Result<Rc<Rdma>> {
        if !dev.has_capability(Capability::Rdma) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_rdma_create(dev.raw(), &mut handle) })?;
        let ctx = Rc::new_cyclic(|weak_self| Rdma {
            core,
            handle: Cell::new(handle),
            weak_self: weak_self.clone(),
            _dev: dev,
            listener: RefCell::new(None),
        });
        unsafe {
            check(ffi::doca_rdma_set_permissions(handle, config.permissions.bits()))?;
            if let Some(gid_index) = config.gid_index {
                check(ffi::doca_rdma_set_gid_index(handle, gid_index))?;
            }
            check(ffi::doca_rdma_set_max_num_connections(
                handle,
                config.max_num_connections,
            ))?;
            check(ffi::doca_rdma_set_transport_type(
                handle,
                match config.transport_type {
                    TransportType::Rc => ffi::DOCA_RDMA_TRANSPORT_TYPE_RC,
                    TransportType::Dc => ffi::DOCA_RDMA_TRANSPORT_TYPE_DC,
                },
            ))?;
            check(ffi::doca_rdma_set_connection_state_callbacks(
                handle,
                connection_request,
                connection_established,
                connection_failure,
                connection_disconnected,
            ))?;

            let max_tasks = config.max_tasks;
            check(ffi::doca_rdma_task_send_set_conf(
                handle,
                send_completion,
                send_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_send_imm_set_conf(
                handle,
                send_imm_completion,
                send_imm_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_receive_set_conf(
                handle,
                receive_completion,
                receive_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_read_set_conf(
                handle,
                read_completion,
                read_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_write_set_conf(
                handle,
                write_completion,
                write_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_write_imm_set_conf(
                handle,
                write_imm_completion,
                write_imm_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_atomic_cmp_swp_set_conf(
                handle,
                cmp_swp_completion,
                cmp_swp_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_atomic_fetch_add_set_conf(
                handle,
                fetch_add_completion,
                fetch_add_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_remote_net_sync_event_get_set_conf(
                handle,
                se_get_completion,
                se_get_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_remote_net_sync_event_notify_set_set_conf(
                handle,
                se_set_completion,
                se_set_completion,
                max_tasks,
            ))?;
            check(ffi::doca_rdma_task_remote_net_sync_event_notify_add_set_conf(
                handle,
                se_add_completion,
                se_add_completion,
                max_tasks,
            ))?;
        }
        Ok(ctx)
    }

    fn make_connection(
        &self,
        raw: *mut ffi::doca_rdma_connection,
        connected: bool,
        details: Vec<u8>,
    ) -> Result<RdmaConnection> {
        let rdma = self.weak_self.upgrade().ok_or(Error::Unexpected)?;
        Ok(RdmaConnection {
            inner: Rc::new(ConnectionInner {
                raw,
                rdma,
                connected: Cell::new(connected),
                details,
            }),
        })
    }

    /// Serialized connection details for out-of-band exchange. Hand
    /// [`RdmaConnection::details`] to the peer, then call
    /// [`RdmaConnection::connect`] with the peer's bytes.
    pub fn export_connection(&self) -> Result<RdmaConnection> {
        let mut details: *const c_void = std::ptr::null();
        let mut details_len = 0usize;
        let mut raw = std::ptr::null_mut();
        check(unsafe {
            ffi::doca_rdma_export(self.handle.get(), &mut details, &mut details_len, &mut raw)
        })?;
        let details = unsafe { std::slice::from_raw_parts(details as *const u8, details_len) };
        self.make_connection(raw, false, details.to_vec())
    }

    /// Listens for one CM connection on `port`; resolves when a peer
    /// connected and was accepted.
    pub fn listen(&self, port: u16) -> Result<ValueFuture<RdmaConnection>> {
        check(unsafe { ffi::doca_rdma_start_listen_to_port(self.handle.get(), port) })?;
        let future = ValueFuture::create_space();
        *self.listener.borrow_mut() = Some((port, future.receptacle().clone()));
        Ok(future)
    }

    /// Connects to a CM listener; resolves when the connection is
    /// established.
    pub fn connect_addr(&self, peer: &RdmaAddress) -> ValueFuture<RdmaConnection> {
        let future = ValueFuture::create_space();
        let user_data = ffi::doca_data {
            ptr: Rc::into_raw(future.receptacle().clone()) as *mut c_void,
        };
        let err =
            unsafe { ffi::doca_rdma_connect_to_addr(self.handle.get(), peer.raw(), user_data) };
        if err != ffi::DOCA_SUCCESS {
            drop(unsafe {
                Rc::from_raw(user_data.ptr as *const Receptacle<RdmaConnection>)
            });
            return ValueFuture::from_error(Error::from_raw(err));
        }
        future
    }

    fn handle_connection_request(&self, conn: *mut ffi::doca_rdma_connection) {
        let err = unsafe { ffi::doca_rdma_connection_accept(conn) };
        if err != ffi::DOCA_SUCCESS {
            if let Some((port, waiter)) = self.listener.borrow_mut().take() {
                warn!(port, "could not accept incoming connection");
                waiter.fail(Error::from_raw(err));
            }
        }
    }

    fn handle_connection_established(&self, conn: *mut ffi::doca_rdma_connection) {
        let Some((_, waiter)) = self.listener.borrow_mut().take() else {
            return;
        };
        match self.make_connection(conn, true, Vec::new()) {
            Ok(connection) => waiter.fulfill(connection),
            Err(err) => waiter.fail(err),
        }
    }

    fn handle_connection_failure(&self, _conn: *mut ffi::doca_rdma_connection) {
        if let Some((port, waiter)) = self.listener.borrow_mut().take() {
            warn!(port, "incoming connection failed");
            waiter.fail(Error::ConnectionAborted);
        }
    }
}

impl ContextOps for Rdma {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_rdma_as_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_rdma_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for Rdma {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

// ── connection-state callbacks ──────────────────────────────

fn resolve_rdma(ctx_user_data: ffi::doca_data) -> Option<Rc<Rdma>> {
    // ctx user-data is the generic state-change hook; recover the context
    // through it and downcast
    let hook = unsafe { ctx_user_data.ptr } as *mut crate::ctx::CtxHook;
    if hook.is_null() {
        return None;
    }
    let ctx = unsafe { crate::ctx::hook_target(hook) }?;
    let rdma = ctx.as_any().downcast_ref::<Rdma>()?;
    rdma.weak_self.upgrade()
}

unsafe extern "C" fn connection_request(
    conn: *mut ffi::doca_rdma_connection,
    ctx_user_data: ffi::doca_data,
) {
    if let Some(rdma) = resolve_rdma(ctx_user_data) {
        rdma.handle_connection_request(conn);
    }
}

unsafe extern "C" fn connection_established(
    conn: *mut ffi::doca_rdma_connection,
    conn_user_data: ffi::doca_data,
    ctx_user_data: ffi::doca_data,
) {
    let waiter_ptr = unsafe { conn_user_data.ptr };
    if !waiter_ptr.is_null() {
        // connect_addr side: the connection user-data is the waiter
        let waiter =
            unsafe { Rc::from_raw(waiter_ptr as *const Receptacle<RdmaConnection>) };
        let Some(rdma) = resolve_rdma(ctx_user_data) else {
            waiter.fail(Error::Unexpected);
            return;
        };
        match rdma.make_connection(conn, true, Vec::new()) {
            Ok(connection) => waiter.fulfill(connection),
            Err(err) => waiter.fail(err),
        }
        return;
    }

    // listener side
    if let Some(rdma) = resolve_rdma(ctx_user_data) {
        rdma.handle_connection_established(conn);
    }
}

unsafe extern "C" fn connection_failure(
    conn: *mut ffi::doca_rdma_connection,
    conn_user_data: ffi::doca_data,
    ctx_user_data: ffi::doca_data,
) {
    let waiter_ptr = unsafe { conn_user_data.ptr };
    if !waiter_ptr.is_null() {
        let waiter =
            unsafe { Rc::from_raw(waiter_ptr as *const Receptacle<RdmaConnection>) };
        waiter.fail(Error::ConnectionAborted);
        return;
    }
    if let Some(rdma) = resolve_rdma(ctx_user_data) {
        rdma.handle_connection_failure(conn);
    }
}

unsafe extern "C" fn connection_disconnected(
    _conn: *mut ffi::doca_rdma_connection,
    _conn_user_data: ffi::doca_data,
    ctx_user_data: ffi::doca_data,
) {
    if resolve_rdma(ctx_user_data).is_some() {
        warn!("rdma peer disconnected");
    }
}

// ── task completion callbacks ───────────────────────────────

macro_rules! plain_completion {
    ($fn_name:ident, $task:ty, $as_task:ident) => {
        unsafe extern "C" fn $fn_name(
            task: *mut $task,
            task_user_data: ffi::doca_data,
            _ctx_user_data: ffi::doca_data,
        ) {
            unsafe { complete_plain(task_user_data, ffi::$as_task(task)) };
        }
    };
}

plain_completion!(send_completion, ffi::doca_rdma_task_send, doca_rdma_task_send_as_task);
plain_completion!(
    send_imm_completion,
    ffi::doca_rdma_task_send_imm,
    doca_rdma_task_send_imm_as_task
);
plain_completion!(read_completion, ffi::doca_rdma_task_read, doca_rdma_task_read_as_task);
plain_completion!(write_completion, ffi::doca_rdma_task_write, doca_rdma_task_write_as_task);
plain_completion!(
    write_imm_completion,
    ffi::doca_rdma_task_write_imm,
    doca_rdma_task_write_imm_as_task
);
plain_completion!(
    cmp_swp_completion,
    ffi::doca_rdma_task_atomic_cmp_swp,
    doca_rdma_task_atomic_cmp_swp_as_task
);
plain_completion!(
    fetch_add_completion,
    ffi::doca_rdma_task_atomic_fetch_add,
    doca_rdma_task_atomic_fetch_add_as_task
);
plain_completion!(
    se_get_completion,
    ffi::doca_rdma_task_remote_net_sync_event_get,
    doca_rdma_task_remote_net_sync_event_get_as_task
);
plain_completion!(
    se_set_completion,
    ffi::doca_rdma_task_remote_net_sync_event_notify_set,
    doca_rdma_task_remote_net_sync_event_notify_set_as_task
);
plain_completion!(
    se_add_completion,
    ffi::doca_rdma_task_remote_net_sync_event_notify_add,
    doca_rdma_task_remote_net_sync_event_notify_add_as_task
);

unsafe extern "C" fn receive_completion(
    task: *mut ffi::doca_rdma_task_receive,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe {
        let base = ffi::doca_rdma_task_receive_as_task(task);
        complete(task_user_data, base, || unsafe {
            u32::from_be(ffi::doca_rdma_task_receive_get_result_immediate_data(task))
        });
    }
}
