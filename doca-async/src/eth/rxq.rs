//! Receive queues in the three data-path flavors: explicit receive tasks,
//! managed mempool delivery, and batched managed delivery.

use super::FlowTarget;
use crate::buffer::Buffer;
use crate::coro::{AccepterQueue, StatusFuture, ValueFuture};
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture};
use crate::device::{Capability, Device};
use crate::engine::ProgressEngine;
use crate::error::{Error, Result, check};
use crate::memory_map::MemoryMap;
use crate::offload::{complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::ffi::c_void;
use std::rc::{Rc, Weak};

/// Packet memory handed to a managed receive queue.
pub struct PacketBuffer<'a> {
    pub mmap: &'a MemoryMap,
    pub offset: u32,
    pub length: u32,
}

/// Receive queue configuration shared by all flavors.
#[derive(Debug, Clone)]
pub struct EthRxqConfig {
    pub max_burst_size: u32,
    pub max_packet_size: u32,
    pub metadata_num: Option<u8>,
    pub enable_flow_tag: bool,
    pub enable_rx_hash: bool,
    pub packet_headroom: Option<u16>,
    pub packet_tailroom: Option<u16>,
    pub enable_timestamp: bool,
    pub max_recv_buf_list_len: Option<u32>,
}

impl EthRxqConfig {
    pub fn new(max_burst_size: u32, max_packet_size: u32) -> Self {
        EthRxqConfig {
            max_burst_size,
            max_packet_size,
            metadata_num: None,
            enable_flow_tag: false,
            enable_rx_hash: false,
            packet_headroom: None,
            packet_tailroom: None,
            enable_timestamp: false,
            max_recv_buf_list_len: None,
        }
    }
}

fn create_rxq_handle(
    dev: &Device,
    cfg: &EthRxqConfig,
    rxq_type: ffi::doca_eth_rxq_type,
    pkt_buf: Option<&PacketBuffer<'_>>,
) -> Result<*mut ffi::doca_eth_rxq> {
    if !dev.has_capability(Capability::EthRxq) {
        return Err(Error::NotSupported);
    }
    let mut handle = std::ptr::null_mut();
    check(unsafe {
        ffi::doca_eth_rxq_create(dev.raw(), cfg.max_burst_size, cfg.max_packet_size, &mut handle)
    })?;
    unsafe {
        check(ffi::doca_eth_rxq_set_type(handle, rxq_type))?;
        if let Some(metadata_num) = cfg.metadata_num {
            check(ffi::doca_eth_rxq_set_metadata_num(handle, metadata_num))?;
        }
        if cfg.enable_flow_tag {
            check(ffi::doca_eth_rxq_set_flow_tag(handle, 1))?;
        }
        if cfg.enable_rx_hash {
            check(ffi::doca_eth_rxq_set_rx_hash(handle, 1))?;
        }
        if let Some(headroom) = cfg.packet_headroom {
            check(ffi::doca_eth_rxq_set_packet_headroom(handle, headroom))?;
        }
        if let Some(tailroom) = cfg.packet_tailroom {
            check(ffi::doca_eth_rxq_set_packet_tailroom(handle, tailroom))?;
        }
        if cfg.enable_timestamp {
            check(ffi::doca_eth_rxq_set_timestamp(handle, 1))?;
        }
        if let Some(list_len) = cfg.max_recv_buf_list_len {
            check(ffi::doca_eth_rxq_set_max_recv_buf_list_len(handle, list_len))?;
        }
        if let Some(pkt_buf) = pkt_buf {
            check(ffi::doca_eth_rxq_set_pkt_buf(
                handle,
                pkt_buf.mmap.raw(),
                pkt_buf.offset,
                pkt_buf.length,
            ))?;
        }
    }
    Ok(handle)
}

fn flow_target_for(handle: *mut ffi::doca_eth_rxq, outer_flags: u32, inner_flags: u32) -> Result<FlowTarget> {
    let mut queue_id = 0u16;
    check(unsafe { ffi::doca_eth_rxq_get_flow_queue_id(handle, &mut queue_id) })?;
    Ok(FlowTarget {
        queue_id,
        outer_flags,
        inner_flags,
    })
}

// ── explicit receive ────────────────────────────────────────

/// Receive queue with explicit per-packet receive tasks.
pub struct EthRxq {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_eth_rxq>,
    _dev: Device,
}

impl EthRxq {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        max_tasks: u32,
        cfg: &EthRxqConfig,
    ) -> Result<CreateCtxFuture<EthRxq>> {
        let handle = create_rxq_handle(&dev, cfg, ffi::DOCA_ETH_RXQ_TYPE_REGULAR, None)?;
        check(unsafe {
            ffi::doca_eth_rxq_task_recv_set_conf(handle, recv_completion, recv_completion, max_tasks)
        })?;
        engine.create_context(false, move |core| {
            Ok(Rc::new(EthRxq {
                core,
                handle: Cell::new(handle),
                _dev: dev,
            }))
        })
    }

    /// Receives one frame into `dest`.
    pub fn receive(&self, dest: &mut Buffer) -> StatusFuture {
        let handle = self.handle.get();
        let dest = dest.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_eth_rxq_task_recv_alloc_init(handle, dest, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_eth_rxq_task_recv_as_task(task))
        })
    }

    pub fn flow_target(&self, outer_flags: u32, inner_flags: u32) -> Result<FlowTarget> {
        flow_target_for(self.handle.get(), outer_flags, inner_flags)
    }
}

impl ContextOps for EthRxq {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_eth_rxq_as_doca_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_eth_rxq_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for EthRxq {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn recv_completion(
    task: *mut ffi::doca_eth_rxq_task_recv,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_eth_rxq_task_recv_as_task(task)) };
}

// ── managed delivery ────────────────────────────────────────

/// Event-routing hook for managed receive events; freed with the handle.
struct ManagedHook<T: ?Sized> {
    target: Weak<T>,
}

/// Receive queue whose packets arrive from an SDK-managed mempool; each
/// delivered buffer is already filled and owned by the caller.
pub struct EthRxqManaged {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_eth_rxq>,
    hook: Cell<*mut ManagedHook<EthRxqManaged>>,
    packets: AccepterQueue<Buffer>,
    _dev: Device,
}

impl EthRxqManaged {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        cfg: &EthRxqConfig,
        pkt_buf: PacketBuffer<'_>,
    ) -> Result<CreateCtxFuture<EthRxqManaged>> {
        let handle =
            create_rxq_handle(&dev, cfg, ffi::DOCA_ETH_RXQ_TYPE_MANAGED_MEMPOOL, Some(&pkt_buf))?;
        engine.create_context(false, move |core| {
            let ctx = Rc::new_cyclic(|weak_self| EthRxqManaged {
                core,
                handle: Cell::new(handle),
                hook: Cell::new(Box::into_raw(Box::new(ManagedHook {
                    target: weak_self.clone(),
                }))),
                packets: AccepterQueue::new(),
                _dev: dev,
            });
            check(unsafe {
                ffi::doca_eth_rxq_event_managed_recv_register(
                    handle,
                    ffi::doca_data {
                        ptr: ctx.hook.get() as *mut c_void,
                    },
                    managed_recv_event,
                )
            })?;
            Ok(ctx)
        })
    }

    /// Next delivered packet. Fails with `NotConnected` once the queue
    /// stopped.
    pub fn receive(&self) -> ValueFuture<Buffer> {
        self.packets.accept()
    }

    pub fn flow_target(&self, outer_flags: u32, inner_flags: u32) -> Result<FlowTarget> {
        flow_target_for(self.handle.get(), outer_flags, inner_flags)
    }
}

impl ContextOps for EthRxqManaged {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_eth_rxq_as_doca_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_eth_rxq_destroy(handle) };
        }
        let hook = self.hook.replace(std::ptr::null_mut());
        if !hook.is_null() {
            drop(unsafe { Box::from_raw(hook) });
        }
    }

    fn state_changed(&self, _prev: ffi::doca_ctx_states, next: ffi::doca_ctx_states) {
        if next == ffi::DOCA_CTX_STATE_IDLE {
            self.packets.disconnect();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for EthRxqManaged {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn managed_recv_event(
    _event: *mut ffi::doca_eth_rxq_event_managed_recv,
    pkt: *mut ffi::doca_buf,
    user_data: ffi::doca_data,
) {
    let hook = unsafe { user_data.ptr } as *mut ManagedHook<EthRxqManaged>;
    if hook.is_null() {
        return;
    }
    let Some(rxq) = (unsafe { &*hook }).target.upgrade() else {
        return;
    };
    rxq.packets.supply(Buffer::from_raw(pkt));
}

// ── batched managed delivery ────────────────────────────────

/// Managed receive queue delivering whole event batches at once.
pub struct EthRxqBatchManaged {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_eth_rxq>,
    hook: Cell<*mut ManagedHook<EthRxqBatchManaged>>,
    batches: AccepterQueue<Vec<Buffer>>,
    _dev: Device,
}

impl EthRxqBatchManaged {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        cfg: &EthRxqConfig,
        pkt_buf: PacketBuffer<'_>,
        events_number_max: u32,
        events_number_min: u32,
    ) -> Result<CreateCtxFuture<EthRxqBatchManaged>> {
        let handle =
            create_rxq_handle(&dev, cfg, ffi::DOCA_ETH_RXQ_TYPE_MANAGED_MEMPOOL, Some(&pkt_buf))?;
        engine.create_context(false, move |core| {
            let ctx = Rc::new_cyclic(|weak_self| EthRxqBatchManaged {
                core,
                handle: Cell::new(handle),
                hook: Cell::new(Box::into_raw(Box::new(ManagedHook {
                    target: weak_self.clone(),
                }))),
                batches: AccepterQueue::new(),
                _dev: dev,
            });
            check(unsafe {
                ffi::doca_eth_rxq_event_batch_managed_recv_register(
                    handle,
                    events_number_max,
                    events_number_min,
                    ffi::doca_data {
                        ptr: ctx.hook.get() as *mut c_void,
                    },
                    batch_managed_recv_event,
                )
            })?;
            Ok(ctx)
        })
    }

    /// Next batch of delivered packets.
    pub fn batch_receive(&self) -> ValueFuture<Vec<Buffer>> {
        self.batches.accept()
    }

    pub fn flow_target(&self, outer_flags: u32, inner_flags: u32) -> Result<FlowTarget> {
        flow_target_for(self.handle.get(), outer_flags, inner_flags)
    }
}

impl ContextOps for EthRxqBatchManaged {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_eth_rxq_as_doca_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_eth_rxq_destroy(handle) };
        }
        let hook = self.hook.replace(std::ptr::null_mut());
        if !hook.is_null() {
            drop(unsafe { Box::from_raw(hook) });
        }
    }

    fn state_changed(&self, _prev: ffi::doca_ctx_states, next: ffi::doca_ctx_states) {
        if next == ffi::DOCA_CTX_STATE_IDLE {
            self.batches.disconnect();
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for EthRxqBatchManaged {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn batch_managed_recv_event(
    _event: *mut ffi::doca_eth_rxq_event_batch_managed_recv,
    events_number: u16,
    user_data: ffi::doca_data,
    status: ffi::doca_error_t,
    pkt_array: *mut *mut ffi::doca_buf,
) {
    if status != ffi::DOCA_SUCCESS {
        return;
    }
    let hook = unsafe { user_data.ptr } as *mut ManagedHook<EthRxqBatchManaged>;
    if hook.is_null() {
        return;
    }
    let Some(rxq) = (unsafe { &*hook }).target.upgrade() else {
        return;
    };
    let batch = unsafe {
        std::slice::from_raw_parts(pkt_array, events_number as usize)
            .iter()
            .map(|&pkt| Buffer::from_raw(pkt))
            .collect()
    };
    rxq.batches.supply(batch);
}
