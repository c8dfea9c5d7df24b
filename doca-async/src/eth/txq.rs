//! Transmit queues: plain sends and large-send offload.

use crate::buffer::Buffer;
use crate::coro::StatusFuture;
use crate::ctx::{ContextCore, ContextOps, CreateCtxFuture};
use crate::device::{Capability, Device};
use crate::engine::ProgressEngine;
use crate::error::{Error, Result, check};
use crate::offload::{complete_plain, status_offload};
use doca_async_sys::ffi;
use std::any::Any;
use std::cell::Cell;
use std::ffi::c_void;
use std::rc::Rc;

/// Transmit queue configuration.
#[derive(Debug, Clone)]
pub struct EthTxqConfig {
    pub max_burst_size: u32,
    pub max_send_buf_list_len: u32,
    pub metadata_num: u8,
    pub mss: u16,
    pub max_lso_header_size: u16,
    pub l3_chksum_offload: bool,
    pub l4_chksum_offload: bool,
    pub wait_on_time_offload: bool,
}

impl EthTxqConfig {
    pub fn new(max_burst_size: u32) -> Self {
        EthTxqConfig {
            max_burst_size,
            max_send_buf_list_len: 1,
            metadata_num: 0,
            mss: 1500,
            max_lso_header_size: 74,
            l3_chksum_offload: false,
            l4_chksum_offload: false,
            wait_on_time_offload: false,
        }
    }
}

/// One header segment of a large send; segments are chained in order ahead
/// of the payload.
pub struct GatherSegment {
    pub bytes: Vec<u8>,
}

pub struct EthTxq {
    core: ContextCore,
    handle: Cell<*mut ffi::doca_eth_txq>,
    _dev: Device,
}

impl EthTxq {
    pub fn create(
        engine: &ProgressEngine,
        dev: Device,
        max_tasks: u32,
        cfg: &EthTxqConfig,
    ) -> Result<CreateCtxFuture<EthTxq>> {
        if !dev.has_capability(Capability::EthTxq) {
            return Err(Error::NotSupported);
        }
        let mut handle = std::ptr::null_mut();
        check(unsafe { ffi::doca_eth_txq_create(dev.raw(), cfg.max_burst_size, &mut handle) })?;
        unsafe {
            check(ffi::doca_eth_txq_set_type(handle, ffi::DOCA_ETH_TXQ_TYPE_REGULAR))?;
            check(ffi::doca_eth_txq_set_max_send_buf_list_len(
                handle,
                cfg.max_send_buf_list_len,
            ))?;
            check(ffi::doca_eth_txq_set_metadata_num(handle, cfg.metadata_num))?;
            check(ffi::doca_eth_txq_set_mss(handle, cfg.mss))?;
            check(ffi::doca_eth_txq_set_max_lso_header_size(
                handle,
                cfg.max_lso_header_size,
            ))?;
            check(ffi::doca_eth_txq_set_l3_chksum_offload(
                handle,
                cfg.l3_chksum_offload as u8,
            ))?;
            check(ffi::doca_eth_txq_set_l4_chksum_offload(
                handle,
                cfg.l4_chksum_offload as u8,
            ))?;
            check(ffi::doca_eth_txq_set_wait_on_time_offload(
                handle,
                cfg.wait_on_time_offload as u8,
            ))?;
            check(ffi::doca_eth_txq_task_send_set_conf(
                handle,
                send_completion,
                send_completion,
                max_tasks,
            ))?;
            check(ffi::doca_eth_txq_task_lso_send_set_conf(
                handle,
                lso_send_completion,
                lso_send_completion,
                max_tasks,
            ))?;
        }
        engine.create_context(false, move |core| {
            Ok(Rc::new(EthTxq {
                core,
                handle: Cell::new(handle),
                _dev: dev,
            }))
        })
    }

    /// Transmits one frame.
    pub fn send(&self, pkt: &Buffer) -> StatusFuture {
        let handle = self.handle.get();
        let pkt = pkt.raw();
        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_eth_txq_task_send_alloc_init(handle, pkt, user_data, &mut task);
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_eth_txq_task_send_as_task(task))
        })
    }

    /// Large send: the payload is segmented by the device, each segment
    /// prefixed with the supplied headers.
    pub fn lso_send(&self, payload: &Buffer, headers: &mut [GatherSegment]) -> StatusFuture {
        let handle = self.handle.get();
        let payload = payload.raw();

        // build the chained gather list the SDK expects; it only has to stay
        // alive for the duration of the alloc-init call, which copies it
        let mut nodes: Vec<ffi::doca_gather_list> = headers
            .iter_mut()
            .map(|segment| ffi::doca_gather_list {
                addr: segment.bytes.as_mut_ptr() as *mut c_void,
                len: segment.bytes.len(),
                next: std::ptr::null_mut(),
            })
            .collect();
        for i in 1..nodes.len() {
            let next = &mut nodes[i] as *mut ffi::doca_gather_list;
            nodes[i - 1].next = next;
        }
        let head = nodes
            .first_mut()
            .map(|node| node as *mut ffi::doca_gather_list)
            .unwrap_or(std::ptr::null_mut());

        status_offload(&self.core, |user_data| unsafe {
            let mut task = std::ptr::null_mut();
            let err = ffi::doca_eth_txq_task_lso_send_alloc_init(
                handle, payload, head, user_data, &mut task,
            );
            if err != ffi::DOCA_SUCCESS {
                return Err(err);
            }
            Ok(ffi::doca_eth_txq_task_lso_send_as_task(task))
        })
    }
}

impl ContextOps for EthTxq {
    fn core(&self) -> &ContextCore {
        &self.core
    }

    fn as_raw_ctx(&self) -> *mut ffi::doca_ctx {
        unsafe { ffi::doca_eth_txq_as_doca_ctx(self.handle.get()) }
    }

    fn drop_handle(&self) {
        let handle = self.handle.replace(std::ptr::null_mut());
        if !handle.is_null() {
            unsafe { ffi::doca_eth_txq_destroy(handle) };
        }
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

impl Drop for EthTxq {
    fn drop(&mut self) {
        self.drop_handle();
        self.core.release_hook();
    }
}

unsafe extern "C" fn send_completion(
    task: *mut ffi::doca_eth_txq_task_send,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_eth_txq_task_send_as_task(task)) };
}

unsafe extern "C" fn lso_send_completion(
    task: *mut ffi::doca_eth_txq_task_lso_send,
    task_user_data: ffi::doca_data,
    _ctx_user_data: ffi::doca_data,
) {
    unsafe { complete_plain(task_user_data, ffi::doca_eth_txq_task_lso_send_as_task(task)) };
}
