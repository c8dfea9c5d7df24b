//! Awaitable wrapper around the DOCA offload SDK.
//!
//! The SDK is a callback-driven, non-thread-safe event engine: work is
//! submitted as *tasks* to typed *contexts* and completes asynchronously
//! when the engine is progressed. This crate turns that model into futures:
//!
//! 1. [`ProgressEngine`] drives the SDK engine from a single-threaded tokio
//!    runtime, waiting on the SDK's notification descriptor between bursts
//!    of progress.
//! 2. Every offload context shares one lifecycle core: an idle → starting →
//!    running → stopping → idle state machine whose transitions resolve
//!    futures, parent/child registration so children always stop before
//!    their parents, and scoped wrappers that request a stop on drop.
//! 3. Submitted tasks resolve a [`coro::StatusFuture`] carrying the
//!    operation's status (and per-task payloads such as checksums or
//!    immediate data).
//!
//! # Architecture
//!
//! The engine is strictly single-threaded, like the SDK underneath it: all
//! submissions, completions, and wakeups happen on the executor thread that
//! polls [`ProgressEngine::run`]. Use tokio's `current_thread` runtime with
//! a `LocalSet`, spawn the engine's run loop with `spawn_local`, and keep
//! every context on that thread.

pub mod buffer;
pub mod comch;
pub mod compress;
pub mod coro;
pub mod device;
pub mod devemu;
pub mod dma;
pub mod erasure_coding;
pub mod error;
pub mod eth;
pub mod memory_map;
pub mod rdma;
pub mod sha;
pub mod sync_event;

mod aes_gcm;
mod ctx;
mod engine;
mod offload;

#[doc(hidden)]
pub use ctx::{ContextCore, ContextOps};

pub use aes_gcm::{AesGcm, AesGcmKey, AesGcmKeyType};
pub use buffer::{Buffer, BufferInventory};
pub use compress::{Compress, CompressChecksums};
pub use ctx::{CreateCtxFuture, CtxStateFuture, ScopedContext};
pub use device::{Capability, Device, DeviceRepresentor, RepFilter};
pub use dma::Dma;
pub use engine::{EngineConfig, ProgressEngine};
pub use erasure_coding::{Ec, EcCodingMatrix, EcMatrixType, EcRecoverMatrix, EcUpdateMatrix};
pub use error::{Error, Result};
pub use memory_map::{AccessFlags, MemoryMap};
pub use sha::{Sha, ShaAlgorithm};
pub use sync_event::{SyncEvent, SyncEventRemoteNet};
