//! Meeting points between SDK completion callbacks and waiting tasks.
//!
//! A [`Receptacle`] is the single-shot slot a callback writes into and a
//! future waits on; an [`AccepterQueue`] couples streams of spontaneous SDK
//! events (connections, messages, packets) to single consumers.

mod accepter;
mod receptacle;
mod value_future;

pub use accepter::AccepterQueue;
pub use value_future::{StatusFuture, ValueFuture};

pub(crate) use receptacle::Receptacle;
