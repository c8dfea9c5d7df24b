//! Inter-host messaging: connection-oriented contexts with nested
//! producer/consumer fast-path channels.
//!
//! A server owns one connection per client; messages, remote-consumer
//! announcements, and data-path channels all hang off the connection:
//!
//! ```text
//! server
//!   ├── connection ── consumer / producer
//!   └── connection ── consumer
//! ```
//!
//! The client side is structurally a server connection fused with its own
//! context: the same queues and child registry, driven by the client's
//! state machine.

mod client;
mod consumer;
mod producer;
mod server;

pub use client::Client;
pub use consumer::{Consumer, ConsumerRecv};
pub use producer::Producer;
pub use server::{Server, ServerConnection, ServerLimits, ScopedServerConnection};

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

/// Lifecycle of one messaging connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConnectionState {
    Connected,
    Disconnecting,
    Disconnected,
}

/// Connection-side index of remote consumers. The expired flag is shared
/// with producers so a send to a consumer that went away fails
/// synchronously.
pub(crate) struct RemoteConsumerRegistry {
    flags: RefCell<HashMap<u32, Rc<Cell<bool>>>>,
}

impl RemoteConsumerRegistry {
    pub(crate) fn new() -> Rc<Self> {
        Rc::new(RemoteConsumerRegistry {
            flags: RefCell::new(HashMap::new()),
        })
    }

    /// Sticky expired flag for a remote consumer id.
    pub(crate) fn flag(&self, consumer_id: u32) -> Rc<Cell<bool>> {
        self.flags
            .borrow_mut()
            .entry(consumer_id)
            .or_insert_with(|| Rc::new(Cell::new(false)))
            .clone()
    }

    pub(crate) fn mark_expired(&self, consumer_id: u32) {
        self.flag(consumer_id).set(true);
    }

    pub(crate) fn is_expired(&self, consumer_id: u32) -> bool {
        self.flags
            .borrow()
            .get(&consumer_id)
            .is_some_and(|flag| flag.get())
    }
}
