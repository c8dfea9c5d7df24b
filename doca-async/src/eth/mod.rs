//! Ethernet receive and transmit queues.

mod rxq;
mod txq;

pub use rxq::{EthRxq, EthRxqBatchManaged, EthRxqConfig, EthRxqManaged, PacketBuffer};
pub use txq::{EthTxq, EthTxqConfig, GatherSegment};

/// Descriptor publishing a receive queue as the sink of a flow pipe.
#[derive(Debug, Clone, Copy)]
pub struct FlowTarget {
    pub queue_id: u16,
    pub outer_flags: u32,
    pub inner_flags: u32,
}
