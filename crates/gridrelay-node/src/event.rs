//! Events delivered to a node task.

use bytes::Bytes;
use gridrelay_protocol::SeqNo;
use gridrelay_topology::NodeAddress;

/// Everything that can wake a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeEvent {
    /// A payload arrived from `sender`
    Inbound {
        sender: NodeAddress,
        sequence: SeqNo,
        payload: Bytes,
    },
    /// Start the relay (originator only)
    Initiate,
    /// A previous send was acknowledged
    Delivered { to: NodeAddress, attempts: u8 },
    /// A previous send ran out of attempts
    TimedOut { to: NodeAddress, attempts: u8 },
    /// Stop the node task
    Shutdown,
}
