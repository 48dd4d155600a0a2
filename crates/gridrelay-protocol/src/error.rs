//! Error types for gridrelay-protocol.

use gridrelay_topology::{NodeAddress, TopologyError};
use thiserror::Error;

/// Result type for gridrelay-protocol operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while configuring or driving a relay node.
///
/// Foreign senders and duplicate deliveries are not errors: they are
/// dropped silently and only show up as a [`Disposition`](crate::Disposition).
#[derive(Debug, Error)]
pub enum Error {
    /// Grid lookup failed, usually an address outside the grid.
    #[error("topology error: {0}")]
    Topology(#[from] TopologyError),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A payload could not be encoded or decoded.
    #[error("message codec error: {0}")]
    Codec(#[from] bincode::Error),

    /// A payload has the wrong size for a wire message.
    #[error("malformed message: expected {expected} bytes, got {actual}")]
    WireLength { expected: usize, actual: usize },

    /// Only the originator may start a relay.
    #[error("node {address} is not the originator (originator is {originator})")]
    NotOriginator {
        address: NodeAddress,
        originator: NodeAddress,
    },
}
