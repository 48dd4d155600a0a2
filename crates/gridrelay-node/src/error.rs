//! Error types for the node runtime and simulation.

use gridrelay_topology::NodeAddress;
use thiserror::Error;

/// Result type for node operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while running nodes.
#[derive(Debug, Error)]
pub enum Error {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] gridrelay_protocol::Error),

    /// Invalid runtime or link configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// No inbox registered for the address
    #[error("Unknown destination: {0}")]
    UnknownDestination(NodeAddress),

    /// The node's event queue is gone
    #[error("Event queue of node {0} is closed")]
    ChannelClosed(NodeAddress),

    /// A node task panicked or was cancelled
    #[error("Node task failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
