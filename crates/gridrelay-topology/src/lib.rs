//! Grid Relay Topology
//!
//! Static grid topology for Grid Relay nodes.
//!
//! # Addressing
//!
//! Nodes sit on a `rows × cols` grid with one-based coordinates in
//! row-major order. The top-left node `(1, 1)` carries the configured start
//! identifier and every following node the next one:
//!
//! ```text
//! address = start_id + (row - 1) * cols + (col - 1)
//! ```
//!
//! # Neighbor Sets
//!
//! Every node has exactly [`NUM_NBRS`] neighbor slots: itself, then North,
//! East, South and West. On the grid boundary a missing direction is filled
//! with the node's own address instead of being dropped.

mod error;
mod grid;
mod neighbors;

pub use error::{Result, TopologyError};
pub use grid::{GridCoord, GridTopology, NodeAddress};
pub use neighbors::{Direction, NeighborSet};

/// Neighbor slots per node: self plus the four cardinal directions.
pub const NUM_NBRS: usize = 5;

// Compile-time assertion that every direction owns exactly one slot
const _: () = assert!(Direction::ALL.len() == NUM_NBRS);
