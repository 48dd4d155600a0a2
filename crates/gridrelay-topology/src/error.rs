//! Error types for gridrelay-topology.

use thiserror::Error;

use crate::{GridCoord, NodeAddress};

/// Result type for topology operations.
pub type Result<T> = std::result::Result<T, TopologyError>;

/// Errors raised by grid lookups and grid construction.
///
/// Every variant is a misconfiguration: a node that hits one of these at
/// startup cannot take part in the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    /// The address lies outside the grid's identifier range.
    #[error("address {address} outside grid range {first}..={last}")]
    InvalidAddress {
        address: NodeAddress,
        first: NodeAddress,
        last: NodeAddress,
    },

    /// The coordinate lies outside the grid.
    #[error("coordinate {coord} outside {rows}x{cols} grid")]
    InvalidCoordinate {
        coord: GridCoord,
        rows: u16,
        cols: u16,
    },

    /// A grid needs at least one row and one column.
    #[error("grid dimensions must be non-zero, got {rows}x{cols}")]
    EmptyGrid { rows: u16, cols: u16 },

    /// The last address of the grid does not fit the address space.
    #[error("{rows}x{cols} grid starting at {start_id} overflows the address space")]
    AddressSpaceOverflow { rows: u16, cols: u16, start_id: u16 },
}
