//! Row-major grid addressing.
//!
//! Coordinates are one-based: there is no row 0 or column 0. The grid is a
//! pure function of its dimensions and start identifier, so every node can
//! rebuild it locally from deployment configuration.

use crate::error::{Result, TopologyError};
use crate::neighbors::{Direction, NeighborSet};
use crate::NUM_NBRS;

/// Identifier of a node on the grid.
///
/// A plain value type: equality and hashing are structural, so addresses
/// can key maps and be compared directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NodeAddress(pub u16);

impl NodeAddress {
    /// Raw identifier value.
    pub const fn value(&self) -> u16 {
        self.0
    }
}

impl std::fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A one-based `(row, col)` position on the grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridCoord {
    /// Row, counting from 1 at the top
    pub row: u16,
    /// Column, counting from 1 at the left
    pub col: u16,
}

impl GridCoord {
    /// Create a new coordinate.
    pub const fn new(row: u16, col: u16) -> Self {
        Self { row, col }
    }
}

impl std::fmt::Display for GridCoord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.row, self.col)
    }
}

/// A fixed `rows × cols` grid of node addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct GridTopology {
    rows: u16,
    cols: u16,
    start_id: u16,
}

impl GridTopology {
    /// Create a grid, checking that every address fits in a [`NodeAddress`].
    pub fn new(rows: u16, cols: u16, start_id: u16) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(TopologyError::EmptyGrid { rows, cols });
        }

        let last = u32::from(start_id) + u32::from(rows) * u32::from(cols) - 1;
        if last > u32::from(u16::MAX) {
            return Err(TopologyError::AddressSpaceOverflow {
                rows,
                cols,
                start_id,
            });
        }

        Ok(Self {
            rows,
            cols,
            start_id,
        })
    }

    /// Number of rows.
    pub const fn rows(&self) -> u16 {
        self.rows
    }

    /// Number of columns.
    pub const fn cols(&self) -> u16 {
        self.cols
    }

    /// Identifier of the top-left node.
    pub const fn start_id(&self) -> u16 {
        self.start_id
    }

    /// Number of nodes on the grid.
    pub fn len(&self) -> usize {
        usize::from(self.rows) * usize::from(self.cols)
    }

    /// Always false: construction rejects empty grids.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Address of the top-left node.
    pub const fn first(&self) -> NodeAddress {
        NodeAddress(self.start_id)
    }

    /// Address of the bottom-right node.
    pub fn last(&self) -> NodeAddress {
        // Fits in u16: checked in `new`
        let last = u32::from(self.start_id) + self.count() - 1;
        NodeAddress(last as u16)
    }

    fn count(&self) -> u32 {
        u32::from(self.rows) * u32::from(self.cols)
    }

    /// Whether `address` belongs to this grid.
    pub fn contains(&self, address: NodeAddress) -> bool {
        address >= self.first() && address <= self.last()
    }

    /// Whether `coord` lies on this grid.
    pub fn contains_coord(&self, coord: GridCoord) -> bool {
        (1..=self.rows).contains(&coord.row) && (1..=self.cols).contains(&coord.col)
    }

    /// Address of the node at `coord`.
    pub fn address_at(&self, coord: GridCoord) -> Result<NodeAddress> {
        if !self.contains_coord(coord) {
            return Err(TopologyError::InvalidCoordinate {
                coord,
                rows: self.rows,
                cols: self.cols,
            });
        }

        let offset = (coord.row - 1) * self.cols + (coord.col - 1);
        Ok(NodeAddress(self.start_id + offset))
    }

    /// Coordinates of the node with `address`.
    ///
    /// Inverse of [`address_at`](Self::address_at).
    pub fn coordinates_of(&self, address: NodeAddress) -> Result<GridCoord> {
        if !self.contains(address) {
            return Err(TopologyError::InvalidAddress {
                address,
                first: self.first(),
                last: self.last(),
            });
        }

        let offset = address.0 - self.start_id;
        Ok(GridCoord {
            row: offset / self.cols + 1,
            col: offset % self.cols + 1,
        })
    }

    /// Coordinate one step from `coord` in `direction`, if it exists.
    ///
    /// [`Direction::Own`] always yields `coord` itself.
    pub fn step(&self, coord: GridCoord, direction: Direction) -> Option<GridCoord> {
        let GridCoord { row, col } = coord;
        match direction {
            Direction::Own => Some(coord),
            Direction::North => (row > 1).then(|| GridCoord::new(row - 1, col)),
            Direction::East => (col < self.cols).then(|| GridCoord::new(row, col + 1)),
            Direction::South => (row < self.rows).then(|| GridCoord::new(row + 1, col)),
            Direction::West => (col > 1).then(|| GridCoord::new(row, col - 1)),
        }
    }

    /// The five neighbor slots of `address`.
    ///
    /// Directions that fall off the grid hold `address` itself.
    pub fn neighbors_of(&self, address: NodeAddress) -> Result<NeighborSet> {
        let coord = self.coordinates_of(address)?;
        let mut slots = [address; NUM_NBRS];

        for direction in Direction::ALL {
            if let Some(next) = self.step(coord, direction) {
                slots[direction.index()] = self.address_at(next)?;
            }
        }

        Ok(NeighborSet::new(address, slots))
    }

    /// All addresses on the grid in row-major order.
    pub fn addresses(&self) -> impl Iterator<Item = NodeAddress> {
        let first = u32::from(self.start_id);
        (0..self.count()).map(move |offset| NodeAddress((first + offset) as u16))
    }
}
