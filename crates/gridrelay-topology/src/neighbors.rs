//! Five-slot neighbor sets.
//!
//! Slot 0 is always the node itself, followed by North, East, South and
//! West. A direction that falls off the grid keeps the node's own address
//! in its slot, so the set never shrinks and boundary nodes are more likely
//! to draw themselves during relay selection.

use crate::{NodeAddress, NUM_NBRS};

/// Slot positions inside a [`NeighborSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Direction {
    /// The node itself
    Own,
    North,
    East,
    South,
    West,
}

impl Direction {
    /// All directions in slot order.
    pub const ALL: [Direction; NUM_NBRS] = [
        Direction::Own,
        Direction::North,
        Direction::East,
        Direction::South,
        Direction::West,
    ];

    /// Slot index of this direction.
    pub const fn index(self) -> usize {
        match self {
            Direction::Own => 0,
            Direction::North => 1,
            Direction::East => 2,
            Direction::South => 3,
            Direction::West => 4,
        }
    }
}

/// The neighbor slots of one node, computed once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct NeighborSet {
    owner: NodeAddress,
    slots: [NodeAddress; NUM_NBRS],
}

impl NeighborSet {
    /// Build a set from raw slots. `slots[0]` is forced to `owner`.
    pub fn new(owner: NodeAddress, mut slots: [NodeAddress; NUM_NBRS]) -> Self {
        slots[Direction::Own.index()] = owner;
        Self { owner, slots }
    }

    /// A set in which every slot is the owner (a 1×1 grid).
    pub fn isolated(owner: NodeAddress) -> Self {
        Self {
            owner,
            slots: [owner; NUM_NBRS],
        }
    }

    /// The node this set belongs to.
    pub const fn owner(&self) -> NodeAddress {
        self.owner
    }

    /// Address stored in the slot for `direction`.
    pub const fn get(&self, direction: Direction) -> NodeAddress {
        self.slots[direction.index()]
    }

    /// All slots in order.
    pub const fn slots(&self) -> &[NodeAddress; NUM_NBRS] {
        &self.slots
    }

    /// Iterate over the slots in order, owner first.
    pub fn iter(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        self.slots.iter().copied()
    }

    /// Whether `address` occupies any slot, the owner included.
    pub fn contains(&self, address: NodeAddress) -> bool {
        self.slots.contains(&address)
    }

    /// Whether `direction` fell off the grid and was filled with the owner.
    pub fn is_boundary(&self, direction: Direction) -> bool {
        direction != Direction::Own && self.get(direction) == self.owner
    }

    /// Slots that hold some other node.
    pub fn external(&self) -> impl Iterator<Item = NodeAddress> + '_ {
        let owner = self.owner;
        self.iter().filter(move |a| *a != owner)
    }

    /// True when no slot holds another node.
    ///
    /// Relay selection never returns for such a set; callers should treat it
    /// as a node that cannot forward anything.
    pub fn is_isolated(&self) -> bool {
        self.external().next().is_none()
    }
}

impl std::ops::Index<Direction> for NeighborSet {
    type Output = NodeAddress;

    fn index(&self, direction: Direction) -> &NodeAddress {
        &self.slots[direction.index()]
    }
}
