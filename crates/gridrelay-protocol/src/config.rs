//! Deployment configuration shared by every node.
//!
//! All nodes of a grid must run with the same values: the grid shape
//! decides who is a neighbor, and the fixed-point shift decides how every
//! node reads a message value.

use gridrelay_topology::{GridTopology, NodeAddress};
use tracing::debug;

use crate::error::{Error, Result};
use crate::fixed::Value;

/// Fixed-point shift used unless configured otherwise.
pub const DEFAULT_PRECISION_SHIFT: u32 = 9;

/// Step size numerator used unless configured otherwise.
pub const DEFAULT_STEP: i32 = 2;

/// Protocol configuration, fixed at deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolConfig {
    /// Number of grid rows.
    pub rows: u16,

    /// Number of grid columns.
    pub cols: u16,

    /// Address of the top-left node.
    pub start_id: u16,

    /// The node that starts the relay.
    pub originator: NodeAddress,

    /// Send attempts the delivery channel makes before giving up.
    pub max_retransmissions: u8,

    /// Senders remembered by the duplicate suppressor.
    pub history_capacity: usize,

    /// Step size numerator for subgradient strategies.
    pub step: i32,

    /// Largest divergence between consecutive values that counts as converged.
    pub epsilon: u32,

    /// Fractional bits of a message value.
    pub precision_shift: u32,

    /// Value carried by the first message.
    pub initial_value: Value,
}

impl Default for ProtocolConfig {
    fn default() -> Self {
        Self {
            rows: 3,
            cols: 3,
            start_id: 10,
            originator: NodeAddress(10),
            max_retransmissions: 4,
            history_capacity: 4,
            step: DEFAULT_STEP,
            epsilon: 1,
            precision_shift: DEFAULT_PRECISION_SHIFT,
            initial_value: DEFAULT_STEP,
        }
    }
}

impl ProtocolConfig {
    /// Set the grid shape and start identifier.
    ///
    /// The originator moves to the new top-left node; call
    /// [`with_originator`](Self::with_originator) afterwards to pick another.
    #[must_use]
    pub fn with_grid(mut self, rows: u16, cols: u16, start_id: u16) -> Self {
        self.rows = rows;
        self.cols = cols;
        self.start_id = start_id;
        self.originator = NodeAddress(start_id);
        self
    }

    /// Set the originating node.
    #[must_use]
    pub fn with_originator(mut self, originator: NodeAddress) -> Self {
        self.originator = originator;
        self
    }

    /// Set the delivery attempt limit.
    #[must_use]
    pub fn with_max_retransmissions(mut self, attempts: u8) -> Self {
        self.max_retransmissions = attempts;
        self
    }

    /// Set the duplicate history capacity.
    #[must_use]
    pub fn with_history_capacity(mut self, capacity: usize) -> Self {
        self.history_capacity = capacity;
        self
    }

    /// Set the step size numerator.
    #[must_use]
    pub fn with_step(mut self, step: i32) -> Self {
        self.step = step;
        self
    }

    /// Set the convergence threshold.
    #[must_use]
    pub fn with_epsilon(mut self, epsilon: u32) -> Self {
        self.epsilon = epsilon;
        self
    }

    /// Set the fixed-point shift.
    #[must_use]
    pub fn with_precision_shift(mut self, shift: u32) -> Self {
        self.precision_shift = shift;
        self
    }

    /// Set the value carried by the first message.
    #[must_use]
    pub fn with_initial_value(mut self, value: Value) -> Self {
        self.initial_value = value;
        self
    }

    /// The grid described by this configuration.
    pub fn topology(&self) -> Result<GridTopology> {
        Ok(GridTopology::new(self.rows, self.cols, self.start_id)?)
    }

    /// Check every value and return the grid.
    ///
    /// An originator outside the grid is reported as
    /// [`TopologyError::InvalidAddress`](gridrelay_topology::TopologyError::InvalidAddress).
    pub fn validate(&self) -> Result<GridTopology> {
        let topology = self.topology()?;
        topology.coordinates_of(self.originator)?;

        if self.max_retransmissions == 0 {
            return Err(Error::InvalidConfig(
                "max_retransmissions must be at least 1".into(),
            ));
        }

        if self.history_capacity == 0 {
            return Err(Error::InvalidConfig(
                "history_capacity must be at least 1".into(),
            ));
        }

        if self.precision_shift >= Value::BITS - 1 {
            return Err(Error::InvalidConfig(format!(
                "precision_shift {} leaves no integer bits",
                self.precision_shift
            )));
        }

        debug!(
            rows = self.rows,
            cols = self.cols,
            start_id = self.start_id,
            originator = %self.originator,
            epsilon = self.epsilon,
            "Validated protocol configuration"
        );

        Ok(topology)
    }
}
