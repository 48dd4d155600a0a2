//! The relay message and its wire encoding.
//!
//! A message is three fixed-width fields, little-endian:
//!
//! | field     | type            | bytes |
//! |-----------|-----------------|-------|
//! | phase     | `u32` tag       | 4     |
//! | iteration | `u32`           | 4     |
//! | value     | `i32` fixed pt. | 4     |

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::fixed::Value;

/// Whether the relayed computation is still running.
///
/// Monotone: a message that reached `Terminated` is never turned back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    /// Nodes keep applying their update function
    Running,
    /// Some node detected convergence; nodes only forward
    Terminated,
}

impl Phase {
    pub fn is_terminated(self) -> bool {
        self == Phase::Terminated
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Terminated => write!(f, "Terminated"),
        }
    }
}

/// A relay message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Computation phase
    pub phase: Phase,
    /// Hops taken so far
    pub iteration: u32,
    /// Current iterate in fixed point
    pub value: Value,
}

impl Message {
    /// Encoded size in bytes.
    pub const WIRE_SIZE: usize = 12;

    /// Create a message.
    pub const fn new(phase: Phase, iteration: u32, value: Value) -> Self {
        Self {
            phase,
            iteration,
            value,
        }
    }

    /// The first message of a relay.
    pub const fn start(value: Value) -> Self {
        Self::new(Phase::Running, 0, value)
    }

    pub fn is_terminated(&self) -> bool {
        self.phase.is_terminated()
    }

    /// Encode to the fixed-width wire form.
    pub fn encode(&self) -> Result<Bytes> {
        Ok(Bytes::from(bincode::serialize(self)?))
    }

    /// Decode from the fixed-width wire form.
    ///
    /// Payloads of the wrong length or with an unknown phase tag are
    /// rejected.
    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() != Self::WIRE_SIZE {
            return Err(Error::WireLength {
                expected: Self::WIRE_SIZE,
                actual: payload.len(),
            });
        }
        Ok(bincode::deserialize(payload)?)
    }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}#{} value={}", self.phase, self.iteration, self.value)
    }
}
