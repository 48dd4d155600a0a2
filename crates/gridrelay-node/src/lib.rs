//! Grid Relay Node
//!
//! Runs relay nodes as tokio tasks. Each node owns its protocol state and
//! talks to the rest of the grid only through its event queue and its
//! [`DeliveryChannel`].
//!
//! # Components
//!
//! - [`NodeRuntime`]: event loop around one relay node
//! - [`SimChannel`]: in-memory reliable unicast with loss and retransmission
//! - [`Simulation`]: a whole grid on one runtime, reported as JSON

mod config;
mod error;
mod event;
mod runtime;
mod sim;
mod transport;

pub use config::SimulationConfig;
pub use error::{Error, Result};
pub use event::NodeEvent;
pub use runtime::{NodeRuntime, NodeSummary, DEFAULT_TICK_INTERVAL};
pub use sim::{all_converged, NodeReport, Simulation, SimulationReport};
pub use transport::{DeliveryChannel, LinkConfig, SimChannel, SimNetwork};
