//! Grid Relay Protocol
//!
//! Node-local logic of a Markov-incremental gradient relay. A single message
//! walks the grid at random. Every node it reaches applies its local update
//! to the carried value and passes it on to a random neighbor, until some
//! node sees the value settle and flips the message to `Terminated`.
//!
//! # Design
//!
//! Everything here is sans-IO. A [`RelayNode`] consumes deliveries and
//! returns [`Outbound`] send requests; the node runtime owns the channel.
//! That keeps the state machine testable without timers or tasks.
//!
//! # Delivery
//!
//! The channel below retransmits until acknowledged, so a node may see the
//! same delivery more than once. [`HistoryCache`] drops these by remembering
//! the last sequence number of each sender.

mod config;
mod error;
mod fixed;
mod history;
mod message;
mod relay;
mod selector;
mod signal;
mod update;

pub use config::{ProtocolConfig, DEFAULT_PRECISION_SHIFT, DEFAULT_STEP};
pub use error::{Error, Result};
pub use fixed::{divergence, from_fixed, to_fixed, Value};
pub use history::{Admission, HistoryCache, HistoryEntry, SeqNo};
pub use message::{Message, Phase};
pub use relay::{Disposition, NodeState, Outbound, RelayNode, RelayState, RelayStats};
pub use selector::{select_relay_target, RandomSource, SeededRandom};
pub use signal::{StatusFlag, StatusSignal};
pub use update::{GradientStep, Identity, SubgradientStep};

pub use gridrelay_topology::{GridTopology, NeighborSet, NodeAddress};
