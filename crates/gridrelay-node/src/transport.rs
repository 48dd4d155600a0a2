//! Reliable unicast between grid nodes.
//!
//! A node hands each encoded message to its [`DeliveryChannel`] and moves
//! on. The channel retransmits until the destination acknowledges or the
//! attempt budget runs out, then reports the outcome back to the sender as
//! a [`NodeEvent`].
//!
//! [`SimChannel`] is the in-memory implementation used by the simulation.
//! It loses data and acknowledgments at configurable rates. A lost
//! acknowledgment leads to a retransmission the receiver has already seen,
//! which is what the receiver's history cache exists to absorb.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gridrelay_protocol::SeqNo;
use gridrelay_topology::NodeAddress;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::{Error, Result};
use crate::event::NodeEvent;

/// Outbound side of a node's link layer.
pub trait DeliveryChannel: Send {
    /// Queue `payload` for delivery to `to` and return immediately.
    ///
    /// The outcome arrives later on the sender's event queue as
    /// [`NodeEvent::Delivered`] or [`NodeEvent::TimedOut`].
    fn send(&mut self, to: NodeAddress, payload: Bytes) -> Result<()>;
}

/// Link behavior of the in-memory transport.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkConfig {
    /// Probability that one transmission is lost
    pub data_loss: f64,
    /// Probability that the acknowledgment of a received transmission is lost
    pub ack_loss: f64,
    /// Wait for an acknowledgment before retransmitting
    pub retransmit_interval: Duration,
    /// Time a transmission spends on the link
    pub hop_delay: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            data_loss: 0.0,
            ack_loss: 0.0,
            retransmit_interval: Duration::from_millis(50),
            hop_delay: Duration::from_millis(5),
        }
    }
}

impl LinkConfig {
    pub fn with_loss(mut self, data_loss: f64, ack_loss: f64) -> Self {
        self.data_loss = data_loss;
        self.ack_loss = ack_loss;
        self
    }

    pub fn validate(&self) -> Result<()> {
        for (name, p) in [("data_loss", self.data_loss), ("ack_loss", self.ack_loss)] {
            if !(0.0..=1.0).contains(&p) {
                return Err(Error::Config(format!("{} must be within [0, 1], got {}", name, p)));
            }
        }
        Ok(())
    }
}

/// Event queues of every node on the simulated grid.
#[derive(Debug, Default)]
pub struct SimNetwork {
    inboxes: HashMap<NodeAddress, mpsc::Sender<NodeEvent>>,
}

impl SimNetwork {
    pub fn new(inboxes: HashMap<NodeAddress, mpsc::Sender<NodeEvent>>) -> Self {
        Self { inboxes }
    }

    pub fn contains(&self, address: NodeAddress) -> bool {
        self.inboxes.contains_key(&address)
    }

    /// Put `event` on the queue of `to`.
    pub async fn post(&self, to: NodeAddress, event: NodeEvent) -> Result<()> {
        let inbox = self
            .inboxes
            .get(&to)
            .ok_or(Error::UnknownDestination(to))?;
        inbox.send(event).await.map_err(|_| Error::ChannelClosed(to))
    }
}

/// One node's handle on the in-memory transport.
///
/// Each destination gets its own link task that carries one payload at a
/// time: a payload is only transmitted once the previous one to the same
/// destination was acknowledged or gave up. Sequence numbers are kept per
/// destination and wrap at 256.
pub struct SimChannel {
    owner: NodeAddress,
    network: Arc<SimNetwork>,
    link: LinkConfig,
    max_attempts: u8,
    links: HashMap<NodeAddress, mpsc::UnboundedSender<Bytes>>,
    rng: StdRng,
}

impl SimChannel {
    /// `max_attempts` counts the first transmission and is raised to 1 if
    /// zero. Loss decisions are drawn from `seed` mixed with `owner`.
    pub fn new(
        owner: NodeAddress,
        network: Arc<SimNetwork>,
        link: LinkConfig,
        max_attempts: u8,
        seed: u64,
    ) -> Self {
        Self {
            owner,
            network,
            link,
            max_attempts: max_attempts.max(1),
            links: HashMap::new(),
            rng: StdRng::seed_from_u64(seed ^ (u64::from(owner.value()) << 16)),
        }
    }
}

impl DeliveryChannel for SimChannel {
    fn send(&mut self, to: NodeAddress, payload: Bytes) -> Result<()> {
        if !self.network.contains(to) {
            return Err(Error::UnknownDestination(to));
        }

        let queue = match self.links.entry(to) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let (tx, rx) = mpsc::unbounded_channel();
                let worker = LinkWorker::new(
                    self.owner,
                    to,
                    self.link.clone(),
                    self.max_attempts,
                    self.rng.gen(),
                );
                tokio::spawn(worker.run(self.network.clone(), rx));
                entry.insert(tx)
            }
        };
        queue.send(payload).map_err(|_| Error::ChannelClosed(to))
    }
}

/// Serial reliable link from one node to one neighbor.
struct LinkWorker {
    from: NodeAddress,
    to: NodeAddress,
    sequence: SeqNo,
    link: LinkConfig,
    max_attempts: u8,
    rng: StdRng,
}

impl LinkWorker {
    fn new(from: NodeAddress, to: NodeAddress, link: LinkConfig, max_attempts: u8, seed: u64) -> Self {
        Self {
            from,
            to,
            sequence: 0,
            link,
            max_attempts: max_attempts.max(1),
            rng: StdRng::seed_from_u64(seed),
        }
    }

    fn next_sequence(&mut self) -> SeqNo {
        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);
        sequence
    }

    /// Carry queued payloads until the sending side is dropped.
    async fn run(mut self, network: Arc<SimNetwork>, mut queue: mpsc::UnboundedReceiver<Bytes>) {
        while let Some(payload) = queue.recv().await {
            let sequence = self.next_sequence();
            let outcome = self.transfer(&network, sequence, payload).await;
            let _ = network.post(self.from, outcome).await;
        }
    }

    /// Transmit until acknowledged or out of attempts.
    async fn transfer(&mut self, network: &SimNetwork, sequence: SeqNo, payload: Bytes) -> NodeEvent {
        for attempt in 1..=self.max_attempts {
            if !self.link.hop_delay.is_zero() {
                tokio::time::sleep(self.link.hop_delay).await;
            }

            if !self.rng.gen_bool(self.link.data_loss) {
                let inbound = NodeEvent::Inbound {
                    sender: self.from,
                    sequence,
                    payload: payload.clone(),
                };
                if network.post(self.to, inbound).await.is_err() {
                    // Destination stopped
                    return NodeEvent::TimedOut {
                        to: self.to,
                        attempts: attempt,
                    };
                }
                if !self.rng.gen_bool(self.link.ack_loss) {
                    return NodeEvent::Delivered {
                        to: self.to,
                        attempts: attempt,
                    };
                }
            }

            trace!(
                from = %self.from,
                to = %self.to,
                sequence,
                attempt,
                "No acknowledgment"
            );
            tokio::time::sleep(self.link.retransmit_interval).await;
        }

        NodeEvent::TimedOut {
            to: self.to,
            attempts: self.max_attempts,
        }
    }
}
