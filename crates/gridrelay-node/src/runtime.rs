//! Event loop of a single grid node.
//!
//! The node sleeps until something happens: a delivery, a delivery
//! outcome, a request to start or stop, or the periodic idle tick. Each
//! inbound payload is decoded and fed to the [`RelayNode`]; an accepted
//! one yields one send through the [`DeliveryChannel`].

use std::time::Duration;

use gridrelay_protocol::{
    Disposition, Message, NodeState, Outbound, RandomSource, RelayNode, RelayState, RelayStats,
    SeededRandom,
};
use gridrelay_topology::NodeAddress;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, trace, warn};

use crate::error::Result;
use crate::event::NodeEvent;
use crate::transport::DeliveryChannel;

/// Default idle wake-up period.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(4);

/// Final state of a node task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeSummary {
    pub address: NodeAddress,
    pub relay_state: RelayState,
    pub state: NodeState,
    /// Status signal level at shutdown
    pub status: bool,
    pub stats: RelayStats,
    /// Sends acknowledged by the destination
    pub delivered: u64,
    /// Sends that ran out of attempts
    pub timed_out: u64,
    /// Payloads that failed to decode
    pub malformed: u64,
}

/// Drives one [`RelayNode`] from its event queue.
pub struct NodeRuntime<C, R = SeededRandom> {
    node: RelayNode<R>,
    channel: C,
    events: mpsc::Receiver<NodeEvent>,
    tick_interval: Duration,
    delivered: u64,
    timed_out: u64,
    malformed: u64,
}

impl<C, R> NodeRuntime<C, R>
where
    C: DeliveryChannel,
    R: RandomSource,
{
    pub fn new(node: RelayNode<R>, channel: C, events: mpsc::Receiver<NodeEvent>) -> Self {
        Self {
            node,
            channel,
            events,
            tick_interval: DEFAULT_TICK_INTERVAL,
            delivered: 0,
            timed_out: 0,
            malformed: 0,
        }
    }

    /// Set the idle wake-up period. Zero keeps the current period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        if !interval.is_zero() {
            self.tick_interval = interval;
        }
        self
    }

    pub fn address(&self) -> NodeAddress {
        self.node.address()
    }

    /// Run until [`NodeEvent::Shutdown`] or until every sender is gone.
    pub async fn run(mut self) -> Result<NodeSummary> {
        let address = self.node.address();
        if self.node.neighbors().is_isolated() {
            warn!(node = %address, "Node has no neighbors; it will not initiate a relay");
        }
        info!(node = %address, originator = self.node.is_originator(), "Node started");

        let mut tick = tokio::time::interval(self.tick_interval);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.events.recv() => match event {
                    Some(NodeEvent::Shutdown) | None => break,
                    Some(event) => self.handle(event)?,
                },
                _ = tick.tick() => {
                    trace!(node = %address, state = %self.node.relay_state(), "Idle tick");
                }
            }
        }

        let summary = self.summary();
        info!(
            node = %address,
            state = %summary.relay_state,
            accepted = summary.stats.accepted,
            duplicates = summary.stats.duplicates,
            "Node stopped"
        );
        Ok(summary)
    }

    fn handle(&mut self, event: NodeEvent) -> Result<()> {
        match event {
            NodeEvent::Inbound {
                sender,
                sequence,
                payload,
            } => {
                let Ok(message) = Message::decode(&payload) else {
                    self.malformed += 1;
                    return Ok(());
                };
                if let Disposition::Relayed(out) = self.node.receive(sender, sequence, message) {
                    self.dispatch(out)?;
                }
            }
            NodeEvent::Initiate => {
                if !self.node.is_originator() {
                    warn!(node = %self.node.address(), "Ignoring initiate request on non-originator");
                } else if self.node.neighbors().is_isolated() {
                    // Relay selection would never return
                    error!(node = %self.node.address(), "Cannot initiate relay without neighbors");
                } else {
                    let out = self.node.initiate()?;
                    self.dispatch(out)?;
                }
            }
            NodeEvent::Delivered { to, attempts } => {
                self.delivered += 1;
                trace!(node = %self.node.address(), %to, attempts, "Delivered");
            }
            NodeEvent::TimedOut { to, attempts } => {
                self.timed_out += 1;
                warn!(node = %self.node.address(), %to, attempts, "Delivery failed");
            }
            NodeEvent::Shutdown => {}
        }
        Ok(())
    }

    fn dispatch(&mut self, out: Outbound) -> Result<()> {
        let payload = out.message.encode()?;
        debug!(
            node = %self.node.address(),
            to = %out.destination,
            message = %out.message,
            "Sending"
        );
        self.channel.send(out.destination, payload)
    }

    fn summary(&self) -> NodeSummary {
        NodeSummary {
            address: self.node.address(),
            relay_state: self.node.relay_state(),
            state: *self.node.state(),
            status: self.node.status(),
            stats: *self.node.stats(),
            delivered: self.delivered,
            timed_out: self.timed_out,
            malformed: self.malformed,
        }
    }
}
