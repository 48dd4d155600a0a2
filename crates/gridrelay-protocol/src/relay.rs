//! Gradient relay state machine.
//!
//! A [`RelayNode`] owns everything one node knows: its neighbor set, its
//! sender history, its last observed value and its convergence state. The
//! node task feeds it deliveries one at a time; each accepted delivery
//! produces exactly one [`Outbound`] send request.
//!
//! # States
//!
//! ```text
//! Idle ──(initiate | first accepted message)──▶ Active ──(stop | Terminated)──▶ Converged
//! ```
//!
//! `Converged` is terminal. A converged node keeps relaying, always with
//! `Phase::Terminated`, so the termination signal spreads to every node the
//! message reaches.
//!
//! # Stop Condition
//!
//! A node stops when the incoming value is within `epsilon` of the last
//! value it observed and it has already processed more than one message.

use gridrelay_topology::{NeighborSet, NodeAddress};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::ProtocolConfig;
use crate::error::{Error, Result};
use crate::fixed::{divergence, Value};
use crate::history::{HistoryCache, SeqNo};
use crate::message::{Message, Phase};
use crate::selector::{select_relay_target, RandomSource, SeededRandom};
use crate::signal::{StatusFlag, StatusSignal};
use crate::update::{GradientStep, Identity};

/// Local decision state of a relay node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelayState {
    /// Nothing sent or accepted yet
    Idle,
    /// Processing `Running` messages
    Active,
    /// Convergence seen; forwards `Terminated` messages only
    Converged,
}

impl std::fmt::Display for RelayState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Active => write!(f, "Active"),
            Self::Converged => write!(f, "Converged"),
        }
    }
}

/// Values a node carries from one accepted message to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    /// Last value this node observed
    pub previous_value: Value,
    /// Accepted messages so far
    pub iteration_count: u32,
    /// Phase of the last message this node sent
    pub phase: Phase,
}

impl Default for NodeState {
    fn default() -> Self {
        Self {
            previous_value: 0,
            iteration_count: 0,
            phase: Phase::Running,
        }
    }
}

/// A send request for the delivery channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Outbound {
    pub destination: NodeAddress,
    pub message: Message,
}

/// What happened to an inbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Accepted and processed; send this onward
    Relayed(Outbound),
    /// Re-delivery of the sender's last sequence number; dropped
    Duplicate,
    /// Sender is not in the neighbor set; dropped
    ForeignSender,
}

impl Disposition {
    /// The send request, if the delivery was accepted.
    pub fn outbound(&self) -> Option<&Outbound> {
        match self {
            Disposition::Relayed(out) => Some(out),
            _ => None,
        }
    }
}

/// Per-node counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    /// Deliveries processed by the state machine
    pub accepted: u64,
    /// Deliveries dropped as re-deliveries
    pub duplicates: u64,
    /// Deliveries dropped for coming from a non-neighbor
    pub foreign: u64,
    /// Send requests issued, initiation included
    pub relayed: u64,
    /// Send requests that carried `Phase::Terminated`
    pub terminated: u64,
}

/// The protocol context of one node.
///
/// Owned by the node's task and never shared. `R` is the random source
/// used for relay selection.
pub struct RelayNode<R = SeededRandom> {
    address: NodeAddress,
    originator: NodeAddress,
    neighbors: NeighborSet,
    history: HistoryCache,
    state: NodeState,
    relay_state: RelayState,
    epsilon: u32,
    initial_value: Value,
    update: Box<dyn GradientStep>,
    signal: Box<dyn StatusSignal>,
    random: R,
    stats: RelayStats,
}

impl RelayNode<SeededRandom> {
    /// Set up the node at `address`.
    ///
    /// Uses the identity update, a private [`StatusFlag`] and a random
    /// source seeded from `address`. Fails if the configuration is invalid
    /// or `address` is not on the grid.
    pub fn new(address: NodeAddress, config: &ProtocolConfig) -> Result<Self> {
        let topology = config.validate()?;
        let neighbors = topology.neighbors_of(address)?;

        debug!(
            node = %address,
            neighbors = ?neighbors.slots(),
            "Created relay node"
        );

        Ok(Self {
            address,
            originator: config.originator,
            neighbors,
            history: HistoryCache::new(config.history_capacity),
            state: NodeState::default(),
            relay_state: RelayState::Idle,
            epsilon: config.epsilon,
            initial_value: config.initial_value,
            update: Box::new(Identity),
            signal: Box::new(StatusFlag::new()),
            random: SeededRandom::for_node(address),
            stats: RelayStats::default(),
        })
    }
}

impl<R: RandomSource> RelayNode<R> {
    /// Replace the random source.
    #[must_use]
    pub fn with_random<R2: RandomSource>(self, random: R2) -> RelayNode<R2> {
        RelayNode {
            address: self.address,
            originator: self.originator,
            neighbors: self.neighbors,
            history: self.history,
            state: self.state,
            relay_state: self.relay_state,
            epsilon: self.epsilon,
            initial_value: self.initial_value,
            update: self.update,
            signal: self.signal,
            random,
            stats: self.stats,
        }
    }

    /// Replace the update function.
    #[must_use]
    pub fn with_update(mut self, update: impl GradientStep + 'static) -> Self {
        self.update = Box::new(update);
        self
    }

    /// Replace the status signal.
    #[must_use]
    pub fn with_signal(mut self, signal: impl StatusSignal + 'static) -> Self {
        self.signal = Box::new(signal);
        self
    }

    pub fn address(&self) -> NodeAddress {
        self.address
    }

    pub fn neighbors(&self) -> &NeighborSet {
        &self.neighbors
    }

    pub fn history(&self) -> &HistoryCache {
        &self.history
    }

    pub fn state(&self) -> &NodeState {
        &self.state
    }

    pub fn relay_state(&self) -> RelayState {
        self.relay_state
    }

    pub fn stats(&self) -> &RelayStats {
        &self.stats
    }

    pub fn is_originator(&self) -> bool {
        self.address == self.originator
    }

    pub fn is_converged(&self) -> bool {
        self.relay_state == RelayState::Converged
    }

    /// Current level of the status signal.
    pub fn status(&self) -> bool {
        self.signal.is_asserted()
    }

    /// Start the relay. Only the originator may do this.
    ///
    /// Never returns on an isolated neighbor set; see
    /// [`select_relay_target`].
    pub fn initiate(&mut self) -> Result<Outbound> {
        if !self.is_originator() {
            return Err(Error::NotOriginator {
                address: self.address,
                originator: self.originator,
            });
        }

        if self.relay_state == RelayState::Idle {
            self.relay_state = RelayState::Active;
        }

        let out = self.relay(Message::start(self.initial_value));
        debug!(
            node = %self.address,
            to = %out.destination,
            value = out.message.value,
            "Initiated relay"
        );
        Ok(out)
    }

    /// Handle a delivery from the channel.
    ///
    /// Re-deliveries and deliveries from non-neighbors are dropped without
    /// touching the node state.
    pub fn receive(&mut self, sender: NodeAddress, sequence: SeqNo, message: Message) -> Disposition {
        if !self.history.admit(sender, sequence).is_fresh() {
            self.stats.duplicates += 1;
            return Disposition::Duplicate;
        }

        if !self.neighbors.contains(sender) {
            self.stats.foreign += 1;
            return Disposition::ForeignSender;
        }

        Disposition::Relayed(self.process(sender, message))
    }

    fn process(&mut self, sender: NodeAddress, incoming: Message) -> Outbound {
        self.stats.accepted += 1;

        let stop = divergence(self.state.previous_value, incoming.value) <= self.epsilon
            && self.state.iteration_count > 1;

        self.state.previous_value = incoming.value;
        self.state.iteration_count = self.state.iteration_count.saturating_add(1);

        let mut outgoing = incoming;
        if stop || incoming.is_terminated() || self.is_converged() {
            outgoing.phase = Phase::Terminated;
            self.signal.assert();
            if !self.is_converged() {
                debug!(
                    node = %self.address,
                    from = %sender,
                    value = incoming.value,
                    iteration = incoming.iteration,
                    local_stop = stop,
                    "Converged"
                );
            }
            self.relay_state = RelayState::Converged;
        } else {
            self.signal.clear();
            outgoing.value = self.update.step(self.address, incoming.value);
            self.relay_state = RelayState::Active;
        }

        self.state.phase = outgoing.phase;
        outgoing.iteration = incoming.iteration.wrapping_add(1);

        self.relay(outgoing)
    }

    fn relay(&mut self, message: Message) -> Outbound {
        let destination = select_relay_target(&self.neighbors, self.address, &mut self.random);

        self.stats.relayed += 1;
        if message.is_terminated() {
            self.stats.terminated += 1;
        }

        trace!(
            node = %self.address,
            to = %destination,
            %message,
            "Relaying"
        );

        Outbound {
            destination,
            message,
        }
    }
}

impl<R> std::fmt::Debug for RelayNode<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayNode")
            .field("address", &self.address)
            .field("relay_state", &self.relay_state)
            .field("state", &self.state)
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::selector::tests::ScriptedRandom;
    use gridrelay_topology::TopologyError;
    use std::collections::{HashMap, VecDeque};

    fn config() -> ProtocolConfig {
        ProtocolConfig::default()
    }

    fn node(address: u16) -> RelayNode {
        RelayNode::new(NodeAddress(address), &config()).unwrap()
    }

    fn running(value: Value) -> Message {
        Message::new(Phase::Running, 0, value)
    }

    #[test]
    fn starts_idle() {
        let n = node(11);
        assert_eq!(n.relay_state(), RelayState::Idle);
        assert_eq!(*n.state(), NodeState::default());
        assert!(!n.status());
        assert!(!n.is_originator());
        assert!(node(10).is_originator());
    }

    #[test]
    fn off_grid_address_fails() {
        let err = RelayNode::new(NodeAddress(99), &config()).unwrap_err();
        assert!(matches!(
            err,
            Error::Topology(TopologyError::InvalidAddress { .. })
        ));
    }

    #[test]
    fn only_originator_initiates() {
        let mut n = node(11);
        assert!(matches!(
            n.initiate(),
            Err(Error::NotOriginator {
                address: NodeAddress(11),
                originator: NodeAddress(10)
            })
        ));
        assert_eq!(n.relay_state(), RelayState::Idle);
    }

    #[test]
    fn initiation_sends_seed_to_neighbor() {
        let mut n = node(10);
        let out = n.initiate().unwrap();

        assert_eq!(out.message, Message::new(Phase::Running, 0, 2));
        assert_ne!(out.destination, NodeAddress(10));
        assert!(n.neighbors().contains(out.destination));
        assert_eq!(n.relay_state(), RelayState::Active);
        assert_eq!(*n.state(), NodeState::default());
        assert_eq!(n.stats().relayed, 1);
    }

    #[test]
    fn scripted_initiation_target() {
        // Corner 10: slots [10, 10, 11, 13, 10]; draws 0 and 4 hit self
        let mut n = node(10).with_random(ScriptedRandom::new([0, 4, 3]));
        assert_eq!(n.initiate().unwrap().destination, NodeAddress(13));
    }

    #[test]
    fn foreign_sender_ignored() {
        let mut n = node(11);
        let disposition = n.receive(NodeAddress(99), 0, running(5));

        assert_eq!(disposition, Disposition::ForeignSender);
        assert!(disposition.outbound().is_none());
        assert_eq!(*n.state(), NodeState::default());
        assert_eq!(n.relay_state(), RelayState::Idle);
        assert_eq!(n.stats().foreign, 1);
        assert_eq!(n.stats().accepted, 0);
    }

    #[test]
    fn on_grid_non_neighbor_ignored() {
        // 18 is on the grid but not adjacent to 11
        let mut n = node(11);
        assert_eq!(
            n.receive(NodeAddress(18), 0, running(5)),
            Disposition::ForeignSender
        );
        assert_eq!(*n.state(), NodeState::default());
    }

    #[test]
    fn redelivery_processed_once() {
        let mut n = node(11);
        let first = n.receive(NodeAddress(10), 3, running(2));
        assert!(matches!(first, Disposition::Relayed(_)));
        let after_first = *n.state();

        let second = n.receive(NodeAddress(10), 3, running(2));
        assert_eq!(second, Disposition::Duplicate);
        assert_eq!(*n.state(), after_first);
        assert_eq!(n.state().iteration_count, 1);
        assert_eq!(n.stats().duplicates, 1);
        assert_eq!(n.stats().relayed, 1);
    }

    #[test]
    fn new_sequence_from_same_sender_processed() {
        let mut n = node(11);
        n.receive(NodeAddress(10), 3, running(2));
        let out = n.receive(NodeAddress(10), 4, running(2));
        assert!(out.outbound().is_some());
        assert_eq!(n.state().iteration_count, 2);
    }

    #[test]
    fn first_message_applies_update() {
        let mut n = node(14).with_update(|_: NodeAddress, v: Value| v + 100);
        let out = n
            .receive(NodeAddress(11), 0, Message::new(Phase::Running, 7, 2))
            .outbound()
            .copied()
            .unwrap();

        assert_eq!(out.message, Message::new(Phase::Running, 8, 102));
        assert_eq!(n.state().previous_value, 2);
        assert_eq!(n.state().iteration_count, 1);
        assert_eq!(n.relay_state(), RelayState::Active);
        assert!(!n.status());
    }

    #[test]
    fn update_sees_own_address() {
        let mut n = node(15).with_update(|node: NodeAddress, _v: Value| Value::from(node.value()));
        let out = n.receive(NodeAddress(14), 0, running(0));
        assert_eq!(out.outbound().unwrap().message.value, 15);
    }

    #[test]
    fn stop_needs_more_than_one_prior_message() {
        let mut n = node(14);
        let phases: Vec<Phase> = (0..3)
            .map(|seq| {
                n.receive(NodeAddress(13), seq, running(2))
                    .outbound()
                    .unwrap()
                    .message
                    .phase
            })
            .collect();

        // Divergence is 0 from the second message on, but the count only
        // passes 1 at the third.
        assert_eq!(phases, vec![Phase::Running, Phase::Running, Phase::Terminated]);
        assert!(n.is_converged());
        assert!(n.status());
        assert_eq!(n.state().phase, Phase::Terminated);
    }

    #[test]
    fn divergence_at_epsilon_stops() {
        let mut n = node(14);
        n.receive(NodeAddress(13), 0, running(5));
        n.receive(NodeAddress(13), 1, running(5));
        let out = n.receive(NodeAddress(13), 2, running(6));
        assert_eq!(out.outbound().unwrap().message.phase, Phase::Terminated);
    }

    #[test]
    fn divergence_above_epsilon_keeps_running() {
        let mut n = node(14);
        for (seq, value) in [0, 10, 20, 30, 40].into_iter().enumerate() {
            let out = n.receive(NodeAddress(13), seq as SeqNo, running(value));
            assert_eq!(out.outbound().unwrap().message.phase, Phase::Running);
        }
        assert_eq!(n.relay_state(), RelayState::Active);
        assert_eq!(n.state().iteration_count, 5);
        assert_eq!(n.state().previous_value, 40);
    }

    #[test]
    fn zero_epsilon_needs_exact_repeat() {
        let cfg = config().with_epsilon(0);
        let mut n = RelayNode::new(NodeAddress(14), &cfg).unwrap();
        n.receive(NodeAddress(13), 0, running(5));
        n.receive(NodeAddress(13), 1, running(5));
        let out = n.receive(NodeAddress(13), 2, running(6));
        assert_eq!(out.outbound().unwrap().message.phase, Phase::Running);
        let out = n.receive(NodeAddress(13), 3, running(6));
        assert_eq!(out.outbound().unwrap().message.phase, Phase::Terminated);
    }

    #[test]
    fn terminated_message_forwarded_unchanged() {
        let mut n = node(14).with_update(|_: NodeAddress, v: Value| v + 100);
        let out = n
            .receive(NodeAddress(15), 0, Message::new(Phase::Terminated, 41, 2))
            .outbound()
            .copied()
            .unwrap();

        assert_eq!(out.message, Message::new(Phase::Terminated, 42, 2));
        assert!(n.is_converged());
        assert!(n.status());
        assert_eq!(n.stats().terminated, 1);
    }

    #[test]
    fn converged_is_terminal() {
        let mut n = node(14);
        n.receive(NodeAddress(15), 0, Message::new(Phase::Terminated, 0, 2));

        // A late running message with a very different value
        let out = n.receive(NodeAddress(13), 0, running(9_000));
        assert_eq!(out.outbound().unwrap().message.phase, Phase::Terminated);
        assert_eq!(out.outbound().unwrap().message.value, 9_000);
        assert!(n.is_converged());
        assert!(n.status());
    }

    #[test]
    fn running_message_clears_signal() {
        let mut flag = StatusFlag::new();
        flag.assert();
        let watcher = flag.clone();

        let mut n = node(14).with_signal(flag);
        n.receive(NodeAddress(13), 0, running(2));
        assert!(!watcher.is_asserted());
    }

    #[test]
    fn iteration_wraps() {
        let mut n = node(14);
        let out = n.receive(NodeAddress(13), 0, Message::new(Phase::Running, u32::MAX, 2));
        assert_eq!(out.outbound().unwrap().message.iteration, 0);
    }

    #[test]
    fn evicted_sender_reprocessed() {
        let cfg = config().with_history_capacity(1);
        let mut n = RelayNode::new(NodeAddress(14), &cfg).unwrap();

        n.receive(NodeAddress(11), 0, running(2));
        n.receive(NodeAddress(13), 0, running(2));
        // 11 was evicted by 13, so its old delivery counts as new
        let out = n.receive(NodeAddress(11), 0, running(2));
        assert!(out.outbound().is_some());
        assert_eq!(n.state().iteration_count, 3);
    }

    #[test]
    fn relayed_targets_are_external_neighbors() {
        let mut n = node(12);
        for seq in 0..200u32 {
            let out = n.receive(NodeAddress(11), seq as SeqNo, running(seq as Value * 10));
            let dest = out.outbound().unwrap().destination;
            assert_ne!(dest, NodeAddress(12));
            assert!(n.neighbors().contains(dest));
        }
    }

    /// Drives a whole grid in lockstep with an ideal channel.
    struct LockstepGrid {
        nodes: HashMap<NodeAddress, RelayNode>,
        queue: VecDeque<(NodeAddress, Outbound)>,
        sequences: HashMap<(NodeAddress, NodeAddress), SeqNo>,
        log: Vec<Message>,
    }

    impl LockstepGrid {
        fn new(cfg: &ProtocolConfig) -> Self {
            let topology = cfg.validate().unwrap();
            let nodes = topology
                .addresses()
                .map(|a| (a, RelayNode::new(a, cfg).unwrap()))
                .collect();
            Self {
                nodes,
                queue: VecDeque::new(),
                sequences: HashMap::new(),
                log: Vec::new(),
            }
        }

        fn start(&mut self, originator: NodeAddress) {
            let out = self.nodes.get_mut(&originator).unwrap().initiate().unwrap();
            self.log.push(out.message);
            self.queue.push_back((originator, out));
        }

        /// Deliver one message, `copies` times with the same sequence number.
        fn hop(&mut self, copies: usize) {
            let (sender, out) = self.queue.pop_front().unwrap();
            let seq = self.sequences.entry((sender, out.destination)).or_insert(0);
            *seq = seq.wrapping_add(1);
            let seq = *seq;

            let receiver = self.nodes.get_mut(&out.destination).unwrap();
            let mut relayed = 0;
            for _ in 0..copies {
                if let Disposition::Relayed(next) = receiver.receive(sender, seq, out.message) {
                    relayed += 1;
                    self.log.push(next.message);
                    self.queue.push_back((out.destination, next));
                }
            }
            assert_eq!(relayed, 1, "re-delivery was processed");
        }

        fn all_converged(&self) -> bool {
            self.nodes.values().all(|n| n.is_converged() && n.status())
        }
    }

    #[test]
    fn three_by_three_identity_converges() {
        let cfg = config();
        let mut grid = LockstepGrid::new(&cfg);
        grid.start(cfg.originator);

        let mut hops = 0;
        while !grid.all_converged() {
            grid.hop(1);
            hops += 1;
            assert!(hops < 10_000, "grid did not converge");
        }

        // Once terminated, every later message stays terminated with the
        // seed value.
        let first_terminated = grid
            .log
            .iter()
            .position(|m| m.is_terminated())
            .unwrap();
        for message in &grid.log[first_terminated..] {
            assert_eq!(message.phase, Phase::Terminated);
            assert_eq!(message.value, 2);
        }
        // Iterations count hops
        for (i, message) in grid.log.iter().enumerate() {
            assert_eq!(message.iteration, i as u32);
        }

        // The signal never reverts
        for _ in 0..200 {
            grid.hop(1);
            assert!(grid.all_converged());
        }
    }

    #[test]
    fn redeliveries_do_not_change_outcome() {
        let cfg = config();
        let mut plain = LockstepGrid::new(&cfg);
        let mut noisy = LockstepGrid::new(&cfg);
        plain.start(cfg.originator);
        noisy.start(cfg.originator);

        for hop in 0..300 {
            plain.hop(1);
            noisy.hop(1 + hop % 3);
        }

        assert_eq!(plain.log, noisy.log);
        for (address, node) in &plain.nodes {
            let other = &noisy.nodes[address];
            assert_eq!(node.state(), other.state());
            assert_eq!(node.relay_state(), other.relay_state());
        }
    }

    #[test]
    fn contractive_update_converges() {
        use crate::fixed::to_fixed;
        use crate::update::SubgradientStep;

        let cfg = config().with_grid(4, 4, 1).with_initial_value(to_fixed(40.0, 9));
        let mut grid = LockstepGrid::new(&cfg);
        let target = to_fixed(1.5, 9);
        let addresses: Vec<_> = grid.nodes.keys().copied().collect();
        for address in addresses {
            let n = grid.nodes.remove(&address).unwrap();
            let step = SubgradientStep::new(256, 9, |_| 1, move |_| target);
            grid.nodes.insert(address, n.with_update(step));
        }

        grid.start(cfg.originator);
        let mut hops = 0;
        while !grid.all_converged() {
            grid.hop(1);
            hops += 1;
            assert!(hops < 50_000, "grid did not converge");
        }

        let last = grid.log.last().unwrap();
        assert!(last.is_terminated());
        assert!(divergence(last.value, target) <= 2);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn redelivery_never_changes_state(
                values in prop::collection::vec(-1000i32..1000, 1..40),
                repeats in prop::collection::vec(0usize..3, 40),
            ) {
                let mut n = node(14);
                for (seq, (value, extra)) in values.iter().zip(&repeats).enumerate() {
                    let seq = seq as SeqNo;
                    let first = n.receive(NodeAddress(13), seq, running(*value));
                    prop_assert!(first.outbound().is_some());
                    let snapshot = (*n.state(), n.relay_state(), n.status());

                    for _ in 0..*extra {
                        prop_assert_eq!(
                            n.receive(NodeAddress(13), seq, running(*value)),
                            Disposition::Duplicate
                        );
                        prop_assert_eq!((*n.state(), n.relay_state(), n.status()), snapshot);
                    }
                }
                prop_assert_eq!(n.state().iteration_count, values.len() as u32);
            }

            #[test]
            fn convergence_is_monotone(
                values in prop::collection::vec(-20i32..20, 1..60),
            ) {
                let mut n = node(14);
                let mut converged = false;
                for (seq, value) in values.into_iter().enumerate() {
                    let out = n.receive(NodeAddress(15), seq as SeqNo, running(value));
                    let phase = out.outbound().unwrap().message.phase;
                    if converged {
                        prop_assert_eq!(phase, Phase::Terminated);
                        prop_assert!(n.status());
                    }
                    converged = n.is_converged();
                    prop_assert_eq!(converged, phase.is_terminated());
                }
            }
        }
    }
}
