//! Whole-grid simulation on one tokio runtime.
//!
//! Spawns a [`NodeRuntime`] per grid node, wires them through a shared
//! [`SimNetwork`], starts the relay at the originator and waits until every
//! node asserts its status signal or the deadline passes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use gridrelay_protocol::{
    from_fixed, to_fixed, GradientStep, RelayNode, RelayState, StatusFlag, StatusSignal,
    SubgradientStep, Value,
};
use gridrelay_topology::NodeAddress;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::SimulationConfig;
use crate::error::Result;
use crate::event::NodeEvent;
use crate::runtime::{NodeRuntime, NodeSummary};
use crate::transport::{SimChannel, SimNetwork};

/// Capacity of each node's event queue.
const EVENT_QUEUE: usize = 1024;

/// How often the driver samples the status signals.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

type UpdateFactory = Box<dyn Fn(NodeAddress) -> Box<dyn GradientStep> + Send + Sync>;

/// Outcome of one node in a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeReport {
    #[serde(flatten)]
    pub summary: NodeSummary,
    /// Last observed value as a real number
    pub value: f64,
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationReport {
    pub rows: u16,
    pub cols: u16,
    pub originator: NodeAddress,
    /// Every status signal was asserted before the deadline
    pub converged: bool,
    pub elapsed_ms: u64,
    /// Messages processed across the grid
    pub hops: u64,
    /// Re-deliveries dropped across the grid
    pub duplicates: u64,
    pub nodes: Vec<NodeReport>,
}

impl SimulationReport {
    pub fn node(&self, address: NodeAddress) -> Option<&NodeReport> {
        self.nodes.iter().find(|n| n.summary.address == address)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// A configured grid, ready to run.
pub struct Simulation {
    config: SimulationConfig,
    update: Option<UpdateFactory>,
}

impl Simulation {
    pub fn new(config: SimulationConfig) -> Self {
        Self {
            config,
            update: None,
        }
    }

    /// Use `factory(node)` as each node's update instead of the one
    /// implied by the configuration.
    pub fn with_update<F, G>(mut self, factory: F) -> Self
    where
        F: Fn(NodeAddress) -> G + Send + Sync + 'static,
        G: GradientStep + 'static,
    {
        self.update = Some(Box::new(move |node| {
            Box::new(factory(node)) as Box<dyn GradientStep>
        }));
        self
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    fn update_for(&self, node: NodeAddress) -> Option<Box<dyn GradientStep>> {
        if let Some(factory) = &self.update {
            return Some(factory(node));
        }
        let target = self.config.target?;
        let protocol = &self.config.protocol;
        let bias = to_fixed(target, protocol.precision_shift);
        let step: Box<dyn GradientStep> = Box::new(SubgradientStep::new(
            protocol.step,
            protocol.precision_shift,
            |_| 1,
            move |_| bias,
        ));
        Some(step)
    }

    /// Run the grid to convergence or to the deadline.
    pub async fn run(self) -> Result<SimulationReport> {
        self.config.validate()?;
        let protocol = &self.config.protocol;
        let topology = protocol.validate()?;

        let mut inboxes = HashMap::new();
        let mut receivers = Vec::with_capacity(topology.len());
        for address in topology.addresses() {
            let (tx, rx) = mpsc::channel(EVENT_QUEUE);
            inboxes.insert(address, tx);
            receivers.push((address, rx));
        }
        let network = Arc::new(SimNetwork::new(inboxes));

        let mut flags = Vec::with_capacity(receivers.len());
        let mut handles = Vec::with_capacity(receivers.len());
        for (address, rx) in receivers {
            let flag = StatusFlag::new();
            let mut node = RelayNode::new(address, protocol)?.with_signal(flag.clone());
            if let Some(step) = self.update_for(address) {
                node = node.with_update(move |n: NodeAddress, v: Value| step.step(n, v));
            }
            let channel = SimChannel::new(
                address,
                network.clone(),
                self.config.link.clone(),
                protocol.max_retransmissions,
                self.config.seed,
            );
            let runtime = NodeRuntime::new(node, channel, rx)
                .with_tick_interval(self.config.tick_interval);

            flags.push(flag);
            handles.push(tokio::spawn(runtime.run()));
        }

        info!(
            rows = protocol.rows,
            cols = protocol.cols,
            originator = %protocol.originator,
            "Starting simulation"
        );
        let started = Instant::now();
        network.post(protocol.originator, NodeEvent::Initiate).await?;

        let all_asserted = || flags.iter().all(|f| f.is_asserted());
        let converged = tokio::time::timeout(self.config.deadline, async {
            while !all_asserted() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
        })
        .await
        .is_ok();
        let elapsed = started.elapsed();

        if converged {
            info!(elapsed_ms = elapsed.as_millis() as u64, "Every node converged");
        } else {
            let pending = flags.iter().filter(|f| !f.is_asserted()).count();
            warn!(pending, "Deadline passed before every node converged");
        }

        for address in topology.addresses() {
            network.post(address, NodeEvent::Shutdown).await?;
        }

        let mut nodes = Vec::with_capacity(handles.len());
        for handle in handles {
            let summary = handle.await??;
            let value = from_fixed(summary.state.previous_value, protocol.precision_shift);
            nodes.push(NodeReport { summary, value });
        }

        Ok(SimulationReport {
            rows: protocol.rows,
            cols: protocol.cols,
            originator: protocol.originator,
            converged,
            elapsed_ms: elapsed.as_millis() as u64,
            hops: nodes.iter().map(|n| n.summary.stats.accepted).sum(),
            duplicates: nodes.iter().map(|n| n.summary.stats.duplicates).sum(),
            nodes,
        })
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("config", &self.config)
            .field("custom_update", &self.update.is_some())
            .finish()
    }
}

/// Whether every node in `report` ended converged.
pub fn all_converged(report: &SimulationReport) -> bool {
    report
        .nodes
        .iter()
        .all(|n| n.summary.relay_state == RelayState::Converged && n.summary.status)
}
