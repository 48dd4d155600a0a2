//! Convergence status output.
//!
//! Stands in for a node's indicator LEDs: asserted once the node has
//! converged, cleared while it still applies updates.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Binary status output driven by the relay state machine.
pub trait StatusSignal: Send {
    fn assert(&mut self);
    fn clear(&mut self);
    fn is_asserted(&self) -> bool;
}

/// A status signal whose clones observe the same flag.
///
/// Hand one clone to the relay node and keep another to watch it from
/// outside the node task.
#[derive(Debug, Clone, Default)]
pub struct StatusFlag(Arc<AtomicBool>);

impl StatusFlag {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StatusSignal for StatusFlag {
    fn assert(&mut self) {
        self.0.store(true, Ordering::Release);
    }

    fn clear(&mut self) {
        self.0.store(false, Ordering::Release);
    }

    fn is_asserted(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}
