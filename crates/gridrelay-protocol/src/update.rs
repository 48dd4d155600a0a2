//! Per-node update strategies.
//!
//! Every node advances the relayed value with `f(node, value)`. The
//! protocol does not care what `f` computes; it only needs the same
//! fixed-point convention on every node. [`Identity`] is the default.

use gridrelay_topology::NodeAddress;

use crate::fixed::Value;

/// One local step of the distributed optimization.
pub trait GradientStep: Send + Sync {
    /// Next iterate computed by `node` from `value`.
    fn step(&self, node: NodeAddress, value: Value) -> Value;
}

impl<F> GradientStep for F
where
    F: Fn(NodeAddress, Value) -> Value + Send + Sync,
{
    fn step(&self, node: NodeAddress, value: Value) -> Value {
        self(node, value)
    }
}

/// Leaves the value unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct Identity;

impl GradientStep for Identity {
    fn step(&self, _node: NodeAddress, value: Value) -> Value {
        value
    }
}

/// Fixed-step subgradient descent on a per-node quadratic.
///
/// Computes `v - (step * (weight(node) * v - bias(node))) >> shift` in
/// 64 bits and saturates back to [`Value`]. `weight` is a plain integer,
/// `bias` is fixed point. The step contracts toward `bias / weight` when
/// `0 < step * weight < 2^(shift + 1)`.
pub struct SubgradientStep<W, B> {
    step: i32,
    shift: u32,
    weight: W,
    bias: B,
}

impl<W, B> SubgradientStep<W, B>
where
    W: Fn(NodeAddress) -> i32 + Send + Sync,
    B: Fn(NodeAddress) -> Value + Send + Sync,
{
    pub fn new(step: i32, shift: u32, weight: W, bias: B) -> Self {
        Self {
            step,
            shift,
            weight,
            bias,
        }
    }
}

impl<W, B> GradientStep for SubgradientStep<W, B>
where
    W: Fn(NodeAddress) -> i32 + Send + Sync,
    B: Fn(NodeAddress) -> Value + Send + Sync,
{
    fn step(&self, node: NodeAddress, value: Value) -> Value {
        let v = i64::from(value);
        let gradient = i64::from((self.weight)(node)) * v - i64::from((self.bias)(node));
        let next = v - ((i64::from(self.step) * gradient) >> self.shift);
        next.clamp(i64::from(Value::MIN), i64::from(Value::MAX)) as Value
    }
}

impl<W, B> std::fmt::Debug for SubgradientStep<W, B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubgradientStep")
            .field("step", &self.step)
            .field("shift", &self.shift)
            .finish_non_exhaustive()
    }
}
