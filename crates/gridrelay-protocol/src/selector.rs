//! Random relay target selection.
//!
//! A target is drawn uniformly from the five neighbor slots, and drawn
//! again whenever the slot holds the node itself. Boundary nodes carry
//! extra self slots and therefore redraw more often.
//!
//! # Liveness
//!
//! The redraw loop has no bound. On a neighbor set with no external slot
//! (a 1×1 grid) [`select_relay_target`] never returns. Check
//! [`NeighborSet::is_isolated`] before relaying from such a node.

use gridrelay_topology::{NeighborSet, NodeAddress, NUM_NBRS};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Source of uniform slot indices.
pub trait RandomSource {
    /// A uniform integer in `0..bound`. `bound` is never zero.
    fn next_index(&mut self, bound: usize) -> usize;
}

/// Deterministic random source seeded from a node address.
///
/// Two runs of the same grid draw the same targets, which keeps
/// simulations reproducible.
#[derive(Debug, Clone)]
pub struct SeededRandom {
    rng: StdRng,
}

impl SeededRandom {
    /// Seed from the node's own address.
    pub fn for_node(address: NodeAddress) -> Self {
        Self::from_seed(u64::from(address.value()))
    }

    /// Seed from an arbitrary value.
    pub fn from_seed(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl RandomSource for SeededRandom {
    fn next_index(&mut self, bound: usize) -> usize {
        self.rng.gen_range(0..bound)
    }
}

/// Pick a neighbor other than `self_address` to relay to.
///
/// See the module docs: never returns when every slot is `self_address`.
pub fn select_relay_target<R>(
    neighbors: &NeighborSet,
    self_address: NodeAddress,
    random: &mut R,
) -> NodeAddress
where
    R: RandomSource + ?Sized,
{
    loop {
        let candidate = neighbors.slots()[random.next_index(NUM_NBRS)];
        if candidate != self_address {
            return candidate;
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use gridrelay_topology::GridTopology;
    use std::collections::{HashMap, VecDeque};

    /// Replays a fixed list of indices.
    #[derive(Debug, Default)]
    pub(crate) struct ScriptedRandom {
        pub indices: VecDeque<usize>,
        pub draws: usize,
    }

    impl ScriptedRandom {
        pub(crate) fn new(indices: impl IntoIterator<Item = usize>) -> Self {
            Self {
                indices: indices.into_iter().collect(),
                draws: 0,
            }
        }
    }

    impl RandomSource for ScriptedRandom {
        fn next_index(&mut self, bound: usize) -> usize {
            self.draws += 1;
            let index = self.indices.pop_front().expect("script exhausted");
            assert!(index < bound);
            index
        }
    }

    fn neighbors(address: u16) -> NeighborSet {
        GridTopology::new(3, 3, 10)
            .unwrap()
            .neighbors_of(NodeAddress(address))
            .unwrap()
    }

    #[test]
    fn redraws_on_self_slots() {
        // Corner 10: slots [10, 10, 11, 13, 10]
        let set = neighbors(10);
        let mut random = ScriptedRandom::new([0, 1, 4, 2]);

        let target = select_relay_target(&set, NodeAddress(10), &mut random);

        assert_eq!(target, NodeAddress(11));
        assert_eq!(random.draws, 4);
    }

    #[test]
    fn first_external_draw_wins() {
        let set = neighbors(14);
        let mut random = ScriptedRandom::new([3]);
        assert_eq!(
            select_relay_target(&set, NodeAddress(14), &mut random),
            NodeAddress(17)
        );
        assert_eq!(random.draws, 1);
    }

    #[test]
    fn never_selects_self() {
        let set = neighbors(18);
        let mut random = SeededRandom::for_node(NodeAddress(18));
        for _ in 0..1000 {
            let target = select_relay_target(&set, NodeAddress(18), &mut random);
            assert_ne!(target, NodeAddress(18));
            assert!(set.contains(target));
        }
    }

    #[test]
    fn uniform_over_external_neighbors() {
        let set = neighbors(14);
        let mut random = SeededRandom::from_seed(7);
        let mut counts: HashMap<NodeAddress, usize> = HashMap::new();

        let draws = 20_000;
        for _ in 0..draws {
            *counts
                .entry(select_relay_target(&set, NodeAddress(14), &mut random))
                .or_default() += 1;
        }

        assert_eq!(counts.len(), 4);
        for (target, count) in counts {
            let share = count as f64 / draws as f64;
            assert!(
                (0.22..0.28).contains(&share),
                "target {} drawn {:.3} of the time",
                target,
                share
            );
        }
    }

    #[test]
    fn seeding_is_deterministic() {
        let set = neighbors(14);
        let mut a = SeededRandom::for_node(NodeAddress(14));
        let mut b = SeededRandom::for_node(NodeAddress(14));
        for _ in 0..50 {
            assert_eq!(
                select_relay_target(&set, NodeAddress(14), &mut a),
                select_relay_target(&set, NodeAddress(14), &mut b)
            );
        }
    }

    #[test]
    fn seeded_indices_in_bounds() {
        let mut random = SeededRandom::from_seed(0);
        for _ in 0..1000 {
            assert!(random.next_index(NUM_NBRS) < NUM_NBRS);
        }
    }
}
