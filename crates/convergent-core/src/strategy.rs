use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::warn;

use crate::decide::roll;
use crate::state::StateSet;
use crate::topology::Node;

/// What a strategy wants the runner to do in one cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Send this value as a write to the selected node.
    Write(String),
    /// Give up on this write without delivering it.
    Abandon,
}

/// Policy producing write payloads for one request runner.
///
/// Each instance is owned by exactly one runner, so implementations keep
/// their counters as plain fields.
pub trait OperationStrategy: Send + 'static {
    /// Seed internal state from the state of a live node. Called once,
    /// before the run starts.
    fn init(&mut self, bootstrap: &StateSet);

    /// Produce the operation for `node` in cycle `cycle`.
    fn operation(&mut self, node: &Node, cycle: usize) -> Operation;
}

/// Writes `"<node> <index>"` values with a per-instance sequence counter,
/// abandoning each write with a fixed probability.
///
/// Instances sharing a run are given distinct lanes: an instance in lane `l`
/// of `n` only issues indices congruent to `l` modulo `n`, so concurrent
/// instances never produce the same value.
#[derive(Debug, Clone)]
pub struct StateOperation {
    idx: u64,
    crash: f64,
    values: Vec<String>,
    lane: u64,
    lanes: u64,
    rng: ChaCha8Rng,
}

impl StateOperation {
    /// `crash` is clamped to [0, 1].
    pub fn new(crash: f64, rng: ChaCha8Rng) -> Self {
        let crash = if crash.is_nan() {
            0.0
        } else {
            crash.clamp(0.0, 1.0)
        };
        StateOperation {
            idx: 0,
            crash,
            values: Vec::new(),
            lane: 0,
            lanes: 1,
            rng,
        }
    }

    pub fn seeded(crash: f64, seed: u64) -> Self {
        Self::new(crash, ChaCha8Rng::seed_from_u64(seed))
    }

    /// Restrict issued indices to residue `lane` modulo `lanes`.
    pub fn with_lane(mut self, lane: usize, lanes: usize) -> Self {
        let lanes = lanes.max(1) as u64;
        self.lanes = lanes;
        self.lane = lane as u64 % lanes;
        self
    }

    /// Current (last issued or bootstrapped) sequence index.
    pub fn sequence_index(&self) -> u64 {
        self.idx
    }

    pub fn crash_probability(&self) -> f64 {
        self.crash
    }

    /// Every value issued so far, in issue order.
    pub fn values(&self) -> &[String] {
        &self.values
    }

    /// Next index in this lane, `None` once the index space is used up.
    fn next_index(&self) -> Option<u64> {
        let candidate = self.idx.checked_add(1)?;
        let offset = (self.lane + self.lanes - candidate % self.lanes) % self.lanes;
        candidate.checked_add(offset)
    }
}

impl OperationStrategy for StateOperation {
    fn init(&mut self, bootstrap: &StateSet) {
        // Continuing past earlier runs keeps their values distinguishable.
        if let Some(max) = bootstrap.max_sequence_index() {
            self.idx = self.idx.max(max);
        }
    }

    fn operation(&mut self, node: &Node, _cycle: usize) -> Operation {
        if roll(&mut self.rng, self.crash) {
            return Operation::Abandon;
        }

        let Some(idx) = self.next_index() else {
            warn!(last = self.idx, lane = self.lane, "sequence index exhausted; abandoning write");
            return Operation::Abandon;
        };
        self.idx = idx;
        let value = format!("{} {}", node.name, self.idx);
        self.values.push(value.clone());
        Operation::Write(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn node(name: &str) -> Node {
        Node::new(name, "127.0.0.1", 10001)
    }

    #[test]
    fn test_values_encode_node_and_index() {
        let mut op = StateOperation::seeded(0.0, 1);
        assert_eq!(
            op.operation(&node("location1"), 0),
            Operation::Write("location1 1".to_string())
        );
        assert_eq!(
            op.operation(&node("location3"), 1),
            Operation::Write("location3 2".to_string())
        );
        assert_eq!(op.values(), ["location1 1", "location3 2"]);
    }

    #[test]
    fn test_crash_probability_clamped() {
        assert_eq!(StateOperation::seeded(3.5, 0).crash_probability(), 1.0);
        assert_eq!(StateOperation::seeded(-1.0, 0).crash_probability(), 0.0);
        assert_eq!(StateOperation::seeded(f64::NAN, 0).crash_probability(), 0.0);
    }

    #[test]
    fn test_always_abandon_never_consumes_index() {
        let mut op = StateOperation::seeded(1.0, 5);
        for cycle in 0..100 {
            assert_eq!(op.operation(&node("location1"), cycle), Operation::Abandon);
        }
        assert_eq!(op.sequence_index(), 0);
        assert!(op.values().is_empty());
    }

    #[test]
    fn test_init_continues_after_existing_index() {
        let mut op = StateOperation::seeded(0.0, 1);
        op.init(&StateSet::decode("[location1 4,location2 17,location3 9]").unwrap());
        match op.operation(&node("location2"), 0) {
            Operation::Write(value) => assert_eq!(value, "location2 18"),
            Operation::Abandon => panic!("crash probability is zero"),
        }
    }

    #[test]
    fn test_init_with_empty_state_keeps_counter() {
        let mut op = StateOperation::seeded(0.0, 1);
        op.init(&StateSet::new());
        assert_eq!(op.sequence_index(), 0);
    }

    #[test]
    fn test_init_never_moves_counter_backwards() {
        let mut op = StateOperation::seeded(0.0, 1);
        for _ in 0..10 {
            op.operation(&node("location1"), 0);
        }
        op.init(&StateSet::from_iter(["location1 3"]));
        assert_eq!(op.sequence_index(), 10);
    }

    #[test]
    fn test_lanes_are_disjoint() {
        let mut a = StateOperation::seeded(0.0, 1).with_lane(0, 3);
        let mut b = StateOperation::seeded(0.0, 2).with_lane(1, 3);
        let mut c = StateOperation::seeded(0.0, 3).with_lane(2, 3);
        let n = node("location1");
        for op in [&mut a, &mut b, &mut c] {
            for cycle in 0..20 {
                op.operation(&n, cycle);
            }
        }
        let mut all: Vec<&String> = a
            .values()
            .iter()
            .chain(b.values())
            .chain(c.values())
            .collect();
        let total = all.len();
        all.sort();
        all.dedup();
        assert_eq!(all.len(), total);
        assert_eq!(a.values()[0], "location1 3");
        assert_eq!(b.values()[0], "location1 1");
        assert_eq!(c.values()[0], "location1 2");
    }

    #[test]
    fn test_lane_respected_after_init() {
        let mut op = StateOperation::seeded(0.0, 1).with_lane(1, 2);
        op.init(&StateSet::from_iter(["location1 10"]));
        assert_eq!(
            op.operation(&node("location1"), 0),
            Operation::Write("location1 11".to_string())
        );
        assert_eq!(
            op.operation(&node("location1"), 1),
            Operation::Write("location1 13".to_string())
        );
    }

    #[test]
    fn test_exhausted_index_space_abandons() {
        let mut op = StateOperation::seeded(0.0, 1);
        op.init(&StateSet::decode("[location1 18446744073709551615]").unwrap());
        for cycle in 0..3 {
            assert_eq!(op.operation(&node("location1"), cycle), Operation::Abandon);
        }
        assert_eq!(op.sequence_index(), u64::MAX);
        assert!(op.values().is_empty());
    }

    #[test]
    fn test_lane_offset_near_max_index() {
        let start = format!("[location1 {}]", u64::MAX - 2);

        // u64::MAX is congruent to 3 modulo 4.
        let mut last_lane = StateOperation::seeded(0.0, 1).with_lane(3, 4);
        last_lane.init(&StateSet::decode(&start).unwrap());
        assert_eq!(
            last_lane.operation(&node("location1"), 0),
            Operation::Write(format!("location1 {}", u64::MAX))
        );
        assert_eq!(last_lane.operation(&node("location1"), 1), Operation::Abandon);

        let mut first_lane = StateOperation::seeded(0.0, 1).with_lane(0, 4);
        first_lane.init(&StateSet::decode(&start).unwrap());
        assert_eq!(first_lane.operation(&node("location1"), 0), Operation::Abandon);
        assert_eq!(first_lane.sequence_index(), u64::MAX - 2);
    }

    #[test]
    fn test_abandon_fraction_converges() {
        let p = 0.3;
        let calls = 100_000;
        let mut op = StateOperation::seeded(p, 0xC0FFEE);
        let n = node("location1");
        let abandoned = (0..calls)
            .filter(|&cycle| op.operation(&n, cycle) == Operation::Abandon)
            .count();
        let fraction = abandoned as f64 / calls as f64;
        // Standard error is ~0.0015; allow well over four sigma.
        assert!((fraction - p).abs() < 0.01, "fraction {}", fraction);
    }

    proptest! {
        #[test]
        fn index_strictly_increases_on_issued_writes(
            seed in any::<u64>(),
            crash in 0.0f64..1.0,
            lane in 0usize..4,
            lanes in 1usize..5,
            calls in 1usize..200,
        ) {
            let mut op = StateOperation::seeded(crash, seed).with_lane(lane, lanes);
            let n = node("location1");
            let mut last = op.sequence_index();
            for cycle in 0..calls {
                let before = op.sequence_index();
                match op.operation(&n, cycle) {
                    Operation::Abandon => prop_assert_eq!(op.sequence_index(), before),
                    Operation::Write(value) => {
                        let idx = op.sequence_index();
                        prop_assert!(idx > last);
                        prop_assert_eq!(idx % lanes as u64, (lane % lanes) as u64);
                        let suffix = format!(" {}", idx);
                        prop_assert!(value.ends_with(&suffix));
                        last = idx;
                    }
                }
            }
        }

        #[test]
        fn init_seeds_next_index_above_existing(k in 0u64..1_000_000, lanes in 1usize..5) {
            let mut op = StateOperation::seeded(0.0, k).with_lane(0, lanes);
            op.init(&StateSet::from_iter([format!("location2 {}", k)]));
            op.operation(&node("location1"), 0);
            prop_assert!(op.sequence_index() >= k + 1);
        }
    }
}
