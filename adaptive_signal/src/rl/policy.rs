// src/rl/policy.rs
//
// Policy trait and the non-learning implementations.
//
// - Policy:          anything that picks an Action each tick
// - GreedyPolicy:    arg-max read view over a learned table (no safety rules)
// - FixedTimePolicy: traditional fixed green length, the comparison baseline
// - RandomPolicy:    uniform over valid actions

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::discretizer::StateKey;
use crate::simulator::SimulationState;
use crate::types::Action;

use super::q_table::QTable;

pub const GREEDY_POLICY_VERSION: &str = "greedy-v1";
pub const FIXED_TIME_POLICY_VERSION: &str = "fixed-time-v1";
pub const RANDOM_POLICY_VERSION: &str = "random-v1";

/// Green length used by the fixed-time baseline when none is given.
pub const DEFAULT_FIXED_GREEN_TICKS: u32 = 20;

/// Per-tick decision maker.
///
/// `state` is the exact simulator state; `key` is its discretized form.
/// Learned policies only look at `key`.
pub trait Policy: Send {
    fn version(&self) -> &str;

    fn act(&mut self, state: &SimulationState, key: &StateKey) -> Action;

    /// Called before every episode.
    fn reset_episode(&mut self, seed: u64, episode_id: u64);
}

pub struct GreedyPolicy<'a> {
    table: &'a QTable,
}

impl<'a> GreedyPolicy<'a> {
    pub fn new(table: &'a QTable) -> Self {
        Self { table }
    }
}

impl Policy for GreedyPolicy<'_> {
    fn version(&self) -> &str {
        GREEDY_POLICY_VERSION
    }

    fn act(&mut self, _state: &SimulationState, key: &StateKey) -> Action {
        self.table.greedy_action(key)
    }

    fn reset_episode(&mut self, _seed: u64, _episode_id: u64) {}
}

/// Switches every `green_ticks` ticks of green, whatever the queues.
#[derive(Debug, Clone)]
pub struct FixedTimePolicy {
    green_ticks: u32,
}

impl Default for FixedTimePolicy {
    fn default() -> Self {
        Self::new(DEFAULT_FIXED_GREEN_TICKS)
    }
}

impl FixedTimePolicy {
    pub fn new(green_ticks: u32) -> Self {
        Self {
            green_ticks: green_ticks.max(1),
        }
    }

    pub fn green_ticks(&self) -> u32 {
        self.green_ticks
    }
}

impl Policy for FixedTimePolicy {
    fn version(&self) -> &str {
        FIXED_TIME_POLICY_VERSION
    }

    fn act(&mut self, state: &SimulationState, _key: &StateKey) -> Action {
        // The step that sees `elapsed` completes green tick `elapsed + 1`.
        if state.phase.is_green() && state.elapsed + 1 >= self.green_ticks {
            Action::Switch
        } else {
            Action::Extend
        }
    }

    fn reset_episode(&mut self, _seed: u64, _episode_id: u64) {}
}

#[derive(Debug, Clone)]
pub struct RandomPolicy {
    rng: ChaCha8Rng,
}

impl RandomPolicy {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

impl Policy for RandomPolicy {
    fn version(&self) -> &str {
        RANDOM_POLICY_VERSION
    }

    fn act(&mut self, _state: &SimulationState, key: &StateKey) -> Action {
        let valid = Action::valid_for(key.phase);
        valid[self.rng.gen_range(0..valid.len())]
    }

    fn reset_episode(&mut self, seed: u64, _episode_id: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discretizer::StateLayout;
    use crate::types::Phase;

    fn green(elapsed: u32) -> (SimulationState, StateKey) {
        let state = SimulationState {
            queues: [0; 4],
            phase: Phase::NsGreen,
            elapsed,
        };
        let key = StateKey {
            queues: [0; 4],
            phase: Phase::NsGreen,
            elapsed: 0,
        };
        (state, key)
    }

    #[test]
    fn fixed_time_switches_on_schedule() {
        let mut p = FixedTimePolicy::new(10);
        for e in 0..9 {
            let (s, k) = green(e);
            assert_eq!(p.act(&s, &k), Action::Extend, "elapsed {}", e);
        }
        let (s, k) = green(9);
        assert_eq!(p.act(&s, &k), Action::Switch);
    }

    #[test]
    fn fixed_time_holds_in_yellow() {
        let mut p = FixedTimePolicy::new(1);
        let state = SimulationState {
            queues: [0; 4],
            phase: Phase::EwYellow,
            elapsed: 2,
        };
        let key = StateKey {
            queues: [0; 4],
            phase: Phase::EwYellow,
            elapsed: 0,
        };
        assert_eq!(p.act(&state, &key), Action::Extend);
    }

    #[test]
    fn greedy_reads_table() {
        let mut table = QTable::new(StateLayout {
            queue_buckets: 6,
            elapsed_buckets: 4,
        });
        let (s, k) = green(3);
        table.set(&k, Action::Switch, 2.0).unwrap();
        let mut p = GreedyPolicy::new(&table);
        assert_eq!(p.act(&s, &k), Action::Switch);
        assert_eq!(p.version(), GREEDY_POLICY_VERSION);
    }

    #[test]
    fn random_policy_reset_is_reproducible() {
        let (s, k) = green(0);
        let mut p = RandomPolicy::new(0);
        p.reset_episode(11, 0);
        let a: Vec<Action> = (0..40).map(|_| p.act(&s, &k)).collect();
        p.reset_episode(11, 1);
        let b: Vec<Action> = (0..40).map(|_| p.act(&s, &k)).collect();
        assert_eq!(a, b);
    }
}
