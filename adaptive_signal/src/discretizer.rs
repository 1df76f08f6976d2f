// src/discretizer.rs
//
// Lossy mapping from simulator state to a finite table key.
//
// Queue length per approach and ticks elapsed in the current phase are each
// bucketed by upper-inclusive edges; the last bucket is open-ended. Bucket
// boundaries come from `DiscretizerConfig`, never from constants here.

use serde::{Deserialize, Serialize};

use crate::config::DiscretizerConfig;
use crate::error::ConfigError;
use crate::simulator::SimulationState;
use crate::types::{Approach, PerApproach, Phase, NUM_APPROACHES};

/// Bucketed state: the Q-table lookup key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateKey {
    /// Queue bucket per approach (N, S, E, W).
    pub queues: PerApproach<u8>,
    pub phase: Phase,
    /// Elapsed-in-phase bucket.
    pub elapsed: u8,
}

/// Bucket counts of a discretizer; bounds every valid `StateKey`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateLayout {
    pub queue_buckets: u8,
    pub elapsed_buckets: u8,
}

impl StateLayout {
    /// True if every component of `key` is within range.
    pub fn contains(&self, key: &StateKey) -> bool {
        key.queues.iter().all(|&q| q < self.queue_buckets) && key.elapsed < self.elapsed_buckets
    }

    /// Number of distinct keys.
    pub fn num_states(&self) -> usize {
        (self.queue_buckets as usize).pow(NUM_APPROACHES as u32)
            * Phase::ALL.len()
            * self.elapsed_buckets as usize
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discretizer {
    queue_edges: Vec<u32>,
    elapsed_edges: Vec<u32>,
}

impl Discretizer {
    pub fn new(config: &DiscretizerConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            queue_edges: config.queue_edges.clone(),
            elapsed_edges: config.elapsed_edges.clone(),
        })
    }

    pub fn layout(&self) -> StateLayout {
        // Edge counts are bounded below u8::MAX by validation.
        StateLayout {
            queue_buckets: (self.queue_edges.len() + 1) as u8,
            elapsed_buckets: (self.elapsed_edges.len() + 1) as u8,
        }
    }

    pub fn queue_bucket(&self, queue: u32) -> u8 {
        bucket(&self.queue_edges, queue)
    }

    pub fn elapsed_bucket(&self, elapsed: u32) -> u8 {
        bucket(&self.elapsed_edges, elapsed)
    }

    pub fn discretize(&self, state: &SimulationState) -> StateKey {
        let mut queues = [0u8; NUM_APPROACHES];
        for approach in Approach::ALL {
            let i = approach.index();
            queues[i] = self.queue_bucket(state.queues[i]);
        }
        StateKey {
            queues,
            phase: state.phase,
            elapsed: self.elapsed_bucket(state.elapsed),
        }
    }
}

fn bucket(edges: &[u32], value: u32) -> u8 {
    edges
        .iter()
        .position(|&edge| value <= edge)
        .unwrap_or(edges.len()) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn default_discretizer() -> Discretizer {
        Discretizer::new(&DiscretizerConfig {
            queue_edges: vec![0, 2, 5, 10, 20],
            elapsed_edges: vec![4, 9, 19],
        })
        .unwrap()
    }

    fn state(queues: PerApproach<u32>, phase: Phase, elapsed: u32) -> SimulationState {
        SimulationState {
            queues,
            phase,
            elapsed,
        }
    }

    #[test]
    fn queue_buckets_upper_inclusive() {
        let d = default_discretizer();
        assert_eq!(d.queue_bucket(0), 0);
        assert_eq!(d.queue_bucket(1), 1);
        assert_eq!(d.queue_bucket(2), 1);
        assert_eq!(d.queue_bucket(3), 2);
        assert_eq!(d.queue_bucket(10), 3);
        assert_eq!(d.queue_bucket(20), 4);
        assert_eq!(d.queue_bucket(21), 5);
        assert_eq!(d.queue_bucket(u32::MAX), 5);
    }

    #[test]
    fn similar_states_share_key() {
        let d = default_discretizer();
        let a = d.discretize(&state([3, 4, 0, 12], Phase::NsGreen, 6));
        let b = d.discretize(&state([5, 3, 0, 15], Phase::NsGreen, 8));
        assert_eq!(a, b);

        let c = d.discretize(&state([3, 4, 0, 12], Phase::EwGreen, 6));
        assert_ne!(a, c, "phase must be part of the key");
    }

    #[test]
    fn keys_always_within_layout() {
        let d = default_discretizer();
        let layout = d.layout();
        assert_eq!(layout.queue_buckets, 6);
        assert_eq!(layout.elapsed_buckets, 4);
        for q in [0, 1, 7, 100, 10_000] {
            for e in [0, 3, 50, 1000] {
                for phase in Phase::ALL {
                    let key = d.discretize(&state([q, q / 2, q / 3, 0], phase, e));
                    assert!(layout.contains(&key), "{:?} out of layout", key);
                }
            }
        }
    }

    #[test]
    fn layout_rejects_out_of_range_key() {
        let layout = default_discretizer().layout();
        let key = StateKey {
            queues: [0, 6, 0, 0],
            phase: Phase::NsGreen,
            elapsed: 0,
        };
        assert!(!layout.contains(&key));
        assert_eq!(layout.num_states(), 6usize.pow(4) * 4 * 4);
    }

    #[test]
    fn rejects_bad_edges() {
        let cfg = DiscretizerConfig {
            queue_edges: vec![3, 1],
            elapsed_edges: vec![4],
        };
        assert!(Discretizer::new(&cfg).is_err());
    }
}
