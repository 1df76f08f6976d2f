// src/reward.rs
//
// Per-tick reward.
//
//   r_t = -(Σ queue after step) + throughput_bonus * (vehicles discharged this tick)
//
// Computed from the before/after queue snapshots only, with no hidden state,
// so a reward can be reconstructed from logged components.

use serde::{Deserialize, Serialize};

use crate::config::RewardConfig;
use crate::types::PerApproach;

/// Reward inputs, kept alongside the scalar for logging.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RewardComponents {
    /// Total vehicles queued after the step.
    pub queue_total: u64,
    /// Vehicles discharged during the step.
    pub discharged: u64,
}

impl RewardComponents {
    /// Derive components from the queues before and after a step.
    ///
    /// `arrivals` are needed because queues grow and shrink in the same tick:
    /// discharged = before + arrivals - after.
    pub fn from_queues(
        before: &PerApproach<u32>,
        arrivals: &PerApproach<u32>,
        after: &PerApproach<u32>,
    ) -> Self {
        let mut discharged = 0u64;
        for i in 0..before.len() {
            let available = before[i] as u64 + arrivals[i] as u64;
            discharged += available.saturating_sub(after[i] as u64);
        }
        Self {
            queue_total: after.iter().map(|&q| q as u64).sum(),
            discharged,
        }
    }

    pub fn compute_reward(&self, config: &RewardConfig) -> f64 {
        -(self.queue_total as f64) + config.throughput_bonus * self.discharged as f64
    }
}

/// Convenience wrapper over `RewardComponents`.
pub fn reward(
    config: &RewardConfig,
    before: &PerApproach<u32>,
    arrivals: &PerApproach<u32>,
    after: &PerApproach<u32>,
) -> (f64, RewardComponents) {
    let components = RewardComponents::from_queues(before, arrivals, after);
    (components.compute_reward(config), components)
}
