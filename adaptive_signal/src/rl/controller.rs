// src/rl/controller.rs
//
// Inference-time signal controller.
//
// Reads a learned table greedily (ε = 0, no updates) and passes every
// decision through fixed timing rules before it reaches the signal:
// - never leave green before `min_green_ticks`
// - always leave green once `max_green_ticks` is reached
// - yellow is never agent-controlled
//
// The table proposes, the timing rules decide. Both the raw proposal and the
// applied action are reported, so overrides are visible to callers.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::{Config, IntersectionConfig};
use crate::discretizer::{Discretizer, StateKey};
use crate::error::ConfigError;
use crate::simulator::SimulationState;
use crate::types::{Action, Phase};

use super::policy::Policy;
use super::q_table::QTable;

pub const CONTROLLER_VERSION: &str = "signal-controller-v1";

/// Why the applied action differs from the table's proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OverrideReason {
    /// Switch proposed before the minimum green elapsed.
    MinGreen,
    /// Extend proposed at the maximum green.
    MaxGreen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub raw: Action,
    pub applied: Action,
    pub override_reason: Option<OverrideReason>,
}

pub struct SignalController {
    table: QTable,
    min_green_ticks: u32,
    max_green_ticks: u32,
    green_elapsed: u32,
    last_phase: Option<Phase>,
}

impl SignalController {
    pub fn new(table: QTable, timing: &IntersectionConfig) -> Result<Self, ConfigError> {
        timing.validate()?;
        Ok(Self {
            table,
            min_green_ticks: timing.min_green_ticks,
            max_green_ticks: timing.max_green_ticks,
            green_elapsed: 0,
            last_phase: None,
        })
    }

    /// Build from a saved table. A missing or unreadable file yields an
    /// empty table (always Extend until max green), with a warning.
    pub fn load(path: &Path, config: &Config) -> Result<Self, ConfigError> {
        let layout = Discretizer::new(&config.discretizer)?.layout();
        let table = QTable::load_or_empty(path, layout);
        Self::new(table, &config.intersection)
    }

    pub fn table(&self) -> &QTable {
        &self.table
    }

    /// Decision for a key when `green_elapsed` green ticks have already run.
    pub fn decide_at(&self, key: &StateKey, green_elapsed: u32) -> Decision {
        let raw = self.table.greedy_action(key);
        if key.phase.is_yellow() {
            return Decision {
                raw,
                applied: Action::Extend,
                override_reason: None,
            };
        }

        // This decision closes green tick `green_elapsed + 1`.
        let completed = green_elapsed.saturating_add(1);
        let (applied, override_reason) = if completed >= self.max_green_ticks {
            let reason = (raw != Action::Switch).then_some(OverrideReason::MaxGreen);
            (Action::Switch, reason)
        } else if raw == Action::Switch && completed < self.min_green_ticks {
            (Action::Extend, Some(OverrideReason::MinGreen))
        } else {
            (raw, None)
        };

        Decision {
            raw,
            applied,
            override_reason,
        }
    }

    /// Stateful variant for one call per tick; tracks green time itself.
    pub fn decide(&mut self, key: &StateKey) -> Action {
        if self.last_phase != Some(key.phase) {
            self.green_elapsed = 0;
            self.last_phase = Some(key.phase);
        }

        let decision = self.decide_at(key, self.green_elapsed);
        if let Some(reason) = decision.override_reason {
            debug!(
                phase = ?key.phase,
                green_elapsed = self.green_elapsed,
                raw = ?decision.raw,
                applied = ?decision.applied,
                reason = ?reason,
                "controller override"
            );
        }
        if key.phase.is_green() {
            self.green_elapsed = self.green_elapsed.saturating_add(1);
        }
        decision.applied
    }

    /// Forget the tracked phase and green time.
    pub fn reset(&mut self) {
        self.green_elapsed = 0;
        self.last_phase = None;
    }
}

impl Policy for SignalController {
    fn version(&self) -> &str {
        CONTROLLER_VERSION
    }

    fn act(&mut self, state: &SimulationState, key: &StateKey) -> Action {
        // The simulator's own elapsed count is exact; prefer it to tracking.
        self.last_phase = Some(state.phase);
        self.green_elapsed = state.elapsed;
        self.decide_at(key, state.elapsed).applied
    }

    fn reset_episode(&mut self, _seed: u64, _episode_id: u64) {
        self.reset();
    }
}
