// src/rl/evaluate.rs
//
// Closed-loop evaluation of a policy: no learning, no exploration.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::arrivals::ArrivalSource;
use crate::config::Config;
use crate::discretizer::Discretizer;
use crate::error::TrainError;
use crate::metrics::{EpisodeMetrics, OnlineStats};
use crate::simulator::{Intersection, SimulationState, StepOutcome};
use crate::types::{PerApproach, Phase};

use super::policy::Policy;

/// Aggregate over several evaluation episodes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub policy: String,
    pub episodes: Vec<EpisodeMetrics>,
    pub mean_average_wait: f64,
    pub mean_total_reward: f64,
    pub mean_vehicles_passed: f64,
}

/// A green phase that ran until the signal turned yellow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GreenPhase {
    pub phase: Phase,
    pub ticks: u32,
    pub vehicles_passed: u64,
    /// Queues when the green ended.
    pub queues: PerApproach<u32>,
}

/// Folds steps into completed green phases.
#[derive(Debug, Default)]
struct GreenPhaseTracker {
    ticks: u32,
    passed: u64,
}

impl GreenPhaseTracker {
    fn observe(&mut self, before: &SimulationState, out: &StepOutcome) -> Option<GreenPhase> {
        if !before.phase.is_green() {
            return None;
        }
        self.ticks += 1;
        self.passed += out.discharged.iter().map(|&d| d as u64).sum::<u64>();
        if !out.state.phase.is_yellow() {
            return None;
        }
        let done = GreenPhase {
            phase: before.phase,
            ticks: self.ticks,
            vehicles_passed: self.passed,
            queues: out.state.queues,
        };
        *self = Self::default();
        Some(done)
    }
}

/// Run one episode of `policy` on Poisson arrivals seeded with `seed`.
pub fn evaluate(
    config: &Config,
    policy: &mut dyn Policy,
    seed: u64,
) -> Result<EpisodeMetrics, TrainError> {
    config.validate()?;
    let mut sim = Intersection::from_config(config, seed)?;
    let discretizer = Discretizer::new(&config.discretizer)?;
    evaluate_in(&mut sim, &discretizer, policy, seed)
}

/// Run one episode on a caller-supplied simulator (any arrival source).
pub fn evaluate_in<A: ArrivalSource>(
    sim: &mut Intersection<A>,
    discretizer: &Discretizer,
    policy: &mut dyn Policy,
    seed: u64,
) -> Result<EpisodeMetrics, TrainError> {
    let mut state = sim.reset(seed);
    policy.reset_episode(seed, 0);

    let mut total_reward = 0.0;
    let mut greens = GreenPhaseTracker::default();
    loop {
        let key = discretizer.discretize(&state);
        let action = policy.act(&state, &key);
        let out = sim.step(action)?;
        total_reward += out.reward;
        if let Some(g) = greens.observe(&state, &out) {
            debug!(
                tick = out.tick,
                phase = ?g.phase,
                green_ticks = g.ticks,
                vehicles_passed = g.vehicles_passed,
                queues = ?g.queues,
                "green phase ended"
            );
        }
        state = out.state;
        if out.done {
            break;
        }
    }

    Ok(EpisodeMetrics::from_run(
        0,
        seed,
        0.0,
        sim,
        total_reward,
        &OnlineStats::default(),
    ))
}

/// Evaluate on seeds `base_seed .. base_seed + count`.
pub fn evaluate_seeds(
    config: &Config,
    policy: &mut dyn Policy,
    base_seed: u64,
    count: u64,
) -> Result<EvaluationSummary, TrainError> {
    let mut episodes = Vec::with_capacity(count as usize);
    let mut wait = OnlineStats::default();
    let mut reward = OnlineStats::default();
    let mut passed = OnlineStats::default();

    for k in 0..count {
        let mut m = evaluate(config, policy, base_seed.wrapping_add(k))?;
        m.episode = k;
        wait.add(m.average_wait);
        reward.add(m.total_reward);
        passed.add(m.vehicles_passed as f64);
        episodes.push(m);
    }

    Ok(EvaluationSummary {
        policy: policy.version().to_string(),
        episodes,
        mean_average_wait: wait.mean(),
        mean_total_reward: reward.mean(),
        mean_vehicles_passed: passed.mean(),
    })
}
