// src/simulator.rs
//
// Tick-synchronous four-way intersection.
//
// One `step` is:
//   1) add this tick's arrivals to every queue
//   2) yellow: advance the clearance; when it expires, the other axis turns
//      green with elapsed 0 and nothing discharges this tick
//   3) green: discharge up to `saturation_per_tick` from each released approach
//   4) green: on `Switch` (or when max green is reached) enter yellow
//   5) reward from the before/after queues
//   6) done once the tick budget is used
//
// Conservation (arrived - discharged == queue) is checked after every step.

use serde::{Deserialize, Serialize};

use crate::arrivals::{ArrivalSource, PoissonArrivals};
use crate::config::{Config, IntersectionConfig, RewardConfig};
use crate::error::{ConfigError, InvariantViolation};
use crate::reward::RewardComponents;
use crate::types::{Action, Approach, PerApproach, Phase, NUM_APPROACHES};

/// Observable intersection state. Only `Intersection::step` mutates it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Vehicles waiting per approach (N, S, E, W).
    pub queues: PerApproach<u32>,
    pub phase: Phase,
    /// Ticks spent in the current phase.
    pub elapsed: u32,
}

impl SimulationState {
    /// Empty queues, North-South green.
    pub fn initial() -> Self {
        Self {
            queues: [0; NUM_APPROACHES],
            phase: Phase::NsGreen,
            elapsed: 0,
        }
    }

    pub fn total_queue(&self) -> u64 {
        self.queues.iter().map(|&q| q as u64).sum()
    }
}

impl Default for SimulationState {
    fn default() -> Self {
        Self::initial()
    }
}

/// Running totals for one approach.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproachStats {
    pub arrived: u64,
    pub discharged: u64,
    /// Σ over ticks of the post-step queue (cumulative wait, in ticks).
    pub queue_ticks: u64,
}

/// Result of a single step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutcome {
    /// State after the step.
    pub state: SimulationState,
    pub reward: f64,
    pub reward_components: RewardComponents,
    pub arrivals: PerApproach<u32>,
    pub discharged: PerApproach<u32>,
    /// Whether the tick budget is exhausted.
    pub done: bool,
    /// Ticks executed so far in this episode.
    pub tick: u64,
}

/// Single-intersection simulator.
pub struct Intersection<A: ArrivalSource = PoissonArrivals> {
    timing: IntersectionConfig,
    reward: RewardConfig,
    arrivals: A,
    state: SimulationState,
    stats: PerApproach<ApproachStats>,
    tick: u64,
    max_ticks: u64,
    done: bool,
}

impl Intersection<PoissonArrivals> {
    /// Simulator with Poisson arrivals seeded by `seed`.
    pub fn from_config(config: &Config, seed: u64) -> Result<Self, ConfigError> {
        let arrivals = PoissonArrivals::new(&config.arrivals, seed)?;
        Self::new(config, arrivals)
    }
}

impl<A: ArrivalSource> Intersection<A> {
    pub fn new(config: &Config, arrivals: A) -> Result<Self, ConfigError> {
        config.intersection.validate()?;
        config.reward.validate()?;
        config.training.validate()?;

        Ok(Self {
            timing: config.intersection.clone(),
            reward: config.reward.clone(),
            arrivals,
            state: SimulationState::initial(),
            stats: [ApproachStats::default(); NUM_APPROACHES],
            tick: 0,
            max_ticks: config.training.ticks_per_episode,
            done: false,
        })
    }

    /// Override the episode tick budget.
    pub fn with_max_ticks(mut self, max_ticks: u64) -> Self {
        self.max_ticks = max_ticks.max(1);
        self
    }

    /// Empty queues, fresh counters, arrival stream reseeded.
    pub fn reset(&mut self, seed: u64) -> SimulationState {
        self.arrivals.reseed(seed);
        self.state = SimulationState::initial();
        self.stats = [ApproachStats::default(); NUM_APPROACHES];
        self.tick = 0;
        self.done = false;
        self.state
    }

    /// Advance one tick.
    ///
    /// The action only matters when the tick starts in green; yellow ticks
    /// are not agent-controlled.
    pub fn step(&mut self, action: Action) -> Result<StepOutcome, InvariantViolation> {
        if self.done {
            return Ok(StepOutcome {
                state: self.state,
                reward: 0.0,
                reward_components: RewardComponents {
                    queue_total: self.state.total_queue(),
                    discharged: 0,
                },
                arrivals: [0; NUM_APPROACHES],
                discharged: [0; NUM_APPROACHES],
                done: true,
                tick: self.tick,
            });
        }

        let before = self.state.queues;

        // 1) Arrivals
        let arrivals = self.arrivals.next_arrivals();
        for approach in Approach::ALL {
            let i = approach.index();
            let queue = self.state.queues[i];
            self.state.queues[i] =
                queue
                    .checked_add(arrivals[i])
                    .ok_or(InvariantViolation::QueueOverflow {
                        approach,
                        tick: self.tick,
                        queue,
                        arrivals: arrivals[i],
                    })?;
            self.stats[i].arrived += arrivals[i] as u64;
        }

        // 2-4) Phase logic
        let mut discharged = [0u32; NUM_APPROACHES];
        let phase = self.state.phase;
        if phase.is_yellow() {
            self.state.elapsed += 1;
            if self.state.elapsed >= self.timing.yellow_ticks {
                // Clearance tick: new green, no discharge.
                self.state.phase = Phase::green_of(phase.axis().other());
                self.state.elapsed = 0;
            }
        } else {
            let axis = phase.axis();
            for approach in axis.approaches() {
                let i = approach.index();
                let queue = self.state.queues[i];
                let d = queue.min(self.timing.saturation_per_tick);
                self.state.queues[i] =
                    queue
                        .checked_sub(d)
                        .ok_or(InvariantViolation::NegativeQueue {
                            approach,
                            tick: self.tick,
                            queue,
                            discharge: d,
                        })?;
                discharged[i] = d;
                self.stats[i].discharged += d as u64;
            }

            self.state.elapsed += 1;
            if action == Action::Switch || self.state.elapsed >= self.timing.max_green_ticks {
                self.state.phase = Phase::yellow_of(axis);
                self.state.elapsed = 0;
            }
        }

        for (stats, &q) in self.stats.iter_mut().zip(self.state.queues.iter()) {
            stats.queue_ticks += q as u64;
        }

        // 5) Reward
        let reward_components = RewardComponents::from_queues(&before, &arrivals, &self.state.queues);
        let reward = reward_components.compute_reward(&self.reward);

        // 6) Termination
        self.tick += 1;
        self.done = self.tick >= self.max_ticks;

        self.check_invariants()?;

        Ok(StepOutcome {
            state: self.state,
            reward,
            reward_components,
            arrivals,
            discharged,
            done: self.done,
            tick: self.tick,
        })
    }

    /// Verify conservation per approach and the yellow bound.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        for approach in Approach::ALL {
            let i = approach.index();
            let s = &self.stats[i];
            let queue = self.state.queues[i];
            if s.arrived.checked_sub(s.discharged) != Some(queue as u64) {
                return Err(InvariantViolation::Conservation {
                    approach,
                    tick: self.tick,
                    arrived: s.arrived,
                    discharged: s.discharged,
                    queue,
                });
            }
        }
        if self.state.phase.is_yellow() && self.state.elapsed >= self.timing.yellow_ticks {
            return Err(InvariantViolation::YellowOverrun {
                tick: self.tick,
                elapsed: self.state.elapsed,
                yellow_ticks: self.timing.yellow_ticks,
            });
        }
        Ok(())
    }

    pub fn state(&self) -> &SimulationState {
        &self.state
    }

    pub fn stats(&self) -> &PerApproach<ApproachStats> {
        &self.stats
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn max_ticks(&self) -> u64 {
        self.max_ticks
    }

    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn timing(&self) -> &IntersectionConfig {
        &self.timing
    }

    pub fn total_arrived(&self) -> u64 {
        self.stats.iter().map(|s| s.arrived).sum()
    }

    pub fn total_discharged(&self) -> u64 {
        self.stats.iter().map(|s| s.discharged).sum()
    }

    pub fn total_queue_ticks(&self) -> u64 {
        self.stats.iter().map(|s| s.queue_ticks).sum()
    }
}
