//! Adaptive traffic-signal control for a single four-way intersection.
//!
//! A discrete-time intersection simulator with Poisson arrivals is paired
//! with a tabular Q-learning agent that decides each tick whether to extend
//! the current green or start the yellow transition. Trained tables are
//! persisted as versioned JSON and served by a [`SignalController`] that
//! enforces minimum and maximum green times.
//!
//! The binary (`src/main.rs`) is a thin research harness: it evaluates a
//! fixed-time baseline, trains, saves the table, and compares.

pub mod arrivals;
pub mod config;
pub mod discretizer;
pub mod error;
pub mod metrics;
pub mod reward;
pub mod rl;
pub mod simulator;
pub mod types;

// --- Re-exports for ergonomic external use ---------------------------------

pub use arrivals::{ArrivalSource, PoissonArrivals, ScriptedArrivals};

pub use config::{
    resolve_effective_profile, AgentConfig, ArrivalConfig, Config, DiscretizerConfig,
    EffectiveProfile, IntersectionConfig, ProfileSource, RewardConfig, TrafficProfile,
    TrainingConfig,
};

pub use discretizer::{Discretizer, StateKey, StateLayout};

pub use error::{ConfigError, InvariantViolation, QTableError, TrainError};

pub use metrics::{
    average_wait, EpisodeMetrics, JsonlSink, MetricsSink, NoopSink, OnlineStats, VecSink,
};

pub use reward::{reward, RewardComponents};

pub use rl::{
    empty_table, evaluate, evaluate_seeds, train, Decision, FixedTimePolicy, GreedyPolicy,
    OverrideReason, Policy, QLearningAgent, QTable, SignalController, TerminationReason,
    Trainer, TrainingReport,
};

pub use simulator::{ApproachStats, Intersection, SimulationState, StepOutcome};

pub use types::{Action, Approach, Axis, PerApproach, Phase, NUM_ACTIONS, NUM_APPROACHES};
