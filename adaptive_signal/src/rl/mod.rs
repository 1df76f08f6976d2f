// src/rl/mod.rs
//
// Learning layer on top of the simulator.
//
// - QTable:           tabular action values, versioned JSON persistence
// - QLearningAgent:   ε-greedy selection + TD(0) update
// - Policy:           per-tick decision interface (greedy, fixed-time, random)
// - SignalController: inference with min/max green enforcement
// - Trainer:          episodic training, optionally parallel
// - evaluate:         closed-loop runs without learning
//
// The table is always passed explicitly; nothing here holds global state.

pub mod agent;
pub mod controller;
pub mod evaluate;
pub mod policy;
pub mod q_table;
pub mod trainer;

pub use agent::QLearningAgent;
pub use controller::{Decision, OverrideReason, SignalController, CONTROLLER_VERSION};
pub use evaluate::{evaluate, evaluate_in, evaluate_seeds, EvaluationSummary, GreenPhase};
pub use policy::{
    FixedTimePolicy, GreedyPolicy, Policy, RandomPolicy, DEFAULT_FIXED_GREEN_TICKS,
    FIXED_TIME_POLICY_VERSION, GREEDY_POLICY_VERSION, RANDOM_POLICY_VERSION,
};
pub use q_table::{QTable, QTABLE_VERSION};
pub use trainer::{empty_table, train, TerminationReason, Trainer, TrainingReport};
