// src/config.rs
//
// Central configuration for the signal controller core.
//
// One tree covers every tunable the core needs: arrival rates, intersection
// timing, discretization buckets, reward shaping, learning hyperparameters
// and the training schedule. Defaults are the "Balanced" profile.
//
// Precedence for the traffic profile: CLI > SIGNAL_PROFILE env > Balanced.
// Individual SIGNAL_* env vars then override single fields.

use std::env;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::ConfigError;
use crate::types::{Approach, PerApproach};

/// Traffic demand preset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrafficProfile {
    /// Equal demand on every approach (0.3 veh/tick).
    Balanced,
    /// Uneven demand, East/North heavier than South/West.
    Asymmetric,
    /// Near-saturated demand (0.4 veh/tick).
    Heavy,
}

impl TrafficProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrafficProfile::Balanced => "balanced",
            TrafficProfile::Asymmetric => "asymmetric",
            TrafficProfile::Heavy => "heavy",
        }
    }

    /// Parse a profile name (case-insensitive). Returns None if unrecognized.
    pub fn parse(s: &str) -> Option<TrafficProfile> {
        match s.trim().to_ascii_lowercase().as_str() {
            "balanced" | "bal" | "b" => Some(TrafficProfile::Balanced),
            "asymmetric" | "asym" | "a" => Some(TrafficProfile::Asymmetric),
            "heavy" | "h" | "peak" => Some(TrafficProfile::Heavy),
            _ => None,
        }
    }

    /// Per-approach arrival rates (veh/tick) in N, S, E, W order.
    pub fn arrival_rates(&self) -> PerApproach<f64> {
        match self {
            TrafficProfile::Balanced => [0.3; 4],
            TrafficProfile::Asymmetric => [0.20, 0.15, 0.25, 0.18],
            TrafficProfile::Heavy => [0.4; 4],
        }
    }
}

/// Where the effective profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    Cli,
    Env,
    Default,
}

impl ProfileSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProfileSource::Cli => "cli",
            ProfileSource::Env => "env",
            ProfileSource::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct EffectiveProfile {
    pub profile: TrafficProfile,
    pub source: ProfileSource,
}

impl EffectiveProfile {
    pub fn log_startup(&self) {
        info!(
            profile = self.profile.as_str(),
            source = self.source.as_str(),
            "effective traffic profile"
        );
    }
}

/// Resolve the traffic profile: CLI, then `SIGNAL_PROFILE`, then Balanced.
pub fn resolve_effective_profile(cli_profile: Option<TrafficProfile>) -> EffectiveProfile {
    if let Some(profile) = cli_profile {
        return EffectiveProfile {
            profile,
            source: ProfileSource::Cli,
        };
    }

    if let Ok(raw) = env::var("SIGNAL_PROFILE") {
        if !raw.is_empty() {
            if let Some(profile) = TrafficProfile::parse(&raw) {
                return EffectiveProfile {
                    profile,
                    source: ProfileSource::Env,
                };
            }
            warn!(value = %raw, "invalid SIGNAL_PROFILE; ignoring");
        }
    }

    EffectiveProfile {
        profile: TrafficProfile::Balanced,
        source: ProfileSource::Default,
    }
}

/// Poisson arrival rates per approach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArrivalConfig {
    /// Mean arrivals per tick, N, S, E, W. Must be > 0.
    pub rates: PerApproach<f64>,
}

impl ArrivalConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        for approach in Approach::ALL {
            let rate = self.rates[approach.index()];
            if !rate.is_finite() || rate <= 0.0 {
                return Err(ConfigError::invalid(
                    format!("arrivals.rates.{}", approach.as_str()),
                    format!("arrival rate must be finite and > 0, got {rate}"),
                ));
            }
        }
        Ok(())
    }
}

/// Physical timing of the intersection, in ticks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntersectionConfig {
    /// Max vehicles discharged per permitted approach per green tick.
    pub saturation_per_tick: u32,
    /// Fixed yellow clearance length.
    pub yellow_ticks: u32,
    /// Shortest green the inference controller will allow.
    pub min_green_ticks: u32,
    /// Longest green; the simulator forces a switch when reached.
    pub max_green_ticks: u32,
    /// Wall-clock seconds represented by one tick (for reporting).
    pub tick_seconds: f64,
}

impl IntersectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.saturation_per_tick == 0 {
            return Err(ConfigError::invalid(
                "intersection.saturation_per_tick",
                "must be >= 1",
            ));
        }
        if self.yellow_ticks == 0 {
            return Err(ConfigError::invalid(
                "intersection.yellow_ticks",
                "must be >= 1",
            ));
        }
        if self.min_green_ticks == 0 {
            return Err(ConfigError::invalid(
                "intersection.min_green_ticks",
                "must be >= 1",
            ));
        }
        if self.max_green_ticks < self.min_green_ticks {
            return Err(ConfigError::invalid(
                "intersection.max_green_ticks",
                format!(
                    "must be >= min_green_ticks ({}), got {}",
                    self.min_green_ticks, self.max_green_ticks
                ),
            ));
        }
        if !self.tick_seconds.is_finite() || self.tick_seconds <= 0.0 {
            return Err(ConfigError::invalid(
                "intersection.tick_seconds",
                format!("must be finite and > 0, got {}", self.tick_seconds),
            ));
        }
        Ok(())
    }
}

/// Bucket boundaries for the state discretizer.
///
/// Edges are upper-inclusive: value `v` falls in the first bucket `i` with
/// `v <= edges[i]`, or in the open-ended bucket `edges.len()` otherwise.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscretizerConfig {
    /// Queue-length edges applied to each approach.
    pub queue_edges: Vec<u32>,
    /// Edges for ticks elapsed in the current phase.
    pub elapsed_edges: Vec<u32>,
}

impl DiscretizerConfig {
    /// Fixed-width bins: `[width-1, 2*width-1, ...]` with `count` bounded bins
    /// followed by one open-ended bin.
    pub fn fixed_width(width: u32, count: usize) -> Result<Vec<u32>, ConfigError> {
        const FIELD: &str = "discretizer.fixed_width";
        if width == 0 {
            return Err(ConfigError::invalid(FIELD, "width must be at least 1"));
        }
        if count == 0 || count >= u8::MAX as usize {
            return Err(ConfigError::invalid(
                FIELD,
                format!("count must be in [1, {}], got {count}", u8::MAX - 1),
            ));
        }
        (1..=count as u32)
            .map(|i| {
                i.checked_mul(width).map(|upper| upper - 1).ok_or_else(|| {
                    ConfigError::invalid(
                        FIELD,
                        format!("{count} bins of width {width} overflow u32"),
                    )
                })
            })
            .collect()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_edges("discretizer.queue_edges", &self.queue_edges)?;
        validate_edges("discretizer.elapsed_edges", &self.elapsed_edges)
    }
}

fn validate_edges(field: &str, edges: &[u32]) -> Result<(), ConfigError> {
    if edges.is_empty() {
        return Err(ConfigError::invalid(field, "at least one edge required"));
    }
    // Bucket indices are stored as u8, including the open-ended bucket.
    if edges.len() >= u8::MAX as usize {
        return Err(ConfigError::invalid(
            field,
            format!("too many edges ({}), max {}", edges.len(), u8::MAX - 1),
        ));
    }
    if edges.windows(2).any(|w| w[0] >= w[1]) {
        return Err(ConfigError::invalid(
            field,
            format!("edges must be strictly increasing, got {edges:?}"),
        ));
    }
    Ok(())
}

/// Reward shaping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardConfig {
    /// Credit per vehicle discharged this tick.
    pub throughput_bonus: f64,
}

impl RewardConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.throughput_bonus.is_finite() || self.throughput_bonus < 0.0 {
            return Err(ConfigError::invalid(
                "reward.throughput_bonus",
                format!("must be finite and >= 0, got {}", self.throughput_bonus),
            ));
        }
        Ok(())
    }
}

/// Q-learning hyperparameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Learning rate α ∈ (0, 1].
    pub alpha: f64,
    /// Discount factor γ ∈ (0, 1].
    pub gamma: f64,
    /// Initial exploration rate ε ∈ [0, 1].
    pub epsilon_start: f64,
    /// Lower bound for ε, ∈ [0, epsilon_start].
    pub epsilon_floor: f64,
    /// Multiplicative ε decay per episode, ∈ (0, 1].
    pub epsilon_decay: f64,
}

impl AgentConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_unit_open_closed("agent.alpha", self.alpha)?;
        check_unit_open_closed("agent.gamma", self.gamma)?;
        check_unit_open_closed("agent.epsilon_decay", self.epsilon_decay)?;
        if !(0.0..=1.0).contains(&self.epsilon_start) {
            return Err(ConfigError::invalid(
                "agent.epsilon_start",
                format!("must be in [0, 1], got {}", self.epsilon_start),
            ));
        }
        if !(0.0..=self.epsilon_start).contains(&self.epsilon_floor) {
            return Err(ConfigError::invalid(
                "agent.epsilon_floor",
                format!(
                    "must be in [0, epsilon_start={}], got {}",
                    self.epsilon_start, self.epsilon_floor
                ),
            ));
        }
        Ok(())
    }
}

fn check_unit_open_closed(field: &str, value: f64) -> Result<(), ConfigError> {
    // NaN fails both comparisons.
    if value > 0.0 && value <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must be in (0, 1], got {value}"),
        ))
    }
}

/// Episode schedule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Number of training episodes.
    pub episodes: u64,
    /// Tick budget per episode.
    pub ticks_per_episode: u64,
    /// Base seed; episode `k` uses `seed + k`.
    pub seed: u64,
    /// Parallel workers (1 = sequential).
    pub workers: usize,
    /// Emit an info-level progress line every N episodes (0 = never).
    pub log_every: u64,
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.episodes == 0 {
            return Err(ConfigError::invalid("training.episodes", "must be >= 1"));
        }
        if self.ticks_per_episode == 0 {
            return Err(ConfigError::invalid(
                "training.ticks_per_episode",
                "must be >= 1",
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("training.workers", "must be >= 1"));
        }
        Ok(())
    }
}

/// Full configuration tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Profile the arrival rates were derived from.
    pub profile: TrafficProfile,
    pub arrivals: ArrivalConfig,
    pub intersection: IntersectionConfig,
    pub discretizer: DiscretizerConfig,
    pub reward: RewardConfig,
    pub agent: AgentConfig,
    pub training: TrainingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self::for_profile(TrafficProfile::Balanced)
    }
}

impl Config {
    /// Defaults with the arrival rates of `profile`.
    pub fn for_profile(profile: TrafficProfile) -> Self {
        Self {
            profile,
            arrivals: ArrivalConfig {
                rates: profile.arrival_rates(),
            },
            intersection: IntersectionConfig {
                saturation_per_tick: 1,
                yellow_ticks: 3,
                min_green_ticks: 5,
                max_green_ticks: 40,
                tick_seconds: 1.0,
            },
            discretizer: DiscretizerConfig {
                queue_edges: vec![0, 2, 5, 10, 20],
                elapsed_edges: vec![4, 9, 19],
            },
            reward: RewardConfig {
                throughput_bonus: 0.5,
            },
            agent: AgentConfig {
                alpha: 0.1,
                gamma: 0.9,
                epsilon_start: 1.0,
                epsilon_floor: 0.05,
                epsilon_decay: 0.99,
            },
            training: TrainingConfig {
                episodes: 500,
                ticks_per_episode: 200,
                seed: 42,
                workers: 1,
                log_every: 50,
            },
        }
    }

    /// Validate the whole tree. Training never starts on an invalid config.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.arrivals.validate()?;
        self.intersection.validate()?;
        self.discretizer.validate()?;
        self.reward.validate()?;
        self.agent.validate()?;
        self.training.validate()
    }

    /// Profile defaults plus `SIGNAL_*` env overrides, validated.
    pub fn from_env_or_profile(profile: TrafficProfile) -> Result<Self, ConfigError> {
        let mut cfg = Self::for_profile(profile);

        if let Some(v) = env_override::<u64>("SIGNAL_SEED", |_| true) {
            cfg.training.seed = v;
        }
        if let Some(v) = env_override::<u64>("SIGNAL_EPISODES", |v| *v > 0) {
            cfg.training.episodes = v;
        }
        if let Some(v) = env_override::<u64>("SIGNAL_TICKS", |v| *v > 0) {
            cfg.training.ticks_per_episode = v;
        }
        if let Some(v) = env_override::<f64>("SIGNAL_ALPHA", |v| *v > 0.0 && *v <= 1.0) {
            cfg.agent.alpha = v;
        }
        if let Some(v) = env_override::<f64>("SIGNAL_GAMMA", |v| *v > 0.0 && *v <= 1.0) {
            cfg.agent.gamma = v;
        }
        if let Some(v) = env_override::<f64>("SIGNAL_EPSILON_DECAY", |v| *v > 0.0 && *v <= 1.0)
        {
            cfg.agent.epsilon_decay = v;
        }
        if let Some(v) = env_override::<f64>("SIGNAL_ARRIVAL_RATE", |v| v.is_finite() && *v > 0.0)
        {
            cfg.arrivals.rates = [v; 4];
        }

        cfg.validate()?;
        Ok(cfg)
    }
}

/// Read and parse one env override. Unset is silent; bad values warn.
fn env_override<T>(name: &str, accept: impl Fn(&T) -> bool) -> Option<T>
where
    T: FromStr + Copy + std::fmt::Display,
{
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(v) if accept(&v) => {
            info!(var = name, value = %v, "config override from env");
            Some(v)
        }
        Ok(v) => {
            warn!(var = name, value = %v, "env override out of range; ignoring");
            None
        }
        Err(_) => {
            warn!(var = name, value = %raw, "unparseable env override; ignoring");
            None
        }
    }
}
