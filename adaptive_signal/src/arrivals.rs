// src/arrivals.rs
//
// Vehicle arrival processes.
//
// - ArrivalSource:    seam between the simulator and whatever produces arrivals
// - PoissonArrivals:  independent Poisson draws per approach per tick
// - ScriptedArrivals: fixed per-tick sequence (tests, replay, zero demand)
//
// All sampling is deterministic given a seed. The RNG is owned by the source;
// nothing reads process-global randomness.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Poisson};

use crate::config::ArrivalConfig;
use crate::error::ConfigError;
use crate::types::{Approach, PerApproach, NUM_APPROACHES};

/// Produces one tick's arrivals per approach.
pub trait ArrivalSource {
    /// Draw this tick's arrivals (N, S, E, W). No upper bound is enforced.
    fn next_arrivals(&mut self) -> PerApproach<u32>;

    /// Restart the stream for a new episode.
    fn reseed(&mut self, seed: u64);
}

/// Independent Poisson arrivals per approach.
#[derive(Debug, Clone)]
pub struct PoissonArrivals {
    rates: PerApproach<f64>,
    dists: [Poisson<f64>; NUM_APPROACHES],
    rng: ChaCha8Rng,
}

impl PoissonArrivals {
    /// Fails with `ConfigError` if any rate is not finite and > 0.
    pub fn new(config: &ArrivalConfig, seed: u64) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut dists = Vec::with_capacity(NUM_APPROACHES);
        for approach in Approach::ALL {
            let rate = config.rates[approach.index()];
            let dist = Poisson::new(rate).map_err(|e| {
                ConfigError::invalid(
                    format!("arrivals.rates.{}", approach.as_str()),
                    e.to_string(),
                )
            })?;
            dists.push(dist);
        }
        let dists: [Poisson<f64>; NUM_APPROACHES] = dists
            .try_into()
            .map_err(|_| ConfigError::invalid("arrivals.rates", "expected four approaches"))?;

        Ok(Self {
            rates: config.rates,
            dists,
            rng: ChaCha8Rng::seed_from_u64(seed),
        })
    }

    pub fn rates(&self) -> PerApproach<f64> {
        self.rates
    }
}

impl ArrivalSource for PoissonArrivals {
    fn next_arrivals(&mut self) -> PerApproach<u32> {
        let mut out = [0u32; NUM_APPROACHES];
        // Fixed approach order keeps the stream reproducible.
        for (slot, dist) in out.iter_mut().zip(self.dists.iter()) {
            let draw: f64 = dist.sample(&mut self.rng);
            *slot = draw as u32;
        }
        out
    }

    fn reseed(&mut self, seed: u64) {
        self.rng = ChaCha8Rng::seed_from_u64(seed);
    }
}

/// Replays a fixed arrival sequence; yields zeros once exhausted.
#[derive(Debug, Clone, Default)]
pub struct ScriptedArrivals {
    script: Vec<PerApproach<u32>>,
    cursor: usize,
}

impl ScriptedArrivals {
    pub fn new(script: Vec<PerApproach<u32>>) -> Self {
        Self { script, cursor: 0 }
    }

    /// No vehicles ever arrive.
    pub fn empty() -> Self {
        Self::default()
    }

    /// The same arrivals every tick for `ticks` ticks.
    pub fn constant(per_tick: PerApproach<u32>, ticks: usize) -> Self {
        Self::new(vec![per_tick; ticks])
    }
}

impl ArrivalSource for ScriptedArrivals {
    fn next_arrivals(&mut self) -> PerApproach<u32> {
        let out = self.script.get(self.cursor).copied().unwrap_or([0; 4]);
        self.cursor = self.cursor.saturating_add(1);
        out
    }

    /// Scripts ignore the seed and rewind to the start.
    fn reseed(&mut self, _seed: u64) {
        self.cursor = 0;
    }
}
