// src/metrics.rs
//
// Episode metrics and where they go.
// - OnlineStats:    Welford running mean/variance + min/max
// - EpisodeMetrics: one record per finished episode
// - MetricsSink:    consumer of episode records (Noop, JSONL file, in-memory)

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::arrivals::ArrivalSource;
use crate::simulator::Intersection;
use crate::types::PerApproach;

#[derive(Debug, Clone, Copy)]
pub struct OnlineStats {
    n: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl Default for OnlineStats {
    fn default() -> Self {
        Self {
            n: 0,
            mean: 0.0,
            m2: 0.0,
            min: f64::INFINITY,
            max: f64::NEG_INFINITY,
        }
    }
}

impl OnlineStats {
    /// Non-finite samples are dropped.
    pub fn add(&mut self, x: f64) {
        if !x.is_finite() {
            return;
        }
        self.n += 1;
        self.min = self.min.min(x);
        self.max = self.max.max(x);

        let delta = x - self.mean;
        self.mean += delta / (self.n as f64);
        self.m2 += delta * (x - self.mean);
    }

    pub fn n(&self) -> u64 {
        self.n
    }

    pub fn mean(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.mean
        }
    }

    pub fn min(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.min
        }
    }

    pub fn max(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            self.max
        }
    }

    /// Sample standard deviation (n-1).
    pub fn stddev(&self) -> f64 {
        if self.n <= 1 {
            0.0
        } else {
            (self.m2 / ((self.n as f64) - 1.0)).sqrt()
        }
    }
}

/// Average wait in seconds per vehicle served.
///
/// Returns the sentinel `0.0` when no vehicle passed, so an empty episode
/// never produces NaN.
pub fn average_wait(queue_ticks: u64, vehicles_passed: u64, tick_seconds: f64) -> f64 {
    if vehicles_passed == 0 {
        return 0.0;
    }
    queue_ticks as f64 * tick_seconds / vehicles_passed as f64
}

/// Summary of one episode (training or evaluation).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeMetrics {
    pub episode: u64,
    pub seed: u64,
    /// Exploration rate used during the episode (0 for evaluation).
    pub epsilon: f64,
    pub ticks: u64,
    pub vehicles_arrived: u64,
    pub vehicles_passed: u64,
    /// Σ over ticks of vehicles left waiting.
    pub queue_ticks: u64,
    /// Seconds per vehicle served; 0.0 if none passed.
    pub average_wait: f64,
    pub total_reward: f64,
    /// Mean |TD error| over the episode's updates (0 for evaluation).
    pub mean_abs_td_error: f64,
    pub final_queue: PerApproach<u32>,
}

impl EpisodeMetrics {
    /// Collect metrics from a simulator at the end of an episode.
    pub fn from_run<A: ArrivalSource>(
        episode: u64,
        seed: u64,
        epsilon: f64,
        sim: &Intersection<A>,
        total_reward: f64,
        td_errors: &OnlineStats,
    ) -> Self {
        let vehicles_passed = sim.total_discharged();
        let queue_ticks = sim.total_queue_ticks();
        Self {
            episode,
            seed,
            epsilon,
            ticks: sim.tick(),
            vehicles_arrived: sim.total_arrived(),
            vehicles_passed,
            queue_ticks,
            average_wait: average_wait(queue_ticks, vehicles_passed, sim.timing().tick_seconds),
            total_reward,
            mean_abs_td_error: td_errors.mean(),
            final_queue: sim.state().queues,
        }
    }
}

/// Consumer of per-episode metrics.
pub trait MetricsSink {
    fn record_episode(&mut self, metrics: &EpisodeMetrics);

    fn flush(&mut self) {}
}

/// Discards every record.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record_episode(&mut self, _metrics: &EpisodeMetrics) {}
}

/// Keeps records in memory.
#[derive(Debug, Default, Clone)]
pub struct VecSink {
    pub records: Vec<EpisodeMetrics>,
}

impl MetricsSink for VecSink {
    fn record_episode(&mut self, metrics: &EpisodeMetrics) {
        self.records.push(metrics.clone());
    }
}

/// One JSON object per line.
///
/// Write failures are logged and otherwise ignored; metrics never abort
/// training.
pub struct JsonlSink {
    writer: BufWriter<File>,
    failed: bool,
}

impl JsonlSink {
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            failed: false,
        })
    }

    fn write_line(&mut self, metrics: &EpisodeMetrics) -> io::Result<()> {
        serde_json::to_writer(&mut self.writer, metrics)?;
        self.writer.write_all(b"\n")
    }
}

impl MetricsSink for JsonlSink {
    fn record_episode(&mut self, metrics: &EpisodeMetrics) {
        if let Err(e) = self.write_line(metrics) {
            // Warn once, not once per episode.
            if !self.failed {
                warn!(error = %e, episode = metrics.episode, "metrics write failed");
                self.failed = true;
            }
        }
    }

    fn flush(&mut self) {
        if let Err(e) = self.writer.flush() {
            warn!(error = %e, "metrics flush failed");
        }
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}
