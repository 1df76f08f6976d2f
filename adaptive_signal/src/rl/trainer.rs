// src/rl/trainer.rs
//
// Episodic training loop.
//
// Episode k (0-based) simulates arrivals seeded with `seed + k`; its
// exploration RNG is derived from the same value. ε decays once per episode.
//
// With `workers > 1` episodes run in rounds of `workers`. Each worker starts
// from a clone of the round's table, runs one episode on its own thread, and
// the round ends by averaging the worker tables in worker order. Results are
// deterministic for a fixed worker count.
//
// Cancellation and the wall-clock budget are checked between rounds only; a
// stopped run still returns the table learned so far.

use std::ops::Range;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::Config;
use crate::discretizer::Discretizer;
use crate::error::{ConfigError, QTableError, TrainError};
use crate::metrics::{EpisodeMetrics, MetricsSink, NoopSink, OnlineStats};
use crate::simulator::Intersection;

use super::agent::QLearningAgent;
use super::q_table::QTable;

/// Separates the exploration stream from the arrival stream of an episode.
const EXPLORATION_STREAM: u64 = 0x9E37_79B9_7F4A_7C15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TerminationReason {
    /// Every configured episode ran.
    Completed,
    /// The cancel flag was raised.
    Cancelled,
    /// The wall-clock budget ran out.
    TimeBudget,
}

#[derive(Debug, Clone)]
pub struct TrainingReport {
    /// One record per finished episode, in episode order.
    pub episodes: Vec<EpisodeMetrics>,
    pub termination: TerminationReason,
    /// ε after the last decay.
    pub final_epsilon: f64,
    pub table: QTable,
}

impl TrainingReport {
    /// Mean `average_wait` over a range of episode indices (clamped).
    pub fn mean_average_wait(&self, range: Range<usize>) -> f64 {
        self.mean_of(range, |m| m.average_wait)
    }

    pub fn mean_abs_td_error(&self, range: Range<usize>) -> f64 {
        self.mean_of(range, |m| m.mean_abs_td_error)
    }

    fn mean_of(&self, range: Range<usize>, f: impl Fn(&EpisodeMetrics) -> f64) -> f64 {
        let end = range.end.min(self.episodes.len());
        let start = range.start.min(end);
        let mut stats = OnlineStats::default();
        for m in &self.episodes[start..end] {
            stats.add(f(m));
        }
        stats.mean()
    }
}

/// Empty table shaped by the configured discretizer.
pub fn empty_table(config: &Config) -> Result<QTable, ConfigError> {
    Ok(QTable::new(Discretizer::new(&config.discretizer)?.layout()))
}

/// Train with defaults: no sink, no cancellation, no checkpoints.
pub fn train(config: &Config, table: QTable) -> Result<TrainingReport, TrainError> {
    Trainer::new(config.clone()).run(table, &mut NoopSink)
}

#[derive(Debug, Clone)]
struct Checkpoint {
    path: PathBuf,
    every: u64,
}

pub struct Trainer {
    config: Config,
    cancel: Option<Arc<AtomicBool>>,
    time_budget: Option<Duration>,
    checkpoint: Option<Checkpoint>,
}

impl Trainer {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            cancel: None,
            time_budget: None,
            checkpoint: None,
        }
    }

    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn with_time_budget(mut self, budget: Duration) -> Self {
        self.time_budget = Some(budget);
        self
    }

    /// Save the table to `path` every `every` episodes.
    pub fn with_checkpoint(mut self, path: impl Into<PathBuf>, every: u64) -> Self {
        self.checkpoint = Some(Checkpoint {
            path: path.into(),
            every: every.max(1),
        });
        self
    }

    pub fn run(
        &self,
        mut table: QTable,
        sink: &mut dyn MetricsSink,
    ) -> Result<TrainingReport, TrainError> {
        let config = &self.config;
        config.validate()?;
        let discretizer = Discretizer::new(&config.discretizer)?;
        if table.layout() != discretizer.layout() {
            return Err(QTableError::Layout(format!(
                "table has {:?}, discretizer produces {:?}",
                table.layout(),
                discretizer.layout()
            ))
            .into());
        }

        let training = &config.training;
        let mut agent = QLearningAgent::new(&config.agent, training.seed)?;
        let started = Instant::now();
        let mut episodes: Vec<EpisodeMetrics> = Vec::with_capacity(training.episodes as usize);
        let mut termination = TerminationReason::Completed;
        let mut checkpoints_written = 0u64;
        let mut last_checkpoint: Option<u64> = None;

        info!(
            episodes = training.episodes,
            ticks = training.ticks_per_episode,
            seed = training.seed,
            workers = training.workers,
            states = discretizer.layout().num_states(),
            "training started"
        );

        let mut next = 0u64;
        while next < training.episodes {
            if let Some(reason) = self.should_stop(started) {
                termination = reason;
                break;
            }

            let round = (training.workers as u64).min(training.episodes - next);
            let finished = if round == 1 {
                let m = run_episode(config, &discretizer, &mut agent, &mut table, next)?;
                agent.decay_epsilon();
                vec![m]
            } else {
                let (merged, metrics) =
                    run_parallel_round(config, &discretizer, &mut agent, &table, next, round)?;
                table = merged;
                metrics
            };

            for m in finished {
                debug!(
                    episode = m.episode,
                    epsilon = m.epsilon,
                    average_wait = m.average_wait,
                    total_reward = m.total_reward,
                    td_error = m.mean_abs_td_error,
                    "episode finished"
                );
                if training.log_every > 0 && (m.episode + 1) % training.log_every == 0 {
                    info!(
                        episode = m.episode + 1,
                        of = training.episodes,
                        epsilon = m.epsilon,
                        average_wait = m.average_wait,
                        states = table.len(),
                        "training progress"
                    );
                }
                sink.record_episode(&m);
                episodes.push(m);
            }
            next += round;

            if let Some(cp) = &self.checkpoint {
                if next / cp.every > checkpoints_written {
                    checkpoints_written = next / cp.every;
                    table.save(&cp.path)?;
                    last_checkpoint = Some(next);
                    info!(path = %cp.path.display(), episode = next, "checkpoint written");
                }
            }
        }
        sink.flush();

        // The checkpoint file always ends up holding the returned table.
        if let Some(cp) = &self.checkpoint {
            if last_checkpoint != Some(next) {
                table.save(&cp.path)?;
                info!(path = %cp.path.display(), episode = next, "final checkpoint written");
            }
        }

        info!(
            episodes = episodes.len(),
            termination = ?termination,
            final_epsilon = agent.epsilon(),
            states = table.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "training finished"
        );

        Ok(TrainingReport {
            episodes,
            termination,
            final_epsilon: agent.epsilon(),
            table,
        })
    }

    fn should_stop(&self, started: Instant) -> Option<TerminationReason> {
        if let Some(flag) = &self.cancel {
            if flag.load(Ordering::Acquire) {
                return Some(TerminationReason::Cancelled);
            }
        }
        if let Some(budget) = self.time_budget {
            if started.elapsed() >= budget {
                return Some(TerminationReason::TimeBudget);
            }
        }
        None
    }
}

fn run_episode(
    config: &Config,
    discretizer: &Discretizer,
    agent: &mut QLearningAgent,
    table: &mut QTable,
    episode: u64,
) -> Result<EpisodeMetrics, TrainError> {
    let seed = config.training.seed.wrapping_add(episode);
    let mut sim = Intersection::from_config(config, seed)?;
    agent.reseed(seed ^ EXPLORATION_STREAM);

    let mut key = discretizer.discretize(&sim.reset(seed));
    let mut total_reward = 0.0;
    let mut td_errors = OnlineStats::default();

    loop {
        let action = agent.select_action(table, &key);
        let out = sim.step(action)?;
        let next_key = discretizer.discretize(&out.state);
        let td = agent.update(table, &key, action, out.reward, &next_key)?;
        td_errors.add(td.abs());
        total_reward += out.reward;
        key = next_key;
        if out.done {
            break;
        }
    }

    Ok(EpisodeMetrics::from_run(
        episode,
        seed,
        agent.epsilon(),
        &sim,
        total_reward,
        &td_errors,
    ))
}

fn run_parallel_round(
    config: &Config,
    discretizer: &Discretizer,
    agent: &mut QLearningAgent,
    table: &QTable,
    first_episode: u64,
    round: u64,
) -> Result<(QTable, Vec<EpisodeMetrics>), TrainError> {
    // Worker i explores with ε decayed i times, as it would sequentially.
    let mut workers = Vec::with_capacity(round as usize);
    for i in 0..round {
        workers.push((first_episode + i, agent.clone(), table.clone()));
        agent.decay_epsilon();
    }

    let results: Vec<Result<(QTable, EpisodeMetrics), TrainError>> = thread::scope(|scope| {
        let handles: Vec<_> = workers
            .into_iter()
            .map(|(episode, mut worker_agent, mut worker_table)| {
                scope.spawn(move || -> Result<(QTable, EpisodeMetrics), TrainError> {
                    let m = run_episode(
                        config,
                        discretizer,
                        &mut worker_agent,
                        &mut worker_table,
                        episode,
                    )?;
                    Ok((worker_table, m))
                })
            })
            .collect();

        handles
            .into_iter()
            .map(|h| h.join().map_err(|_| TrainError::WorkerPanicked).and_then(|r| r))
            .collect()
    });

    let mut tables = Vec::with_capacity(results.len());
    let mut metrics = Vec::with_capacity(results.len());
    for r in results {
        let (t, m) = r?;
        tables.push(t);
        metrics.push(m);
    }
    Ok((QTable::average(&tables)?, metrics))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::VecSink;

    fn quick_config(episodes: u64) -> Config {
        let mut cfg = Config::default();
        cfg.training.episodes = episodes;
        cfg.training.ticks_per_episode = 60;
        cfg.training.log_every = 0;
        cfg
    }

    #[test]
    fn runs_all_episodes_with_seed_sequence() {
        let cfg = quick_config(5);
        let report = train(&cfg, empty_table(&cfg).unwrap()).unwrap();
        assert_eq!(report.termination, TerminationReason::Completed);
        assert_eq!(report.episodes.len(), 5);
        for (k, m) in report.episodes.iter().enumerate() {
            assert_eq!(m.episode, k as u64);
            assert_eq!(m.seed, cfg.training.seed + k as u64);
            assert_eq!(m.ticks, 60);
        }
        assert!(!report.table.is_empty());
    }

    #[test]
    fn epsilon_decays_once_per_episode() {
        let cfg = quick_config(4);
        let report = train(&cfg, empty_table(&cfg).unwrap()).unwrap();
        let decay = cfg.agent.epsilon_decay;
        let mut expected = cfg.agent.epsilon_start;
        for m in &report.episodes {
            assert!((m.epsilon - expected).abs() < 1e-12);
            expected = (expected * decay).max(cfg.agent.epsilon_floor);
        }
        assert!((report.final_epsilon - expected).abs() < 1e-12);
    }

    #[test]
    fn cancel_before_start_returns_input_table() {
        let cfg = quick_config(10);
        let flag = Arc::new(AtomicBool::new(true));
        let report = Trainer::new(cfg.clone())
            .with_cancel_flag(flag)
            .run(empty_table(&cfg).unwrap(), &mut NoopSink)
            .unwrap();
        assert_eq!(report.termination, TerminationReason::Cancelled);
        assert!(report.episodes.is_empty());
        assert!(report.table.is_empty());
        assert_eq!(report.final_epsilon, cfg.agent.epsilon_start);
    }

    #[test]
    fn zero_time_budget_stops_immediately() {
        let cfg = quick_config(10);
        let report = Trainer::new(cfg.clone())
            .with_time_budget(Duration::ZERO)
            .run(empty_table(&cfg).unwrap(), &mut NoopSink)
            .unwrap();
        assert_eq!(report.termination, TerminationReason::TimeBudget);
        assert!(report.episodes.is_empty());
    }

    #[test]
    fn sink_receives_every_episode() {
        let cfg = quick_config(3);
        let mut sink = VecSink::default();
        let report = Trainer::new(cfg.clone())
            .run(empty_table(&cfg).unwrap(), &mut sink)
            .unwrap();
        assert_eq!(sink.records, report.episodes);
    }

    #[test]
    fn parallel_rounds_are_deterministic() {
        let mut cfg = quick_config(7);
        cfg.training.workers = 3;
        let a = train(&cfg, empty_table(&cfg).unwrap()).unwrap();
        let b = train(&cfg, empty_table(&cfg).unwrap()).unwrap();
        assert_eq!(a.episodes.len(), 7);
        assert_eq!(a.table, b.table);
        assert_eq!(a.episodes, b.episodes);
        assert!((a.final_epsilon - b.final_epsilon).abs() < 1e-15);
    }

    #[test]
    fn layout_mismatch_rejected() {
        let cfg = quick_config(1);
        let wrong = QTable::new(crate::discretizer::StateLayout {
            queue_buckets: 2,
            elapsed_buckets: 2,
        });
        assert!(matches!(
            train(&cfg, wrong),
            Err(TrainError::QTable(QTableError::Layout(_)))
        ));
    }

    #[test]
    fn invalid_config_never_trains() {
        let mut cfg = quick_config(1);
        cfg.agent.alpha = 0.0;
        let table = empty_table(&Config::default()).unwrap();
        assert!(matches!(train(&cfg, table), Err(TrainError::Config(_))));
    }

    #[test]
    fn checkpoint_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let cfg = quick_config(4);
        let report = Trainer::new(cfg.clone())
            .with_checkpoint(&path, 2)
            .run(empty_table(&cfg).unwrap(), &mut NoopSink)
            .unwrap();
        let layout = report.table.layout();
        let saved = QTable::load(&path, layout).unwrap();
        assert_eq!(saved, report.table);
    }

    #[test]
    fn checkpoint_covers_trailing_episodes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let cfg = quick_config(5);
        let report = Trainer::new(cfg.clone())
            .with_checkpoint(&path, 2)
            .run(empty_table(&cfg).unwrap(), &mut NoopSink)
            .unwrap();
        assert_eq!(report.episodes.len(), 5);
        let saved = QTable::load(&path, report.table.layout()).unwrap();
        assert_eq!(saved, report.table);
    }

    /// Raises the cancel flag once `after` episodes have been recorded.
    struct CancelAfter {
        flag: Arc<AtomicBool>,
        after: usize,
        seen: usize,
    }

    impl MetricsSink for CancelAfter {
        fn record_episode(&mut self, _metrics: &EpisodeMetrics) {
            self.seen += 1;
            if self.seen >= self.after {
                self.flag.store(true, Ordering::SeqCst);
            }
        }
    }

    #[test]
    fn cancelled_run_checkpoints_returned_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let cfg = quick_config(10);
        let flag = Arc::new(AtomicBool::new(false));
        let mut sink = CancelAfter {
            flag: flag.clone(),
            after: 3,
            seen: 0,
        };
        let report = Trainer::new(cfg.clone())
            .with_cancel_flag(flag)
            .with_checkpoint(&path, 4)
            .run(empty_table(&cfg).unwrap(), &mut sink)
            .unwrap();
        assert_eq!(report.termination, TerminationReason::Cancelled);
        assert_eq!(report.episodes.len(), 3);
        assert!(!report.table.is_empty());
        let saved = QTable::load(&path, report.table.layout()).unwrap();
        assert_eq!(saved, report.table);
    }

    #[test]
    fn time_budget_stop_checkpoints_returned_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cp.json");
        let cfg = quick_config(10);
        let report = Trainer::new(cfg.clone())
            .with_time_budget(Duration::ZERO)
            .with_checkpoint(&path, 3)
            .run(empty_table(&cfg).unwrap(), &mut NoopSink)
            .unwrap();
        assert_eq!(report.termination, TerminationReason::TimeBudget);
        let saved = QTable::load(&path, report.table.layout()).unwrap();
        assert_eq!(saved, report.table);
    }

    #[test]
    fn report_window_means_clamp() {
        let cfg = quick_config(3);
        let report = train(&cfg, empty_table(&cfg).unwrap()).unwrap();
        let all = report.mean_average_wait(0..3);
        assert_eq!(report.mean_average_wait(0..100), all);
        assert_eq!(report.mean_average_wait(50..100), 0.0);
    }
}
