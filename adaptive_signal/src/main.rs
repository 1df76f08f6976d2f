// src/main.rs
//
// Research harness around the adaptive_signal library:
//   1) evaluate the fixed-time baseline
//   2) train a Q-table (optionally warm-started from --table-in)
//   3) save it
//   4) evaluate the trained controller on the same held-out seeds and compare

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use adaptive_signal::rl::EvaluationSummary;
use adaptive_signal::{
    empty_table, evaluate_seeds, resolve_effective_profile, Config, Discretizer,
    FixedTimePolicy, JsonlSink, MetricsSink, NoopSink, QTable, SignalController, TrafficProfile,
    Trainer,
};

#[derive(Parser, Debug)]
#[command(name = "adaptive_signal")]
struct Cli {
    /// Training episodes (overrides SIGNAL_EPISODES).
    #[arg(long)]
    episodes: Option<u64>,

    /// Ticks per episode (overrides SIGNAL_TICKS).
    #[arg(long)]
    ticks: Option<u64>,

    /// Base seed (overrides SIGNAL_SEED).
    #[arg(long)]
    seed: Option<u64>,

    /// Traffic profile: balanced | asymmetric | heavy.
    #[arg(long, value_parser = parse_profile)]
    profile: Option<TrafficProfile>,

    /// Parallel training workers.
    #[arg(long)]
    workers: Option<usize>,

    /// Held-out evaluation episodes per policy.
    #[arg(long, default_value_t = 10)]
    eval_episodes: u64,

    /// Stop training after this many seconds (checked between episodes).
    #[arg(long)]
    time_budget_secs: Option<u64>,

    /// Warm-start from a saved table (missing or invalid file: start empty).
    #[arg(long)]
    table_in: Option<PathBuf>,

    /// Where to save the trained table.
    #[arg(long)]
    table_out: Option<PathBuf>,

    /// Per-episode metrics as JSONL.
    #[arg(long)]
    metrics_out: Option<PathBuf>,

    /// Debug-level logging (RUST_LOG takes precedence).
    #[arg(short, long)]
    verbose: bool,
}

fn parse_profile(s: &str) -> Result<TrafficProfile, String> {
    TrafficProfile::parse(s).ok_or_else(|| format!("unknown profile '{s}'"))
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

/// Profile + env overrides, then CLI overrides on top.
fn build_config(cli: &Cli) -> Result<Config> {
    let effective = resolve_effective_profile(cli.profile);
    effective.log_startup();

    let mut cfg = Config::from_env_or_profile(effective.profile)
        .context("invalid configuration from environment")?;
    if let Some(v) = cli.episodes {
        cfg.training.episodes = v;
    }
    if let Some(v) = cli.ticks {
        cfg.training.ticks_per_episode = v;
    }
    if let Some(v) = cli.seed {
        cfg.training.seed = v;
    }
    if let Some(v) = cli.workers {
        cfg.training.workers = v;
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

fn build_sink(path: Option<&PathBuf>) -> Box<dyn MetricsSink> {
    match path {
        Some(path) => match JsonlSink::create(path) {
            Ok(s) => Box::new(s),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot create metrics file; metrics disabled");
                Box::new(NoopSink)
            }
        },
        None => Box::new(NoopSink),
    }
}

fn print_summary(label: &str, s: &EvaluationSummary) {
    println!(
        "{label:<12} avg_wait={:>8.2}s  vehicles={:>7.1}  reward={:>10.1}  ({})",
        s.mean_average_wait, s.mean_vehicles_passed, s.mean_total_reward, s.policy
    );
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let cfg = build_config(&cli)?;

    // Held-out seeds: past the range used for training.
    let eval_seed = cfg.training.seed.wrapping_add(cfg.training.episodes);

    let baseline = evaluate_seeds(
        &cfg,
        &mut FixedTimePolicy::default(),
        eval_seed,
        cli.eval_episodes,
    )
    .context("baseline evaluation failed")?;

    let table = match &cli.table_in {
        Some(path) => {
            let layout = Discretizer::new(&cfg.discretizer)?.layout();
            let table = QTable::load_or_empty(path, layout);
            info!(path = %path.display(), states = table.len(), "warm start");
            table
        }
        None => empty_table(&cfg)?,
    };

    let mut trainer = Trainer::new(cfg.clone());
    if let Some(secs) = cli.time_budget_secs {
        trainer = trainer.with_time_budget(Duration::from_secs(secs));
    }
    let mut sink = build_sink(cli.metrics_out.as_ref());
    let report = trainer
        .run(table, sink.as_mut())
        .context("training failed")?;

    if let Some(path) = &cli.table_out {
        report
            .table
            .save(path)
            .with_context(|| format!("failed to save q-table to {}", path.display()))?;
        info!(path = %path.display(), states = report.table.len(), "q-table saved");
    }

    let mut controller = SignalController::new(report.table.clone(), &cfg.intersection)?;
    let trained = evaluate_seeds(&cfg, &mut controller, eval_seed, cli.eval_episodes)
        .context("controller evaluation failed")?;

    let n = report.episodes.len();
    let window = (n / 10).max(1);
    println!(
        "training: {} episodes ({:?}), final epsilon {:.3}, {} states",
        n,
        report.termination,
        report.final_epsilon,
        report.table.len()
    );
    println!(
        "training avg_wait: first {window} = {:.2}s, last {window} = {:.2}s",
        report.mean_average_wait(0..window),
        report.mean_average_wait(n.saturating_sub(window)..n)
    );
    print_summary("fixed-time", &baseline);
    print_summary("q-learning", &trained);
    if baseline.mean_average_wait > 0.0 {
        let gain = (baseline.mean_average_wait - trained.mean_average_wait)
            / baseline.mean_average_wait
            * 100.0;
        println!("wait reduction vs fixed-time: {gain:.1}%");
    }

    Ok(())
}
