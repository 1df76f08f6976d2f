// src/error.rs
//
// Error types for the signal controller core.
//
// - ConfigError:        rejected parameters (raised before any simulation runs)
// - InvariantViolation: simulator bug guard (fatal, never silently corrected)
// - QTableError:        persistence failures for the value table
// - TrainError:         umbrella returned by the training loop

use std::path::PathBuf;

use thiserror::Error;

use crate::types::Approach;

/// Invalid configuration value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid config '{field}': {message}")]
    Invalid { field: String, message: String },
}

impl ConfigError {
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Name of the offending field.
    pub fn field(&self) -> &str {
        match self {
            ConfigError::Invalid { field, .. } => field,
        }
    }
}

/// Simulator invariant broken. Always indicates a programming error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvariantViolation {
    #[error("queue on {approach:?} would go negative at tick {tick} (queue={queue}, discharge={discharge})")]
    NegativeQueue {
        approach: Approach,
        tick: u64,
        queue: u32,
        discharge: u32,
    },
    #[error("conservation broken on {approach:?} at tick {tick}: arrived={arrived} discharged={discharged} queue={queue}")]
    Conservation {
        approach: Approach,
        tick: u64,
        arrived: u64,
        discharged: u64,
        queue: u32,
    },
    #[error("queue on {approach:?} overflowed at tick {tick} (queue={queue}, arrivals={arrivals})")]
    QueueOverflow {
        approach: Approach,
        tick: u64,
        queue: u32,
        arrivals: u32,
    },
    #[error("yellow phase overran at tick {tick}: elapsed={elapsed} > yellow_ticks={yellow_ticks}")]
    YellowOverrun {
        tick: u64,
        elapsed: u32,
        yellow_ticks: u32,
    },
}

/// Q-table persistence error.
#[derive(Error, Debug)]
pub enum QTableError {
    #[error("failed to access q-table file '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse q-table: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("unsupported q-table version {found} (expected {expected})")]
    Version { found: u32, expected: u32 },
    #[error("q-table layout mismatch: {0}")]
    Layout(String),
    #[error("q-table key out of range: {0}")]
    KeyOutOfRange(String),
}

/// Errors surfaced by the training loop.
#[derive(Error, Debug)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("simulation invariant violated: {0}")]
    Invariant(#[from] InvariantViolation),
    #[error(transparent)]
    QTable(#[from] QTableError),
    #[error("training worker panicked")]
    WorkerPanicked,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_error_display_names_field() {
        let err = ConfigError::invalid("agent.alpha", "must be in (0, 1], got 0");
        assert_eq!(err.field(), "agent.alpha");
        assert_eq!(
            err.to_string(),
            "invalid config 'agent.alpha': must be in (0, 1], got 0"
        );
    }

    #[test]
    fn train_error_wraps_invariant() {
        let v = InvariantViolation::YellowOverrun {
            tick: 7,
            elapsed: 4,
            yellow_ticks: 3,
        };
        let err: TrainError = v.clone().into();
        assert!(matches!(err, TrainError::Invariant(inner) if inner == v));
    }
}
