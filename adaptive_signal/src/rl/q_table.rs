// src/rl/q_table.rs
//
// Tabular action-value store.
//
// Entries are created lazily; an absent entry reads as 0.0. With every
// reward <= the throughput bonus and usually negative, a zero default is
// optimistic and drives early exploration of unseen actions.
//
// On-disk format (versioned JSON):
//   { "qtable_version": 1,
//     "layout": { "queue_buckets": 6, "elapsed_buckets": 4 },
//     "entries": [ { "state": {...}, "action": "Switch", "value": -3.25 }, ... ] }

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::discretizer::{StateKey, StateLayout};
use crate::error::QTableError;
use crate::types::{Action, NUM_ACTIONS};

/// Schema version of the persisted table.
pub const QTABLE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq)]
pub struct QTable {
    layout: StateLayout,
    values: BTreeMap<StateKey, [f64; NUM_ACTIONS]>,
}

#[derive(Debug, Serialize, Deserialize)]
struct QTableDocument {
    qtable_version: u32,
    layout: StateLayout,
    entries: Vec<QEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
struct QEntry {
    state: StateKey,
    action: Action,
    value: f64,
}

impl QTable {
    pub fn new(layout: StateLayout) -> Self {
        Self {
            layout,
            values: BTreeMap::new(),
        }
    }

    pub fn layout(&self) -> StateLayout {
        self.layout
    }

    /// Q(s, a), 0.0 when never written.
    pub fn get(&self, key: &StateKey, action: Action) -> f64 {
        self.values
            .get(key)
            .map(|row| row[action.index()])
            .unwrap_or(0.0)
    }

    pub fn set(&mut self, key: &StateKey, action: Action, value: f64) -> Result<(), QTableError> {
        if !self.layout.contains(key) {
            return Err(QTableError::KeyOutOfRange(format!(
                "{:?} outside layout {:?}",
                key, self.layout
            )));
        }
        self.values.entry(*key).or_insert([0.0; NUM_ACTIONS])[action.index()] = value;
        Ok(())
    }

    /// max over the actions valid in `key.phase`.
    pub fn max_value(&self, key: &StateKey) -> f64 {
        Action::valid_for(key.phase)
            .iter()
            .map(|&a| self.get(key, a))
            .fold(f64::NEG_INFINITY, f64::max)
    }

    /// Arg-max over valid actions; ties go to the lowest action index.
    pub fn greedy_action(&self, key: &StateKey) -> Action {
        let valid = Action::valid_for(key.phase);
        let mut best = valid[0];
        let mut best_value = self.get(key, best);
        for &action in &valid[1..] {
            let v = self.get(key, action);
            if v > best_value {
                best = action;
                best_value = v;
            }
        }
        best
    }

    /// Number of states with at least one stored value.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Drop every learned value.
    pub fn reset(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&StateKey, &[f64; NUM_ACTIONS])> {
        self.values.iter()
    }

    /// Entry-wise mean of `tables`; missing entries count as 0.
    ///
    /// Tables are summed in slice order so the result is reproducible.
    pub fn average(tables: &[QTable]) -> Result<QTable, QTableError> {
        let first = tables
            .first()
            .ok_or_else(|| QTableError::Layout("no tables to average".to_string()))?;
        if let Some(other) = tables.iter().find(|t| t.layout != first.layout) {
            return Err(QTableError::Layout(format!(
                "cannot average {:?} with {:?}",
                first.layout, other.layout
            )));
        }

        let mut sums: BTreeMap<StateKey, [f64; NUM_ACTIONS]> = BTreeMap::new();
        for table in tables {
            for (key, row) in &table.values {
                let acc = sums.entry(*key).or_insert([0.0; NUM_ACTIONS]);
                for (a, v) in acc.iter_mut().zip(row.iter()) {
                    *a += v;
                }
            }
        }
        let n = tables.len() as f64;
        for row in sums.values_mut() {
            for v in row.iter_mut() {
                *v /= n;
            }
        }

        Ok(QTable {
            layout: first.layout,
            values: sums,
        })
    }

    /// Serialize to the versioned JSON document.
    pub fn to_json(&self) -> Result<String, QTableError> {
        let entries = self
            .values
            .iter()
            .flat_map(|(state, row)| {
                Action::ALL.iter().map(move |&action| QEntry {
                    state: *state,
                    action,
                    value: row[action.index()],
                })
            })
            .collect();
        let doc = QTableDocument {
            qtable_version: QTABLE_VERSION,
            layout: self.layout,
            entries,
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }

    /// Parse and validate a document against `expected` layout.
    pub fn from_json(json: &str, expected: StateLayout) -> Result<QTable, QTableError> {
        let doc: QTableDocument = serde_json::from_str(json)?;
        if doc.qtable_version != QTABLE_VERSION {
            return Err(QTableError::Version {
                found: doc.qtable_version,
                expected: QTABLE_VERSION,
            });
        }
        if doc.layout != expected {
            return Err(QTableError::Layout(format!(
                "file has {:?}, expected {:?}",
                doc.layout, expected
            )));
        }

        let mut table = QTable::new(expected);
        for entry in doc.entries {
            if !entry.value.is_finite() {
                return Err(QTableError::Layout(format!(
                    "non-finite value for {:?}",
                    entry.state
                )));
            }
            table.set(&entry.state, entry.action, entry.value)?;
        }
        Ok(table)
    }

    /// Write atomically: temp file in the same directory, then rename.
    pub fn save(&self, path: &Path) -> Result<(), QTableError> {
        let json = self.to_json()?;
        atomic_write(path, json.as_bytes())?;
        debug!(path = %path.display(), states = self.len(), "q-table saved");
        Ok(())
    }

    pub fn load(path: &Path, expected: StateLayout) -> Result<QTable, QTableError> {
        let json = fs::read_to_string(path).map_err(|source| QTableError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json, expected)
    }

    /// Load, or fall back to an empty table with a warning.
    pub fn load_or_empty(path: &Path, expected: StateLayout) -> QTable {
        match Self::load(path, expected) {
            Ok(table) => table,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "q-table unavailable; starting empty");
                QTable::new(expected)
            }
        }
    }
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<(), QTableError> {
    let io_err = |source| QTableError::Io {
        path: path.to_path_buf(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let temp_name = format!(
        ".tmp_{}_{}",
        std::process::id(),
        path.file_name()
            .map(|s| s.to_string_lossy())
            .unwrap_or_default()
    );
    let temp_path = parent.join(temp_name);

    let mut file = File::create(&temp_path).map_err(io_err)?;
    file.write_all(data).map_err(io_err)?;
    file.sync_all().map_err(io_err)?;
    drop(file);

    if let Err(e) = fs::rename(&temp_path, path) {
        let _ = fs::remove_file(&temp_path);
        return Err(io_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Phase;

    fn layout() -> StateLayout {
        StateLayout {
            queue_buckets: 6,
            elapsed_buckets: 4,
        }
    }

    fn key(q: u8, phase: Phase) -> StateKey {
        StateKey {
            queues: [q, 0, q, 0],
            phase,
            elapsed: 1,
        }
    }

    #[test]
    fn unvisited_reads_zero() {
        let t = QTable::new(layout());
        assert_eq!(t.get(&key(1, Phase::NsGreen), Action::Switch), 0.0);
        assert!(t.is_empty());
    }

    #[test]
    fn set_rejects_out_of_layout_key() {
        let mut t = QTable::new(layout());
        let bad = StateKey {
            queues: [9, 0, 0, 0],
            phase: Phase::NsGreen,
            elapsed: 0,
        };
        assert!(matches!(
            t.set(&bad, Action::Extend, 1.0),
            Err(QTableError::KeyOutOfRange(_))
        ));
        assert!(t.is_empty());
    }

    #[test]
    fn greedy_ties_go_to_extend() {
        let mut t = QTable::new(layout());
        let k = key(2, Phase::EwGreen);
        assert_eq!(t.greedy_action(&k), Action::Extend);
        t.set(&k, Action::Extend, -1.0).unwrap();
        t.set(&k, Action::Switch, -1.0).unwrap();
        assert_eq!(t.greedy_action(&k), Action::Extend);
        t.set(&k, Action::Switch, -0.5).unwrap();
        assert_eq!(t.greedy_action(&k), Action::Switch);
        assert_eq!(t.max_value(&k), -0.5);
    }

    #[test]
    fn yellow_ignores_switch_value() {
        let mut t = QTable::new(layout());
        let k = key(2, Phase::NsYellow);
        t.set(&k, Action::Extend, -4.0).unwrap();
        t.set(&k, Action::Switch, 10.0).unwrap();
        assert_eq!(t.greedy_action(&k), Action::Extend);
        assert_eq!(t.max_value(&k), -4.0);
    }

    #[test]
    fn json_round_trip_exact() {
        let mut t = QTable::new(layout());
        t.set(&key(1, Phase::NsGreen), Action::Extend, -1.0 / 3.0).unwrap();
        t.set(&key(3, Phase::EwGreen), Action::Switch, 0.1 + 0.2).unwrap();
        let json = t.to_json().unwrap();
        let back = QTable::from_json(&json, layout()).unwrap();
        assert_eq!(t, back);
    }

    #[test]
    fn from_json_rejects_version_and_layout() {
        let t = QTable::new(layout());
        let json = t.to_json().unwrap();

        let bumped = json.replace("\"qtable_version\": 1", "\"qtable_version\": 99");
        assert!(matches!(
            QTable::from_json(&bumped, layout()),
            Err(QTableError::Version { found: 99, .. })
        ));

        let other = StateLayout {
            queue_buckets: 3,
            elapsed_buckets: 4,
        };
        assert!(matches!(
            QTable::from_json(&json, other),
            Err(QTableError::Layout(_))
        ));

        assert!(matches!(
            QTable::from_json("{ not json", layout()),
            Err(QTableError::Parse(_))
        ));
    }

    #[test]
    fn average_counts_missing_as_zero() {
        let mut a = QTable::new(layout());
        let mut b = QTable::new(layout());
        let k1 = key(1, Phase::NsGreen);
        let k2 = key(2, Phase::NsGreen);
        a.set(&k1, Action::Extend, -2.0).unwrap();
        b.set(&k1, Action::Extend, -4.0).unwrap();
        b.set(&k2, Action::Switch, -6.0).unwrap();

        let avg = QTable::average(&[a, b]).unwrap();
        assert_eq!(avg.get(&k1, Action::Extend), -3.0);
        assert_eq!(avg.get(&k2, Action::Switch), -3.0);
        assert_eq!(avg.len(), 2);
    }

    #[test]
    fn average_empty_is_error() {
        assert!(QTable::average(&[]).is_err());
    }
}
