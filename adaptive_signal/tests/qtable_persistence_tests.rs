use std::fs;

use adaptive_signal::{
    empty_table, train, Config, Discretizer, QTable, QTableError, SignalController, StateLayout,
};

fn trained_table() -> (Config, QTable) {
    let mut cfg = Config::default();
    cfg.training.episodes = 20;
    cfg.training.ticks_per_episode = 100;
    cfg.training.log_every = 0;
    let report = train(&cfg, empty_table(&cfg).unwrap()).unwrap();
    (cfg, report.table)
}

#[test]
fn saved_table_reloads_identically() {
    let (cfg, table) = trained_table();
    assert!(!table.is_empty());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.json");
    table.save(&path).unwrap();

    let layout = Discretizer::new(&cfg.discretizer).unwrap().layout();
    let loaded = QTable::load(&path, layout).unwrap();
    assert_eq!(loaded, table);
    for (key, row) in table.iter() {
        for (a, v) in adaptive_signal::Action::ALL.iter().zip(row.iter()) {
            assert_eq!(loaded.get(key, *a).to_bits(), v.to_bits());
        }
    }
}

#[test]
fn save_leaves_no_temp_files() {
    let (_cfg, table) = trained_table();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.json");
    table.save(&path).unwrap();
    table.save(&path).unwrap();

    let names: Vec<String> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, vec!["q.json".to_string()]);
}

#[test]
fn corrupt_file_falls_back_to_empty() {
    let cfg = Config::default();
    let layout = Discretizer::new(&cfg.discretizer).unwrap().layout();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.json");
    fs::write(&path, b"{\"qtable_version\": 1, \"layout\": ").unwrap();

    assert!(matches!(
        QTable::load(&path, layout),
        Err(QTableError::Parse(_))
    ));
    let table = QTable::load_or_empty(&path, layout);
    assert!(table.is_empty());
    assert_eq!(table.layout(), layout);

    let controller = SignalController::load(&path, &cfg).unwrap();
    assert!(controller.table().is_empty());
}

#[test]
fn missing_file_is_io_error() {
    let layout = StateLayout {
        queue_buckets: 6,
        elapsed_buckets: 4,
    };
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nope.json");
    assert!(matches!(
        QTable::load(&path, layout),
        Err(QTableError::Io { .. })
    ));
}

#[test]
fn table_for_other_discretization_is_rejected() {
    let (_cfg, table) = trained_table();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("q.json");
    table.save(&path).unwrap();

    let mut other = Config::default();
    other.discretizer.queue_edges = vec![1, 4, 9];
    let layout = Discretizer::new(&other.discretizer).unwrap().layout();
    assert!(matches!(
        QTable::load(&path, layout),
        Err(QTableError::Layout(_))
    ));
    assert!(QTable::load_or_empty(&path, layout).is_empty());
}

#[test]
fn out_of_range_key_in_file_is_rejected() {
    let cfg = Config::default();
    let layout = Discretizer::new(&cfg.discretizer).unwrap().layout();
    let json = r#"{
        "qtable_version": 1,
        "layout": { "queue_buckets": 6, "elapsed_buckets": 4 },
        "entries": [
            { "state": { "queues": [0, 0, 9, 0], "phase": "NsGreen", "elapsed": 0 },
              "action": "Switch", "value": -1.5 }
        ]
    }"#;
    assert!(matches!(
        QTable::from_json(json, layout),
        Err(QTableError::KeyOutOfRange(_))
    ));
}
