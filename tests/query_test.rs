use std::fs;
use std::sync::Arc;
use serde_json::json;
use tempfile::TempDir;
use taskvault::core::config::Config;
use taskvault::core::database::TaskDatabase;
use taskvault::core::error::ErrorKind;
use taskvault::core::types::Document;
use taskvault::parser::{parser_factory, JsonTaskParser};
use taskvault::query::types::Row;
use taskvault::storage::memory::MemoryStore;
use taskvault::storage::DocumentStore;

fn seeded(docs: Vec<serde_json::Value>) -> TaskDatabase {
    let store = Arc::new(MemoryStore::new());
    for doc in docs {
        store.insert("tasks", Document::from_value(doc).unwrap()).unwrap();
    }
    TaskDatabase::with_store(Config::default(), store, parser_factory(JsonTaskParser::new)).unwrap()
}

#[test]
fn equality_round_trip() {
    let db = seeded(vec![json!({"task_id": 1, "X": 5}), json!({"task_id": 2, "X": 6})]);
    let rows: Vec<Row> = db
        .run_query(&["X"], Some(&json!({"X": 5})))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("X"), Some(&json!(5)));
}

#[test]
fn unknown_alias_is_absent() {
    let db = seeded(vec![json!({"task_id": 1, "X": 5})]);
    let row = db.run_query(&["X", "nonexistent"], None).unwrap().next().unwrap().unwrap();
    assert_eq!(row.get("nonexistent"), None);
    assert_eq!(row.to_value(), json!({"X": 5, "nonexistent": null}));
}

#[test]
fn aliases_apply_to_criteria_and_properties() {
    let db = seeded(vec![
        json!({"task_id": 1, "pretty_formula": "Li2O", "output": {"final_energy": -14.3}, "nelements": 2}),
        json!({"task_id": 2, "formula_pretty": "Fe2O3", "final_energy": -38.1, "nelements": 2}),
        json!({"task_id": 3, "pretty_formula": "Li", "output": {"final_energy": -1.9}, "nelements": 1}),
    ]);
    let mut rows: Vec<Row> = db
        .run_query(&["task_id", "formula", "energy"], Some(&json!({"nelements": {"$gte": 2}, "energy": {"$lt": -10}})))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    rows.sort_by_key(|r| r.get("task_id").and_then(|v| v.as_u64()));

    // Criteria see the same value the projection shows, fallback included
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].get("formula"), Some(&json!("Li2O")));
    assert_eq!(rows[1].get("formula"), Some(&json!("Fe2O3")));
    assert_eq!(rows[1].get("energy"), Some(&json!(-38.1)));

    let matched: Vec<Row> = db
        .run_query(&["task_id", "energy"], Some(&json!({"energy": -38.1})))
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(matched.len(), 1);
    assert_eq!(matched[0].get("task_id"), Some(&json!(2)));
}

#[test]
fn aliases_naming_the_same_path_combine() {
    let db = seeded(vec![json!({"task_id": 1, "pretty_formula": "FeO"})]);
    let count = |criteria: serde_json::Value| db.run_query(&["task_id"], Some(&criteria)).unwrap().count();

    assert_eq!(count(json!({"formula": "Li2O", "pretty_formula": {"$exists": true}})), 0);
    assert_eq!(count(json!({"formula": "FeO", "pretty_formula": {"$exists": true}})), 1);
}

#[test]
fn malformed_criteria_is_configuration_error() {
    let db = seeded(vec![]);
    for criteria in [json!({"$or": {"a": 1}}), json!({"a": {"$in": 3}}), json!([1, 2]), json!({"a": {"$regex": "("}})] {
        let err = db.run_query(&["a"], Some(&criteria)).err().unwrap();
        assert_eq!(err.kind, ErrorKind::Configuration, "{}", criteria);
    }
}

#[test]
fn latest_on_empty_collection_reports_no_records() {
    let db = seeded(vec![]);
    let stats = db.get_stats(&["count", "latest"], Some("updated_at")).unwrap();
    assert_eq!(stats["count"], "0");
    assert_eq!(stats["latest"], "no records");
}

#[test]
fn latest_reports_maximum_value() {
    let db = seeded(vec![
        json!({"last_updated": "2023-05-01T00:00:00.000000Z"}),
        json!({"last_updated": "2024-01-15T08:30:00.000000Z"}),
        json!({"nelements": 4}),
    ]);
    let stats = db.get_stats(&["latest"], None).unwrap();
    assert_eq!(stats["latest"], "2024-01-15T08:30:00.000000Z");

    let stats = db.get_stats(&["latest"], Some("nelements")).unwrap();
    assert_eq!(stats["latest"], "4");
}

#[test]
fn alias_file_from_config_overrides_defaults() {
    let dir = TempDir::new().unwrap();
    let aliases = dir.path().join("aliases.json");
    fs::write(&aliases, r#"{"energy": ["calc.e", "energy_raw"]}"#).unwrap();
    let config = Config {
        aliases_config: Some(aliases),
        ..Config::default()
    };
    let store = Arc::new(MemoryStore::new());
    store.insert("tasks", Document::from_value(json!({"energy_raw": -3})).unwrap()).unwrap();
    let db = TaskDatabase::with_store(config, store, parser_factory(JsonTaskParser::new)).unwrap();

    let row = db.run_query(&["energy"], None).unwrap().next().unwrap().unwrap();
    assert_eq!(row.get("energy"), Some(&json!(-3)));
}

#[test]
fn invalid_alias_file_fails_before_store_use() {
    let dir = TempDir::new().unwrap();
    let aliases = dir.path().join("aliases.json");
    fs::write(&aliases, r#"{"energy": 12}"#).unwrap();
    let config = Config {
        aliases_config: Some(aliases),
        ..Config::default()
    };
    let err = TaskDatabase::open(config, parser_factory(JsonTaskParser::new)).err().unwrap();
    assert_eq!(err.kind, ErrorKind::Configuration);
}

#[test]
fn results_stream_in_batches() {
    let docs = (0..1000).map(|i| json!({"task_id": i, "nelements": i % 4})).collect();
    let db = seeded(docs);
    let mut rows = db.run_query(&["task_id"], Some(&json!({"nelements": 3}))).unwrap();
    assert!(rows.next().is_some());
    assert_eq!(rows.count(), 249);
}
