use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use serde_json::{json, Value};
use tempfile::TempDir;
use taskvault::core::config::Config;
use taskvault::core::database::TaskDatabase;
use taskvault::core::error::{Error, ErrorKind, Result};
use taskvault::core::types::{Document, RowId, TaskId, WorkItem};
use taskvault::index::spec::IndexSpec;
use taskvault::ingest::drone::DroneSettings;
use taskvault::ingest::queen::CancelToken;
use taskvault::ingest::report::Outcome;
use taskvault::ingest::upsert::AdditionalFields;
use taskvault::parser::{parser_factory, JsonTaskParser};
use taskvault::query::ast::Filter;
use taskvault::storage::cursor::Cursor;
use taskvault::storage::memory::MemoryStore;
use taskvault::storage::{DocumentStore, FindOptions, Update};

fn write_task(root: &Path, name: &str, body: &str) {
    let dir = root.join(name);
    fs::create_dir_all(&dir).unwrap();
    fs::write(dir.join("task.json"), body).unwrap();
}

fn open(config: Config) -> TaskDatabase {
    TaskDatabase::open(config, parser_factory(JsonTaskParser::new)).unwrap()
}

fn all_docs(db: &TaskDatabase) -> Vec<Value> {
    let mut docs: Vec<Value> = db
        .run_query(&[], None)
        .unwrap()
        .map(|row| row.unwrap().to_value())
        .collect();
    docs.sort_by_key(|d| d["task_id"].as_u64());
    docs
}

#[test]
fn one_unparsable_directory_is_reported_not_fatal() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "d1", r#"{"nelements": 1}"#);
    write_task(root.path(), "d2", "{ this is not json");
    write_task(root.path(), "d3", r#"{"nelements": 3}"#);
    let db = open(Config::default());

    let summary = db.ingest(root.path(), Some(2), &AdditionalFields::new(), false).unwrap();
    assert_eq!(summary.inserted, 2);
    assert_eq!(summary.failed_paths.len(), 1);
    assert!(summary.failed_paths[0].0.ends_with("d2"));

    let stats = db.get_stats(&["count"], None).unwrap();
    assert_eq!(stats["count"], "2");
}

#[test]
fn reingest_without_force_is_idempotent() {
    let root = TempDir::new().unwrap();
    for i in 0..5 {
        write_task(root.path(), &format!("run{}", i), &format!(r#"{{"energy": {}}}"#, -i));
    }
    let db = open(Config::default());
    let extra = AdditionalFields::new().author("ada").tag("first");

    let first = db.ingest(root.path(), Some(3), &extra, false).unwrap();
    assert_eq!(first.inserted, 5);
    let before = all_docs(&db);

    let second = db.ingest(root.path(), Some(3), &extra, false).unwrap();
    assert_eq!((second.inserted, second.skipped), (0, 5));
    assert_eq!(all_docs(&db), before);
}

#[test]
fn forced_reingest_keeps_task_id_and_bumps_last_updated() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "a", r#"{"energy": -1.0}"#);
    let db = open(Config::default());
    db.ingest(root.path(), Some(1), &AdditionalFields::new().author("ada"), false).unwrap();
    let before = all_docs(&db).remove(0);

    std::thread::sleep(std::time::Duration::from_millis(5));
    write_task(root.path(), "a", r#"{"energy": -2.0}"#);
    let summary = db.ingest(root.path(), Some(1), &AdditionalFields::new(), true).unwrap();
    assert_eq!(summary.updated, 1);

    let after = all_docs(&db).remove(0);
    assert_eq!(after["task_id"], before["task_id"]);
    assert_eq!(after["inserted_at"], before["inserted_at"]);
    assert_eq!(after["author"], json!("ada"));
    assert_eq!(after["energy"], json!(-2.0));
    assert!(after["last_updated"].as_str().unwrap() > before["last_updated"].as_str().unwrap());
}

#[test]
fn forced_reingest_of_same_content_changes_only_last_updated() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "a", r#"{"energy": -1.0, "elements": ["Li"]}"#);
    let db = open(Config::default());
    db.ingest(root.path(), Some(1), &AdditionalFields::new(), false).unwrap();
    let mut before = all_docs(&db).remove(0);

    std::thread::sleep(std::time::Duration::from_millis(5));
    db.ingest(root.path(), Some(1), &AdditionalFields::new(), true).unwrap();
    let mut after = all_docs(&db).remove(0);

    let old_stamp = before.as_object_mut().unwrap().remove("last_updated").unwrap();
    let new_stamp = after.as_object_mut().unwrap().remove("last_updated").unwrap();
    assert!(new_stamp.as_str() > old_stamp.as_str());
    assert_eq!(after, before);
}

#[test]
fn task_ids_are_unique_for_every_pool_size() {
    for pool_size in [1, 2, 4, 8] {
        let root = TempDir::new().unwrap();
        for i in 0..30 {
            write_task(root.path(), &format!("job{:02}", i), r#"{"nelements": 2}"#);
        }
        let db = open(Config::default());
        let report = db
            .ingest_with_cancel(root.path(), Some(pool_size), &AdditionalFields::new(), false, &CancelToken::new())
            .unwrap();

        let paths: HashSet<_> = report.items.iter().map(|r| r.path.clone()).collect();
        assert_eq!(report.items.len(), 30);
        assert_eq!(paths.len(), 30);
        let ids: HashSet<u64> = report.task_ids().into_iter().map(|id| id.0).collect();
        assert_eq!(ids, (1..=30).collect::<HashSet<_>>(), "pool {}", pool_size);
    }
}

#[test]
fn concurrent_submissions_of_one_directory_store_one_document() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "same", r#"{"energy": -1.0}"#);
    let db = open(Config::default());
    let item = WorkItem::new(root.path().join("same"));

    let report = db
        .queen()
        .assimilate(vec![item; 24], 8, DroneSettings::default(), &CancelToken::new())
        .unwrap();

    assert_eq!(report.items.len(), 24);
    assert_eq!(report.inserted_count(), 1);
    let ids: HashSet<TaskId> = report.task_ids().into_iter().collect();
    assert_eq!(ids.len(), 1);
    assert!(report.items.iter().all(|r| r.outcome.is_success()));
    assert_eq!(db.get_stats(&["count"], None).unwrap()["count"], "1");
}

#[test]
fn precancelled_run_pulls_nothing() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "a", "{}");
    let db = open(Config::default());
    let cancel = CancelToken::new();
    cancel.cancel();

    let report = db
        .ingest_with_cancel(root.path(), Some(2), &AdditionalFields::new(), false, &cancel)
        .unwrap();
    assert!(report.cancelled);
    assert!(report.items.iter().all(|r| r.outcome == Outcome::Cancelled));
    assert_eq!(report.inserted_count(), 0);
}

#[test]
fn bad_arguments_fail_fast() {
    let root = TempDir::new().unwrap();
    let db = open(Config::default());

    let err = db.ingest(root.path(), Some(0), &AdditionalFields::new(), false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);

    let err = db.ingest(&root.path().join("missing"), None, &AdditionalFields::new(), false).unwrap_err();
    assert_eq!(err.kind, ErrorKind::Configuration);
}

#[test]
fn durable_store_survives_reopen() {
    let root = TempDir::new().unwrap();
    let storage = TempDir::new().unwrap();
    write_task(root.path(), "a", "{}");
    write_task(root.path(), "b", "{}");
    let config = Config {
        storage_path: Some(storage.path().to_path_buf()),
        ..Config::default()
    };

    {
        let db = open(config.clone());
        assert_eq!(db.ingest(root.path(), Some(2), &AdditionalFields::new(), false).unwrap().inserted, 2);
        let err = TaskDatabase::open(config.clone(), parser_factory(JsonTaskParser::new)).err().unwrap();
        assert_eq!(err.kind, ErrorKind::FatalStore);
    }

    let db = open(config);
    assert_eq!(db.get_stats(&["count"], None).unwrap()["count"], "2");
    assert_eq!(db.ingest(root.path(), Some(2), &AdditionalFields::new(), false).unwrap().skipped, 2);

    write_task(root.path(), "c", "{}");
    db.ingest(root.path(), Some(1), &AdditionalFields::new(), false).unwrap();
    let row = db
        .run_query(&["task_id"], Some(&json!({"dir_name": {"$regex": "/c$"}})))
        .unwrap()
        .next()
        .unwrap()
        .unwrap();
    assert_eq!(row.get("task_id"), Some(&json!(3)));
}

#[test]
fn rebuilt_indexes_keep_dedup_working() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "a", r#"{"nelements": 2, "elements": ["Li", "O"]}"#);
    let db = open(Config::default());
    db.ingest(root.path(), Some(1), &AdditionalFields::new(), false).unwrap();

    let names = db.rebuild_indexes(&[IndexSpec::single("energy")]).unwrap();
    assert!(names.contains(&"nelements_elements".to_string()));
    assert!(names.contains(&"energy".to_string()));

    let summary = db.ingest(root.path(), Some(1), &AdditionalFields::new(), false).unwrap();
    assert_eq!(summary.skipped, 1);
    assert_eq!(db.get_stats(&["count"], None).unwrap()["count"], "1");
}

/// Fails the first `failures` inserts with a transient error.
struct FlakyStore {
    inner: MemoryStore,
    failures: usize,
    inserts: AtomicUsize,
    reachable: bool,
}

impl FlakyStore {
    fn new(failures: usize) -> Self {
        FlakyStore {
            inner: MemoryStore::new(),
            failures,
            inserts: AtomicUsize::new(0),
            reachable: true,
        }
    }
}

impl DocumentStore for FlakyStore {
    fn ping(&self) -> Result<()> {
        if self.reachable { Ok(()) } else { Err(Error::transient("connection refused")) }
    }

    fn insert(&self, collection: &str, doc: Document) -> Result<RowId> {
        if self.inserts.fetch_add(1, Ordering::SeqCst) < self.failures {
            return Err(Error::transient("connection reset"));
        }
        self.inner.insert(collection, doc)
    }

    fn find(&self, collection: &str, filter: &Filter, options: FindOptions) -> Result<Cursor> {
        self.inner.find(collection, filter, options)
    }

    fn update_one(&self, collection: &str, filter: &Filter, update: Update) -> Result<bool> {
        self.inner.update_one(collection, filter, update)
    }

    fn increment_counter(&self, name: &str) -> Result<u64> {
        self.inner.increment_counter(name)
    }

    fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        self.inner.create_index(collection, spec)
    }

    fn drop_indexes(&self, collection: &str) -> Result<()> {
        self.inner.drop_indexes(collection)
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        self.inner.list_indexes(collection)
    }
}

fn fast_retry_config(attempts: u32) -> Config {
    let mut config = Config::default();
    config.retry.max_attempts = attempts;
    config.retry.initial_backoff_ms = 1;
    config.retry.max_backoff_ms = 2;
    config
}

#[test]
fn transient_store_errors_are_retried() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "a", "{}");
    let store = Arc::new(FlakyStore::new(2));
    let db = TaskDatabase::with_store(fast_retry_config(3), store.clone(), parser_factory(JsonTaskParser::new)).unwrap();

    let summary = db.ingest(root.path(), Some(1), &AdditionalFields::new(), false).unwrap();
    assert_eq!(summary.inserted, 1);
    assert_eq!(store.inserts.load(Ordering::SeqCst), 3);
}

#[test]
fn exhausted_retries_fail_only_that_item() {
    let root = TempDir::new().unwrap();
    write_task(root.path(), "a", "{}");
    write_task(root.path(), "b", "{}");
    let store = Arc::new(FlakyStore::new(2));
    let db = TaskDatabase::with_store(fast_retry_config(2), store, parser_factory(JsonTaskParser::new)).unwrap();

    let summary = db.ingest(root.path(), Some(1), &AdditionalFields::new(), false).unwrap();
    assert_eq!((summary.inserted, summary.failed), (1, 1));
    assert!(summary.failed_paths[0].1.contains("Transient"));
}

#[test]
fn unreachable_store_is_fatal_at_open() {
    let mut store = FlakyStore::new(0);
    store.reachable = false;
    let err = TaskDatabase::with_store(Config::default(), Arc::new(store), parser_factory(JsonTaskParser::new))
        .err()
        .unwrap();
    assert_eq!(err.kind, ErrorKind::FatalStore);
}
