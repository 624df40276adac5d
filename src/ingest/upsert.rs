use std::num::NonZeroUsize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use chrono::{SecondsFormat, Utc};
use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{json, Map, Value};
use tracing::debug;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::retry::RetryPolicy;
use crate::core::types::{Document, TaskId};
use crate::query::ast::Filter;
use crate::storage::{DocumentStore, Update};

pub const TASK_ID_COUNTER: &str = "taskid";
pub const TASK_ID_FIELD: &str = "task_id";
pub const NATURAL_KEY_FIELD: &str = "natural_key";
pub const LAST_UPDATED_FIELD: &str = "last_updated";
pub const INSERTED_AT_FIELD: &str = "inserted_at";

const KNOWN_KEYS_CAPACITY: usize = 4096;

/// How the natural key of a parsed document is derived.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum NaturalKeyStrategy {
    /// `dir_name` (`host:/abs/path`): one result directory is one task.
    #[default]
    DirName,
    /// Canonical JSON of the listed fields; missing ones count as null.
    Fields(Vec<String>),
}

impl NaturalKeyStrategy {
    pub fn key_of(&self, doc: &Document) -> Result<String> {
        match self {
            NaturalKeyStrategy::DirName => match doc.get_field("dir_name") {
                Some(Value::String(dir)) if !dir.is_empty() => Ok(dir.clone()),
                _ => Err(Error::parse("document has no dir_name to key on")),
            },
            NaturalKeyStrategy::Fields(paths) => {
                let mut parts = Map::new();
                for path in paths {
                    parts.insert(path.clone(), doc.get_path(path).cloned().unwrap_or(Value::Null));
                }
                if parts.values().all(Value::is_null) {
                    return Err(Error::parse(format!("document has none of the key fields {:?}", paths)));
                }
                Ok(serde_json::to_string(&Value::Object(parts))?)
            }
        }
    }
}

/// Bookkeeping merged into every stored document.
#[derive(Debug, Clone, Default)]
pub struct AdditionalFields {
    pub author: Option<String>,
    pub tags: Vec<String>,
    pub extras: Map<String, Value>,
}

impl AdditionalFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn author(mut self, author: impl Into<String>) -> Self {
        self.author = Some(author.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    pub fn extra(mut self, name: impl Into<String>, value: Value) -> Self {
        self.extras.insert(name.into(), value);
        self
    }

    fn apply(&self, doc: &mut Document) {
        for (name, value) in &self.extras {
            doc.add_field(name.clone(), value.clone());
        }
        if let Some(author) = &self.author {
            doc.add_field("author", json!(author));
        }
        if !self.tags.is_empty() {
            doc.add_field("tags", json!(self.tags));
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertAction {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub task_id: TaskId,
    pub action: UpsertAction,
}

/// Find-or-create of stored documents keyed by natural key.
///
/// All coordination goes through the store: task ids come from its atomic
/// counter and duplicates are rejected by the unique `natural_key` index, so
/// any number of upserters, in any number of processes, may share one store.
pub struct Upserter {
    store: Arc<dyn DocumentStore>,
    collection: String,
    key_strategy: NaturalKeyStrategy,
    retry: RetryPolicy,
    known: Mutex<LruCache<String, TaskId>>,
    pub hit_count: AtomicUsize,
    pub conflict_count: AtomicUsize,
}

impl Upserter {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str, retry: RetryPolicy) -> Self {
        let cap = NonZeroUsize::new(KNOWN_KEYS_CAPACITY).unwrap_or(NonZeroUsize::MIN);
        Upserter {
            store,
            collection: collection.to_string(),
            key_strategy: NaturalKeyStrategy::default(),
            retry,
            known: Mutex::new(LruCache::new(cap)),
            hit_count: AtomicUsize::new(0),
            conflict_count: AtomicUsize::new(0),
        }
    }

    pub fn with_key_strategy(mut self, strategy: NaturalKeyStrategy) -> Self {
        self.key_strategy = strategy;
        self
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn upsert(&self, doc: Document, force_update: bool, additional: &AdditionalFields) -> Result<UpsertOutcome> {
        let key = self.key_strategy.key_of(&doc)?;

        if !force_update {
            if let Some(task_id) = self.known.lock().get(&key).copied() {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                return Ok(UpsertOutcome { task_id, action: UpsertAction::Unchanged });
            }
        }

        if let Some(existing) = self.find_existing(&key)? {
            return self.resolve_existing(existing, doc, &key, force_update, additional, None);
        }

        let reserved = TaskId(self.retry.run("reserve task id", || {
            self.store.increment_counter(TASK_ID_COUNTER)
        })?);
        let stored = stamp_new(&doc, &key, reserved, additional);

        match self.retry.run("insert", || self.store.insert(&self.collection, stored.clone())) {
            Ok(_) => {
                debug!(task_id = %reserved, key = %key, "inserted");
                self.remember(key, reserved);
                Ok(UpsertOutcome { task_id: reserved, action: UpsertAction::Inserted })
            }
            Err(err) if err.kind == ErrorKind::Conflict => {
                self.conflict_count.fetch_add(1, Ordering::Relaxed);
                debug!(discarded = %reserved, key = %key, "lost insert race, re-reading");
                let existing = self.find_existing(&key)?.ok_or(err)?;
                self.resolve_existing(existing, doc, &key, force_update, additional, Some(reserved))
            }
            Err(err) => Err(err),
        }
    }

    fn find_existing(&self, key: &str) -> Result<Option<Document>> {
        let filter = Filter::eq(NATURAL_KEY_FIELD, json!(key));
        self.retry.run("find by natural key", || {
            self.store.find_one(&self.collection, &filter, None)
        })
    }

    fn resolve_existing(
        &self,
        existing: Document,
        doc: Document,
        key: &str,
        force_update: bool,
        additional: &AdditionalFields,
        reserved: Option<TaskId>,
    ) -> Result<UpsertOutcome> {
        let task_id = existing
            .get_field(TASK_ID_FIELD)
            .and_then(Value::as_u64)
            .map(TaskId)
            .ok_or_else(|| Error::new(ErrorKind::Internal, format!("stored document for {} has no task_id", key)))?;
        self.remember(key.to_string(), task_id);

        if !force_update {
            // A retried insert that actually landed the first time
            let action = if reserved == Some(task_id) { UpsertAction::Inserted } else { UpsertAction::Unchanged };
            return Ok(UpsertOutcome { task_id, action });
        }

        let replacement = stamp_replacement(doc, &existing, key, task_id, additional);
        let filter = Filter::eq(NATURAL_KEY_FIELD, json!(key));
        let matched = self.retry.run("replace", || {
            self.store.update_one(&self.collection, &filter, Update::Replace(replacement.clone()))
        })?;
        if !matched {
            return Err(Error::new(ErrorKind::Internal, format!("stored document for {} vanished", key)));
        }
        debug!(task_id = %task_id, key = %key, "updated");
        Ok(UpsertOutcome { task_id, action: UpsertAction::Updated })
    }

    fn remember(&self, key: String, task_id: TaskId) {
        self.known.lock().put(key, task_id);
    }
}

fn now() -> Value {
    json!(Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true))
}

fn stamp_new(doc: &Document, key: &str, task_id: TaskId, additional: &AdditionalFields) -> Document {
    let mut stored = doc.clone();
    additional.apply(&mut stored);
    let now = now();
    stored.add_field(TASK_ID_FIELD, json!(task_id.value()));
    stored.add_field(NATURAL_KEY_FIELD, json!(key));
    stored.add_field(INSERTED_AT_FIELD, now.clone());
    stored.add_field(LAST_UPDATED_FIELD, now);
    stored
}

/// New content with the identity of `existing`. Author and tags survive
/// unless new ones are given.
fn stamp_replacement(
    doc: Document,
    existing: &Document,
    key: &str,
    task_id: TaskId,
    additional: &AdditionalFields,
) -> Document {
    let mut stored = doc;
    for carried in ["author", "tags"] {
        if let Some(value) = existing.get_field(carried) {
            stored.add_field(carried, value.clone());
        }
    }
    additional.apply(&mut stored);
    stored.add_field(TASK_ID_FIELD, json!(task_id.value()));
    stored.add_field(NATURAL_KEY_FIELD, json!(key));
    let inserted_at = existing.get_field(INSERTED_AT_FIELD).cloned().unwrap_or_else(now);
    stored.add_field(INSERTED_AT_FIELD, inserted_at);
    stored.add_field(LAST_UPDATED_FIELD, now());
    stored
}
