use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::path::PathBuf;
use std::sync::Arc;
use parking_lot::{Mutex, RwLock};
use roaring::RoaringBitmap;
use tracing::{debug, info, warn};
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::types::{lookup_path, Document, RowId};
use crate::index::field_index::FieldIndex;
use crate::index::spec::IndexSpec;
use crate::query::ast::Filter;
use crate::query::matcher::{cmp_values, FilterMatcher};
use crate::query::types::SortOrder;
use crate::storage::checkpoint::{Checkpoint, CollectionSnapshot};
use crate::storage::cursor::{BatchSource, Cursor};
use crate::storage::file_lock::FileLock;
use crate::storage::layout::StorageLayout;
use crate::storage::wal::{Operation, SyncMode, WAL};
use crate::storage::{DocumentStore, FindOptions, Update};

/// Embedded document store.
///
/// All collections and counters live behind one `RwLock`; every mutation
/// validates unique indexes, appends to the WAL (when durable) and applies in
/// memory while holding the write lock, which makes `insert` a conditional
/// insert and `increment_counter` an atomic increment-and-get.
pub struct MemoryStore {
    state: Arc<RwLock<StoreState>>,
    durability: Option<Mutex<Durability>>,
}

struct Durability {
    storage: StorageLayout,
    wal: WAL,
    _lock: FileLock,
}

#[derive(Default)]
struct StoreState {
    collections: HashMap<String, Collection>,
    counters: HashMap<String, u64>,
}

#[derive(Default)]
struct Collection {
    rows: BTreeMap<RowId, Document>,
    next_row: RowId,
    indexes: Vec<FieldIndex>,
}

impl Collection {
    fn check_insert(&self, doc: &Document) -> Result<()> {
        let row = self.next_row;
        for index in &self.indexes {
            index.check_unique(row, &index.keys(doc))?;
        }
        Ok(())
    }

    fn apply_insert(&mut self, row: RowId, doc: Document) {
        for index in &mut self.indexes {
            let keys = index.keys(&doc);
            index.insert_keys(row, keys);
        }
        self.rows.insert(row, doc);
        self.next_row = self.next_row.max(row + 1);
    }

    fn check_replace(&self, row: RowId, doc: &Document) -> Result<()> {
        for index in &self.indexes {
            index.check_unique(row, &index.keys(doc))?;
        }
        Ok(())
    }

    fn apply_replace(&mut self, row: RowId, doc: Document) {
        if let Some(old) = self.rows.get(&row) {
            for index in &mut self.indexes {
                let old_keys = index.keys(old);
                index.remove_keys(row, &old_keys);
            }
        }
        for index in &mut self.indexes {
            let keys = index.keys(&doc);
            index.insert_keys(row, keys);
        }
        self.rows.insert(row, doc);
    }

    fn build_index(&self, spec: &IndexSpec) -> Result<FieldIndex> {
        FieldIndex::build(spec.clone(), &self.rows)
    }

    fn install_index(&mut self, index: FieldIndex) {
        self.indexes.retain(|existing| existing.spec.name != index.spec.name);
        self.indexes.push(index);
    }

    /// Candidate rows from a single-field index pinned by equality.
    fn candidates(&self, filter: &Filter) -> Option<RoaringBitmap> {
        self.indexes
            .iter()
            .filter(|index| index.spec.is_single_field())
            .find_map(|index| {
                filter
                    .equality_on(&index.spec.fields[0])
                    .map(|value| index.lookup(value))
            })
    }

    fn first_match(&self, filter: &Filter) -> Option<RowId> {
        let matcher = FilterMatcher::new();
        match self.candidates(filter) {
            Some(rows) => rows.iter().find(|row| {
                self.rows
                    .get(row)
                    .map(|doc| matcher.matches(doc, filter))
                    .unwrap_or(false)
            }),
            None => self
                .rows
                .iter()
                .find(|(_, doc)| matcher.matches(doc, filter))
                .map(|(row, _)| *row),
        }
    }

    fn snapshot(&self) -> CollectionSnapshot {
        CollectionSnapshot {
            next_row: self.next_row,
            rows: self.rows.iter().map(|(row, doc)| (*row, doc.clone())).collect(),
            indexes: self.indexes.iter().map(|index| index.spec.clone()).collect(),
        }
    }
}

impl MemoryStore {
    /// Volatile store, nothing touches the disk.
    pub fn new() -> Self {
        MemoryStore {
            state: Arc::new(RwLock::new(StoreState::default())),
            durability: None,
        }
    }

    /// Open (or create) a durable store at `path`, replaying snapshot and WAL.
    pub fn open(path: PathBuf) -> Result<Self> {
        let storage = StorageLayout::new(path)
            .map_err(|e| Error::fatal(format!("cannot prepare store directory: {}", e.context)))?;
        let lock = FileLock::acquire(&storage)?;

        let checkpoint = Checkpoint::load(&storage)?.unwrap_or_default();
        let mut state = StoreState::from_checkpoint(&checkpoint)?;

        let mut generation = checkpoint.wal_generation;
        let mut replayed = 0usize;
        let mut last_sequence = 0u64;
        for wal_gen in storage.wal_generations()? {
            if wal_gen < checkpoint.wal_generation {
                continue;
            }
            let path = storage.wal_path(wal_gen);
            let replay = WAL::read_entries(&path)?;
            if replay.torn {
                warn!(path = %path.display(), valid_len = replay.valid_len, "dropping torn WAL tail");
                WAL::truncate(&path, replay.valid_len)?;
            }
            last_sequence = replay.entries.len() as u64;
            for entry in replay.entries {
                state.replay(entry.operation)?;
                replayed += 1;
            }
            generation = wal_gen;
        }

        let mut wal = WAL::open(&storage, generation, SyncMode::Batch)?;
        wal.sequence = last_sequence;

        let documents: usize = state.collections.values().map(|c| c.rows.len()).sum();
        info!(
            path = %storage.base_dir.display(),
            documents,
            replayed,
            "opened store"
        );

        Ok(MemoryStore {
            state: Arc::new(RwLock::new(state)),
            durability: Some(Mutex::new(Durability {
                storage,
                wal,
                _lock: lock,
            })),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        match &config.storage_path {
            Some(path) => Self::open(path.clone()),
            None => Ok(Self::new()),
        }
    }

    /// Write a snapshot and start a fresh WAL generation.
    pub fn checkpoint(&self) -> Result<()> {
        let Some(durability) = &self.durability else {
            return Ok(());
        };
        let state = self.state.read();
        let mut durability = durability.lock();

        let storage = durability.storage.clone();
        durability.wal.rotate(&storage)?;
        let generation = durability.wal.generation;

        let snapshot = state.checkpoint(generation);
        snapshot.save(&storage)?;

        for old in storage.wal_generations()? {
            if old < generation {
                std::fs::remove_file(storage.wal_path(old))?;
            }
        }
        debug!(generation, documents = snapshot.doc_count(), "checkpoint written");
        Ok(())
    }

    pub fn sync(&self) -> Result<()> {
        if let Some(durability) = &self.durability {
            durability.lock().wal.sync()?;
        }
        Ok(())
    }

    fn log(&self, operation: Operation) -> Result<()> {
        if let Some(durability) = &self.durability {
            durability.lock().wal.append(operation)?;
        }
        Ok(())
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreState {
    fn from_checkpoint(checkpoint: &Checkpoint) -> Result<Self> {
        let mut state = StoreState::default();
        for (name, snapshot) in &checkpoint.collections {
            let mut collection = Collection {
                rows: snapshot.rows.iter().cloned().collect(),
                next_row: snapshot.next_row,
                indexes: Vec::new(),
            };
            for spec in &snapshot.indexes {
                let index = collection
                    .build_index(spec)
                    .map_err(|e| Error::fatal(format!("snapshot index {}: {}", spec.name, e.context)))?;
                collection.install_index(index);
            }
            state.collections.insert(name.clone(), collection);
        }
        state.counters = checkpoint.counters.iter().map(|(k, v)| (k.clone(), *v)).collect();
        Ok(state)
    }

    fn checkpoint(&self, wal_generation: u64) -> Checkpoint {
        Checkpoint {
            wal_generation,
            timestamp: Some(chrono::Utc::now()),
            collections: self
                .collections
                .iter()
                .map(|(name, collection)| (name.clone(), collection.snapshot()))
                .collect(),
            counters: self.counters.iter().map(|(k, v)| (k.clone(), *v)).collect(),
        }
    }

    fn replay(&mut self, operation: Operation) -> Result<()> {
        match operation {
            Operation::Insert { collection, row, doc } => {
                self.collections.entry(collection).or_default().apply_insert(row, doc);
            }
            Operation::Replace { collection, row, doc } => {
                self.collections.entry(collection).or_default().apply_replace(row, doc);
            }
            Operation::Counter { name, value } => {
                let counter = self.counters.entry(name).or_insert(0);
                *counter = (*counter).max(value);
            }
            Operation::CreateIndex { collection, spec } => {
                let coll = self.collections.entry(collection).or_default();
                let index = coll
                    .build_index(&spec)
                    .map_err(|e| Error::fatal(format!("replayed index {}: {}", spec.name, e.context)))?;
                coll.install_index(index);
            }
            Operation::DropIndexes { collection } => {
                if let Some(coll) = self.collections.get_mut(&collection) {
                    coll.indexes.clear();
                }
            }
        }
        Ok(())
    }
}

impl DocumentStore for MemoryStore {
    fn ping(&self) -> Result<()> {
        if let Some(durability) = &self.durability {
            let durability = durability.lock();
            if !durability.storage.base_dir.is_dir() {
                return Err(Error::fatal(format!(
                    "store directory {} disappeared",
                    durability.storage.base_dir.display()
                )));
            }
        }
        Ok(())
    }

    fn insert(&self, collection: &str, doc: Document) -> Result<RowId> {
        let mut state = self.state.write();
        let coll = state.collections.entry(collection.to_string()).or_default();
        coll.check_insert(&doc)?;

        let row = coll.next_row;
        self.log(Operation::Insert {
            collection: collection.to_string(),
            row,
            doc: doc.clone(),
        })?;
        coll.apply_insert(row, doc);
        Ok(row)
    }

    fn find(&self, collection: &str, filter: &Filter, options: FindOptions) -> Result<Cursor> {
        let plan = {
            let state = self.state.read();
            let Some(coll) = state.collections.get(collection) else {
                return Ok(Cursor::empty());
            };
            ScanPlan::build(coll, filter, &options)
        };

        let source = MemorySource {
            state: Arc::clone(&self.state),
            collection: collection.to_string(),
            filter: filter.clone(),
            projection: options.projection,
            batch_size: options.batch_size.max(1),
            plan,
            matcher: FilterMatcher::new(),
        };
        Ok(Cursor::new(Box::new(source), options.limit))
    }

    fn update_one(&self, collection: &str, filter: &Filter, update: Update) -> Result<bool> {
        let mut state = self.state.write();
        let Some(coll) = state.collections.get_mut(collection) else {
            return Ok(false);
        };
        let Some(row) = coll.first_match(filter) else {
            return Ok(false);
        };

        let updated = match update {
            Update::Replace(doc) => doc,
            Update::Set(assignments) => {
                let mut doc = coll.rows.get(&row).cloned().unwrap_or_default();
                for (path, value) in assignments {
                    doc.set_path(&path, value);
                }
                doc
            }
        };
        coll.check_replace(row, &updated)?;

        self.log(Operation::Replace {
            collection: collection.to_string(),
            row,
            doc: updated.clone(),
        })?;
        coll.apply_replace(row, updated);
        Ok(true)
    }

    fn increment_counter(&self, name: &str) -> Result<u64> {
        let mut state = self.state.write();
        let value = state.counters.get(name).copied().unwrap_or(0) + 1;
        self.log(Operation::Counter {
            name: name.to_string(),
            value,
        })?;
        state.counters.insert(name.to_string(), value);
        Ok(value)
    }

    fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()> {
        let mut state = self.state.write();
        let coll = state.collections.entry(collection.to_string()).or_default();
        if coll.indexes.iter().any(|index| &index.spec == spec) {
            return Ok(());
        }

        let index = coll.build_index(spec)?;
        self.log(Operation::CreateIndex {
            collection: collection.to_string(),
            spec: spec.clone(),
        })?;
        coll.install_index(index);
        debug!(collection, index = %spec.name, unique = spec.unique, "index created");
        Ok(())
    }

    fn drop_indexes(&self, collection: &str) -> Result<()> {
        let mut state = self.state.write();
        let Some(coll) = state.collections.get_mut(collection) else {
            return Ok(());
        };
        self.log(Operation::DropIndexes {
            collection: collection.to_string(),
        })?;
        coll.indexes.clear();
        Ok(())
    }

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>> {
        let state = self.state.read();
        Ok(state
            .collections
            .get(collection)
            .map(|coll| coll.indexes.iter().map(|index| index.spec.clone()).collect())
            .unwrap_or_default())
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let state = self.state.read();
        let Some(coll) = state.collections.get(collection) else {
            return Ok(0);
        };
        if filter.is_match_all() {
            return Ok(coll.rows.len());
        }
        let matcher = FilterMatcher::new();
        let count = match coll.candidates(filter) {
            Some(rows) => rows
                .iter()
                .filter(|row| {
                    coll.rows
                        .get(row)
                        .map(|doc| matcher.matches(doc, filter))
                        .unwrap_or(false)
                })
                .count(),
            None => coll.rows.values().filter(|doc| matcher.matches(doc, filter)).count(),
        };
        Ok(count)
    }
}

/// How a cursor walks the collection.
enum ScanPlan {
    /// Row-id order over the whole collection, resuming after the last row seen.
    Full { after: Option<RowId>, done: bool },
    /// Fixed row list (index candidates or sorted order), re-checked on fetch.
    Rows { rows: Vec<RowId>, position: usize },
}

impl ScanPlan {
    fn build(coll: &Collection, filter: &Filter, options: &FindOptions) -> Self {
        if let Some((path, order)) = &options.sort {
            // Only sort keys are held, documents are fetched batch by batch
            let matcher = FilterMatcher::new();
            let mut keyed: Vec<(RowId, Option<&serde_json::Value>)> = coll
                .rows
                .iter()
                .filter(|(_, doc)| matcher.matches(doc, filter))
                .map(|(row, doc)| (*row, lookup_path(&doc.fields, path)))
                .collect();
            keyed.sort_by(|a, b| {
                let ord = cmp_values(a.1, b.1);
                match order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
            // The cursor applies the limit after the fetch-time re-check
            let rows: Vec<RowId> = keyed.into_iter().map(|(row, _)| row).collect();
            return ScanPlan::Rows { rows, position: 0 };
        }

        match coll.candidates(filter) {
            Some(bitmap) => ScanPlan::Rows {
                rows: bitmap.iter().collect(),
                position: 0,
            },
            None => ScanPlan::Full { after: None, done: false },
        }
    }
}

struct MemorySource {
    state: Arc<RwLock<StoreState>>,
    collection: String,
    filter: Filter,
    projection: Option<Vec<String>>,
    batch_size: usize,
    plan: ScanPlan,
    matcher: FilterMatcher,
}

impl BatchSource for MemorySource {
    fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
        let state = self.state.read();
        let Some(coll) = state.collections.get(&self.collection) else {
            return Ok(None);
        };

        let mut batch = Vec::with_capacity(self.batch_size);
        match &mut self.plan {
            ScanPlan::Full { after, done } => {
                if *done {
                    return Ok(None);
                }
                let lower = match *after {
                    Some(row) => Bound::Excluded(row),
                    None => Bound::Unbounded,
                };
                let mut last = *after;
                let mut reached_end = true;
                for (row, doc) in coll.rows.range((lower, Bound::Unbounded)) {
                    last = Some(*row);
                    if self.matcher.matches(doc, &self.filter) {
                        batch.push(match &self.projection {
                            Some(paths) => doc.project(paths),
                            None => doc.clone(),
                        });
                        if batch.len() >= self.batch_size {
                            reached_end = false;
                            break;
                        }
                    }
                }
                *after = last;
                *done = reached_end;
            }
            ScanPlan::Rows { rows, position } => {
                while *position < rows.len() && batch.len() < self.batch_size {
                    let row = rows[*position];
                    *position += 1;
                    if let Some(doc) = coll.rows.get(&row) {
                        if self.matcher.matches(doc, &self.filter) {
                            batch.push(match &self.projection {
                                Some(paths) => doc.project(paths),
                                None => doc.clone(),
                            });
                        }
                    }
                }
            }
        }

        if batch.is_empty() {
            Ok(None)
        } else {
            Ok(Some(batch))
        }
    }
}
