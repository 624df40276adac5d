pub mod layout;
pub mod file_lock;
pub mod wal;
pub mod checkpoint;
pub mod cursor;
pub mod memory;

use serde_json::Value;
use crate::core::error::Result;
use crate::core::types::{Document, RowId};
use crate::index::spec::IndexSpec;
use crate::query::ast::Filter;
use crate::query::types::SortOrder;
use crate::storage::cursor::Cursor;

pub const DEFAULT_BATCH_SIZE: usize = 256;

/// Options for `DocumentStore::find`.
#[derive(Debug, Clone)]
pub struct FindOptions {
    pub projection: Option<Vec<String>>,
    pub sort: Option<(String, SortOrder)>,
    pub limit: Option<usize>,
    pub batch_size: usize,
}

impl Default for FindOptions {
    fn default() -> Self {
        FindOptions {
            projection: None,
            sort: None,
            limit: None,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

impl FindOptions {
    pub fn with_projection(mut self, paths: Vec<String>) -> Self {
        self.projection = Some(paths);
        self
    }

    pub fn with_sort(mut self, path: impl Into<String>, order: SortOrder) -> Self {
        self.sort = Some((path.into(), order));
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// In-place modification applied by `update_one`.
#[derive(Debug, Clone)]
pub enum Update {
    Set(Vec<(String, Value)>),   // Dotted path assignments
    Replace(Document),           // Whole document
}

/// Primitive operations the ingestion and query layers need from a document
/// database. Implementations must make `insert` (with unique indexes) and
/// `increment_counter` atomic, since that is the only coordination between
/// concurrent writers, possibly in separate processes.
pub trait DocumentStore: Send + Sync {
    /// Liveness probe; an unusable store reports `FatalStore`.
    fn ping(&self) -> Result<()>;

    /// Insert honoring unique indexes. A duplicate key fails with `Conflict`.
    fn insert(&self, collection: &str, doc: Document) -> Result<RowId>;

    /// Streaming find with optional projection, sort and limit.
    fn find(&self, collection: &str, filter: &Filter, options: FindOptions) -> Result<Cursor>;

    /// Modify the first matching document. Returns whether one matched.
    fn update_one(&self, collection: &str, filter: &Filter, update: Update) -> Result<bool>;

    /// Atomic increment-and-get. The first call for a name returns 1.
    fn increment_counter(&self, name: &str) -> Result<u64>;

    fn create_index(&self, collection: &str, spec: &IndexSpec) -> Result<()>;

    fn drop_indexes(&self, collection: &str) -> Result<()>;

    fn list_indexes(&self, collection: &str) -> Result<Vec<IndexSpec>>;

    fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        projection: Option<Vec<String>>,
    ) -> Result<Option<Document>> {
        let options = FindOptions {
            projection,
            limit: Some(1),
            batch_size: 1,
            ..FindOptions::default()
        };
        self.find(collection, filter, options)?.next().transpose()
    }

    fn count(&self, collection: &str, filter: &Filter) -> Result<usize> {
        let options = FindOptions::default().with_projection(Vec::new());
        let mut total = 0;
        for doc in self.find(collection, filter, options)? {
            doc?;
            total += 1;
        }
        Ok(total)
    }
}
