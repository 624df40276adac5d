use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;
use crate::core::error::Result;
use crate::ingest::upsert::{NATURAL_KEY_FIELD, TASK_ID_FIELD};
use crate::storage::DocumentStore;

pub use crate::index::spec::IndexSpec;

/// Indexes every task collection carries regardless of what is declared.
pub fn mandatory_specs() -> Vec<IndexSpec> {
    vec![
        IndexSpec::single(TASK_ID_FIELD).unique(),
        IndexSpec::single(NATURAL_KEY_FIELD).unique(),
        IndexSpec::compound(&["nelements", "elements"]),
    ]
}

/// Administrative rebuild of secondary indexes.
///
/// Not atomic: between the drop and the last create, queries still work but
/// may scan, and the unique constraints are briefly absent.
pub struct IndexBuilder {
    store: Arc<dyn DocumentStore>,
    collection: String,
}

impl IndexBuilder {
    pub fn new(store: Arc<dyn DocumentStore>, collection: &str) -> Self {
        IndexBuilder {
            store,
            collection: collection.to_string(),
        }
    }

    /// Common query fields worth indexing on top of the mandatory set.
    pub fn default_specs() -> Vec<IndexSpec> {
        ["dir_name", "last_updated", "chemsys", "pretty_formula", "tags"]
            .into_iter()
            .map(IndexSpec::single)
            .collect()
    }

    /// Create the mandatory indexes if missing, without dropping anything.
    pub fn ensure_mandatory(&self) -> Result<()> {
        for spec in mandatory_specs() {
            self.store.create_index(&self.collection, &spec)?;
        }
        Ok(())
    }

    /// Drop every index, then create the mandatory set followed by `specs`.
    /// A name seen twice is created once. Returns the created names in order.
    pub fn rebuild(&self, specs: &[IndexSpec]) -> Result<Vec<String>> {
        self.store.drop_indexes(&self.collection)?;

        let mut seen = HashSet::new();
        let mut created = Vec::new();
        for spec in mandatory_specs().iter().chain(specs) {
            if !seen.insert(spec.name.clone()) {
                continue;
            }
            self.store.create_index(&self.collection, spec)?;
            created.push(spec.name.clone());
        }
        info!(collection = %self.collection, indexes = created.len(), "indexes rebuilt");
        Ok(created)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use crate::core::error::ErrorKind;
    use crate::core::types::Document;
    use crate::storage::memory::MemoryStore;

    #[test]
    fn rebuild_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let builder = IndexBuilder::new(store.clone(), "tasks");
        let mut specs = IndexBuilder::default_specs();
        specs.push(IndexSpec::single("chemsys"));

        let first = builder.rebuild(&specs).unwrap();
        let second = builder.rebuild(&specs).unwrap();
        assert_eq!(first, second);
        assert_eq!(first[..3], ["task_id", "natural_key", "nelements_elements"]);
        assert_eq!(first.iter().filter(|n| *n == "chemsys").count(), 1);
        assert_eq!(store.list_indexes("tasks").unwrap().len(), first.len());
    }

    #[test]
    fn unique_task_id_is_enforced_after_rebuild() {
        let store = Arc::new(MemoryStore::new());
        IndexBuilder::new(store.clone(), "tasks").rebuild(&[]).unwrap();
        let doc = |id: u64, key: &str| Document::from_value(json!({"task_id": id, "natural_key": key})).unwrap();

        store.insert("tasks", doc(1, "a")).unwrap();
        let err = store.insert("tasks", doc(1, "b")).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Conflict);
    }
}
