use std::collections::BTreeMap;
use std::fs;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::core::error::{Error, Result};
use crate::core::types::{Document, RowId};
use crate::index::spec::IndexSpec;
use crate::storage::layout::StorageLayout;

/// Full snapshot of the store. WAL generations from `wal_generation` on are
/// replayed on top of it.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Checkpoint {
    pub wal_generation: u64,
    pub timestamp: Option<DateTime<Utc>>,
    pub collections: BTreeMap<String, CollectionSnapshot>,
    pub counters: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionSnapshot {
    pub next_row: RowId,
    pub rows: Vec<(RowId, Document)>,
    pub indexes: Vec<IndexSpec>,
}

impl Checkpoint {
    /// Load checkpoint from disk
    pub fn load(storage: &StorageLayout) -> Result<Option<Self>> {
        let path = storage.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let checkpoint = serde_json::from_slice(&data)
            .map_err(|e| Error::fatal(format!("corrupt snapshot {}: {}", path.display(), e)))?;
        Ok(Some(checkpoint))
    }

    /// Save via temp file and rename so a crash never leaves half a snapshot
    pub fn save(&self, storage: &StorageLayout) -> Result<()> {
        let data = serde_json::to_vec(self)?;
        let tmp = storage.snapshot_tmp_path();
        fs::write(&tmp, data)?;
        fs::File::open(&tmp)?.sync_all()?;
        fs::rename(&tmp, storage.snapshot_path())?;
        Ok(())
    }

    pub fn doc_count(&self) -> usize {
        self.collections.values().map(|c| c.rows.len()).sum()
    }
}
