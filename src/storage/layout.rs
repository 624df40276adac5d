use std::path::PathBuf;
use std::fs;
use crate::core::error::Result;

/// Directory structure of an on-disk store
#[derive(Debug, Clone)]
pub struct StorageLayout {
    pub base_dir: PathBuf,      // Root directory
    pub wal_dir: PathBuf,       // Write-ahead log location
    pub meta_dir: PathBuf,      // Snapshot and lock files
}

impl StorageLayout {
    pub fn new(base_dir: PathBuf) -> Result<Self> {
        let wal_dir = base_dir.join("wal");
        let meta_dir = base_dir.join("meta");

        fs::create_dir_all(&wal_dir)?;
        fs::create_dir_all(&meta_dir)?;

        Ok(StorageLayout {
            base_dir,
            wal_dir,
            meta_dir,
        })
    }

    pub fn wal_path(&self, generation: u64) -> PathBuf {
        self.wal_dir.join(format!("wal_{:08}.log", generation))
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.meta_dir.join("snapshot.json")
    }

    pub fn snapshot_tmp_path(&self) -> PathBuf {
        self.meta_dir.join("snapshot.json.tmp")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.base_dir.join(".lock")
    }

    /// WAL generations present on disk, ascending.
    pub fn wal_generations(&self) -> Result<Vec<u64>> {
        let mut generations = Vec::new();
        for entry in fs::read_dir(&self.wal_dir)? {
            let name = entry?.file_name();
            let name = name.to_string_lossy();
            if let Some(num) = name
                .strip_prefix("wal_")
                .and_then(|rest| rest.strip_suffix(".log"))
                .and_then(|digits| digits.parse::<u64>().ok())
            {
                generations.push(num);
            }
        }
        generations.sort_unstable();
        Ok(generations)
    }
}
