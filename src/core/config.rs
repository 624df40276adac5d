use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, Result};

/// Connection and ingestion settings. Passed explicitly to every component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub collection: String,
    pub user: Option<String>,
    pub password: Option<String>,
    pub aliases_config: Option<PathBuf>,

    // Embedded store location, None keeps everything in memory
    pub storage_path: Option<PathBuf>,
    pub pool_size: Option<usize>,
    pub retry: RetryConfig,
    pub query_batch_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            host: "localhost".to_string(),
            port: 27017,
            database: "results".to_string(),
            collection: "tasks".to_string(),
            user: None,
            password: None,
            aliases_config: None,

            storage_path: None,
            pool_size: None,
            retry: RetryConfig::default(),
            query_batch_size: 256,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }
}

impl RetryConfig {
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }
}

impl Config {
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(raw)
            .map_err(|e| Error::config(format!("invalid settings: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|e| Error::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.collection.trim().is_empty() {
            return Err(Error::config("collection name must not be empty"));
        }
        if self.database.trim().is_empty() {
            return Err(Error::config("database name must not be empty"));
        }
        if self.pool_size == Some(0) {
            return Err(Error::config("pool size must be at least 1"));
        }
        if self.query_batch_size == 0 {
            return Err(Error::config("query batch size must be at least 1"));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config("retry attempts must be at least 1"));
        }
        Ok(())
    }

    /// Worker count: configured value or one per logical CPU.
    pub fn effective_pool_size(&self) -> usize {
        self.pool_size.unwrap_or_else(num_cpus::get).max(1)
    }

    /// Store-side namespace, `database.collection`.
    pub fn namespace(&self) -> String {
        format!("{}.{}", self.database, self.collection)
    }
}
