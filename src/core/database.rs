use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use parking_lot::Mutex;
use serde_json::Value;
use tracing::info;
use crate::core::config::Config;
use crate::core::error::{Error, Result};
use crate::core::retry::RetryPolicy;
use crate::crawler::walker::Crawler;
use crate::index::builder::{IndexBuilder, IndexSpec};
use crate::ingest::drone::DroneSettings;
use crate::ingest::queen::{CancelToken, Queen};
use crate::ingest::report::{AssimilationReport, IngestSummary};
use crate::ingest::upsert::{AdditionalFields, NaturalKeyStrategy, Upserter};
use crate::parser::adapter::ParserFactory;
use crate::query::engine::{QueryEngine, QueryResults};
use crate::stats::engine::StatsEngine;
use crate::storage::memory::MemoryStore;
use crate::storage::DocumentStore;

/// Entry point tying ingestion, queries and statistics to one store.
pub struct TaskDatabase {
    config: Config,
    store: Arc<dyn DocumentStore>,
    // Set when the store is the embedded one, for flushing
    embedded: Option<Arc<MemoryStore>>,
    parser_factory: ParserFactory,
    upserter: Arc<Upserter>,
    queries: Arc<QueryEngine>,
    stats: StatsEngine,
    indexes: IndexBuilder,
}

impl TaskDatabase {
    /// Open the embedded store described by `config`.
    pub fn open(config: Config, parser_factory: ParserFactory) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(MemoryStore::from_config(&config)?);
        let mut db = Self::with_store(config, store.clone(), parser_factory)?;
        db.embedded = Some(store);
        Ok(db)
    }

    /// Use any store implementation. Settings and aliases are checked before
    /// the store is touched; an unreachable store is `FatalStore`.
    pub fn with_store(config: Config, store: Arc<dyn DocumentStore>, parser_factory: ParserFactory) -> Result<Self> {
        config.validate()?;
        let queries = Arc::new(QueryEngine::from_config(store.clone(), &config)?);

        store.ping().map_err(|e| {
            if e.is_fatal() {
                e
            } else {
                Error::fatal(format!("store {} unreachable: {}", config.namespace(), e.context))
            }
        })?;

        let indexes = IndexBuilder::new(store.clone(), &config.collection);
        indexes.ensure_mandatory()?;

        let retry = RetryPolicy::from(&config.retry);
        let upserter = Arc::new(Upserter::new(store.clone(), &config.collection, retry));
        info!(namespace = %config.namespace(), "task database ready");

        Ok(TaskDatabase {
            stats: StatsEngine::new(queries.clone()),
            config,
            store,
            embedded: None,
            parser_factory,
            upserter,
            queries,
            indexes,
        })
    }

    pub fn with_key_strategy(mut self, strategy: NaturalKeyStrategy) -> Self {
        let retry = RetryPolicy::from(&self.config.retry);
        self.upserter = Arc::new(
            Upserter::new(self.store.clone(), &self.config.collection, retry).with_key_strategy(strategy),
        );
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    pub fn queries(&self) -> &Arc<QueryEngine> {
        &self.queries
    }

    /// Crawler whose result-directory test is delegated to a parser instance.
    pub fn crawler(&self, root: &Path) -> Crawler {
        let probe = Mutex::new((self.parser_factory)());
        Crawler::new(root).with_predicate(Arc::new(move |dir: &Path| probe.lock().is_result_dir(dir)))
    }

    pub fn queen(&self) -> Queen {
        Queen::threaded(self.parser_factory.clone(), self.upserter.clone())
    }

    /// Crawl `root` and store every result directory found. `pool_size`
    /// defaults to the configured value, then to one worker per CPU.
    pub fn ingest(
        &self,
        root: &Path,
        pool_size: Option<usize>,
        additional: &AdditionalFields,
        force_update: bool,
    ) -> Result<IngestSummary> {
        let report = self.ingest_with_cancel(root, pool_size, additional, force_update, &CancelToken::new())?;
        Ok(report.summary())
    }

    pub fn ingest_with_cancel(
        &self,
        root: &Path,
        pool_size: Option<usize>,
        additional: &AdditionalFields,
        force_update: bool,
        cancel: &CancelToken,
    ) -> Result<AssimilationReport> {
        if !root.is_dir() {
            return Err(Error::config(format!("{} is not a directory", root.display())));
        }
        let pool_size = pool_size.unwrap_or_else(|| self.config.effective_pool_size());
        let settings = DroneSettings {
            force_update,
            additional: additional.clone(),
        };

        let report = self.queen().assimilate(self.crawler(root).walk(), pool_size, settings, cancel)?;
        self.flush()?;
        Ok(report)
    }

    pub fn run_query(&self, properties: &[&str], criteria: Option<&Value>) -> Result<QueryResults> {
        self.queries.query(properties, criteria)
    }

    pub fn get_stats(&self, names: &[&str], latest_property: Option<&str>) -> Result<BTreeMap<String, String>> {
        self.stats.get_stats(names, latest_property)
    }

    /// Rebuild the mandatory and default indexes plus `extra`.
    pub fn rebuild_indexes(&self, extra: &[IndexSpec]) -> Result<Vec<String>> {
        let mut specs = IndexBuilder::default_specs();
        specs.extend_from_slice(extra);
        self.indexes.rebuild(&specs)
    }

    /// Make everything written so far durable (embedded store only).
    pub fn flush(&self) -> Result<()> {
        match &self.embedded {
            Some(store) => store.sync(),
            None => Ok(()),
        }
    }

    /// Snapshot the embedded store and truncate its log.
    pub fn checkpoint(&self) -> Result<()> {
        match &self.embedded {
            Some(store) => store.checkpoint(),
            None => Ok(()),
        }
    }
}
