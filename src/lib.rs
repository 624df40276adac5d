pub mod core;
pub mod storage;
pub mod index;
pub mod query;
pub mod stats;
pub mod parser;
pub mod crawler;
pub mod ingest;

pub use crate::core::config::Config;
pub use crate::core::database::TaskDatabase;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::types::{Document, TaskId, WorkItem};

/*
┌──────────────────────────────────────────────────────────────────────────────────────┐
│                              TASKVAULT ARCHITECTURE                                  │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── CORE LAYER ──────────────────────────────────────┐
│                                                                                      │
│  ┌──────────────────────────────────────────────────────────────────────────────┐    │
│  │                            struct TaskDatabase                               │    │
│  │ config: Config                      // Connection + ingestion settings       │    │
│  │ store: Arc<dyn DocumentStore>       // Only shared mutable resource          │    │
│  │ parser_factory: ParserFactory       // One ParserAdapter per drone           │    │
│  │ upserter: Arc<Upserter>             // Find-or-create by natural key         │    │
│  │ queries: Arc<QueryEngine>           // Alias-aware streaming queries         │    │
│  │ stats: StatsEngine                  // count / latest                        │    │
│  │ indexes: IndexBuilder               // Administrative rebuild                │    │
│  └──────────────────────────────────────────────────────────────────────────────┘    │
│                                                                                      │
│  ┌──────────────────┐  ┌──────────────────┐  ┌────────────────────────────────┐      │
│  │ struct Config    │  │ struct Document  │  │ struct Error                   │      │
│  │ • host, port     │  │ • fields:        │  │ • kind: ErrorKind              │      │
│  │ • database       │  │   Map<String,    │  │   Transient | Parse | Conflict │      │
│  │ • collection     │  │   Value>         │  │   Configuration | FatalStore   │      │
│  │ • aliasesConfig  │  └──────────────────┘  │ • context: String              │      │
│  │ • storagePath    │  ┌──────────────────┐  └────────────────────────────────┘      │
│  │ • poolSize       │  │ struct TaskId    │  ┌────────────────────────────────┐      │
│  │ • retry          │  │ • 0: u64         │  │ struct RetryPolicy             │      │
│  └──────────────────┘  └──────────────────┘  │ • max_attempts, backoff        │      │
│                                              └────────────────────────────────┘      │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── INGEST LAYER ────────────────────────────────────┐
│                                                                                      │
│  Crawler ──WorkItem──► Queen ──bounded channel──► Drone × N ──► Upserter ──► store   │
│                                                                                      │
│  ┌──────────────────┐  ┌──────────────────────┐  ┌──────────────────────────────┐    │
│  │ struct Crawler   │  │ struct Queen         │  │ struct Drone                 │    │
│  │ • walkdir, lazy  │  │ • executor: Box<dyn  │  │ • parser: Box<dyn            │    │
│  │ • predicate      │  │   Executor>          │  │   ParserAdapter>             │    │
│  │ • skips accepted │  │   ThreadPool|Inline  │  │ • catch_unwind per item      │    │
│  │   subtrees       │  │ • CancelToken        │  │ • rebuilds parser on panic   │    │
│  └──────────────────┘  └──────────────────────┘  └──────────────────────────────┘    │
│                                                                                      │
│  ┌──────────────────────────────────┐  ┌──────────────────────────────────────────┐  │
│  │ struct Upserter                  │  │ struct AssimilationReport                │  │
│  │ • increment_counter("taskid")    │  │ • run_id: Uuid                           │  │
│  │ • unique natural_key index       │  │ • items: Vec<ItemReport>                 │  │
│  │ • known: Mutex<LruCache>         │  │   Inserted|Updated|Skipped|Failed|       │  │
│  │ • conflict → re-read             │  │   Cancelled                              │  │
│  └──────────────────────────────────┘  └──────────────────────────────────────────┘  │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── QUERY LAYER ─────────────────────────────────────┐
│                                                                                      │
│  criteria JSON ──► AliasMap ──► FilterParser ──► Filter ──► DocumentStore::find      │
│                                                                 │                    │
│                               Row ◄── fallback paths ◄── Cursor (batched)            │
│                                                                                      │
│  ┌──────────────────┐  ┌──────────────────┐  ┌──────────────────────────────────┐    │
│  │ struct AliasMap  │  │ enum Filter      │  │ struct StatsEngine               │    │
│  │ • name → primary │  │ • And/Or/Nor     │  │ • HANDLERS: [(Stat, fn)]         │    │
│  │   + fallbacks    │  │ • Field(conds)   │  │ • count, latest                  │    │
│  └──────────────────┘  └──────────────────┘  └──────────────────────────────────┘    │
└──────────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── STORAGE LAYER ───────────────────────────────────┐
│                                                                                      │
│  ┌──────────────────────────┐  ┌──────────────────────┐  ┌────────────────────────┐  │
│  │ struct MemoryStore       │  │ struct WAL           │  │ struct Checkpoint      │  │
│  │ • RwLock<StoreState>     │  │ • len + crc32 frames │  │ • rows per collection  │  │
│  │ • FieldIndex (roaring)   │  │ • generation rotate  │  │ • counters             │  │
│  │ • FileLock (flock)       │  │ • torn tail stops    │  │ • tmp + rename         │  │
│  └──────────────────────────┘  └──────────────────────┘  └────────────────────────┘  │
└──────────────────────────────────────────────────────────────────────────────────────┘
*/
