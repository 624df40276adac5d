use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;
use crossbeam::channel::{bounded, unbounded};
use parking_lot::Mutex;
use tracing::{info, info_span};
use uuid::Uuid;
use crate::core::error::{Error, Result};
use crate::core::types::WorkItem;
use crate::ingest::drone::{Drone, DroneSettings};
use crate::ingest::report::{AssimilationReport, ItemReport};
use crate::ingest::upsert::Upserter;
use crate::parser::adapter::ParserFactory;

/// Caller-initiated stop. Workers finish their current item, then halt.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Strategy for driving drones over a stream of work items.
pub trait Executor: Send + Sync {
    fn name(&self) -> &'static str;

    /// Drones actually used for a requested pool size.
    fn workers(&self, pool_size: usize) -> usize;

    /// Process every item pulled from `items` exactly once. Returns the
    /// reports, or the first error that aborted the run.
    fn execute(
        &self,
        items: &mut dyn Iterator<Item = WorkItem>,
        drones: Vec<Drone>,
        cancel: &CancelToken,
    ) -> Result<Vec<ItemReport>>;
}

/// Demand-pull thread pool. A feeder pulls items lazily into a bounded
/// channel and each idle drone takes the next one.
#[derive(Debug, Clone)]
pub struct ThreadPoolExecutor {
    pub queue_per_worker: usize,
}

impl Default for ThreadPoolExecutor {
    fn default() -> Self {
        ThreadPoolExecutor { queue_per_worker: 2 }
    }
}

impl Executor for ThreadPoolExecutor {
    fn name(&self) -> &'static str {
        "thread-pool"
    }

    fn workers(&self, pool_size: usize) -> usize {
        pool_size
    }

    fn execute(
        &self,
        items: &mut dyn Iterator<Item = WorkItem>,
        drones: Vec<Drone>,
        cancel: &CancelToken,
    ) -> Result<Vec<ItemReport>> {
        let (report_sender, report_receiver) = unbounded::<ItemReport>();
        let fatal: Mutex<Option<Error>> = Mutex::new(None);
        let capacity = (drones.len() * self.queue_per_worker).max(1);

        thread::scope(|scope| -> Result<()> {
            let (item_sender, item_receiver) = bounded::<WorkItem>(capacity);

            for mut drone in drones {
                let item_receiver = item_receiver.clone();
                let report_sender = report_sender.clone();
                let cancel = cancel.clone();
                let fatal = &fatal;
                thread::Builder::new()
                    .name(format!("drone-{}", drone.id))
                    .spawn_scoped(scope, move || {
                        while let Ok(item) = item_receiver.recv() {
                            if cancel.is_cancelled() {
                                let _ = report_sender.send(ItemReport::cancelled(item.path));
                                continue;
                            }
                            match drone.assimilate(item) {
                                Ok(report) => {
                                    let _ = report_sender.send(report);
                                }
                                Err(err) => {
                                    cancel.cancel();
                                    let mut slot = fatal.lock();
                                    if slot.is_none() {
                                        *slot = Some(err);
                                    }
                                }
                            }
                        }
                    })?;
            }
            drop(item_receiver);

            // Check before pulling so nothing is taken from the source unreported
            while !cancel.is_cancelled() {
                let Some(item) = items.next() else {
                    break;
                };
                if let Err(rejected) = item_sender.send(item) {
                    let _ = report_sender.send(ItemReport::failed(rejected.into_inner().path, "no workers left"));
                    break;
                }
            }
            Ok(())
        })?;

        if let Some(err) = fatal.into_inner() {
            return Err(err);
        }
        drop(report_sender);
        Ok(report_receiver.iter().collect())
    }
}

/// Single-threaded execution on the caller's thread, for tests and debugging.
#[derive(Debug, Clone, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn name(&self) -> &'static str {
        "inline"
    }

    fn workers(&self, _pool_size: usize) -> usize {
        1
    }

    fn execute(
        &self,
        items: &mut dyn Iterator<Item = WorkItem>,
        drones: Vec<Drone>,
        cancel: &CancelToken,
    ) -> Result<Vec<ItemReport>> {
        let Some(mut drone) = drones.into_iter().next() else {
            return Err(Error::config("inline executor needs one drone"));
        };
        let mut reports = Vec::new();
        while !cancel.is_cancelled() {
            let Some(item) = items.next() else {
                break;
            };
            reports.push(drone.assimilate(item)?);
        }
        Ok(reports)
    }
}

/// Coordinates one ingestion run: builds a drone per worker and hands them
/// to the executor.
pub struct Queen {
    executor: Box<dyn Executor>,
    factory: ParserFactory,
    upserter: Arc<Upserter>,
}

impl Queen {
    pub fn new(executor: Box<dyn Executor>, factory: ParserFactory, upserter: Arc<Upserter>) -> Self {
        Queen { executor, factory, upserter }
    }

    pub fn threaded(factory: ParserFactory, upserter: Arc<Upserter>) -> Self {
        Self::new(Box::new(ThreadPoolExecutor::default()), factory, upserter)
    }

    pub fn inline(factory: ParserFactory, upserter: Arc<Upserter>) -> Self {
        Self::new(Box::new(InlineExecutor), factory, upserter)
    }

    pub fn assimilate<I>(
        &self,
        items: I,
        pool_size: usize,
        settings: DroneSettings,
        cancel: &CancelToken,
    ) -> Result<AssimilationReport>
    where
        I: IntoIterator<Item = WorkItem>,
    {
        if pool_size == 0 {
            return Err(Error::config("pool size must be at least 1"));
        }

        let run_id = Uuid::new_v4();
        let span = info_span!("assimilate", run_id = %run_id, executor = self.executor.name(), pool_size);
        let _enter = span.enter();
        let started = Instant::now();

        let settings = Arc::new(settings);
        let drones = (0..self.executor.workers(pool_size))
            .map(|id| Drone::new(id, Arc::clone(&self.factory), Arc::clone(&self.upserter), Arc::clone(&settings)))
            .collect();

        let mut items = items.into_iter();
        let reports = self.executor.execute(&mut items, drones, cancel)?;

        let report = AssimilationReport {
            run_id,
            items: reports,
            cancelled: cancel.is_cancelled(),
            duration: started.elapsed(),
        };
        let summary = report.summary();
        info!(
            inserted = summary.inserted,
            updated = summary.updated,
            skipped = summary.skipped,
            failed = summary.failed,
            cancelled = summary.cancelled,
            elapsed_ms = report.duration.as_millis() as u64,
            "run finished"
        );
        Ok(report)
    }
}
