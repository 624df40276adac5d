use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, warn};
use crate::core::error::Result;
use crate::core::types::WorkItem;
use crate::ingest::report::ItemReport;
use crate::ingest::upsert::{AdditionalFields, UpsertOutcome, Upserter};
use crate::parser::adapter::{ParserAdapter, ParserFactory};

/// Settings shared by every drone of one run.
#[derive(Debug, Clone, Default)]
pub struct DroneSettings {
    pub force_update: bool,
    pub additional: AdditionalFields,
}

/// One worker: owns a parser, shares the upserter.
pub struct Drone {
    pub id: usize,
    factory: ParserFactory,
    parser: Box<dyn ParserAdapter>,
    upserter: Arc<Upserter>,
    settings: Arc<DroneSettings>,
    pub processed: usize,
    pub restarts: usize,
}

impl Drone {
    pub fn new(id: usize, factory: ParserFactory, upserter: Arc<Upserter>, settings: Arc<DroneSettings>) -> Self {
        let parser = factory();
        Drone {
            id,
            factory,
            parser,
            upserter,
            settings,
            processed: 0,
            restarts: 0,
        }
    }

    /// Parse and store one item.
    ///
    /// Parse and store failures become a `Failed` report. A panic is caught,
    /// reported the same way, and the parser is rebuilt before the next item.
    /// Only errors that make the whole run pointless are returned as `Err`.
    pub fn assimilate(&mut self, item: WorkItem) -> Result<ItemReport> {
        self.processed += 1;
        let result = panic::catch_unwind(AssertUnwindSafe(|| self.process(&item)));

        match result {
            Ok(Ok(upsert)) => {
                debug!(drone = self.id, path = %item.path.display(), task_id = %upsert.task_id, "assimilated");
                Ok(ItemReport::stored(item.path, upsert))
            }
            Ok(Err(err)) if err.is_fatal() => {
                error!(drone = self.id, path = %item.path.display(), error = %err, "aborting run");
                Err(err)
            }
            Ok(Err(err)) => {
                warn!(drone = self.id, path = %item.path.display(), error = %err, "item failed");
                Ok(ItemReport::failed(item.path, err.to_string()))
            }
            Err(payload) => {
                let reason = format!("worker panicked: {}", panic_message(payload.as_ref()));
                error!(drone = self.id, path = %item.path.display(), reason = %reason, "rebuilding parser");
                self.parser = (self.factory)();
                self.restarts += 1;
                Ok(ItemReport::failed(item.path, reason))
            }
        }
    }

    fn process(&mut self, item: &WorkItem) -> Result<UpsertOutcome> {
        let doc = self.parser.parse(&item.path)?;
        self.upserter.upsert(doc, self.settings.force_update, &self.settings.additional)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

