use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use serde::Serialize;
use uuid::Uuid;
use crate::core::types::TaskId;
use crate::ingest::upsert::{UpsertAction, UpsertOutcome};

/// What happened to one work item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome {
    Inserted,
    Updated,
    Skipped,          // Already stored, not forced
    Failed(String),   // Parse, store or worker failure, with reason
    Cancelled,        // Queued but never started
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Outcome::Inserted | Outcome::Updated | Outcome::Skipped)
    }
}

impl From<UpsertAction> for Outcome {
    fn from(action: UpsertAction) -> Self {
        match action {
            UpsertAction::Inserted => Outcome::Inserted,
            UpsertAction::Updated => Outcome::Updated,
            UpsertAction::Unchanged => Outcome::Skipped,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub path: PathBuf,
    pub task_id: Option<TaskId>,
    pub outcome: Outcome,
}

impl ItemReport {
    pub fn stored(path: PathBuf, upsert: UpsertOutcome) -> Self {
        ItemReport {
            path,
            task_id: Some(upsert.task_id),
            outcome: upsert.action.into(),
        }
    }

    pub fn failed(path: PathBuf, reason: impl Into<String>) -> Self {
        ItemReport {
            path,
            task_id: None,
            outcome: Outcome::Failed(reason.into()),
        }
    }

    pub fn cancelled(path: PathBuf) -> Self {
        ItemReport {
            path,
            task_id: None,
            outcome: Outcome::Cancelled,
        }
    }
}

/// Every item a run pulled, each reported exactly once, in completion order.
#[derive(Debug, Clone, Serialize)]
pub struct AssimilationReport {
    pub run_id: Uuid,
    pub items: Vec<ItemReport>,
    pub cancelled: bool,
    pub duration: Duration,
}

impl AssimilationReport {
    pub fn summary(&self) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for item in &self.items {
            match &item.outcome {
                Outcome::Inserted => summary.inserted += 1,
                Outcome::Updated => summary.updated += 1,
                Outcome::Skipped => summary.skipped += 1,
                Outcome::Cancelled => summary.cancelled += 1,
                Outcome::Failed(reason) => {
                    summary.failed += 1;
                    summary.failed_paths.push((item.path.clone(), reason.clone()));
                }
            }
        }
        summary.failed_paths.sort();
        summary
    }

    pub fn inserted_count(&self) -> usize {
        self.items.iter().filter(|item| item.outcome == Outcome::Inserted).count()
    }

    pub fn task_ids(&self) -> Vec<TaskId> {
        self.items.iter().filter_map(|item| item.task_id).collect()
    }
}

/// User-facing counts for one ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub inserted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
    pub cancelled: usize,
    pub failed_paths: Vec<(PathBuf, String)>,
}

impl IngestSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.skipped + self.failed + self.cancelled
    }
}

impl fmt::Display for IngestSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "inserted {}, updated {}, skipped {}, failed {}, cancelled {}",
            self.inserted, self.updated, self.skipped, self.failed, self.cancelled
        )?;
        for (path, reason) in &self.failed_paths {
            write!(f, "\n  {}: {}", path.display(), reason)?;
        }
        Ok(())
    }
}
