pub mod upsert;
pub mod report;
pub mod drone;
pub mod queen;

pub use drone::{Drone, DroneSettings};
pub use queen::{CancelToken, Executor, InlineExecutor, Queen, ThreadPoolExecutor};
pub use report::{AssimilationReport, IngestSummary, ItemReport, Outcome};
pub use upsert::{AdditionalFields, NaturalKeyStrategy, UpsertAction, UpsertOutcome, Upserter};
