pub mod walker;

pub use walker::{Crawler, CrawlIter, MarkerFilePredicate, ResultDirPredicate};
