use std::path::Path;
use std::sync::Arc;
use crate::core::error::Result;
use crate::core::types::Document;

/// Turns one result directory into a document.
///
/// Implementations may keep per-call state, so they are driven through
/// `&mut self` and each worker owns its own instance.
pub trait ParserAdapter: Send {
    fn parse(&mut self, dir: &Path) -> Result<Document>;

    /// Whether `dir` looks like a result directory this parser understands.
    fn is_result_dir(&self, dir: &Path) -> bool;
}

/// Builds a fresh adapter for each worker, and again after a worker panic.
pub type ParserFactory = Arc<dyn Fn() -> Box<dyn ParserAdapter> + Send + Sync>;

/// Wraps a closure as a `ParserFactory`.
pub fn parser_factory<F, P>(make: F) -> ParserFactory
where
    F: Fn() -> P + Send + Sync + 'static,
    P: ParserAdapter + 'static,
{
    Arc::new(move || Box::new(make()) as Box<dyn ParserAdapter>)
}
