use std::collections::VecDeque;
use crate::core::types::Document;
use crate::core::error::Result;

/// Producer of result batches behind a `Cursor`.
pub trait BatchSource: Send {
    /// Next batch, `None` once exhausted.
    fn next_batch(&mut self) -> Result<Option<Vec<Document>>>;
}

/// Streaming result set. Batches are fetched on demand, so the first document
/// is available before the query finishes. Not restartable.
pub struct Cursor {
    source: Box<dyn BatchSource>,
    buffer: VecDeque<Document>,
    remaining: Option<usize>,
    exhausted: bool,
    fetched_batches: usize,
}

impl Cursor {
    pub fn new(source: Box<dyn BatchSource>, limit: Option<usize>) -> Self {
        Cursor {
            source,
            buffer: VecDeque::new(),
            remaining: limit,
            exhausted: false,
            fetched_batches: 0,
        }
    }

    pub fn empty() -> Self {
        struct Empty;
        impl BatchSource for Empty {
            fn next_batch(&mut self) -> Result<Option<Vec<Document>>> {
                Ok(None)
            }
        }
        Cursor::new(Box::new(Empty), None)
    }

    /// Round trips made so far.
    pub fn fetched_batches(&self) -> usize {
        self.fetched_batches
    }

    fn fill(&mut self) -> Result<()> {
        while self.buffer.is_empty() && !self.exhausted {
            match self.source.next_batch()? {
                Some(batch) => {
                    self.fetched_batches += 1;
                    self.buffer.extend(batch);
                }
                None => self.exhausted = true,
            }
        }
        Ok(())
    }
}

impl Iterator for Cursor {
    type Item = Result<Document>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == Some(0) {
            return None;
        }
        if let Err(err) = self.fill() {
            // A failed fetch ends the stream after reporting once
            self.exhausted = true;
            self.buffer.clear();
            return Some(Err(err));
        }
        let doc = self.buffer.pop_front()?;
        if let Some(remaining) = self.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(Ok(doc))
    }
}
