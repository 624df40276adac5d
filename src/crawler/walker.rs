use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;
use walkdir::WalkDir;
use crate::core::error::Result;
use crate::core::types::{absolute, WorkItem};

/// Decides whether a directory holds one result set.
pub trait ResultDirPredicate: Send + Sync {
    fn is_result_dir(&self, dir: &Path) -> bool;
}

impl<F> ResultDirPredicate for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_result_dir(&self, dir: &Path) -> bool {
        self(dir)
    }
}

/// Accepts a directory containing a file whose name starts with one of the
/// markers, so `vasprun.xml` also matches `vasprun.xml.gz`.
#[derive(Debug, Clone)]
pub struct MarkerFilePredicate {
    pub markers: Vec<String>,
}

impl MarkerFilePredicate {
    pub fn new<I, S>(markers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        MarkerFilePredicate {
            markers: markers.into_iter().map(Into::into).collect(),
        }
    }
}

impl Default for MarkerFilePredicate {
    fn default() -> Self {
        MarkerFilePredicate::new(["task.json"])
    }
}

impl ResultDirPredicate for MarkerFilePredicate {
    fn is_result_dir(&self, dir: &Path) -> bool {
        let Ok(entries) = std::fs::read_dir(dir) else {
            return false;
        };
        entries.flatten().any(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            entry.file_type().map(|t| t.is_file()).unwrap_or(false)
                && self.markers.iter().any(|m| name.starts_with(m.as_str()))
        })
    }
}

/// Streaming discovery of result directories under a root.
///
/// The walk is depth-first and lazy; nothing beyond the current path is held
/// in memory. An accepted directory is not descended into, its subdirectories
/// belong to the same result set. Calling `iter` again restarts the walk.
#[derive(Clone)]
pub struct Crawler {
    pub root: PathBuf,
    pub max_depth: Option<usize>,
    pub follow_links: bool,
    predicate: Arc<dyn ResultDirPredicate>,
}

impl Crawler {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Crawler {
            root: root.into(),
            max_depth: None,
            follow_links: false,
            predicate: Arc::new(MarkerFilePredicate::default()),
        }
    }

    pub fn with_predicate(mut self, predicate: Arc<dyn ResultDirPredicate>) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn follow_links(mut self, yes: bool) -> Self {
        self.follow_links = yes;
        self
    }

    /// Work items and unreadable-entry errors, in walk order.
    pub fn iter(&self) -> CrawlIter {
        let mut walk = WalkDir::new(&self.root)
            .follow_links(self.follow_links)
            .sort_by_file_name();
        if let Some(depth) = self.max_depth {
            walk = walk.max_depth(depth);
        }
        CrawlIter {
            walker: walk.into_iter(),
            predicate: Arc::clone(&self.predicate),
        }
    }

    /// Work items only; unreadable entries are logged and skipped.
    pub fn walk(&self) -> impl Iterator<Item = WorkItem> + Send + use<> {
        self.iter().filter_map(|item| match item {
            Ok(item) => Some(item),
            Err(err) => {
                warn!(error = %err, "skipping unreadable entry");
                None
            }
        })
    }
}

pub struct CrawlIter {
    walker: walkdir::IntoIter,
    predicate: Arc<dyn ResultDirPredicate>,
}

impl Iterator for CrawlIter {
    type Item = Result<WorkItem>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => return Some(Err(err.into())),
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            if self.predicate.is_result_dir(entry.path()) {
                self.walker.skip_current_dir();
                return Some(Ok(WorkItem::new(absolute(entry.path()))));
            }
        }
    }
}
