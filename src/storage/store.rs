//! Article collection: the persistent store the pipeline writes and the
//! read path queries.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;

use super::{JsonlReader, JsonlWriter, StorageError};
use crate::models::{ArticleRecord, Generation};

/// Errors raised by a store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Store connection is closed")]
    Closed,
}

/// Which records an operation applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordFilter {
    All,
    Generation(Generation),
    /// Records written by any generation older than the given one
    GenerationBefore(Generation),
    Source(String),
}

impl RecordFilter {
    pub fn matches(&self, record: &ArticleRecord) -> bool {
        match self {
            RecordFilter::All => true,
            RecordFilter::Generation(g) => record.generation == *g,
            RecordFilter::GenerationBefore(g) => record.generation < *g,
            RecordFilter::Source(name) => record.article.source_name == *name,
        }
    }
}

/// Result ordering for `find`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    /// Order records were inserted in (page order within a run)
    #[default]
    Insertion,
    /// Most recently scraped first; ties keep insertion order
    NewestFirst,
}

impl SortOrder {
    pub fn apply(self, records: &mut [ArticleRecord]) {
        if self == SortOrder::NewestFirst {
            records.sort_by(|a, b| b.article.scraped_at.cmp(&a.article.scraped_at));
        }
    }
}

/// A collection of article records.
///
/// Every `insert_many` and `delete_many` call must be atomic with respect
/// to `find`: a concurrent reader sees the collection before or after the
/// call, never halfway.
#[async_trait]
pub trait ArticleStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Insert all records in one bulk write.
    async fn insert_many(&self, records: Vec<ArticleRecord>) -> Result<usize, StoreError>;

    /// Remove every record matching the filter, returning how many went.
    async fn delete_many(&self, filter: &RecordFilter) -> Result<usize, StoreError>;

    async fn find(
        &self,
        filter: &RecordFilter,
        sort: SortOrder,
    ) -> Result<Vec<ArticleRecord>, StoreError>;

    /// Release the connection. Later calls fail with `StoreError::Closed`.
    async fn close(&self) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Newest generation present in a set of records.
pub fn latest_generation(records: &[ArticleRecord]) -> Option<Generation> {
    records.iter().map(|r| r.generation).max()
}

/// Keep only the newest generation, preserving order.
pub fn current_generation(records: Vec<ArticleRecord>) -> Vec<ArticleRecord> {
    match latest_generation(&records) {
        Some(latest) => records
            .into_iter()
            .filter(|r| r.generation == latest)
            .collect(),
        None => records,
    }
}

/// Store backed by a single JSONL collection file.
///
/// Mutations rewrite the file through a temp file and rename, so other
/// processes reading the same file also see whole states only.
pub struct JsonlArticleStore {
    path: PathBuf,
    lock: RwLock<()>,
    closed: AtomicBool,
}

impl JsonlArticleStore {
    /// Open (creating the directory if needed) the collection at `path`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::from)?;
        }
        debug!("Opened article store at {:?}", path);
        Ok(Self {
            path,
            lock: RwLock::new(()),
            closed: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn ensure_open(&self) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    fn reader(&self) -> JsonlReader<ArticleRecord> {
        JsonlReader::new(self.path.clone())
    }

    fn writer(&self) -> JsonlWriter<ArticleRecord> {
        JsonlWriter::new(self.path.clone())
    }
}

#[async_trait]
impl ArticleStore for JsonlArticleStore {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn insert_many(&self, records: Vec<ArticleRecord>) -> Result<usize, StoreError> {
        self.ensure_open()?;
        if records.is_empty() {
            return Ok(0);
        }

        let _guard = self.lock.write().await;
        let mut all = self.reader().read_all()?;
        let inserted = records.len();
        all.extend(records);
        self.writer().write_all(&all)?;

        debug!(inserted, path = ?self.path, "Inserted records");
        Ok(inserted)
    }

    async fn delete_many(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        self.ensure_open()?;

        let _guard = self.lock.write().await;
        let all = self.reader().read_all()?;
        let before = all.len();
        let kept: Vec<ArticleRecord> = all.into_iter().filter(|r| !filter.matches(r)).collect();
        let removed = before - kept.len();

        if removed > 0 {
            self.writer().write_all(&kept)?;
        }

        debug!(removed, ?filter, "Deleted records");
        Ok(removed)
    }

    async fn find(
        &self,
        filter: &RecordFilter,
        sort: SortOrder,
    ) -> Result<Vec<ArticleRecord>, StoreError> {
        self.ensure_open()?;

        let _guard = self.lock.read().await;
        let mut records = self.reader().read_where(|r| filter.matches(r))?;
        sort.apply(&mut records);
        Ok(records)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.closed.store(true, Ordering::SeqCst);
        debug!("Closed article store at {:?}", self.path);
        Ok(())
    }
}
