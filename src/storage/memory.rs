//! In-memory article store for tests.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{ArticleStore, RecordFilter, SortOrder, StoreError};
use crate::models::ArticleRecord;

/// In-memory store with switchable failures.
#[derive(Default)]
pub struct MemoryArticleStore {
    records: RwLock<Vec<ArticleRecord>>,
    unavailable: AtomicBool,
    fail_inserts: AtomicBool,
    fail_deletes: AtomicBool,
    closed: AtomicBool,
    close_calls: AtomicUsize,
}

impl MemoryArticleStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_records(records: Vec<ArticleRecord>) -> Self {
        Self {
            records: RwLock::new(records),
            ..Self::default()
        }
    }

    /// Make every operation fail as if the backend were unreachable.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    pub fn fail_deletes(&self, fail: bool) {
        self.fail_deletes.store(fail, Ordering::SeqCst);
    }

    pub fn close_calls(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Accept operations again after `close`.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    /// Copy of every record, ignoring failure switches.
    pub async fn snapshot(&self) -> Vec<ArticleRecord> {
        self.records.read().await.clone()
    }

    fn check(&self, flag: &AtomicBool, op: &str) -> Result<(), StoreError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.unavailable.load(Ordering::SeqCst) || flag.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("{op} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl ArticleStore for MemoryArticleStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn insert_many(&self, records: Vec<ArticleRecord>) -> Result<usize, StoreError> {
        self.check(&self.fail_inserts, "insert_many")?;
        let inserted = records.len();
        self.records.write().await.extend(records);
        Ok(inserted)
    }

    async fn delete_many(&self, filter: &RecordFilter) -> Result<usize, StoreError> {
        self.check(&self.fail_deletes, "delete_many")?;
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|r| !filter.matches(r));
        Ok(before - records.len())
    }

    async fn find(
        &self,
        filter: &RecordFilter,
        sort: SortOrder,
    ) -> Result<Vec<ArticleRecord>, StoreError> {
        self.check(&self.unavailable, "find")?;
        let mut found: Vec<ArticleRecord> = self
            .records
            .read()
            .await
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        sort.apply(&mut found);
        Ok(found)
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
