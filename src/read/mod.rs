//! Read path: the grouped article view with last-known-good fallback.
//!
//! The store is always queried first. A non-empty result is served and,
//! in the background, saved as the snapshot. An empty or failing store
//! falls back to the snapshot, so readers keep getting the last good view
//! while the store is mid-rebuild or down.

mod cache;

pub use cache::{CacheError, CacheSnapshot};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::{ArticleRecord, GroupedArticles};
use crate::storage::{current_generation, ArticleStore, RecordFilter, SortOrder};

/// Neither the store nor the snapshot could serve a view.
#[derive(Debug, Error)]
pub enum UnavailableError {
    #[error("Article store is empty and no cached snapshot exists")]
    StoreEmptyCacheMissing,

    #[error("Article store failed ({store_error}) and no cached snapshot exists")]
    StoreErrorCacheMissing { store_error: String },

    #[error("Cached snapshot is unreadable ({cache_error}) and the store is empty")]
    StoreEmptyCacheCorrupt { cache_error: String },

    #[error("Article store failed ({store_error}) and the cached snapshot is unreadable ({cache_error})")]
    StoreErrorCacheCorrupt {
        store_error: String,
        cache_error: String,
    },
}

/// Where a served view came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadOutcome {
    Store,
    CacheAfterStoreEmpty,
    CacheAfterStoreError,
}

impl ReadOutcome {
    /// Short label for response headers.
    pub fn served_from(&self) -> &'static str {
        match self {
            ReadOutcome::Store => "store",
            ReadOutcome::CacheAfterStoreEmpty | ReadOutcome::CacheAfterStoreError => "cache",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServedArticles {
    pub articles: GroupedArticles,
    pub outcome: ReadOutcome,
}

/// Group records by source, in record order, dropping the source key
/// from each entry.
pub fn group_records(records: Vec<ArticleRecord>) -> GroupedArticles {
    let mut grouped = GroupedArticles::new();
    for record in records {
        let source = record.article.source_name.clone();
        grouped.push(&source, record.article.into_entry());
    }
    grouped
}

pub struct ArticleService {
    store: Arc<dyn ArticleStore>,
    cache: Arc<CacheSnapshot>,
    pending_write: Mutex<Option<JoinHandle<()>>>,
    write_seq: AtomicU64,
}

impl ArticleService {
    pub fn new(store: Arc<dyn ArticleStore>, cache: CacheSnapshot) -> Self {
        Self {
            store,
            cache: Arc::new(cache),
            pending_write: Mutex::new(None),
            write_seq: AtomicU64::new(0),
        }
    }

    /// Serve the current generation grouped by source.
    pub async fn get_articles(&self) -> Result<ServedArticles, UnavailableError> {
        match self.store.find(&RecordFilter::All, SortOrder::Insertion).await {
            Ok(records) if !records.is_empty() => {
                let version = self.write_seq.fetch_add(1, Ordering::SeqCst) + 1;
                let articles = group_records(current_generation(records));
                info!(
                    outcome = "store",
                    sources = articles.len(),
                    articles = articles.total_items(),
                    "Serving articles"
                );
                self.schedule_cache_write(articles.clone(), version).await;
                Ok(ServedArticles {
                    articles,
                    outcome: ReadOutcome::Store,
                })
            }
            Ok(_) => {
                warn!(store = self.store.name(), "Article store is empty; trying snapshot");
                self.from_cache(None).await
            }
            Err(e) => {
                warn!(store = self.store.name(), "Article store failed: {}; trying snapshot", e);
                self.from_cache(Some(e.to_string())).await
            }
        }
    }

    /// Wait for the latest background snapshot write to finish.
    pub async fn flush_cache(&self) {
        let handle = self.pending_write.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                warn!("Snapshot write task failed: {}", e);
            }
        }
    }

    async fn schedule_cache_write(&self, articles: GroupedArticles, version: u64) {
        let cache = Arc::clone(&self.cache);
        let handle = tokio::spawn(async move {
            if let Err(e) = cache.save(&articles, version).await {
                warn!(path = ?cache.path(), "Failed to save article snapshot: {}", e);
            }
        });

        // An older write still in flight keeps running detached; the
        // snapshot drops it if a newer version lands first.
        if self.pending_write.lock().await.replace(handle).is_some() {
            debug!("Superseded a pending snapshot write");
        }
    }

    async fn from_cache(&self, store_error: Option<String>) -> Result<ServedArticles, UnavailableError> {
        let outcome = if store_error.is_some() {
            ReadOutcome::CacheAfterStoreError
        } else {
            ReadOutcome::CacheAfterStoreEmpty
        };

        match self.cache.load().await {
            Ok(Some(articles)) => {
                info!(
                    outcome = outcome.served_from(),
                    sources = articles.len(),
                    articles = articles.total_items(),
                    "Serving articles from snapshot"
                );
                Ok(ServedArticles { articles, outcome })
            }
            Ok(None) => Err(match store_error {
                None => UnavailableError::StoreEmptyCacheMissing,
                Some(store_error) => UnavailableError::StoreErrorCacheMissing { store_error },
            }),
            Err(e) => {
                warn!(path = ?self.cache.path(), "Snapshot unreadable: {}", e);
                let cache_error = e.to_string();
                Err(match store_error {
                    None => UnavailableError::StoreEmptyCacheCorrupt { cache_error },
                    Some(store_error) => UnavailableError::StoreErrorCacheCorrupt {
                        store_error,
                        cache_error,
                    },
                })
            }
        }
    }
}
