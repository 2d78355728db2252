//! Last-known-good snapshot of the grouped article view.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

use crate::models::GroupedArticles;
use crate::storage::{write_json_atomic, StorageError};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Snapshot is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// A single JSON document holding the last successfully served view.
///
/// Writes carry a version; the lock holds the last version written so a
/// write that lost the race to a newer one is dropped.
#[derive(Debug)]
pub struct CacheSnapshot {
    path: PathBuf,
    written: Mutex<u64>,
}

impl CacheSnapshot {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            written: Mutex::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot; `None` when none has been written yet.
    pub async fn load(&self) -> Result<Option<GroupedArticles>, CacheError> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let grouped: GroupedArticles = serde_json::from_str(&contents)?;
        Ok(Some(grouped))
    }

    /// Replace the snapshot unless a newer `version` is already on disk.
    /// Readers see the old or the new document. Returns whether it wrote.
    pub async fn save(&self, grouped: &GroupedArticles, version: u64) -> Result<bool, CacheError> {
        let mut written = self.written.lock().await;
        if version <= *written {
            debug!(version, latest = *written, "Skipping stale snapshot write");
            return Ok(false);
        }
        write_json_atomic(&self.path, grouped)?;
        *written = version;
        debug!(
            path = ?self.path,
            version,
            sources = grouped.len(),
            articles = grouped.total_items(),
            "Saved article snapshot"
        );
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ArticleEntry;
    use chrono::Utc;
    use tempfile::TempDir;
    use url::Url;

    fn grouped() -> GroupedArticles {
        grouped_with("Story")
    }

    fn grouped_with(title: &str) -> GroupedArticles {
        let mut grouped = GroupedArticles::new();
        grouped.push(
            "Hacker News",
            ArticleEntry {
                title: title.to_string(),
                link: Url::parse("https://news.example/1").unwrap(),
                screenshot_ref: None,
                scraped_at: Utc::now(),
            },
        );
        grouped
    }

    #[tokio::test]
    async fn test_load_missing_is_none() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheSnapshot::new(temp_dir.path().join("cache/snap.json"));

        assert!(cache.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_save_then_load() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheSnapshot::new(temp_dir.path().join("cache/snap.json"));

        assert!(cache.save(&grouped(), 1).await.unwrap());
        let loaded = cache.load().await.unwrap().unwrap();

        assert_eq!(loaded.sources().collect::<Vec<_>>(), vec!["Hacker News"]);
        assert_eq!(loaded.get("Hacker News").unwrap()[0].title, "Story");
    }

    #[tokio::test]
    async fn test_older_version_does_not_overwrite_newer() {
        let temp_dir = TempDir::new().unwrap();
        let cache = CacheSnapshot::new(temp_dir.path().join("snap.json"));

        assert!(cache.save(&grouped_with("Newer"), 2).await.unwrap());
        assert!(!cache.save(&grouped_with("Older"), 1).await.unwrap());
        assert!(!cache.save(&grouped_with("Repeat"), 2).await.unwrap());

        let loaded = cache.load().await.unwrap().unwrap();
        assert_eq!(loaded.get("Hacker News").unwrap()[0].title, "Newer");
    }

    #[tokio::test]
    async fn test_corrupt_snapshot_is_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("snap.json");
        std::fs::write(&path, "{not json").unwrap();

        let cache = CacheSnapshot::new(path);
        assert!(matches!(cache.load().await, Err(CacheError::Json(_))));
    }
}
