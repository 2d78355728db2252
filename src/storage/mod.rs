//! Filesystem data layout and the persistent article store.
//!
//! Everything the pipeline keeps on local disk lives under one data dir:
//! - `store/articles.jsonl`: the article collection
//! - `cache/last_known_good.json`: the read-path snapshot
//! - `artifacts/`: screenshots for the local artifact backend

mod jsonl;
#[cfg(test)]
mod memory;
mod replace;
mod store;

pub use jsonl::*;
#[cfg(test)]
pub use memory::MemoryArticleStore;
pub use replace::*;
pub use store::*;

use std::path::PathBuf;
use thiserror::Error;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid path: {0}")]
    InvalidPath(String),
}

/// Configuration for storage paths.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
}

impl StorageConfig {
    pub fn new(data_dir: PathBuf) -> Self {
        Self { data_dir }
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.data_dir.join("cache")
    }

    pub fn artifacts_dir(&self) -> PathBuf {
        self.data_dir.join("artifacts")
    }

    pub fn articles_path(&self) -> PathBuf {
        self.store_dir().join("articles.jsonl")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.cache_dir().join("last_known_good.json")
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self::new(PathBuf::from("./data"))
    }
}
