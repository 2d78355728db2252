//! Generation replacement.
//!
//! A run's articles replace the previous generation wholesale. Readers only
//! ever look at the newest generation in the store, so writing the new
//! generation in one bulk insert and only then clearing older ones keeps
//! the swap atomic from their point of view.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use super::{ArticleStore, RecordFilter, StoreError};
use crate::models::{Article, ArticleRecord, Generation};

/// How the previous generation is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ReplaceStrategy {
    /// Insert the new generation, then delete older ones. Readers see the
    /// old or the new generation in full.
    #[default]
    WriteThenClear,
    /// Delete everything, then insert. Readers may briefly see an empty
    /// store.
    ClearThenWrite,
}

impl fmt::Display for ReplaceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplaceStrategy::WriteThenClear => write!(f, "write-then-clear"),
            ReplaceStrategy::ClearThenWrite => write!(f, "clear-then-write"),
        }
    }
}

impl FromStr for ReplaceStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "write-then-clear" => Ok(ReplaceStrategy::WriteThenClear),
            "clear-then-write" => Ok(ReplaceStrategy::ClearThenWrite),
            other => Err(format!(
                "unknown strategy '{}' (expected write-then-clear or clear-then-write)",
                other
            )),
        }
    }
}

/// Failure to durably replace the stored generation.
#[derive(Debug, Error)]
pub enum StoreWriteError {
    #[error("Failed to insert generation {generation}: {source}")]
    Insert {
        generation: Generation,
        #[source]
        source: StoreError,
    },

    #[error("Failed to clear records older than generation {generation}: {source}")]
    Cleanup {
        generation: Generation,
        #[source]
        source: StoreError,
    },

    #[error("Failed to clear the store before writing generation {generation}: {source}")]
    Clear {
        generation: Generation,
        #[source]
        source: StoreError,
    },
}

/// Outcome of a replacement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceReport {
    pub strategy: ReplaceStrategy,
    pub generation: Generation,
    pub inserted: usize,
    pub removed: usize,
}

/// Writes a run's articles as the new generation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DatasetReplacer {
    strategy: ReplaceStrategy,
}

impl DatasetReplacer {
    pub fn new(strategy: ReplaceStrategy) -> Self {
        Self { strategy }
    }

    /// Replace the stored generation with `articles`.
    ///
    /// An empty article list leaves the store untouched.
    pub async fn replace(
        &self,
        store: &dyn ArticleStore,
        articles: Vec<Article>,
        generation: Generation,
    ) -> Result<ReplaceReport, StoreWriteError> {
        let mut report = ReplaceReport {
            strategy: self.strategy,
            generation,
            inserted: 0,
            removed: 0,
        };

        if articles.is_empty() {
            warn!(%generation, "No articles to write; keeping previous generation");
            return Ok(report);
        }

        let records: Vec<ArticleRecord> = articles
            .into_iter()
            .map(|article| ArticleRecord::new(article, generation))
            .collect();

        match self.strategy {
            ReplaceStrategy::WriteThenClear => {
                report.inserted = store
                    .insert_many(records)
                    .await
                    .map_err(|source| StoreWriteError::Insert { generation, source })?;

                report.removed = store
                    .delete_many(&RecordFilter::GenerationBefore(generation))
                    .await
                    .map_err(|source| StoreWriteError::Cleanup { generation, source })?;
            }
            ReplaceStrategy::ClearThenWrite => {
                report.removed = store
                    .delete_many(&RecordFilter::All)
                    .await
                    .map_err(|source| StoreWriteError::Clear { generation, source })?;

                report.inserted = store
                    .insert_many(records)
                    .await
                    .map_err(|source| StoreWriteError::Insert { generation, source })?;
            }
        }

        info!(
            store = store.name(),
            strategy = %self.strategy,
            %generation,
            inserted = report.inserted,
            removed = report.removed,
            "Replaced article generation"
        );
        Ok(report)
    }
}
