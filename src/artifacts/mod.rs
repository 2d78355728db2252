//! Screenshot artifact storage.
//!
//! Every screenshot of a run is uploaded under one tag. Before a run
//! uploads anything, all artifacts carrying that tag are purged, so after
//! a successful run the store holds that run's screenshots only.

mod imagekit;
mod local;

pub use imagekit::ImageKitStore;
pub use local::LocalArtifactStore;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};
use url::Url;

use crate::config::{AppConfig, ArtifactBackendKind};
use crate::storage::StorageError;

/// Backend failures.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    HttpStatus { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Missing credentials: environment variable {0} is not set")]
    MissingCredentials(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),
}

/// An upload that did not produce a reference.
#[derive(Debug, Error)]
#[error("Failed to upload {name}: {source}")]
pub struct UploadError {
    pub name: String,
    #[source]
    pub source: ArtifactError,
}

impl UploadError {
    pub fn new(name: impl Into<String>, source: impl Into<ArtifactError>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }
}

/// A failure while clearing the previous run's artifacts.
#[derive(Debug, Error)]
pub enum PurgeError {
    #[error("Failed to list artifacts tagged '{tag}': {source}")]
    List {
        tag: String,
        #[source]
        source: ArtifactError,
    },

    #[error("Failed to delete artifact {file_id}: {source}")]
    Delete {
        file_id: String,
        #[source]
        source: ArtifactError,
    },
}

/// A stored artifact as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactRecord {
    pub file_id: String,
    pub name: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub url: Option<Url>,
}

impl ArtifactRecord {
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }
}

/// Where screenshots go.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Backend name for logging.
    fn name(&self) -> &'static str;

    /// Store `bytes` under `name` with `tag`, returning a fetchable reference.
    async fn upload(&self, bytes: Vec<u8>, name: &str, tag: &str) -> Result<Url, UploadError>;

    async fn list_by_tag(&self, tag: &str) -> Result<Vec<ArtifactRecord>, ArtifactError>;

    async fn delete(&self, file_id: &str) -> Result<(), ArtifactError>;
}

/// Outcome of a purge. Failures are collected, never raised.
#[derive(Debug, Default)]
pub struct PurgeReport {
    pub found: usize,
    pub deleted: usize,
    pub errors: Vec<PurgeError>,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Delete every artifact carrying `tag`.
///
/// A listing failure or individual delete failures are logged and
/// reported; the caller decides whether to carry on.
pub async fn purge_tagged(store: &dyn ArtifactStore, tag: &str) -> PurgeReport {
    let mut report = PurgeReport::default();

    let records = match store.list_by_tag(tag).await {
        Ok(records) => records,
        Err(source) => {
            warn!(backend = store.name(), tag, "Failed to list artifacts: {}", source);
            report.errors.push(PurgeError::List {
                tag: tag.to_string(),
                source,
            });
            return report;
        }
    };

    report.found = records.len();
    for record in records {
        match store.delete(&record.file_id).await {
            Ok(()) => report.deleted += 1,
            Err(source) => {
                warn!(
                    backend = store.name(),
                    file_id = %record.file_id,
                    "Failed to delete artifact: {}",
                    source
                );
                report.errors.push(PurgeError::Delete {
                    file_id: record.file_id,
                    source,
                });
            }
        }
    }

    info!(
        backend = store.name(),
        tag,
        found = report.found,
        deleted = report.deleted,
        failed = report.errors.len(),
        "Purged previous artifacts"
    );
    report
}

/// Build the configured backend.
pub fn from_config(config: &AppConfig) -> Result<Arc<dyn ArtifactStore>, ArtifactError> {
    match config.artifacts.backend {
        ArtifactBackendKind::Local => Ok(Arc::new(LocalArtifactStore::open(
            config.artifacts_dir(),
            config.artifacts.public_base_url.clone(),
        )?)),
        ArtifactBackendKind::ImageKit => Ok(Arc::new(ImageKitStore::from_env(
            config.artifacts.imagekit.clone(),
        )?)),
    }
}
