//! Pipeline orchestrator.
//!
//! One run:
//! 1. Open the article store
//! 2. Launch a browsing context
//! 3. Harvest the aggregator page
//! 4. Purge the previous run's screenshots
//! 5. Capture and upload screenshots for target sources
//! 6. Replace the stored generation
//!
//! The browsing context and the store connection are closed whatever
//! happens in between.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{Notify, RwLock};
use tokio::time::interval;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::artifacts::{purge_tagged, ArtifactStore};
use crate::browser::{BrowserError, BrowserLauncher, BrowserSession};
use crate::config::{AppConfig, EnrichmentConfig, HarvesterConfig};
use crate::enrich::EnrichmentScheduler;
use crate::harvest::{HarvestError, Harvester};
use crate::models::Generation;
use crate::storage::{
    latest_generation, ArticleStore, DatasetReplacer, JsonlArticleStore, RecordFilter,
    ReplaceReport, ReplaceStrategy, SortOrder, StoreError, StoreWriteError,
};

/// Errors that abort a run.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Harvest failed: {0}")]
    Harvest(#[from] HarvestError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),

    #[error("Failed to open article store: {0}")]
    StoreOpen(#[from] StoreError),

    #[error("Failed to write articles: {0}")]
    StoreWrite(#[from] StoreWriteError),

    #[error("A run is already in progress")]
    AlreadyRunning,

    #[error("Run cancelled")]
    Cancelled,
}

/// Opens a store connection for one run.
#[async_trait]
pub trait StoreConnector: Send + Sync {
    async fn connect(&self) -> Result<Arc<dyn ArticleStore>, StoreError>;
}

/// Connects to the JSONL collection at a fixed path.
#[derive(Debug, Clone)]
pub struct JsonlConnector {
    path: std::path::PathBuf,
}

impl JsonlConnector {
    pub fn new(path: impl Into<std::path::PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl StoreConnector for JsonlConnector {
    async fn connect(&self) -> Result<Arc<dyn ArticleStore>, StoreError> {
        Ok(Arc::new(JsonlArticleStore::open(&self.path)?))
    }
}

/// Configuration for pipeline runs.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub harvester: HarvesterConfig,
    pub enrichment: EnrichmentConfig,

    /// Tag shared by every screenshot of a run
    pub artifact_tag: String,

    pub strategy: ReplaceStrategy,

    /// Interval for periodic runs
    pub interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::from_app(&AppConfig::default())
    }
}

impl PipelineConfig {
    pub fn from_app(config: &AppConfig) -> Self {
        Self {
            harvester: config.harvester.clone(),
            enrichment: config.enrichment.clone(),
            artifact_tag: config.artifacts.tag.clone(),
            strategy: config.store.strategy,
            interval: Duration::from_secs(6 * 3600), // 6 hours
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    #[default]
    Idle,
    Running,
    Completed,
    Failed,
}

/// State of the orchestrator across runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunState {
    pub last_run_started: Option<DateTime<Utc>>,
    pub last_run_completed: Option<DateTime<Utc>>,
    pub last_run_status: RunStatus,

    /// Articles written by the last successful run
    pub articles_written: usize,

    /// Screenshots captured by the last successful run
    pub screenshots_captured: usize,

    pub errors: Vec<String>,
}

/// Counters from the enrichment stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub eligible: usize,
    pub skipped: usize,
    pub captured: usize,
    pub failed: usize,
    pub batches: usize,
}

/// Counters from the purge stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgeSummary {
    pub found: usize,
    pub deleted: usize,
    pub failed: usize,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub generation: Generation,
    /// Articles per source, in page order
    pub sources: Vec<(String, usize)>,
    pub articles: usize,
    pub purge: PurgeSummary,
    pub enrichment: EnrichmentSummary,
    pub replace: ReplaceReport,
    pub duration: Duration,
}

/// Runs the harvest → enrich → replace pipeline.
pub struct PipelineRunner {
    config: PipelineConfig,
    launcher: Arc<dyn BrowserLauncher>,
    connector: Arc<dyn StoreConnector>,
    artifacts: Arc<dyn ArtifactStore>,
    harvester: Harvester,
    scheduler: EnrichmentScheduler,
    replacer: DatasetReplacer,
    state: Arc<RwLock<RunState>>,
    cancel_token: Arc<RwLock<bool>>,
    cancel_notify: Notify,
}

impl PipelineRunner {
    pub fn new(
        config: PipelineConfig,
        launcher: Arc<dyn BrowserLauncher>,
        connector: Arc<dyn StoreConnector>,
        artifacts: Arc<dyn ArtifactStore>,
    ) -> Self {
        let harvester = Harvester::new(config.harvester.clone());
        let scheduler =
            EnrichmentScheduler::new(&config.enrichment, Arc::clone(&artifacts), config.artifact_tag.clone());
        let replacer = DatasetReplacer::new(config.strategy);

        Self {
            config,
            launcher,
            connector,
            artifacts,
            harvester,
            scheduler,
            replacer,
            state: Arc::new(RwLock::new(RunState::default())),
            cancel_token: Arc::new(RwLock::new(false)),
            cancel_notify: Notify::new(),
        }
    }

    /// Get current run state.
    pub async fn state(&self) -> RunState {
        self.state.read().await.clone()
    }

    pub async fn is_running(&self) -> bool {
        self.state.read().await.last_run_status == RunStatus::Running
    }

    /// Stop the periodic loop. A loop waiting for its next tick wakes up
    /// and returns; a run in progress stops before it touches artifacts or
    /// the store. Later runs are refused until `run_periodic` starts again.
    pub async fn cancel(&self) {
        *self.cancel_token.write().await = true;
        self.cancel_notify.notify_one();
    }

    /// Run the pipeline once.
    pub async fn run_once(&self) -> Result<RunReport, PipelineError> {
        {
            let mut state = self.state.write().await;
            if state.last_run_status == RunStatus::Running {
                return Err(PipelineError::AlreadyRunning);
            }
            state.last_run_started = Some(Utc::now());
            state.last_run_status = RunStatus::Running;
            state.errors.clear();
        }

        let result = self.execute().await;

        {
            let mut state = self.state.write().await;
            state.last_run_completed = Some(Utc::now());
            match &result {
                Ok(report) => {
                    state.last_run_status = RunStatus::Completed;
                    state.articles_written = report.replace.inserted;
                    state.screenshots_captured = report.enrichment.captured;
                }
                Err(e) => {
                    state.last_run_status = RunStatus::Failed;
                    state.errors.push(e.to_string());
                }
            }
        }

        result
    }

    /// Manual run; refuses while another is in progress.
    pub async fn trigger(&self) -> Result<RunReport, PipelineError> {
        if self.is_running().await {
            warn!("Run already in progress");
            return Err(PipelineError::AlreadyRunning);
        }
        self.run_once().await
    }

    /// Run in a loop every `interval` until cancelled.
    pub async fn run_periodic(self: Arc<Self>) {
        *self.cancel_token.write().await = false;
        let mut ticker = interval(self.config.interval);
        info!("Starting periodic runs every {:?}", self.config.interval);

        loop {
            let woken = tokio::select! {
                _ = ticker.tick() => false,
                _ = self.cancel_notify.notified() => true,
            };

            if *self.cancel_token.read().await {
                info!("Periodic runs stopped");
                break;
            }
            if woken {
                // Permit left over from a cancel before this loop started.
                continue;
            }

            match self.run_once().await {
                Ok(report) => {
                    info!(
                        "Periodic run completed: {} articles, {} screenshots",
                        report.articles, report.enrichment.captured
                    );
                }
                Err(PipelineError::Cancelled) => {
                    info!("Periodic run cancelled");
                    break;
                }
                Err(e) => {
                    error!("Periodic run failed: {}", e);
                }
            }
        }
    }

    async fn execute(&self) -> Result<RunReport, PipelineError> {
        let run_id = Uuid::new_v4();
        let start = Instant::now();
        info!(%run_id, "Starting pipeline run");

        let store = self.connector.connect().await?;

        let outcome = self.run_with_store(run_id, store.as_ref()).await;

        if let Err(e) = store.close().await {
            warn!(%run_id, "Failed to close article store: {}", e);
        }

        let mut report = match outcome {
            Ok(report) => report,
            Err(e) => {
                error!(%run_id, "Pipeline run failed: {}", e);
                return Err(e);
            }
        };
        report.duration = start.elapsed();

        info!(
            %run_id,
            generation = %report.generation,
            articles = report.articles,
            screenshots = report.enrichment.captured,
            removed = report.replace.removed,
            duration_ms = report.duration.as_millis() as u64,
            "Pipeline run completed"
        );
        Ok(report)
    }

    async fn run_with_store(&self, run_id: Uuid, store: &dyn ArticleStore) -> Result<RunReport, PipelineError> {
        let previous = match store.find(&RecordFilter::All, SortOrder::Insertion).await {
            Ok(records) => latest_generation(&records),
            Err(e) => {
                warn!(%run_id, "Could not read previous generation: {}", e);
                None
            }
        };
        let generation = Generation::after(previous);

        let session = self.launcher.launch().await?;

        let outcome = self.run_with_session(run_id, session.as_ref(), store, generation).await;

        if let Err(e) = session.close().await {
            warn!(%run_id, "Failed to close browser: {}", e);
        }

        outcome
    }

    async fn run_with_session(
        &self,
        run_id: Uuid,
        session: &dyn BrowserSession,
        store: &dyn ArticleStore,
        generation: Generation,
    ) -> Result<RunReport, PipelineError> {
        let group = self.harvester.harvest(session).await?;

        let sources: Vec<(String, usize)> = group
            .iter()
            .map(|(name, articles)| (name.to_string(), articles.len()))
            .collect();
        let articles: Vec<_> = group.flatten().into_iter().filter(|a| a.is_valid()).collect();
        let article_count = articles.len();

        if *self.cancel_token.read().await {
            return Err(PipelineError::Cancelled);
        }

        // Screenshots referenced by the kept generation must survive.
        if articles.is_empty() {
            warn!(%run_id, "Harvest yielded no articles; keeping previous generation and screenshots");
            let replace = self.replacer.replace(store, articles, generation).await?;
            return Ok(RunReport {
                run_id,
                generation,
                sources,
                articles: 0,
                purge: PurgeSummary::default(),
                enrichment: EnrichmentSummary::default(),
                replace,
                duration: Duration::ZERO,
            });
        }

        let purge = purge_tagged(self.artifacts.as_ref(), &self.config.artifact_tag).await;
        if !purge.is_clean() {
            warn!(%run_id, failed = purge.errors.len(), "Previous artifacts only partly purged");
        }

        let enrichment = self.scheduler.enrich(session, articles).await;

        let replace = self
            .replacer
            .replace(store, enrichment.articles, generation)
            .await?;

        Ok(RunReport {
            run_id,
            generation,
            sources,
            articles: article_count,
            purge: PurgeSummary {
                found: purge.found,
                deleted: purge.deleted,
                failed: purge.errors.len(),
            },
            enrichment: EnrichmentSummary {
                eligible: enrichment.eligible,
                skipped: enrichment.skipped,
                captured: enrichment.captured,
                failed: enrichment.failed,
                batches: enrichment.batches.len(),
            },
            replace,
            duration: Duration::ZERO,
        })
    }
}
