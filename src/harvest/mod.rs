//! Aggregator page harvesting.
//!
//! Loads the listing page in the run's browsing context, waits for the
//! article grid to render and hands the DOM to [`extract`].

mod extract;

pub use extract::{extract, UNKNOWN_SOURCE};

use thiserror::Error;
use tracing::{info, warn};

use crate::browser::{BrowserError, BrowserPage, BrowserSession};
use crate::config::HarvesterConfig;
use crate::models::SourceGroup;

/// The listing page could not be loaded.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Timed out after {seconds}s loading {url}")]
    Timeout { url: String, seconds: u64 },

    #[error("Failed to load {url}: {message}")]
    Navigation { url: String, message: String },
}

/// The listing page loaded but did not have the expected shape.
#[derive(Debug, Error)]
pub enum ExtractError {
    #[error("Article container '{selector}' did not appear within {seconds}s")]
    ContainerMissing { selector: String, seconds: u64 },

    #[error("Page has no article grid")]
    SkeletonMissing,

    #[error("Failed to read page content: {0}")]
    Snapshot(String),
}

/// Errors that abort a harvest.
#[derive(Debug, Error)]
pub enum HarvestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Extract(#[from] ExtractError),

    #[error("Browser error: {0}")]
    Browser(#[from] BrowserError),
}

/// Reads the aggregator page into a [`SourceGroup`].
#[derive(Debug, Clone)]
pub struct Harvester {
    config: HarvesterConfig,
}

impl Harvester {
    pub fn new(config: HarvesterConfig) -> Self {
        Self { config }
    }

    /// Harvest using a fresh page of `session`. The page is closed on
    /// every path.
    pub async fn harvest(&self, session: &dyn BrowserSession) -> Result<SourceGroup, HarvestError> {
        let page = session.new_page().await?;
        let result = self.harvest_page(page.as_ref()).await;

        if let Err(e) = page.close().await {
            warn!("Failed to close listing page: {}", e);
        }

        result
    }

    async fn harvest_page(&self, page: &dyn BrowserPage) -> Result<SourceGroup, HarvestError> {
        let url = &self.config.target_url;
        info!(url = %url, "Loading aggregator page");

        page.goto(url, self.config.navigation_timeout())
            .await
            .map_err(|e| match e {
                BrowserError::Timeout { url, seconds } => FetchError::Timeout { url, seconds },
                other => FetchError::Navigation {
                    url: url.to_string(),
                    message: other.to_string(),
                },
            })?;

        page.wait_for_selector(&self.config.container_selector, self.config.container_timeout())
            .await
            .map_err(|e| match e {
                BrowserError::SelectorTimeout { selector, seconds } => {
                    HarvestError::Extract(ExtractError::ContainerMissing { selector, seconds })
                }
                other => HarvestError::Browser(other),
            })?;

        let html = page
            .content()
            .await
            .map_err(|e| ExtractError::Snapshot(e.to_string()))?;

        let group = extract(&html, url)?;

        let per_source: Vec<String> = group
            .iter()
            .map(|(name, articles)| format!("{}={}", name, articles.len()))
            .collect();
        info!(
            sources = group.len(),
            articles = group.total_items(),
            per_source = %per_source.join(", "),
            "Harvested aggregator page"
        );

        Ok(group)
    }
}
