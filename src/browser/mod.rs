//! Headless browser abstraction.
//!
//! A run owns one `BrowserSession` (an isolated browsing context) for its
//! whole lifetime. Work items open their own `BrowserPage` on that session
//! and must close it on every path; the session itself is closed by the
//! pipeline once the run ends.

pub mod chromium;
#[cfg(test)]
pub mod mock;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

pub use chromium::ChromiumLauncher;
#[cfg(test)]
pub use mock::{MockBrowser, NavigationScript, PageScript};

use crate::config::{EnrichmentConfig, HarvesterConfig};

/// Errors raised by the browser layer.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Failed to launch browser: {0}")]
    Launch(String),

    #[error("Failed to open page: {0}")]
    Page(String),

    #[error("Navigation to {url} failed: {message}")]
    Navigation { url: String, message: String },

    #[error("Navigation to {url} timed out after {seconds}s")]
    Timeout { url: String, seconds: u64 },

    #[error("Timed out after {seconds}s waiting for '{selector}'")]
    SelectorTimeout { selector: String, seconds: u64 },

    #[error("Screenshot failed: {0}")]
    Screenshot(String),

    #[error("Browser protocol error: {0}")]
    Protocol(String),
}

/// Raster capture settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenshotSpec {
    /// JPEG quality (1-100)
    pub quality: u8,
    /// Capture beyond the viewport
    pub full_page: bool,
}

impl Default for ScreenshotSpec {
    fn default() -> Self {
        Self {
            quality: 70,
            full_page: false,
        }
    }
}

/// Options for launching a browsing context.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub user_agent: String,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub headless: bool,
    pub executable: Option<std::path::PathBuf>,
}

impl SessionOptions {
    pub fn from_config(harvester: &HarvesterConfig, enrichment: &EnrichmentConfig) -> Self {
        Self {
            user_agent: harvester.user_agent.clone(),
            viewport_width: enrichment.viewport_width,
            viewport_height: enrichment.viewport_height,
            headless: harvester.headless,
            executable: harvester.chrome_executable.clone(),
        }
    }
}

/// A single tab.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Navigate and wait for the page to settle, bounded by `timeout`.
    async fn goto(&self, url: &Url, timeout: Duration) -> Result<(), BrowserError>;

    /// Poll until `selector` matches or `timeout` elapses.
    async fn wait_for_selector(&self, selector: &str, timeout: Duration)
        -> Result<(), BrowserError>;

    /// Serialized DOM of the current document.
    async fn content(&self) -> Result<String, BrowserError>;

    /// Capture the current rendered state.
    async fn screenshot(&self, spec: &ScreenshotSpec) -> Result<Vec<u8>, BrowserError>;

    /// Release the tab.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// An isolated browsing context shared by the pages of one run.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;

    /// Shut the context down. Pages still open are discarded.
    async fn close(&self) -> Result<(), BrowserError>;
}

/// Starts browsing contexts; one per pipeline run.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_screenshot_spec_default() {
        let spec = ScreenshotSpec::default();
        assert_eq!(spec.quality, 70);
        assert!(!spec.full_page);
    }

    #[test]
    fn test_session_options_from_config() {
        let harvester = HarvesterConfig::default();
        let mut enrichment = EnrichmentConfig::default();
        enrichment.viewport_width = 1024;

        let options = SessionOptions::from_config(&harvester, &enrichment);
        assert_eq!(options.viewport_width, 1024);
        assert_eq!(options.viewport_height, 600);
        assert!(options.headless);
        assert!(options.user_agent.contains("Mozilla"));
    }

    #[test]
    fn test_browser_error_display() {
        let err = BrowserError::Timeout {
            url: "https://example.com".to_string(),
            seconds: 10,
        };
        assert_eq!(
            err.to_string(),
            "Navigation to https://example.com timed out after 10s"
        );
    }
}
