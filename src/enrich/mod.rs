//! Screenshot enrichment.
//!
//! Articles from the target sources get a screenshot of their link,
//! uploaded to the artifact store. Work runs in fixed-size batches: items
//! within a batch run concurrently, batches run one after another, so at
//! most `batch_size` pages are open at once. A failing item only loses its
//! own screenshot.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::join_all;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use crate::artifacts::{ArtifactStore, UploadError};
use crate::browser::{BrowserError, BrowserPage, BrowserSession, ScreenshotSpec};
use crate::config::EnrichmentConfig;
use crate::models::Article;

/// Longest file name stem kept from a title.
const MAX_STEM_LEN: usize = 100;

/// Why an article ended up without a screenshot.
#[derive(Debug, Error)]
pub enum EnrichmentItemError {
    #[error("Failed to open page: {0}")]
    Page(#[source] BrowserError),

    #[error("Screenshot failed: {0}")]
    Screenshot(#[source] BrowserError),

    #[error(transparent)]
    Upload(#[from] UploadError),
}

/// Result for one article.
#[derive(Debug)]
pub struct ItemOutcome {
    /// Position in the run's flattened article list
    pub index: usize,
    pub result: Result<Url, EnrichmentItemError>,
}

/// Counters for one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub batch: usize,
    pub size: usize,
    pub captured: usize,
    pub failed: usize,
}

/// Result of enriching a run's articles.
#[derive(Debug)]
pub struct EnrichmentReport {
    /// Input articles, in input order, with references filled in
    pub articles: Vec<Article>,
    pub eligible: usize,
    /// Articles outside the target sources
    pub skipped: usize,
    pub captured: usize,
    pub failed: usize,
    pub batches: Vec<BatchOutcome>,
}

/// Screenshot file name for an article: non `[A-Za-z0-9_-]` characters of
/// the title become `_`, the stem is cut to 100 characters, and the
/// article's overall index keeps names unique.
pub fn screenshot_file_name(title: &str, index: usize) -> String {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    let unsafe_chars = UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9_\-]").unwrap());

    let sanitized = unsafe_chars.replace_all(title, "_");
    let stem: String = sanitized.chars().take(MAX_STEM_LEN).collect();
    format!("{}_{}.jpg", stem, index)
}

/// Runs screenshot capture over a run's articles.
pub struct EnrichmentScheduler {
    targets: HashSet<String>,
    batch_size: usize,
    navigation_timeout: Duration,
    screenshot: ScreenshotSpec,
    artifacts: Arc<dyn ArtifactStore>,
    tag: String,
}

impl EnrichmentScheduler {
    pub fn new(config: &EnrichmentConfig, artifacts: Arc<dyn ArtifactStore>, tag: impl Into<String>) -> Self {
        Self {
            targets: config.target_sources.iter().cloned().collect(),
            batch_size: config.batch_size.max(1),
            navigation_timeout: config.navigation_timeout(),
            screenshot: ScreenshotSpec {
                quality: config.jpeg_quality,
                full_page: false,
            },
            artifacts,
            tag: tag.into(),
        }
    }

    pub fn is_target(&self, article: &Article) -> bool {
        self.targets.contains(&article.source_name)
    }

    /// Capture screenshots for every target-source article.
    ///
    /// Never fails: articles whose capture or upload failed keep no
    /// reference, and so does every article outside the target sources.
    pub async fn enrich(&self, session: &dyn BrowserSession, mut articles: Vec<Article>) -> EnrichmentReport {
        for article in articles.iter_mut() {
            article.screenshot_ref = None;
        }

        let eligible: Vec<usize> = articles
            .iter()
            .enumerate()
            .filter(|(_, a)| self.is_target(a))
            .map(|(i, _)| i)
            .collect();

        let total_batches = eligible.len().div_ceil(self.batch_size);
        info!(
            articles = articles.len(),
            eligible = eligible.len(),
            batches = total_batches,
            batch_size = self.batch_size,
            "Starting screenshot enrichment"
        );

        let mut report = EnrichmentReport {
            articles: Vec::new(),
            eligible: eligible.len(),
            skipped: articles.len() - eligible.len(),
            captured: 0,
            failed: 0,
            batches: Vec::with_capacity(total_batches),
        };

        for (batch_index, chunk) in eligible.chunks(self.batch_size).enumerate() {
            let batch = batch_index + 1;
            info!(batch, of = total_batches, size = chunk.len(), "Batch started");

            let work = chunk
                .iter()
                .map(|&index| self.enrich_item(session, index, &articles[index]));
            let outcomes = join_all(work).await;

            let mut outcome = BatchOutcome {
                batch,
                size: chunk.len(),
                captured: 0,
                failed: 0,
            };
            for item in outcomes {
                match item.result {
                    Ok(url) => {
                        articles[item.index].screenshot_ref = Some(url);
                        outcome.captured += 1;
                    }
                    Err(e) => {
                        warn!(
                            index = item.index,
                            link = %articles[item.index].link,
                            "No screenshot: {}",
                            e
                        );
                        outcome.failed += 1;
                    }
                }
            }

            info!(
                batch,
                of = total_batches,
                captured = outcome.captured,
                failed = outcome.failed,
                "Batch finished"
            );
            report.captured += outcome.captured;
            report.failed += outcome.failed;
            report.batches.push(outcome);
        }

        info!(
            eligible = report.eligible,
            captured = report.captured,
            failed = report.failed,
            "Screenshot enrichment finished"
        );
        report.articles = articles;
        report
    }

    async fn enrich_item(&self, session: &dyn BrowserSession, index: usize, article: &Article) -> ItemOutcome {
        let page = match session.new_page().await {
            Ok(page) => page,
            Err(e) => {
                return ItemOutcome {
                    index,
                    result: Err(EnrichmentItemError::Page(e)),
                }
            }
        };

        let result = self.capture_and_upload(page.as_ref(), index, article).await;

        if let Err(e) = page.close().await {
            warn!(index, "Failed to close page: {}", e);
        }

        ItemOutcome { index, result }
    }

    async fn capture_and_upload(
        &self,
        page: &dyn BrowserPage,
        index: usize,
        article: &Article,
    ) -> Result<Url, EnrichmentItemError> {
        // Whatever rendered (including an error page) is still captured.
        if let Err(e) = page.goto(&article.link, self.navigation_timeout).await {
            warn!(index, link = %article.link, "Navigation incomplete: {}", e);
        }

        let bytes = page
            .screenshot(&self.screenshot)
            .await
            .map_err(EnrichmentItemError::Screenshot)?;

        let name = screenshot_file_name(&article.title, index);
        let url = self.artifacts.upload(bytes, &name, &self.tag).await?;

        debug!(index, name = %name, url = %url, "Captured screenshot");
        Ok(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{ArtifactError, ArtifactRecord, LocalArtifactStore};
    use crate::browser::{MockBrowser, PageScript};
    use async_trait::async_trait;
    use tempfile::TempDir;

    const TAG: &str = "brutalist-screenshots";

    fn article(i: usize, source: &str) -> Article {
        Article::new(
            format!("Story {}", i),
            Url::parse(&format!("https://news.example/{}", i)).unwrap(),
            source,
        )
    }

    fn config(batch_size: usize) -> EnrichmentConfig {
        EnrichmentConfig {
            batch_size,
            navigation_timeout_seconds: 1,
            ..EnrichmentConfig::default()
        }
    }

    fn local_store(dir: &TempDir) -> Arc<dyn ArtifactStore> {
        Arc::new(LocalArtifactStore::open(dir.path(), None).unwrap())
    }

    /// Rejects uploads whose name contains a marker.
    struct RejectingStore {
        inner: Arc<dyn ArtifactStore>,
        marker: &'static str,
    }

    #[async_trait]
    impl ArtifactStore for RejectingStore {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        async fn upload(&self, bytes: Vec<u8>, name: &str, tag: &str) -> Result<Url, UploadError> {
            if name.contains(self.marker) {
                return Err(UploadError::new(
                    name,
                    ArtifactError::HttpStatus {
                        status: 500,
                        message: "rejected".to_string(),
                    },
                ));
            }
            self.inner.upload(bytes, name, tag).await
        }

        async fn list_by_tag(&self, tag: &str) -> Result<Vec<ArtifactRecord>, ArtifactError> {
            self.inner.list_by_tag(tag).await
        }

        async fn delete(&self, file_id: &str) -> Result<(), ArtifactError> {
            self.inner.delete(file_id).await
        }
    }

    #[test]
    fn test_screenshot_file_name() {
        assert_eq!(
            screenshot_file_name("Rust 2.0: what's new?", 7),
            "Rust_2_0__what_s_new__7.jpg"
        );
        assert_eq!(screenshot_file_name("keep-dashes_and_underscores", 0), "keep-dashes_and_underscores_0.jpg");
        assert_eq!(screenshot_file_name("日本語", 1), "____1.jpg");

        let long = "x".repeat(250);
        let name = screenshot_file_name(&long, 12);
        assert_eq!(name, format!("{}_12.jpg", "x".repeat(100)));
    }

    #[tokio::test]
    async fn test_only_target_sources_get_screenshots() {
        let dir = TempDir::new().unwrap();
        let browser = MockBrowser::new();
        let scheduler = EnrichmentScheduler::new(&config(10), local_store(&dir), TAG);

        let mut wired = article(2, "Wired");
        wired.screenshot_ref = Some(Url::parse("https://stale.example/x.jpg").unwrap());
        let articles = vec![article(0, "Hacker News"), article(1, "Hacker News"), wired];

        let report = scheduler.enrich(&browser, articles).await;

        assert_eq!(report.eligible, 2);
        assert_eq!(report.skipped, 1);
        assert_eq!(report.captured, 2);
        assert!(report.articles[0].screenshot_ref.is_some());
        assert!(report.articles[1].screenshot_ref.is_some());
        assert!(report.articles[2].screenshot_ref.is_none());
        assert_eq!(browser.screenshots_taken(), 2);
    }

    #[tokio::test]
    async fn test_failures_are_isolated() {
        let dir = TempDir::new().unwrap();
        let browser = MockBrowser::new()
            .with_page("https://news.example/1", PageScript::screenshot_fails())
            .with_page("https://news.example/3", PageScript::failing("net::ERR_CONNECTION_REFUSED"));
        let store: Arc<dyn ArtifactStore> = Arc::new(RejectingStore {
            inner: local_store(&dir),
            marker: "Story_4",
        });
        let scheduler = EnrichmentScheduler::new(&config(10), store, TAG);

        let articles: Vec<Article> = (0..6).map(|i| article(i, "Hacker News")).collect();
        let report = scheduler.enrich(&browser, articles).await;

        let captured: Vec<bool> = report
            .articles
            .iter()
            .map(|a| a.screenshot_ref.is_some())
            .collect();
        // Navigation failures still capture the error page.
        assert_eq!(captured, vec![true, false, true, true, false, true]);
        assert_eq!((report.captured, report.failed), (4, 2));
        assert_eq!(report.articles.len(), 6);
    }

    #[tokio::test]
    async fn test_navigation_timeout_still_captures() {
        let dir = TempDir::new().unwrap();
        let browser = MockBrowser::new().with_page("https://news.example/0", PageScript::hanging());
        let mut config = config(10);
        config.navigation_timeout_seconds = 0;
        let scheduler = EnrichmentScheduler::new(&config, local_store(&dir), TAG);

        let report = scheduler
            .enrich(&browser, vec![article(0, "Hacker News")])
            .await;

        assert_eq!(report.captured, 1);
    }

    #[tokio::test]
    async fn test_concurrency_bounded_by_batch_size() {
        let dir = TempDir::new().unwrap();
        let browser = MockBrowser::new().with_navigation_delay(Duration::from_millis(20));
        let scheduler = EnrichmentScheduler::new(&config(4), local_store(&dir), TAG);

        let articles: Vec<Article> = (0..10).map(|i| article(i, "Hacker News")).collect();
        let report = scheduler.enrich(&browser, articles).await;

        assert!(browser.peak_open_pages() <= 4);
        assert!(browser.peak_open_pages() >= 2);
        let sizes: Vec<usize> = report.batches.iter().map(|b| b.size).collect();
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(report.captured, 10);
    }

    #[tokio::test]
    async fn test_every_page_is_closed() {
        let dir = TempDir::new().unwrap();
        let browser = MockBrowser::new()
            .with_page("https://news.example/0", PageScript::screenshot_fails())
            .with_page("https://news.example/1", PageScript::hanging());
        let mut config = config(2);
        config.navigation_timeout_seconds = 0;
        let scheduler = EnrichmentScheduler::new(&config, local_store(&dir), TAG);

        let articles: Vec<Article> = (0..5).map(|i| article(i, "Hacker News")).collect();
        scheduler.enrich(&browser, articles).await;

        assert_eq!(browser.pages_opened(), 5);
        assert_eq!(browser.pages_closed(), 5);
    }

    #[tokio::test]
    async fn test_page_open_failure_counts_as_item_failure() {
        let dir = TempDir::new().unwrap();
        let browser = MockBrowser::new();
        browser.fail_new_page(true);
        let scheduler = EnrichmentScheduler::new(&config(10), local_store(&dir), TAG);

        let report = scheduler
            .enrich(&browser, vec![article(0, "Hacker News"), article(1, "Wired")])
            .await;

        assert_eq!((report.captured, report.failed), (0, 1));
        assert!(report.articles.iter().all(|a| a.screenshot_ref.is_none()));
    }

    #[tokio::test]
    async fn test_no_eligible_articles() {
        let dir = TempDir::new().unwrap();
        let browser = MockBrowser::new();
        let scheduler = EnrichmentScheduler::new(&config(10), local_store(&dir), TAG);

        let report = scheduler.enrich(&browser, vec![article(0, "Wired")]).await;

        assert!(report.batches.is_empty());
        assert_eq!(browser.pages_opened(), 0);
    }
}
