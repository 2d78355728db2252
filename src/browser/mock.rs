//! Scripted in-process browser.
//!
//! Pages are keyed by URL and report canned HTML, navigation outcomes and
//! screenshot failures, while counters expose how many pages were opened,
//! closed and alive at once.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use super::{BrowserError, BrowserLauncher, BrowserPage, BrowserSession, ScreenshotSpec};

/// How navigation to a scripted URL behaves.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum NavigationScript {
    #[default]
    Succeed,
    /// Fail immediately with the given message
    Fail(String),
    /// Never finish; the caller's timeout fires
    Hang,
}

/// Canned behavior for one URL.
#[derive(Debug, Clone, Default)]
pub struct PageScript {
    pub html: Option<String>,
    pub navigation: NavigationScript,
    /// Whether `wait_for_selector` succeeds on this page
    pub container_ready: bool,
    pub fail_screenshot: bool,
}

impl PageScript {
    /// A fully rendered page with the given markup.
    pub fn rendered(html: impl Into<String>) -> Self {
        Self {
            html: Some(html.into()),
            container_ready: true,
            ..Self::default()
        }
    }

    pub fn hanging() -> Self {
        Self {
            navigation: NavigationScript::Hang,
            ..Self::default()
        }
    }

    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            navigation: NavigationScript::Fail(message.into()),
            ..Self::default()
        }
    }

    pub fn screenshot_fails() -> Self {
        Self {
            fail_screenshot: true,
            ..Self::default()
        }
    }
}

#[derive(Default)]
struct MockState {
    scripts: Mutex<HashMap<String, PageScript>>,
    navigation_delay: Mutex<Duration>,
    fail_launch: AtomicBool,
    fail_new_page: AtomicBool,
    sessions_launched: AtomicUsize,
    sessions_closed: AtomicUsize,
    pages_opened: AtomicUsize,
    pages_closed: AtomicUsize,
    open_pages: AtomicUsize,
    peak_open_pages: AtomicUsize,
    screenshots: AtomicUsize,
}

impl MockState {
    fn script_for(&self, url: &str) -> PageScript {
        self.scripts
            .lock()
            .map(|scripts| scripts.get(url).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    fn navigation_delay(&self) -> Duration {
        self.navigation_delay
            .lock()
            .map(|d| *d)
            .unwrap_or_default()
    }
}

/// Launcher, session and page factory in one; clones share state.
#[derive(Clone, Default)]
pub struct MockBrowser {
    state: Arc<MockState>,
}

impl MockBrowser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the page at `url`.
    pub fn with_page(self, url: &str, script: PageScript) -> Self {
        if let Ok(mut scripts) = self.state.scripts.lock() {
            scripts.insert(url.to_string(), script);
        }
        self
    }

    /// Delay every navigation, keeping pages open long enough to overlap.
    pub fn with_navigation_delay(self, delay: Duration) -> Self {
        if let Ok(mut d) = self.state.navigation_delay.lock() {
            *d = delay;
        }
        self
    }

    pub fn fail_launch(self) -> Self {
        self.state.fail_launch.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_new_page(&self, fail: bool) {
        self.state.fail_new_page.store(fail, Ordering::SeqCst);
    }

    pub fn sessions_launched(&self) -> usize {
        self.state.sessions_launched.load(Ordering::SeqCst)
    }

    pub fn sessions_closed(&self) -> usize {
        self.state.sessions_closed.load(Ordering::SeqCst)
    }

    pub fn pages_opened(&self) -> usize {
        self.state.pages_opened.load(Ordering::SeqCst)
    }

    pub fn pages_closed(&self) -> usize {
        self.state.pages_closed.load(Ordering::SeqCst)
    }

    /// Highest number of pages open at the same time.
    pub fn peak_open_pages(&self) -> usize {
        self.state.peak_open_pages.load(Ordering::SeqCst)
    }

    pub fn screenshots_taken(&self) -> usize {
        self.state.screenshots.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserLauncher for MockBrowser {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        self.state.sessions_launched.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_launch.load(Ordering::SeqCst) {
            return Err(BrowserError::Launch("scripted launch failure".to_string()));
        }
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        if self.state.fail_new_page.load(Ordering::SeqCst) {
            return Err(BrowserError::Page("scripted page failure".to_string()));
        }

        self.state.pages_opened.fetch_add(1, Ordering::SeqCst);
        let open = self.state.open_pages.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_open_pages.fetch_max(open, Ordering::SeqCst);

        Ok(Box::new(MockPage {
            state: Arc::clone(&self.state),
            current: Mutex::new(None),
            closed: AtomicBool::new(false),
        }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.state.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct MockPage {
    state: Arc<MockState>,
    current: Mutex<Option<String>>,
    closed: AtomicBool,
}

impl MockPage {
    fn current_url(&self) -> Option<String> {
        self.current.lock().ok().and_then(|c| c.clone())
    }

    fn current_script(&self) -> PageScript {
        self.current_url()
            .map(|url| self.state.script_for(&url))
            .unwrap_or_default()
    }
}

#[async_trait]
impl BrowserPage for MockPage {
    async fn goto(&self, url: &Url, timeout: Duration) -> Result<(), BrowserError> {
        if let Ok(mut current) = self.current.lock() {
            *current = Some(url.to_string());
        }

        let delay = self.state.navigation_delay();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match self.state.script_for(url.as_str()).navigation {
            NavigationScript::Succeed => Ok(()),
            NavigationScript::Fail(message) => Err(BrowserError::Navigation {
                url: url.to_string(),
                message,
            }),
            NavigationScript::Hang => {
                tokio::time::sleep(timeout).await;
                Err(BrowserError::Timeout {
                    url: url.to_string(),
                    seconds: timeout.as_secs(),
                })
            }
        }
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        if self.current_script().container_ready {
            Ok(())
        } else {
            Err(BrowserError::SelectorTimeout {
                selector: selector.to_string(),
                seconds: timeout.as_secs(),
            })
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        Ok(self.current_script().html.unwrap_or_default())
    }

    async fn screenshot(&self, spec: &ScreenshotSpec) -> Result<Vec<u8>, BrowserError> {
        if self.current_script().fail_screenshot {
            return Err(BrowserError::Screenshot("scripted capture failure".to_string()));
        }
        let sequence = self.state.screenshots.fetch_add(1, Ordering::SeqCst);
        let url = self.current_url().unwrap_or_else(|| "about:blank".to_string());
        Ok(format!("jpeg|q{}|{}|{}", spec.quality, url, sequence).into_bytes())
    }

    async fn close(&self) -> Result<(), BrowserError> {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.state.pages_closed.fetch_add(1, Ordering::SeqCst);
            self.state.open_pages.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_scripted_page_content() {
        let browser = MockBrowser::new().with_page(
            "https://example.com/",
            PageScript::rendered("<p>hello</p>"),
        );
        let session = browser.launch().await.unwrap();
        let page = session.new_page().await.unwrap();

        page.goto(&url("https://example.com/"), Duration::from_secs(1))
            .await
            .unwrap();
        page.wait_for_selector("p", Duration::from_secs(1)).await.unwrap();
        assert_eq!(page.content().await.unwrap(), "<p>hello</p>");

        page.close().await.unwrap();
        session.close().await.unwrap();
        assert_eq!(browser.pages_opened(), 1);
        assert_eq!(browser.pages_closed(), 1);
        assert_eq!(browser.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_hanging_navigation_times_out() {
        let browser = MockBrowser::new().with_page("https://slow.example/", PageScript::hanging());
        let page = browser.new_page().await.unwrap();

        let result = page
            .goto(&url("https://slow.example/"), Duration::from_millis(10))
            .await;
        assert!(matches!(result, Err(BrowserError::Timeout { .. })));

        // The error page can still be captured.
        assert!(page.screenshot(&ScreenshotSpec::default()).await.is_ok());
    }

    #[tokio::test]
    async fn test_peak_open_pages() {
        let browser = MockBrowser::new();
        let a = browser.new_page().await.unwrap();
        let b = browser.new_page().await.unwrap();
        a.close().await.unwrap();
        let c = browser.new_page().await.unwrap();

        assert_eq!(browser.peak_open_pages(), 2);
        b.close().await.unwrap();
        c.close().await.unwrap();
        c.close().await.unwrap();
        assert_eq!(browser.pages_closed(), 3);
    }

    #[tokio::test]
    async fn test_failures() {
        let browser = MockBrowser::new()
            .with_page("https://bad.example/", PageScript::screenshot_fails())
            .fail_launch();
        assert!(browser.launch().await.is_err());

        let page = browser.new_page().await.unwrap();
        page.goto(&url("https://bad.example/"), Duration::from_secs(1))
            .await
            .unwrap();
        assert!(page.screenshot(&ScreenshotSpec::default()).await.is_err());

        browser.fail_new_page(true);
        assert!(browser.new_page().await.is_err());
    }
}
