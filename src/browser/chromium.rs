//! Chromium backend (DevTools protocol via chromiumoxide).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::page::{
    CaptureScreenshotFormat, EventLifecycleEvent, SetLifecycleEventsEnabledParams,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use super::{
    BrowserError, BrowserLauncher, BrowserPage, BrowserSession, ScreenshotSpec, SessionOptions,
};

const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Launches a local Chrome/Chromium per run.
#[derive(Debug, Clone)]
pub struct ChromiumLauncher {
    options: SessionOptions,
}

impl ChromiumLauncher {
    pub fn new(options: SessionOptions) -> Self {
        Self { options }
    }

    fn browser_config(&self) -> Result<BrowserConfig, BrowserError> {
        let options = &self.options;
        let mut builder = BrowserConfig::builder()
            .window_size(options.viewport_width, options.viewport_height)
            .viewport(Viewport {
                width: options.viewport_width,
                height: options.viewport_height,
                ..Viewport::default()
            })
            .arg("--incognito")
            .arg("--ignore-certificate-errors")
            .arg(format!("--user-agent={}", options.user_agent));

        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(ref executable) = options.executable {
            builder = builder.chrome_executable(executable);
        }

        builder.build().map_err(BrowserError::Launch)
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(&self) -> Result<Box<dyn BrowserSession>, BrowserError> {
        let config = self.browser_config()?;
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| BrowserError::Launch(e.to_string()))?;

        // The handler drives the CDP connection and must be polled for the
        // browser's whole lifetime.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("Browser handler event error: {}", e);
                }
            }
        });

        info!(
            width = self.options.viewport_width,
            height = self.options.viewport_height,
            headless = self.options.headless,
            "Browser launched"
        );

        Ok(Box::new(ChromiumSession {
            browser: Mutex::new(Some(browser)),
            handler_task: Mutex::new(Some(handler_task)),
        }))
    }
}

/// One running browser process.
pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    handler_task: Mutex<Option<JoinHandle<()>>>,
}

#[async_trait]
impl BrowserSession for ChromiumSession {
    async fn new_page(&self) -> Result<Box<dyn BrowserPage>, BrowserError> {
        let guard = self.browser.lock().await;
        let browser = guard
            .as_ref()
            .ok_or_else(|| BrowserError::Page("browser already closed".to_string()))?;

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| BrowserError::Page(e.to_string()))?;

        Ok(Box::new(ChromiumPage { page }))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        let Some(mut browser) = self.browser.lock().await.take() else {
            return Ok(());
        };

        let closed = browser
            .close()
            .await
            .map(|_| ())
            .map_err(|e| BrowserError::Protocol(e.to_string()));
        if let Err(e) = browser.wait().await {
            warn!("Browser process did not exit cleanly: {}", e);
        }

        if let Some(task) = self.handler_task.lock().await.take() {
            task.abort();
        }

        info!("Browser closed");
        closed
    }
}

/// A Chromium tab.
pub struct ChromiumPage {
    page: Page,
}

/// Tracks main-frame lifecycle events until the new document goes network idle.
///
/// `init` marks the start of the navigated document; an idle signal before
/// it belongs to the previous one.
#[derive(Debug, Default)]
struct NetworkIdleWatch {
    document_started: bool,
}

impl NetworkIdleWatch {
    /// Feed one lifecycle event name; true once the page has settled.
    fn observe(&mut self, name: &str) -> bool {
        match name {
            "init" => {
                self.document_started = true;
                false
            }
            "networkIdle" => self.document_started,
            _ => false,
        }
    }
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    /// Navigate and wait until the main frame reports network idle.
    async fn goto(&self, url: &Url, timeout: Duration) -> Result<(), BrowserError> {
        let navigate = async {
            self.page
                .execute(SetLifecycleEventsEnabledParams::new(true))
                .await
                .map_err(|e| BrowserError::Protocol(e.to_string()))?;
            let mut events = self
                .page
                .event_listener::<EventLifecycleEvent>()
                .await
                .map_err(|e| BrowserError::Protocol(e.to_string()))?;
            let main_frame = self
                .page
                .mainframe()
                .await
                .map_err(|e| BrowserError::Protocol(e.to_string()))?;

            self.page
                .goto(url.as_str())
                .await
                .map_err(|e| BrowserError::Navigation {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

            let mut watch = NetworkIdleWatch::default();
            while let Some(event) = events.next().await {
                if main_frame.as_ref().is_some_and(|frame| *frame != event.frame_id) {
                    continue;
                }
                if watch.observe(&event.name) {
                    debug!(%url, "Network idle");
                    return Ok(());
                }
            }
            Err(BrowserError::Protocol("lifecycle event stream ended".to_string()))
        };

        match tokio::time::timeout(timeout, navigate).await {
            Ok(result) => result,
            Err(_) => Err(BrowserError::Timeout {
                url: url.to_string(),
                seconds: timeout.as_secs(),
            }),
        }
    }

    async fn wait_for_selector(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<(), BrowserError> {
        let deadline = Instant::now() + timeout;
        loop {
            if self.page.find_element(selector).await.is_ok() {
                return Ok(());
            }
            if Instant::now() >= deadline {
                return Err(BrowserError::SelectorTimeout {
                    selector: selector.to_string(),
                    seconds: timeout.as_secs(),
                });
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }
    }

    async fn content(&self) -> Result<String, BrowserError> {
        self.page
            .content()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }

    async fn screenshot(&self, spec: &ScreenshotSpec) -> Result<Vec<u8>, BrowserError> {
        let params = ScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Jpeg)
            .quality(i64::from(spec.quality))
            .full_page(spec.full_page)
            .build();

        self.page
            .screenshot(params)
            .await
            .map_err(|e| BrowserError::Screenshot(e.to_string()))
    }

    async fn close(&self) -> Result<(), BrowserError> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| BrowserError::Protocol(e.to_string()))
    }
}
