//! Fetch strategies and orchestration
//!
//! Two interchangeable single-attempt fetchers share the [`FetchStrategy`]
//! interface: a lightweight HTTP GET and a headless-browser navigation. The
//! orchestrator decides per-site strategy order and runs the fallback chain,
//! recursing (with a depth cap) when a browser navigation lands on an HTML
//! page that turns out to contain the real image URL.

mod browser;
mod lightweight;
mod orchestrator;

pub use browser::{BrowserDriver, BrowserPage, BrowserStrategy, ChromiumBrowser, NavigationInfo};
pub use lightweight::LightweightStrategy;
pub use orchestrator::{fetch_image, MAX_HTML_REDIRECT_DEPTH};

use crate::config::Config;
use crate::error::Result;
use crate::site::SiteConfig;
use crate::types::FetchResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// What one fetch attempt produced
#[derive(Debug)]
pub enum StrategyOutcome {
    /// Image bytes captured; analysis can proceed
    Image(FetchResult),
    /// Navigation landed on an HTML page and a candidate image URL was
    /// discovered inside it; the orchestrator should fetch that URL instead
    HtmlPage(String),
    /// This strategy could not produce an image; try the next one
    Miss,
}

/// A single-attempt fetcher for one URL
///
/// Implementations return [`StrategyOutcome::Miss`] for ordinary fetch
/// failure (DNS, timeout, rejection by the acceptance policy) so the
/// orchestrator can fall back to the next strategy. An `Err` is reserved
/// for conditions the fallback chain cannot paper over, such as a
/// disconnected browser.
#[async_trait]
pub trait FetchStrategy: Send + Sync {
    /// Attempt to fetch `url` once with the given request headers
    async fn try_fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        site: &SiteConfig,
    ) -> Result<StrategyOutcome>;
}

/// Run-wide context threaded through the pipeline
///
/// Created once per top-level scrape target and read-only afterwards; the
/// mutable counters of a run live in the stats accumulators, not here.
#[derive(Clone)]
pub struct BatchContext {
    /// Resolved configuration for the run
    pub config: Arc<Config>,
    /// HTTP client reused across all lightweight fetches
    pub client: reqwest::Client,
    /// Shared browser handle; `None` disables the browser strategy
    pub browser: Option<Arc<dyn BrowserDriver>>,
    /// Cooperative cancellation for the run; checked between chunks
    pub cancel: CancellationToken,
}

impl BatchContext {
    /// Build a context from config with a fresh HTTP client and no browser
    pub fn new(config: Arc<Config>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.download.user_agent.clone())
            .build()?;
        Ok(Self {
            config,
            client,
            browser: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Attach a shared browser handle, enabling the browser strategy
    pub fn with_browser(mut self, browser: Arc<dyn BrowserDriver>) -> Self {
        self.browser = Some(browser);
        self
    }

    /// Whether the attached browser (if any) is still connected
    ///
    /// A run without a browser is trivially healthy.
    pub fn browser_alive(&self) -> bool {
        self.browser
            .as_ref()
            .map(|driver| driver.is_connected())
            .unwrap_or(true)
    }
}
