//! Headless browser fetch strategy
//!
//! Drives one page per fetch attempt through the [`BrowserDriver`] seam.
//! Browser process lifecycle (launch flags, anti-detection) belongs to the
//! embedding application; this module only needs a connected driver that
//! can open pages, navigate, and evaluate scripts. [`ChromiumBrowser`]
//! adapts a `chromiumoxide` browser to the seam.
//!
//! When a navigation lands on an HTML page instead of raw image bytes, the
//! HTML-page handler waits out the site's configured delays and runs a
//! heuristic DOM scan: candidate `<img>` elements ranked by rendered pixel
//! area, falling back to anchor hrefs and CSS background-image declarations
//! that point at image extensions.

use super::{FetchStrategy, StrategyOutcome};
use crate::error::{classify_browser_error, Error, Result};
use crate::site::SiteConfig;
use crate::types::FetchResult;
use async_trait::async_trait;
use base64::Engine;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Poll interval while waiting for an image-bearing element to appear
const SELECTOR_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What a navigation settled on
#[derive(Clone, Debug)]
pub struct NavigationInfo {
    /// The document's reported content type, when available
    pub content_type: Option<String>,
    /// The URL the navigation ended at (after redirects)
    pub final_url: String,
}

/// One open browser tab, driven for a single fetch attempt
///
/// Pages are never shared across concurrent items; each attempt opens and
/// closes its own tab so request headers and cookies cannot
/// cross-contaminate.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    /// Apply extra request headers to all requests from this page
    async fn set_extra_headers(&self, headers: &HashMap<String, String>) -> Result<()>;

    /// Navigate to `url`, bounded by `timeout`
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationInfo>;

    /// Capture the raw bytes of the currently displayed document
    async fn body_bytes(&self) -> Result<Vec<u8>>;

    /// Evaluate a script, deserializing its completion value as JSON
    async fn evaluate_json(&self, script: &str) -> Result<serde_json::Value>;

    /// Close the tab
    async fn close(&self) -> Result<()>;
}

/// A connected browser able to open pages
#[async_trait]
pub trait BrowserDriver: Send + Sync {
    /// Open a fresh blank page
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>>;

    /// Whether the underlying browser process is still reachable
    fn is_connected(&self) -> bool;
}

/// Script that ranks visible `<img>` elements by rendered pixel area and
/// falls back to anchors, then CSS background-image declarations
const IMAGE_SCAN_SCRIPT: &str = r#"
(() => {
    const exts = /\.(jpe?g|png|gif|webp|bmp|tiff?|svg)([?#].*)?$/i;
    let best = null;
    let bestArea = 0;
    for (const img of document.querySelectorAll('img')) {
        const rect = img.getBoundingClientRect();
        const area = rect.width * rect.height;
        const src = img.currentSrc || img.src;
        if (src && area > bestArea) {
            bestArea = area;
            best = src;
        }
    }
    if (best) return best;
    for (const a of document.querySelectorAll('a[href]')) {
        if (exts.test(a.href)) return a.href;
    }
    const candidates = document.querySelectorAll('div, section, figure, span');
    for (let i = 0; i < Math.min(candidates.length, 500); i++) {
        const bg = getComputedStyle(candidates[i]).backgroundImage;
        const m = bg && bg.match(/url\(["']?([^"')]+)["']?\)/);
        if (m && exts.test(m[1].split('?')[0])) {
            try { return new URL(m[1], location.href).href; } catch (e) {}
        }
    }
    return null;
})()
"#;

/// Script that reads the displayed document's bytes back as base64
const BODY_BYTES_SCRIPT: &str = r#"
(async () => {
    const resp = await fetch(location.href, { cache: 'force-cache' });
    const bytes = new Uint8Array(await resp.arrayBuffer());
    let binary = '';
    const chunk = 0x8000;
    for (let i = 0; i < bytes.length; i += chunk) {
        binary += String.fromCharCode.apply(null, bytes.subarray(i, i + chunk));
    }
    return btoa(binary);
})()
"#;

/// Headless-browser fetcher over any [`BrowserDriver`]
pub struct BrowserStrategy {
    driver: std::sync::Arc<dyn BrowserDriver>,
}

impl BrowserStrategy {
    /// Create a strategy over a shared driver
    pub fn new(driver: std::sync::Arc<dyn BrowserDriver>) -> Self {
        Self { driver }
    }

    /// HTML-page handler: wait, poll for an image element, then scan
    async fn discover_image_url(
        &self,
        page: &dyn BrowserPage,
        site: &SiteConfig,
    ) -> Result<Option<String>> {
        tokio::time::sleep(site.wait_time).await;

        // Best-effort wait for lazy-loaded content; scanning proceeds
        // whether or not an <img> ever appeared.
        let deadline = tokio::time::Instant::now() + site.selector_wait_time;
        loop {
            match page.evaluate_json("document.querySelector('img') !== null").await {
                Ok(serde_json::Value::Bool(true)) => break,
                Ok(_) => {}
                Err(error) if error.is_critical() => return Err(error),
                Err(error) => {
                    tracing::debug!(error = %error, "image element poll failed");
                }
            }
            if tokio::time::Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SELECTOR_POLL_INTERVAL).await;
        }

        let found = page.evaluate_json(IMAGE_SCAN_SCRIPT).await?;
        Ok(found.as_str().map(str::to_string))
    }
}

#[async_trait]
impl FetchStrategy for BrowserStrategy {
    async fn try_fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        site: &SiteConfig,
    ) -> Result<StrategyOutcome> {
        let page = match self.driver.open_page().await {
            Ok(page) => page,
            Err(error) if error.is_critical() => return Err(error),
            Err(error) => {
                tracing::warn!(url = %url, error = %error, "could not open browser page");
                return Ok(StrategyOutcome::Miss);
            }
        };

        if let Err(error) = page.set_extra_headers(headers).await {
            page.close().await.ok();
            if error.is_critical() {
                return Err(error);
            }
            tracing::warn!(url = %url, error = %error, "could not apply request headers");
            return Ok(StrategyOutcome::Miss);
        }

        let nav = match page.navigate(url, timeout).await {
            Ok(nav) => nav,
            Err(error) => {
                page.close().await.ok();
                if error.is_critical() {
                    return Err(error);
                }
                tracing::debug!(url = %url, error = %error, "browser navigation failed");
                return Ok(StrategyOutcome::Miss);
            }
        };

        let is_html = nav
            .content_type
            .as_deref()
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
            .map(|token| token.contains("text/html"))
            .unwrap_or(false);

        if is_html {
            let discovered = self.discover_image_url(page.as_ref(), site).await;
            page.close().await.ok();
            return match discovered? {
                Some(found) if found != url => {
                    tracing::debug!(url = %url, found = %found, "image URL discovered inside HTML page");
                    Ok(StrategyOutcome::HtmlPage(found))
                }
                _ => {
                    tracing::debug!(url = %url, "no image found in page");
                    Ok(StrategyOutcome::Miss)
                }
            };
        }

        let bytes = page.body_bytes().await;
        page.close().await.ok();
        let buffer = match bytes {
            Ok(buffer) => buffer,
            Err(error) => {
                if error.is_critical() {
                    return Err(error);
                }
                tracing::debug!(url = %url, error = %error, "could not capture response body");
                return Ok(StrategyOutcome::Miss);
            }
        };
        if buffer.is_empty() {
            return Ok(StrategyOutcome::Miss);
        }

        let mut response_headers = HashMap::new();
        if let Some(content_type) = nav.content_type {
            response_headers.insert("content-type".to_string(), content_type);
        }
        tracing::debug!(url = %url, bytes = buffer.len(), "browser fetch succeeded");
        Ok(StrategyOutcome::Image(FetchResult {
            buffer,
            final_url: nav.final_url,
            headers: response_headers,
        }))
    }
}

/// `chromiumoxide` adapter for the [`BrowserDriver`] seam
///
/// The embedding application owns launching the browser and pumping its
/// handler; this adapter only opens tabs on an already-running instance.
/// The first disconnect-classified failure latches [`is_connected`] to
/// false so the batch controller can abort the run.
///
/// [`is_connected`]: BrowserDriver::is_connected
pub struct ChromiumBrowser {
    browser: chromiumoxide::Browser,
    connected: AtomicBool,
}

impl ChromiumBrowser {
    /// Wrap an already-launched browser
    pub fn new(browser: chromiumoxide::Browser) -> Self {
        Self {
            browser,
            connected: AtomicBool::new(true),
        }
    }

    fn classify(&self, message: String) -> Error {
        let error = classify_browser_error(message);
        if matches!(error, Error::BrowserDisconnected) {
            self.connected.store(false, Ordering::SeqCst);
        }
        error
    }
}

#[async_trait]
impl BrowserDriver for ChromiumBrowser {
    async fn open_page(&self) -> Result<Box<dyn BrowserPage>> {
        match self.browser.new_page("about:blank").await {
            Ok(page) => Ok(Box::new(ChromiumPage { page })),
            Err(error) => Err(self.classify(error.to_string())),
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// One `chromiumoxide` tab
struct ChromiumPage {
    page: chromiumoxide::Page,
}

#[async_trait]
impl BrowserPage for ChromiumPage {
    async fn set_extra_headers(&self, headers: &HashMap<String, String>) -> Result<()> {
        if headers.is_empty() {
            return Ok(());
        }
        use chromiumoxide::cdp::browser_protocol::network::{
            Headers, SetExtraHttpHeadersParams,
        };
        self.page
            .execute(SetExtraHttpHeadersParams::new(Headers::new(
                serde_json::json!(headers),
            )))
            .await
            .map_err(|e| classify_browser_error(e.to_string()))?;
        Ok(())
    }

    async fn navigate(&self, url: &str, timeout: Duration) -> Result<NavigationInfo> {
        let navigation = async {
            self.page
                .goto(url)
                .await
                .map_err(|e| classify_browser_error(e.to_string()))?;
            self.page
                .wait_for_navigation()
                .await
                .map_err(|e| classify_browser_error(e.to_string()))?;
            Ok::<(), Error>(())
        };
        tokio::time::timeout(timeout, navigation)
            .await
            .map_err(|_| Error::Browser(format!("navigation to {url} timed out")))??;

        let content_type = self
            .page
            .evaluate("document.contentType")
            .await
            .ok()
            .and_then(|result| result.into_value::<String>().ok());
        let final_url = self
            .page
            .url()
            .await
            .map_err(|e| classify_browser_error(e.to_string()))?
            .unwrap_or_else(|| url.to_string());

        Ok(NavigationInfo {
            content_type,
            final_url,
        })
    }

    async fn body_bytes(&self) -> Result<Vec<u8>> {
        let encoded: String = self
            .page
            .evaluate(BODY_BYTES_SCRIPT)
            .await
            .map_err(|e| classify_browser_error(e.to_string()))?
            .into_value()
            .map_err(|e| Error::Browser(format!("body capture returned non-string: {e}")))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .map_err(|e| Error::Browser(format!("body capture base64 decode failed: {e}")))
    }

    async fn evaluate_json(&self, script: &str) -> Result<serde_json::Value> {
        self.page
            .evaluate(script)
            .await
            .map_err(|e| classify_browser_error(e.to_string()))?
            .into_value()
            .map_err(|e| Error::Browser(format!("script result not JSON: {e}")))
    }

    async fn close(&self) -> Result<()> {
        self.page
            .clone()
            .close()
            .await
            .map_err(|e| classify_browser_error(e.to_string()))?;
        Ok(())
    }
}
