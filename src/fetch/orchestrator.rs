//! Strategy orchestration: per-site fallback chain with HTML-redirect
//! recursion
//!
//! The orchestrator resolves a URL's site config, builds request headers,
//! and walks the strategy order until one yields image bytes. `data:` URIs
//! never touch the network. A browser strategy reporting "found an image
//! URL inside an HTML page" recurses on the discovered URL with a hard
//! depth cap, so HTML→HTML redirect loops terminate deterministically.

use super::{BatchContext, BrowserStrategy, FetchStrategy, LightweightStrategy, StrategyOutcome};
use crate::error::{Error, Result};
use crate::site::{DownloadStrategy, SiteConfig};
use crate::types::FetchResult;
use base64::Engine;
use std::collections::HashMap;
use url::Url;

/// Recursion cap for HTML-redirect resolution
pub const MAX_HTML_REDIRECT_DEPTH: u32 = 3;

/// Fetch one URL through the site's strategy fallback chain
///
/// Returns `Ok(None)` when every strategy exhausts without producing image
/// bytes — the batch controller classifies that as a fetch failure, not an
/// error. Only critical errors (browser disconnect) surface as `Err`.
pub async fn fetch_image(
    url: &str,
    ctx: &BatchContext,
    depth: u32,
) -> Result<Option<FetchResult>> {
    if depth > MAX_HTML_REDIRECT_DEPTH {
        tracing::warn!(url = %url, depth, "HTML redirect depth cap exceeded, aborting fetch");
        return Ok(None);
    }

    if url.starts_with("data:") {
        return match decode_data_uri(url) {
            Ok(result) => Ok(Some(result)),
            Err(error) => {
                tracing::warn!(error = %error, "malformed data URI");
                Ok(None)
            }
        };
    }

    let site = ctx.config.sites.resolve(url);
    let headers = build_headers(url, site);
    let timeout = ctx.config.download.fetch_timeout;

    for kind in strategy_order(site, ctx) {
        let outcome = match kind {
            DownloadStrategy::Lightweight => {
                let strategy = LightweightStrategy::new(
                    ctx.client.clone(),
                    ctx.config.analysis.accept_binary_content_types.clone(),
                );
                strategy.try_fetch(url, &headers, timeout, site).await?
            }
            DownloadStrategy::Browser => {
                let driver = match ctx.browser {
                    Some(ref driver) => driver.clone(),
                    None => continue,
                };
                if !driver.is_connected() {
                    return Err(Error::BrowserDisconnected);
                }
                BrowserStrategy::new(driver)
                    .try_fetch(url, &headers, timeout, site)
                    .await?
            }
        };

        match outcome {
            StrategyOutcome::Image(result) => return Ok(Some(result)),
            StrategyOutcome::HtmlPage(discovered) => {
                tracing::debug!(url = %url, discovered = %discovered, depth, "following image URL from HTML page");
                return Box::pin(fetch_image(&discovered, ctx, depth + 1)).await;
            }
            StrategyOutcome::Miss => continue,
        }
    }

    tracing::debug!(url = %url, "all fetch strategies exhausted");
    Ok(None)
}

/// Strategy order: site-declared preference first, the other as fallback
fn strategy_order(site: &SiteConfig, ctx: &BatchContext) -> Vec<DownloadStrategy> {
    let order = match site.download_strategy {
        DownloadStrategy::Lightweight => {
            vec![DownloadStrategy::Lightweight, DownloadStrategy::Browser]
        }
        DownloadStrategy::Browser => {
            vec![DownloadStrategy::Browser, DownloadStrategy::Lightweight]
        }
    };
    // Without a browser handle the browser entries are unreachable anyway;
    // dropping them here keeps the loop honest.
    if ctx.browser.is_none() {
        order
            .into_iter()
            .filter(|kind| *kind == DownloadStrategy::Lightweight)
            .collect()
    } else {
        order
    }
}

/// Build per-request headers from the site config
fn build_headers(url: &str, site: &SiteConfig) -> HashMap<String, String> {
    let mut headers: HashMap<String, String> = site.custom_headers.clone();
    headers
        .entry("accept".to_string())
        .or_insert_with(|| "image/avif,image/webp,image/*,*/*;q=0.8".to_string());
    if site.needs_referer {
        let referer = site.referer_url.clone().or_else(|| {
            Url::parse(url)
                .ok()
                .and_then(|parsed| parsed.host_str().map(|h| format!("{}://{}/", parsed.scheme(), h)))
        });
        if let Some(referer) = referer {
            headers.insert("referer".to_string(), referer);
        }
    }
    headers
}

/// Decode a `data:` URI into a [`FetchResult`] without any network call
fn decode_data_uri(uri: &str) -> Result<FetchResult> {
    let rest = uri
        .strip_prefix("data:")
        .ok_or_else(|| Error::DataUri("missing data: prefix".to_string()))?;
    let (meta, payload) = rest
        .split_once(',')
        .ok_or_else(|| Error::DataUri("missing comma separator".to_string()))?;

    let (media_type, is_base64) = match meta.strip_suffix(";base64") {
        Some(media_type) => (media_type, true),
        None => (meta, false),
    };

    let buffer = if is_base64 {
        let cleaned: String = payload.chars().filter(|c| !c.is_whitespace()).collect();
        base64::engine::general_purpose::STANDARD
            .decode(cleaned.as_bytes())
            .map_err(|e| Error::DataUri(format!("base64 decode failed: {e}")))?
    } else {
        urlencoding::decode_binary(payload.as_bytes()).into_owned()
    };

    if buffer.is_empty() {
        return Err(Error::DataUri("empty payload".to_string()));
    }

    let mut headers = HashMap::new();
    if !media_type.is_empty() {
        headers.insert("content-type".to_string(), media_type.to_string());
    }
    Ok(FetchResult {
        buffer,
        final_url: uri.to_string(),
        headers,
    })
}
