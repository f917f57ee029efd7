//! Lightweight HTTP fetch strategy
//!
//! One binary GET through the shared reqwest client. Ordinary fetch failure
//! never errors: HTML detection, policy rejection, transport problems, and
//! non-success statuses all log and return [`StrategyOutcome::Miss`] so the
//! orchestrator can fall back to the browser strategy.

use super::{FetchStrategy, StrategyOutcome};
use crate::error::Result;
use crate::policy::{self, AcceptBinary};
use crate::site::SiteConfig;
use crate::types::FetchResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::time::Duration;

/// Direct HTTP GET fetcher
pub struct LightweightStrategy {
    client: reqwest::Client,
    accept_binary: AcceptBinary,
}

impl LightweightStrategy {
    /// Create a strategy over a shared client
    pub fn new(client: reqwest::Client, accept_binary: AcceptBinary) -> Self {
        Self {
            client,
            accept_binary,
        }
    }
}

/// Collect response headers into a lower-cased map
fn collect_headers(response: &reqwest::Response) -> HashMap<String, String> {
    response
        .headers()
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|v| (name.as_str().to_lowercase(), v.to_string()))
        })
        .collect()
}

#[async_trait]
impl FetchStrategy for LightweightStrategy {
    async fn try_fetch(
        &self,
        url: &str,
        headers: &HashMap<String, String>,
        timeout: Duration,
        _site: &SiteConfig,
    ) -> Result<StrategyOutcome> {
        let mut request = self.client.get(url).timeout(timeout);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(error) => {
                tracing::debug!(url = %url, error = %error, "lightweight fetch transport failure");
                return Ok(StrategyOutcome::Miss);
            }
        };

        if !response.status().is_success() {
            tracing::debug!(url = %url, status = %response.status(), "lightweight fetch non-success status");
            return Ok(StrategyOutcome::Miss);
        }

        let response_headers = collect_headers(&response);

        // HTML is a signal, not an error: the browser strategy may be able
        // to dig the image out of the page.
        let is_html = response_headers
            .get("content-type")
            .map(|ct| ct.split(';').next().unwrap_or("").trim().to_lowercase())
            .map(|token| token.contains("text/html"))
            .unwrap_or(false);
        if is_html {
            tracing::debug!(url = %url, "lightweight fetch got HTML, deferring to browser strategy");
            return Ok(StrategyOutcome::Miss);
        }

        if !policy::accept(&response_headers, &self.accept_binary) {
            tracing::debug!(
                url = %url,
                content_type = response_headers.get("content-type").map(String::as_str).unwrap_or("<missing>"),
                "lightweight fetch response rejected by acceptance policy"
            );
            return Ok(StrategyOutcome::Miss);
        }

        let final_url = response.url().to_string();
        let buffer = match response.bytes().await {
            Ok(bytes) => bytes.to_vec(),
            Err(error) => {
                tracing::debug!(url = %url, error = %error, "lightweight fetch body read failure");
                return Ok(StrategyOutcome::Miss);
            }
        };

        if buffer.is_empty() {
            tracing::debug!(url = %url, "lightweight fetch returned empty body");
            return Ok(StrategyOutcome::Miss);
        }

        tracing::debug!(url = %url, bytes = buffer.len(), "lightweight fetch succeeded");
        Ok(StrategyOutcome::Image(FetchResult {
            buffer,
            final_url,
            headers: response_headers,
        }))
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn strategy() -> LightweightStrategy {
        LightweightStrategy::new(reqwest::Client::new(), AcceptBinary::Flag(false))
    }

    async fn fetch(strategy: &LightweightStrategy, url: &str) -> StrategyOutcome {
        strategy
            .try_fetch(
                url,
                &HashMap::new(),
                Duration::from_secs(5),
                &SiteConfig::default(),
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn image_response_is_captured() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0x89u8, 0x50, 0x4E, 0x47]),
            )
            .mount(&server)
            .await;

        let outcome = fetch(&strategy(), &format!("{}/a.png", server.uri())).await;
        match outcome {
            StrategyOutcome::Image(result) => {
                assert_eq!(result.buffer, vec![0x89u8, 0x50, 0x4E, 0x47]);
                assert_eq!(result.headers.get("content-type").unwrap(), "image/png");
            }
            other => panic!("expected Image, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn html_response_is_a_miss_not_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html; charset=utf-8")
                    .set_body_string("<html><body>gallery page</body></html>"),
            )
            .mount(&server)
            .await;

        let outcome = fetch(&strategy(), &format!("{}/page", server.uri())).await;
        assert!(matches!(outcome, StrategyOutcome::Miss));
    }

    #[tokio::test]
    async fn attachment_disposition_accepted_despite_binary_type() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/octet-stream")
                    .insert_header("content-disposition", "attachment; filename=\"a.jpg\"")
                    .set_body_bytes(vec![0xFFu8, 0xD8, 0xFF, 0xE0]),
            )
            .mount(&server)
            .await;

        let outcome = fetch(&strategy(), &format!("{}/dl", server.uri())).await;
        assert!(matches!(outcome, StrategyOutcome::Image(_)));
    }

    #[tokio::test]
    async fn non_success_status_is_a_miss() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let outcome = fetch(&strategy(), &format!("{}/gone.png", server.uri())).await;
        assert!(matches!(outcome, StrategyOutcome::Miss));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_miss() {
        // Reserved TEST-NET address, nothing listens there
        let outcome = strategy()
            .try_fetch(
                "http://192.0.2.1:9/a.png",
                &HashMap::new(),
                Duration::from_millis(300),
                &SiteConfig::default(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, StrategyOutcome::Miss));
    }

    #[tokio::test]
    async fn custom_headers_are_forwarded() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("referer", "https://gallery.example.com/"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/jpeg")
                    .set_body_bytes(vec![0xFFu8, 0xD8, 0xFF, 0xE0]),
            )
            .mount(&server)
            .await;

        let mut headers = HashMap::new();
        headers.insert(
            "referer".to_string(),
            "https://gallery.example.com/".to_string(),
        );
        let outcome = strategy()
            .try_fetch(
                &format!("{}/r.jpg", server.uri()),
                &headers,
                Duration::from_secs(5),
                &SiteConfig::default(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, StrategyOutcome::Image(_)));
    }
}
