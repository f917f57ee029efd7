//! Batch download controller
//!
//! `process_queue` drives a URL list through fetch, analysis, and delivery in
//! fixed-size concurrent chunks, with one retry budget shared by fetch
//! failures and retryable analysis failures. Each chunk is a barrier: every
//! item in it completes before the next chunk starts, so concurrency never
//! exceeds the configured width and pacing delays apply between whole chunks.

use crate::analyzer;
use crate::error::{Error, Result};
use crate::fetch::{fetch_image, BatchContext};
use crate::file_manager;
use crate::retry;
use crate::sink::{SaveItem, SaveSink};
use crate::stats::{build_report, ObservationsHandle, StatsHandle};
use crate::types::{FailureReason, QueueReport};
use std::path::Path;

/// A URL awaiting a (re)attempt, with the analysis reason that requeued it
#[derive(Clone, Debug)]
struct QueueEntry {
    url: String,
    reason: Option<FailureReason>,
}

/// What one attempt at one URL produced
enum ItemOutcome {
    /// Delivered to the sink; nothing more to do
    Saved,
    /// No strategy produced image bytes; eligible for the retry budget
    FetchFailed,
    /// Analysis rejected the payload with a transient reason
    RetryableAnalysis(FailureReason),
    /// Analysis rejected the payload with a reason retrying cannot fix
    PermanentAnalysis(FailureReason),
}

/// Download, analyze, and deliver every URL, returning the run report
///
/// Critical errors (browser disconnect, filesystem write failure) abort the
/// whole run; everything else becomes per-URL bookkeeping in the report.
/// Cancellation via the context token stops the run at the next chunk
/// boundary, counting whatever is left as failed.
pub async fn process_queue(
    urls: &[String],
    target_dir: &Path,
    ctx: &BatchContext,
    sink: &dyn SaveSink,
) -> Result<QueueReport> {
    let stats = StatsHandle::new(urls.len());
    let observations = ObservationsHandle::new();
    let download = &ctx.config.download;

    let mut pending: Vec<QueueEntry> = urls
        .iter()
        .map(|url| QueueEntry {
            url: url.clone(),
            reason: None,
        })
        .collect();

    for round in 0..=download.max_retries {
        if pending.is_empty() {
            break;
        }
        if round > 0 {
            tracing::info!(
                round,
                remaining = pending.len(),
                delay_ms = download.retry_delay.as_millis() as u64,
                "retrying failed downloads"
            );
            tokio::time::sleep(download.retry_delay).await;
        }

        let entries = std::mem::take(&mut pending);
        let mut requeue: Vec<QueueEntry> = Vec::new();
        let chunk_size = download.concurrent_downloads.max(1);
        let mut first_chunk = true;

        for (i, chunk) in entries.chunks(chunk_size).enumerate() {
            if ctx.cancel.is_cancelled() {
                let remaining = &entries[i * chunk_size..];
                tracing::info!(remaining = remaining.len(), "cancellation requested, stopping run");
                requeue.extend_from_slice(remaining);
                break;
            }
            if !first_chunk {
                retry::pause_between_chunks(download).await;
            }
            first_chunk = false;

            if !ctx.browser_alive() {
                return Err(Error::BrowserDisconnected);
            }

            let attempts = chunk.iter().map(|entry| async {
                let outcome =
                    process_one(&entry.url, target_dir, ctx, sink, &stats, &observations).await;
                (entry.url.clone(), outcome)
            });
            let results = futures::future::join_all(attempts).await;

            for (url, outcome) in results {
                match outcome? {
                    ItemOutcome::Saved => {}
                    ItemOutcome::FetchFailed => {
                        requeue.push(QueueEntry { url, reason: None });
                    }
                    ItemOutcome::RetryableAnalysis(reason) => {
                        requeue.push(QueueEntry {
                            url,
                            reason: Some(reason),
                        });
                    }
                    ItemOutcome::PermanentAnalysis(reason) => {
                        tracing::warn!(url = %url, reason = %reason, "payload rejected, not retrying");
                        stats.record_failure(&url);
                        observations.record_failed_url(&url);
                    }
                }
            }
        }
        pending = requeue;
        if ctx.cancel.is_cancelled() {
            break;
        }
    }

    // Budget exhausted or run cancelled; whatever is left is permanently failed
    for entry in pending {
        tracing::warn!(url = %entry.url, "download failed after all retries");
        stats.record_failure(&entry.url);
        if entry.reason.is_some() {
            observations.record_failed_url(&entry.url);
        }
    }

    sink.finish(&stats).await?;

    let report = build_report(&stats, &observations);
    tracing::info!(
        successful = report.successful,
        failed = report.failed,
        analyzed = report.analyzed,
        "download queue drained"
    );
    Ok(report)
}

async fn process_one(
    url: &str,
    target_dir: &Path,
    ctx: &BatchContext,
    sink: &dyn SaveSink,
    stats: &StatsHandle,
    observations: &ObservationsHandle,
) -> Result<ItemOutcome> {
    retry::pause_for_host(url, &ctx.config.download).await;

    let Some(fetched) = fetch_image(url, ctx, 0).await? else {
        tracing::debug!(url = %url, "all fetch strategies exhausted");
        return Ok(ItemOutcome::FetchFailed);
    };

    let analysis = analyzer::analyze(&fetched, url, &ctx.config.analysis).await;
    if !analysis.is_valid {
        // Constructor invariant: an invalid result always carries a reason
        let reason = analysis.reason.unwrap_or(FailureReason::UnknownFormat);
        observations.record_failure(reason);
        return Ok(if reason.is_retryable() {
            ItemOutcome::RetryableAnalysis(reason)
        } else {
            ItemOutcome::PermanentAnalysis(reason)
        });
    }

    observations.record_analyzed();
    let metadata = analysis.metadata;
    if metadata.parse_error_continue {
        observations.record_parse_error_continue();
    }

    let path = target_dir.join(file_manager::derive_file_name(
        &metadata.final_url,
        metadata.format,
    ));

    sink.deliver(
        SaveItem {
            buffer: fetched.buffer,
            path,
            url: url.to_string(),
            analysis: Some(metadata),
        },
        stats,
    )
    .await?;
    Ok(ItemOutcome::Saved)
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, FormatConfig};
    use crate::sink::ImmediateSink;
    use base64::Engine;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const PNG_1X1_B64: &str = "iVBORw0KGgoAAAANSUhEUgAAAAEAAAABCAYAAAAfFcSJAAAADUlEQVR42mNk+M9QDwADhgGAWjR9awAAAABJRU5ErkJggg==";

    fn png_1x1() -> Vec<u8> {
        base64::engine::general_purpose::STANDARD
            .decode(PNG_1X1_B64)
            .unwrap()
    }

    fn fast_config() -> Config {
        let mut config = Config::default();
        config.download.min_request_delay = Duration::from_millis(1);
        config.download.max_request_delay = Duration::from_millis(2);
        config.download.retry_delay = Duration::from_millis(5);
        config.analysis.min_buffer_size = 8;
        config
    }

    fn ctx(config: Config) -> BatchContext {
        BatchContext::new(Arc::new(config)).unwrap()
    }

    #[tokio::test]
    async fn single_url_end_to_end() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_1x1()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ctx = ctx(fast_config());
        let sink = ImmediateSink::new(FormatConfig::default(), None);
        let urls = vec![format!("{}/a.png", server.uri())];

        let report = process_queue(&urls, dir.path(), &ctx, &sink).await.unwrap();
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 0);
        assert_eq!(report.analyzed, 1);
        assert_eq!(report.format_counts.get("png"), Some(&1));
        assert!(dir.path().join("a.png").exists());
    }

    #[tokio::test]
    async fn analyzer_metadata_reaches_the_saved_record() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/a.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_1x1()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ctx = ctx(fast_config());
        let info_list: crate::file_manager::ImageInfoList =
            std::sync::Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = ImmediateSink::new(FormatConfig::default(), Some(info_list.clone()));
        let urls = vec![format!("{}/a.png", server.uri())];

        process_queue(&urls, dir.path(), &ctx, &sink).await.unwrap();

        let records = info_list.lock().unwrap();
        assert_eq!(records.len(), 1);
        // Dimensions come from analysis, not from a re-decode at save time
        assert_eq!(records[0].width, Some(1));
        assert_eq!(records[0].height, Some(1));
    }

    #[tokio::test]
    async fn fetch_failure_exhausts_budget_then_reports() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut config = fast_config();
        config.download.max_retries = 2;
        let ctx = ctx(config);
        let sink = ImmediateSink::new(FormatConfig::default(), None);
        let url = format!("{}/gone.png", server.uri());

        let report = process_queue(&[url.clone()], dir.path(), &ctx, &sink)
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(report.failed_urls, vec![url]);
        // Fetch failures never reach analysis
        assert!(report.analysis_failed_urls.is_empty());
        // 1 initial attempt + 2 retries
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn truncated_payload_recovers_on_retry() {
        let server = MockServer::start().await;
        // First response is below the minimum buffer size, second is real
        Mock::given(method("GET"))
            .and(path("/flaky.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(vec![0u8; 4]),
            )
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/flaky.png"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_1x1()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ctx = ctx(fast_config());
        let sink = ImmediateSink::new(FormatConfig::default(), None);
        let urls = vec![format!("{}/flaky.png", server.uri())];

        let report = process_queue(&urls, dir.path(), &ctx, &sink).await.unwrap();
        assert_eq!(report.successful, 1);
        assert_eq!(report.failed, 0);
        // The transient rejection still shows up in the observations
        assert_eq!(
            report.analysis_failures.get(&FailureReason::ContentTooSmall),
            Some(&1)
        );
        assert!(report.analysis_failed_urls.is_empty());
    }

    #[tokio::test]
    async fn html_body_is_permanent_without_browser() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/html")
                    .set_body_string("<html><body>gallery</body></html>"),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut config = fast_config();
        config.download.max_retries = 3;
        let ctx = ctx(config);
        let sink = ImmediateSink::new(FormatConfig::default(), None);
        let url = format!("{}/page", server.uri());

        let report = process_queue(&[url], dir.path(), &ctx, &sink).await.unwrap();
        assert_eq!(report.failed, 1);
        // HTML is a fetch miss, so the retry budget is spent on it
        assert_eq!(server.received_requests().await.unwrap().len(), 4);
    }

    #[tokio::test]
    async fn cancelled_run_stops_without_touching_the_network() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "image/png")
                    .set_body_bytes(png_1x1()),
            )
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let ctx = ctx(fast_config());
        ctx.cancel.cancel();
        let sink = ImmediateSink::new(FormatConfig::default(), None);
        let urls = vec![format!("{}/a.png", server.uri())];

        let report = process_queue(&urls, dir.path(), &ctx, &sink).await.unwrap();
        assert_eq!(report.successful, 0);
        assert_eq!(report.failed, 1);
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_queue_yields_empty_report() {
        let dir = TempDir::new().unwrap();
        let ctx = ctx(fast_config());
        let sink = ImmediateSink::new(FormatConfig::default(), None);

        let report = process_queue(&[], dir.path(), &ctx, &sink).await.unwrap();
        assert_eq!(report.successful, 0);
        assert_eq!(report.failed, 0);
        assert_eq!(report.analyzed, 0);
    }
}
