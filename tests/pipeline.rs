//! End-to-end pipeline tests against a local mock HTTP server
//!
//! These exercise the full facade path: fetch, analysis, retry bookkeeping,
//! and save, in both inline and two-phase save modes.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use base64::Engine;
use image_dl::{
    AnalysisMode, Config, ConvertTarget, FailureReason, ImageDownloader, ImageFormat,
};
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

/// A buffer with a valid PNG signature but an unparseable body
fn corrupt_png(len: usize) -> Vec<u8> {
    let mut buffer = vec![0xAAu8; len];
    buffer[..8].copy_from_slice(&[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A]);
    buffer
}

fn fast_config() -> Config {
    let mut config = Config::default();
    config.download.min_request_delay = Duration::from_millis(1);
    config.download.max_request_delay = Duration::from_millis(2);
    config.download.retry_delay = Duration::from_millis(5);
    config.analysis.min_buffer_size = 8;
    config
}

async fn mount_png(server: &MockServer, route: &str) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(png_1x1()),
        )
        .mount(server)
        .await;
}

#[tokio::test]
async fn batch_of_three_downloads_concurrently() {
    let server = MockServer::start().await;
    for route in ["/one.png", "/two.png", "/three.png"] {
        mount_png(&server, route).await;
    }

    let dir = TempDir::new().unwrap();
    let mut config = fast_config();
    config.download.concurrent_downloads = 3;
    let downloader = ImageDownloader::new(config).unwrap();

    let urls: Vec<String> = ["one", "two", "three"]
        .iter()
        .map(|n| format!("{}/{n}.png", server.uri()))
        .collect();
    let report = downloader
        .download_all(&urls, Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.analyzed, 3);
    assert_eq!(report.format_counts.get("png"), Some(&3));
    for n in ["one", "two", "three"] {
        assert!(dir.path().join(format!("{n}.png")).exists());
    }
    assert_eq!(downloader.saved_images().len(), 3);
}

#[tokio::test]
async fn data_uri_skips_the_network_entirely() {
    let dir = TempDir::new().unwrap();
    let downloader = ImageDownloader::new(fast_config()).unwrap();

    let uri = format!("data:image/png;base64,{PNG_1X1_B64}");
    let report = downloader
        .download_all(&[uri], Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(report.format_counts.get("png"), Some(&1));
    let saved = downloader.saved_images();
    assert_eq!(saved.len(), 1);
    assert_eq!(saved[0].format, ImageFormat::Png);
    assert!(saved[0].path.exists());
}

#[tokio::test]
async fn lenient_mode_saves_despite_metadata_parse_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(corrupt_png(512)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let downloader = ImageDownloader::new(fast_config()).unwrap();
    let urls = vec![format!("{}/broken.png", server.uri())];

    let report = downloader
        .download_all(&urls, Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(report.metadata_parse_error_continue, 1);
    assert!(report.analysis_failures.is_empty());
    let saved = downloader.saved_images();
    assert_eq!(saved[0].width, None, "dimensions unknown after parse error");
}

#[tokio::test]
async fn strict_mode_rejects_metadata_parse_error_permanently() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/broken.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(corrupt_png(512)),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = fast_config();
    config.analysis.strict_validation = true;
    config.download.max_retries = 2;
    let downloader = ImageDownloader::new(config).unwrap();
    let url = format!("{}/broken.png", server.uri());

    let report = downloader
        .download_all(&[url.clone()], Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 0);
    assert_eq!(report.failed, 1);
    assert_eq!(report.analysis_failed_urls, vec![url]);
    assert_eq!(
        report.analysis_failures.get(&FailureReason::MetadataError),
        Some(&1)
    );
    // A permanent analysis failure must not burn the retry budget
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn persistently_undersized_body_exhausts_the_retry_budget() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/stub.png"))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("content-type", "image/png")
                .set_body_bytes(vec![0x89u8, b'P', b'N', b'G']),
        )
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = fast_config();
    config.download.max_retries = 2;
    let downloader = ImageDownloader::new(config).unwrap();
    let url = format!("{}/stub.png", server.uri());

    let report = downloader
        .download_all(&[url.clone()], Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 0);
    assert_eq!(report.failed, 1);
    // One observation per attempt, the url recorded once at exhaustion
    assert_eq!(
        report.analysis_failures.get(&FailureReason::ContentTooSmall),
        Some(&3)
    );
    assert_eq!(report.analysis_failed_urls, vec![url]);
    assert_eq!(server.received_requests().await.unwrap().len(), 3);
}

#[tokio::test]
async fn two_phase_mode_produces_the_same_outcome() {
    let server = MockServer::start().await;
    for route in ["/one.png", "/two.png", "/three.png"] {
        mount_png(&server, route).await;
    }

    let dir = TempDir::new().unwrap();
    let temp = TempDir::new().unwrap();
    let mut config = fast_config();
    config.analysis.mode = AnalysisMode::TwoPhase;
    config.analysis.temp_dir = temp.path().join("staging");
    config.analysis.max_hold_buffers = 1;
    let downloader = ImageDownloader::new(config).unwrap();

    let urls: Vec<String> = ["one", "two", "three"]
        .iter()
        .map(|n| format!("{}/{n}.png", server.uri()))
        .collect();
    let report = downloader
        .download_all(&urls, Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 3);
    assert_eq!(report.format_counts.get("png"), Some(&3));
    for n in ["one", "two", "three"] {
        assert!(dir.path().join(format!("{n}.png")).exists());
    }
    assert!(
        !temp.path().join("staging").exists(),
        "staging area cleared after completion"
    );
}

#[tokio::test]
async fn conversion_changes_format_counts_and_extension() {
    let server = MockServer::start().await;
    mount_png(&server, "/photo.png").await;

    let dir = TempDir::new().unwrap();
    let mut config = fast_config();
    config.format.enable_conversion = true;
    config.format.convert_to = ConvertTarget::Jpeg;
    let downloader = ImageDownloader::new(config).unwrap();
    let urls = vec![format!("{}/photo.png", server.uri())];

    let report = downloader
        .download_all(&urls, Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(report.format_counts.get("jpeg"), Some(&1));
    assert!(dir.path().join("photo.jpg").exists());
    assert!(!dir.path().join("photo.png").exists());
}

#[tokio::test]
async fn write_failure_aborts_the_run() {
    let server = MockServer::start().await;
    mount_png(&server, "/a.png").await;

    let scratch = TempDir::new().unwrap();
    let blocker = scratch.path().join("blocker");
    std::fs::write(&blocker, b"file, not a directory").unwrap();

    let downloader = ImageDownloader::new(fast_config()).unwrap();
    let urls = vec![format!("{}/a.png", server.uri())];

    let err = downloader
        .download_all(&urls, Some(&blocker.join("out")))
        .await
        .unwrap_err();
    assert!(err.is_critical());
}

#[tokio::test]
async fn mixed_batch_reports_partial_success() {
    let server = MockServer::start().await;
    mount_png(&server, "/good.png").await;
    Mock::given(method("GET"))
        .and(path("/missing.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let dir = TempDir::new().unwrap();
    let mut config = fast_config();
    config.download.max_retries = 1;
    let downloader = ImageDownloader::new(config).unwrap();
    let bad = format!("{}/missing.png", server.uri());
    let urls = vec![format!("{}/good.png", server.uri()), bad.clone()];

    let report = downloader
        .download_all(&urls, Some(dir.path()))
        .await
        .unwrap();

    assert_eq!(report.successful, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failed_urls, vec![bad]);
}
