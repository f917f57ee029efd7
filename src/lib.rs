//! # image-dl
//!
//! Backend library for bulk image scraping: batched concurrent downloads,
//! content validation, and format-aware saving.
//!
//! ## Design Philosophy
//!
//! image-dl is designed to be:
//! - **Strategy-driven** - Lightweight HTTP first, headless browser fallback
//! - **Fail-closed** - Payloads must prove they are images before touching disk
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Bookkeeping-honest** - Every outcome lands in the run report, retries included
//!
//! ## Quick Start
//!
//! ```no_run
//! use image_dl::{Config, ImageDownloader};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let downloader = ImageDownloader::new(config)?;
//!
//!     let urls = vec![
//!         "https://example.com/gallery/photo-1.jpg".to_string(),
//!         "https://example.com/gallery/photo-2.png".to_string(),
//!     ];
//!     let report = downloader.download_all(&urls, None).await?;
//!     println!(
//!         "saved {} of {} ({} failed)",
//!         report.successful,
//!         urls.len(),
//!         report.failed
//!     );
//!     Ok(())
//! }
//! ```
//!
//! To enable the browser strategy, launch a headless Chrome session with
//! [`fetch::ChromiumBrowser`] and attach it via
//! [`ImageDownloader::with_browser`].

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// Image payload validation and metadata extraction
pub mod analyzer;
/// Configuration types
pub mod config;
/// High-level batch downloader
pub mod downloader;
/// Error types
pub mod error;
/// Fetch strategies and orchestration
pub mod fetch;
/// Final save step with format conversion
pub mod file_manager;
/// Content-acceptance policy for response headers
pub mod policy;
/// Batch queue controller
pub mod queue;
/// Pacing and throttling helpers
pub mod retry;
/// Delivery sinks, immediate and two-phase
pub mod sink;
/// Per-site fetch behavior registry
pub mod site;
/// Magic-byte format sniffing
pub mod sniff;
/// Run statistics accumulators
pub mod stats;
/// Temp-file staging for the two-phase mode
pub mod temp_store;
/// Core types shared across the pipeline
pub mod types;

// Re-export commonly used types
pub use config::{
    AnalysisConfig, AnalysisMode, Config, ConvertTarget, DownloadConfig, FormatConfig,
};
pub use downloader::ImageDownloader;
pub use error::{Error, Result};
pub use fetch::{BatchContext, BrowserDriver, BrowserPage, FetchStrategy, StrategyOutcome};
pub use policy::AcceptBinary;
pub use site::{DownloadStrategy, SiteConfig, SiteRegistry};
pub use types::{
    AnalysisMetadata, AnalysisResult, FailureReason, FetchResult, ImageFormat, ImageInfo,
    QueueReport, SkipReason,
};
