//! Configuration types for image-dl

use crate::error::{Error, Result};
use crate::policy::AcceptBinary;
use crate::site::SiteRegistry;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Default browser-like User-Agent sent by the lightweight strategy
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Download behavior configuration (directories, concurrency, retry pacing)
///
/// Groups settings related to how image URLs are fetched and how the batch
/// controller paces its work. Used as a nested sub-config within [`Config`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DownloadConfig {
    /// Output directory for saved images (default: "./images")
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Maximum concurrent downloads per chunk (default: 4)
    ///
    /// Each chunk of this many items is dispatched concurrently and fully
    /// settled before the next chunk starts (a per-chunk barrier, not a
    /// sliding window).
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,

    /// Minimum delay between chunks (default: 250ms)
    #[serde(default = "default_min_request_delay", with = "duration_ms_serde")]
    pub min_request_delay: Duration,

    /// Maximum delay between chunks (default: 1s)
    ///
    /// The actual inter-chunk delay is drawn uniformly from
    /// `[min_request_delay, max_request_delay]` to avoid bursty patterns.
    #[serde(default = "default_max_request_delay", with = "duration_ms_serde")]
    pub max_request_delay: Duration,

    /// Maximum outer retry rounds over failed items (default: 2)
    ///
    /// Fetch failures and retriable analysis failures share this one budget.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before each retry round (default: 2s)
    #[serde(default = "default_retry_delay", with = "duration_ms_serde")]
    pub retry_delay: Duration,

    /// Per-fetch timeout for a single strategy attempt (default: 30s)
    #[serde(default = "default_fetch_timeout", with = "duration_ms_serde")]
    pub fetch_timeout: Duration,

    /// Hosts known to rate-limit aggressively
    ///
    /// Items whose URL host matches an entry get an extra small randomized
    /// per-item delay before their fetch.
    #[serde(default)]
    pub throttled_hosts: Vec<String>,

    /// User-Agent header for all requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            concurrent_downloads: default_concurrent_downloads(),
            min_request_delay: default_min_request_delay(),
            max_request_delay: default_max_request_delay(),
            max_retries: default_max_retries(),
            retry_delay: default_retry_delay(),
            fetch_timeout: default_fetch_timeout(),
            throttled_hosts: Vec::new(),
            user_agent: default_user_agent(),
        }
    }
}

/// Execution mode for the save step
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisMode {
    /// Save each valid payload immediately after analysis (default)
    #[default]
    Inline,
    /// Stage payloads to temp-file storage, then drain to the real save
    /// pass, bounding peak memory for large runs
    TwoPhase,
}

/// Payload analysis configuration (validation thresholds, staging)
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Metadata extraction timeout (default: 10s)
    #[serde(default = "default_analysis_timeout", with = "duration_ms_serde")]
    pub timeout: Duration,

    /// Minimum acceptable payload size in bytes (default: 128)
    ///
    /// Protects against tracking pixels and error stubs.
    #[serde(default = "default_min_buffer_size")]
    pub min_buffer_size: usize,

    /// Size ceiling in MB above which metadata parsing is skipped (default: 5)
    ///
    /// Values below 1 are clamped to 1. Payloads over the ceiling are valid
    /// iff format sniffing succeeds, with `skipped = too_large`.
    #[serde(default = "default_max_analyzable_size_mb")]
    pub max_analyzable_size_mb: u64,

    /// How to treat missing or generic binary content-types
    #[serde(default)]
    pub accept_binary_content_types: AcceptBinary,

    /// Treat metadata parse errors as hard failures (default: false)
    ///
    /// When off, a parse error is logged, counted in observations, and the
    /// item is saved with unknown dimensions.
    #[serde(default)]
    pub strict_validation: bool,

    /// Inline vs. two-phase save execution
    #[serde(default)]
    pub mode: AnalysisMode,

    /// Staging directory for two-phase mode (default: "./temp")
    #[serde(default = "default_temp_dir")]
    pub temp_dir: PathBuf,

    /// In-memory hold size before flushing to temp storage (default: 32)
    #[serde(default = "default_max_hold_buffers")]
    pub max_hold_buffers: usize,

    /// Clear the staging area when a run starts (default: true)
    #[serde(default = "default_true")]
    pub cleanup_temp_on_start: bool,

    /// Clear the staging area when a run completes (default: true)
    #[serde(default = "default_true")]
    pub cleanup_temp_on_complete: bool,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            timeout: default_analysis_timeout(),
            min_buffer_size: default_min_buffer_size(),
            max_analyzable_size_mb: default_max_analyzable_size_mb(),
            accept_binary_content_types: AcceptBinary::default(),
            strict_validation: false,
            mode: AnalysisMode::default(),
            temp_dir: default_temp_dir(),
            max_hold_buffers: default_max_hold_buffers(),
            cleanup_temp_on_start: true,
            cleanup_temp_on_complete: true,
        }
    }
}

/// Target format for global conversion
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConvertTarget {
    /// Keep each image in its original format (default)
    #[default]
    None,
    /// Convert everything to JPEG
    Jpeg,
    /// Convert everything to PNG
    Png,
    /// Convert everything to WEBP
    Webp,
}

impl ConvertTarget {
    /// The concrete format to convert to, if conversion is requested
    pub fn as_format(&self) -> Option<crate::types::ImageFormat> {
        match self {
            ConvertTarget::None => None,
            ConvertTarget::Jpeg => Some(crate::types::ImageFormat::Jpeg),
            ConvertTarget::Png => Some(crate::types::ImageFormat::Png),
            ConvertTarget::Webp => Some(crate::types::ImageFormat::Webp),
        }
    }
}

/// Format conversion configuration for the save step
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FormatConfig {
    /// Enable global format conversion before writing (default: false)
    #[serde(default)]
    pub enable_conversion: bool,

    /// Format to convert to when conversion is enabled
    #[serde(default)]
    pub convert_to: ConvertTarget,
}

/// Main configuration for the download/analysis pipeline
///
/// Fields are organized into logical sub-configs:
/// - [`download`](DownloadConfig) — concurrency, pacing, retry budget
/// - [`analysis`](AnalysisConfig) — validation thresholds, two-phase staging
/// - [`format`](FormatConfig) — save-time conversion
/// - [`sites`](SiteRegistry) — per-site fetch behavior keyed by domain
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Download behavior settings
    #[serde(default)]
    pub download: DownloadConfig,

    /// Analysis thresholds and staging
    #[serde(default)]
    pub analysis: AnalysisConfig,

    /// Save-time format conversion
    #[serde(default)]
    pub format: FormatConfig,

    /// Per-site configuration registry
    #[serde(default)]
    pub sites: SiteRegistry,
}

impl Config {
    /// Validate settings that would otherwise wedge or misbehave at runtime
    pub fn validate(&self) -> Result<()> {
        if self.download.concurrent_downloads == 0 {
            return Err(Error::Config {
                message: "concurrent_downloads must be at least 1".to_string(),
                key: Some("concurrent_downloads".to_string()),
            });
        }
        if self.download.min_request_delay > self.download.max_request_delay {
            return Err(Error::Config {
                message: "min_request_delay must not exceed max_request_delay".to_string(),
                key: Some("min_request_delay".to_string()),
            });
        }
        if self.analysis.max_hold_buffers == 0 {
            return Err(Error::Config {
                message: "max_hold_buffers must be at least 1".to_string(),
                key: Some("max_hold_buffers".to_string()),
            });
        }
        Ok(())
    }

    /// Effective metadata-parsing size ceiling in bytes (1MB floor applied)
    pub fn max_analyzable_bytes(&self) -> usize {
        self.analysis.max_analyzable_bytes()
    }
}

impl AnalysisConfig {
    /// Effective metadata-parsing size ceiling in bytes (1MB floor applied)
    pub fn max_analyzable_bytes(&self) -> usize {
        (self.max_analyzable_size_mb.max(1) as usize) * 1024 * 1024
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("./images")
}

fn default_temp_dir() -> PathBuf {
    PathBuf::from("./temp")
}

fn default_concurrent_downloads() -> usize {
    4
}

fn default_min_request_delay() -> Duration {
    Duration::from_millis(250)
}

fn default_max_request_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_retries() -> u32 {
    2
}

fn default_retry_delay() -> Duration {
    Duration::from_secs(2)
}

fn default_fetch_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_analysis_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_min_buffer_size() -> usize {
    128
}

fn default_max_analyzable_size_mb() -> u64 {
    5
}

fn default_max_hold_buffers() -> usize {
    32
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

fn default_true() -> bool {
    true
}

// Duration serialization helper (milliseconds)
mod duration_ms_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
