//! Core types shared across the download/analysis pipeline

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Image format established by content-type or magic-byte sniffing
///
/// This is a closed set: anything the sniffer cannot place here is treated
/// as an unknown format and fails analysis.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    /// JPEG (including `jpg` spellings, normalized to `jpeg`)
    Jpeg,
    /// PNG
    Png,
    /// GIF
    Gif,
    /// WEBP
    Webp,
    /// BMP
    Bmp,
    /// TIFF
    Tiff,
    /// SVG (XML text, never dimension-decoded)
    Svg,
}

impl ImageFormat {
    /// Canonical lowercase name, used as the `format_counts` key
    ///
    /// `jpg` is always normalized to `jpeg` here so counts never split
    /// across the two spellings.
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Svg => "svg",
        }
    }

    /// File extension for on-disk names
    pub fn extension(&self) -> &'static str {
        match self {
            ImageFormat::Jpeg => "jpg",
            ImageFormat::Png => "png",
            ImageFormat::Gif => "gif",
            ImageFormat::Webp => "webp",
            ImageFormat::Bmp => "bmp",
            ImageFormat::Tiff => "tiff",
            ImageFormat::Svg => "svg",
        }
    }

    /// Resolve a format from a content-type base token (e.g. `image/png`)
    pub fn from_content_type(base_token: &str) -> Option<Self> {
        match base_token.trim() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(ImageFormat::Jpeg),
            "image/png" | "image/apng" => Some(ImageFormat::Png),
            "image/gif" => Some(ImageFormat::Gif),
            "image/webp" => Some(ImageFormat::Webp),
            "image/bmp" | "image/x-ms-bmp" => Some(ImageFormat::Bmp),
            "image/tiff" => Some(ImageFormat::Tiff),
            "image/svg+xml" => Some(ImageFormat::Svg),
            _ => None,
        }
    }

    /// Map onto the `image` crate's format enum for decode/encode operations
    ///
    /// Returns `None` for SVG, which the `image` crate does not handle.
    pub fn to_image_crate_format(&self) -> Option<image::ImageFormat> {
        match self {
            ImageFormat::Jpeg => Some(image::ImageFormat::Jpeg),
            ImageFormat::Png => Some(image::ImageFormat::Png),
            ImageFormat::Gif => Some(image::ImageFormat::Gif),
            ImageFormat::Webp => Some(image::ImageFormat::WebP),
            ImageFormat::Bmp => Some(image::ImageFormat::Bmp),
            ImageFormat::Tiff => Some(image::ImageFormat::Tiff),
            ImageFormat::Svg => None,
        }
    }

    /// Map from the `image` crate's format enum
    pub fn from_image_crate_format(format: image::ImageFormat) -> Option<Self> {
        match format {
            image::ImageFormat::Jpeg => Some(ImageFormat::Jpeg),
            image::ImageFormat::Png => Some(ImageFormat::Png),
            image::ImageFormat::Gif => Some(ImageFormat::Gif),
            image::ImageFormat::WebP => Some(ImageFormat::Webp),
            image::ImageFormat::Bmp => Some(ImageFormat::Bmp),
            image::ImageFormat::Tiff => Some(ImageFormat::Tiff),
            _ => None,
        }
    }
}

impl std::fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed classification for a failed analysis
///
/// This taxonomy is consumed by the batch controller's retry classifier:
/// retriable reasons requeue the URL for another fetch+analyze round,
/// non-retriable reasons are data-quality failures counted and dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// No concrete format could be established for the payload
    UnknownFormat,
    /// Response headers declared a type the acceptance policy rejects
    UnsupportedContentType,
    /// Payload below the minimum buffer size (tracking pixels, error stubs)
    ContentTooSmall,
    /// Metadata extraction exceeded the configured timeout
    ProcessingTimeout,
    /// Metadata extraction hit an allocation/limit failure
    MemoryError,
    /// Metadata parse failure under strict validation
    MetadataError,
    /// Decoded width or height was zero
    InvalidDimensions,
}

impl FailureReason {
    /// Whether this failure is transient or environment-dependent
    ///
    /// Retriable failures requeue the URL for another round; the rest will
    /// not change on retry and are permanently dropped.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            FailureReason::ContentTooSmall
                | FailureReason::ProcessingTimeout
                | FailureReason::MemoryError
        )
    }

    /// Stable snake_case key used in failure maps and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::UnknownFormat => "unknown_format",
            FailureReason::UnsupportedContentType => "unsupported_content_type",
            FailureReason::ContentTooSmall => "content_too_small",
            FailureReason::ProcessingTimeout => "processing_timeout",
            FailureReason::MemoryError => "memory_error",
            FailureReason::MetadataError => "metadata_error",
            FailureReason::InvalidDimensions => "invalid_dimensions",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload produced by a fetch strategy
///
/// Transient: consumed immediately by the analyzer. A failed fetch produces
/// no `FetchResult` at all, never one with an empty buffer.
#[derive(Clone, Debug)]
pub struct FetchResult {
    /// Raw response body
    pub buffer: Vec<u8>,
    /// URL the bytes were actually served from (after redirects)
    pub final_url: String,
    /// Response headers, lower-cased keys
    pub headers: HashMap<String, String>,
}

/// Why expensive metadata parsing was skipped for an otherwise valid item
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Buffer exceeded the analyzable size ceiling; only format was sniffed
    TooLarge,
}

/// Metadata gathered during analysis, valid or not
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AnalysisMetadata {
    /// Established image format, if any
    pub format: Option<ImageFormat>,
    /// Decoded pixel width (absent for SVG, skipped, or failed decodes)
    pub width: Option<u32>,
    /// Decoded pixel height
    pub height: Option<u32>,
    /// Payload size in bytes
    pub size: usize,
    /// URL the payload was served from
    pub final_url: String,
    /// Set when the large-file fast path skipped metadata parsing
    pub skipped: Option<SkipReason>,
    /// Set when a metadata parse error was tolerated under lenient validation
    pub parse_error_continue: bool,
}

/// Outcome of analyzing one fetched payload
///
/// Invariant: `is_valid == false` always carries a reason, `is_valid == true`
/// never does. Use the constructors to preserve this.
#[derive(Clone, Debug)]
pub struct AnalysisResult {
    /// Whether the payload passed every validation gate
    pub is_valid: bool,
    /// Typed failure classification, present iff invalid
    pub reason: Option<FailureReason>,
    /// Metadata gathered along the way
    pub metadata: AnalysisMetadata,
}

impl AnalysisResult {
    /// A payload that passed all gates
    pub fn valid(metadata: AnalysisMetadata) -> Self {
        Self {
            is_valid: true,
            reason: None,
            metadata,
        }
    }

    /// A payload rejected with a typed reason
    pub fn invalid(reason: FailureReason, metadata: AnalysisMetadata) -> Self {
        Self {
            is_valid: false,
            reason: Some(reason),
            metadata,
        }
    }
}

/// Record of one saved image, appended for downstream bookkeeping
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Source URL
    pub url: String,
    /// On-disk path the image was written to
    pub path: std::path::PathBuf,
    /// Final on-disk format (post-conversion)
    pub format: ImageFormat,
    /// Decoded width, when known
    pub width: Option<u32>,
    /// Decoded height, when known
    pub height: Option<u32>,
    /// Size of the written buffer in bytes
    pub size: usize,
}

/// Aggregate result of one `process_queue` invocation
///
/// Returned to the caller for the end-of-run summary. Failure counts are
/// cumulative across retry rounds; `failed_urls` lists only permanently
/// failed URLs.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct QueueReport {
    /// Number of successfully analyzed payloads (valid outcomes)
    pub analyzed: u64,
    /// Analysis failure counts keyed by reason, cumulative across rounds
    pub analysis_failures: HashMap<FailureReason, u64>,
    /// URLs whose final failure was an analysis failure
    pub analysis_failed_urls: Vec<String>,
    /// Count of metadata parse errors tolerated under lenient validation
    pub metadata_parse_error_continue: u64,
    /// Saved-image counts keyed by final on-disk format
    pub format_counts: HashMap<String, u64>,
    /// Number of images saved to disk
    pub successful: u64,
    /// Number of permanently failed URLs
    pub failed: u64,
    /// Permanently failed URLs (fetch and analysis failures)
    pub failed_urls: Vec<String>,
}
