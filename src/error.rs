//! Error types for image-dl
//!
//! This module provides error handling for the library, including:
//! - Domain-specific error variants (fetch, browser, analysis, save)
//! - Criticality classification: most per-item errors are converted into
//!   statistics at the item boundary, but critical errors (disk write
//!   failures, browser disconnection) must abort the whole run.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for image-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for image-dl
///
/// Each variant includes contextual information to help diagnose issues.
/// Use [`Error::is_critical`] to decide whether an error may be converted
/// into per-item bookkeeping or must unwind past the batch controller.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "concurrent_downloads")
        key: Option<String>,
    },

    /// Network error from the HTTP client
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// Browser automation error (page open, navigation, script evaluation)
    #[error("browser error: {0}")]
    Browser(String),

    /// The shared browser instance disconnected mid-run
    ///
    /// Any disconnect is unrecoverable for the current run: in-flight pages
    /// are gone and new pages cannot be opened, so the run aborts rather than
    /// silently retrying against a dead browser.
    #[error("browser disconnected: the current run cannot continue")]
    BrowserDisconnected,

    /// Filesystem write failure during the final save step
    ///
    /// A failed write means data loss risk for the whole run (full disk,
    /// revoked permissions), not just one item, so it aborts the run.
    #[error("failed to write image to {path}: {source}")]
    CriticalWrite {
        /// The path that could not be written
        path: PathBuf,
        /// The underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Malformed `data:` URI
    #[error("invalid data URI: {0}")]
    DataUri(String),

    /// Temp-file staging error (two-phase mode)
    #[error("temp store error: {0}")]
    TempStore(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Returns true if this error must abort the entire run
    ///
    /// Critical errors are never converted into per-item statistics. The
    /// batch controller propagates them immediately so data-loss conditions
    /// are not masked by retry bookkeeping.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            Error::CriticalWrite { .. } | Error::BrowserDisconnected
        )
    }
}

/// Known error message fragments that indicate the browser process is gone
///
/// Browser automation libraries surface disconnection through several
/// different error strings depending on where the failure was observed.
const DISCONNECT_SIGNATURES: &[&str] = &[
    "browser closed",
    "browser has been closed",
    "connection closed",
    "websocket",
    "channel closed",
    "target closed",
];

/// Classify a browser-layer error message as disconnection or ordinary failure
///
/// Ordinary browser errors (navigation timeout, script failure) become
/// [`Error::Browser`] and are handled at the item boundary. Disconnection
/// signatures become the critical [`Error::BrowserDisconnected`].
pub fn classify_browser_error(message: impl Into<String>) -> Error {
    let message = message.into();
    let lower = message.to_lowercase();
    if DISCONNECT_SIGNATURES.iter().any(|sig| lower.contains(sig)) {
        Error::BrowserDisconnected
    } else {
        Error::Browser(message)
    }
}
