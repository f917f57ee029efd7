//! Payload validation and classification
//!
//! The analyzer runs a fetched payload through a sequence of hard gates —
//! buffer presence, content-type admissibility, size thresholds, magic-byte
//! sniffing, timed metadata extraction, dimension sanity — and classifies
//! the outcome as valid or invalid with a typed [`FailureReason`]. The
//! reason taxonomy is what the batch controller's retry classifier consumes,
//! so every gate short-circuits with exactly one reason.
//!
//! Buffers over the configured analyzable ceiling take a fast path that
//! skips metadata parsing entirely: decoding a multi-hundred-megabyte TIFF
//! to learn its width is not worth the memory spike when format sniffing
//! already tells us the bytes are an image.

use crate::config::AnalysisConfig;
use crate::policy;
use crate::sniff;
use crate::types::{
    AnalysisMetadata, AnalysisResult, FailureReason, FetchResult, ImageFormat, SkipReason,
};
use std::io::Cursor;

/// Declared content-types that may secretly be SVG and deserve a sniff
/// before the unsupported-content-type verdict sticks
fn xml_ish(content_type: &str) -> bool {
    let token = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase();
    token.contains("xml") || token == "text/plain"
}

/// Validate a fetched payload and classify the outcome
///
/// Pure with respect to its inputs. Stages run in order and each can
/// short-circuit with a typed reason; see the module docs for the full
/// gate sequence.
pub async fn analyze(fetch: &FetchResult, url: &str, config: &AnalysisConfig) -> AnalysisResult {
    let mut metadata = AnalysisMetadata {
        format: None,
        width: None,
        height: None,
        size: fetch.buffer.len(),
        final_url: fetch.final_url.clone(),
        skipped: None,
        parse_error_continue: false,
    };

    // Gate 1: buffer presence
    if fetch.buffer.is_empty() {
        tracing::debug!(url = %url, "empty payload, no format to establish");
        return AnalysisResult::invalid(FailureReason::UnknownFormat, metadata);
    }

    // Gate 2: content-type admissibility, with one SVG exception
    let declared = fetch
        .headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case("content-type"))
        .map(|(_, v)| v.clone());
    if !policy::accept(&fetch.headers, &config.accept_binary_content_types) {
        let svg_override = declared
            .as_deref()
            .map(xml_ish)
            .unwrap_or(false)
            && sniff::looks_like_svg(&fetch.buffer);
        if svg_override {
            tracing::debug!(url = %url, "declared type rejected but payload sniffs as SVG, accepting");
            metadata.format = Some(ImageFormat::Svg);
        } else {
            tracing::debug!(
                url = %url,
                content_type = declared.as_deref().unwrap_or("<missing>"),
                "content-type rejected by acceptance policy"
            );
            return AnalysisResult::invalid(FailureReason::UnsupportedContentType, metadata);
        }
    }

    // Gate 3: minimum size
    if fetch.buffer.len() < config.min_buffer_size {
        tracing::debug!(
            url = %url,
            size = fetch.buffer.len(),
            min = config.min_buffer_size,
            "payload below minimum size"
        );
        return AnalysisResult::invalid(FailureReason::ContentTooSmall, metadata);
    }

    // Resolve a format from the declared type, else sniff magic bytes
    if metadata.format.is_none() {
        metadata.format = declared
            .as_deref()
            .and_then(|ct| ImageFormat::from_content_type(ct.split(';').next().unwrap_or("").trim()))
            .or_else(|| sniff::detect_format(&fetch.buffer));
    }

    // Gate 4: oversize fast path — skip metadata parsing entirely
    if fetch.buffer.len() > config.max_analyzable_bytes() {
        metadata.skipped = Some(SkipReason::TooLarge);
        return match metadata.format {
            Some(format) => {
                tracing::debug!(url = %url, %format, size = metadata.size, "oversize payload, metadata parsing skipped");
                AnalysisResult::valid(metadata)
            }
            None => AnalysisResult::invalid(FailureReason::UnknownFormat, metadata),
        };
    }

    // Gate 5: a concrete format must exist before metadata extraction
    let format = match metadata.format {
        Some(format) => format,
        None => {
            tracing::debug!(url = %url, "no format established by content-type or sniffing");
            return AnalysisResult::invalid(FailureReason::UnknownFormat, metadata);
        }
    };

    // Gate 6: metadata extraction with timeout (SVG carries no raster dimensions)
    if format != ImageFormat::Svg {
        match extract_dimensions(fetch.buffer.clone(), config).await {
            Ok((width, height)) => {
                metadata.width = Some(width);
                metadata.height = Some(height);
            }
            Err(MetadataFailure::Timeout) => {
                tracing::warn!(url = %url, timeout_ms = config.timeout.as_millis() as u64, "metadata extraction timed out");
                return AnalysisResult::invalid(FailureReason::ProcessingTimeout, metadata);
            }
            Err(MetadataFailure::Memory(message)) => {
                tracing::warn!(url = %url, error = %message, "metadata extraction hit allocation limits");
                return AnalysisResult::invalid(FailureReason::MemoryError, metadata);
            }
            Err(MetadataFailure::Parse(message)) => {
                if config.strict_validation {
                    tracing::warn!(url = %url, error = %message, "metadata parse failed under strict validation");
                    return AnalysisResult::invalid(FailureReason::MetadataError, metadata);
                }
                tracing::debug!(url = %url, error = %message, "metadata parse failed, continuing with unknown dimensions");
                metadata.parse_error_continue = true;
            }
        }
    }

    // Gate 7: dimension sanity
    if metadata.width == Some(0) || metadata.height == Some(0) {
        return AnalysisResult::invalid(FailureReason::InvalidDimensions, metadata);
    }

    AnalysisResult::valid(metadata)
}

/// Distinguished metadata extraction failures
enum MetadataFailure {
    Timeout,
    Memory(String),
    Parse(String),
}

/// Decode width/height on a blocking task, raced against the configured
/// timeout
///
/// On timeout the decode result, if it ever arrives, is simply discarded —
/// the blocking task is not cancelled, its output is ignored.
async fn extract_dimensions(
    buffer: Vec<u8>,
    config: &AnalysisConfig,
) -> Result<(u32, u32), MetadataFailure> {
    let decode = tokio::task::spawn_blocking(move || {
        image::ImageReader::new(Cursor::new(buffer))
            .with_guessed_format()
            .map_err(image::ImageError::IoError)?
            .into_dimensions()
    });

    match tokio::time::timeout(config.timeout, decode).await {
        Err(_elapsed) => Err(MetadataFailure::Timeout),
        Ok(Err(join_error)) => {
            // A panicked decode task is most plausibly an allocation blowup
            Err(MetadataFailure::Memory(join_error.to_string()))
        }
        Ok(Ok(Err(image::ImageError::Limits(limits)))) => {
            Err(MetadataFailure::Memory(limits.to_string()))
        }
        Ok(Ok(Err(other))) => Err(MetadataFailure::Parse(other.to_string())),
        Ok(Ok(Ok(dimensions))) => Ok(dimensions),
    }
}
