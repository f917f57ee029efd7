//! Final save step: format conversion, disk write, statistics counting
//!
//! `save_image` is the only place `stats.successful` and `format_counts`
//! are incremented, and counts are always keyed by the format of the bytes
//! actually written (post-conversion), never the format the URL claimed.
//! Ordinary save problems become bookkeeping; a filesystem write failure is
//! critical and must propagate, because a failed write means data-loss risk
//! for the whole run.

use crate::config::FormatConfig;
use crate::error::{Error, Result};
use crate::sniff;
use crate::stats::StatsHandle;
use crate::types::{AnalysisMetadata, ImageFormat, ImageInfo};
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use url::Url;

/// Shared collection of saved-image records for downstream bookkeeping
pub type ImageInfoList = Arc<Mutex<Vec<ImageInfo>>>;

/// Maximum rename attempts when resolving filename collisions
const MAX_RENAME_ATTEMPTS: u32 = 9999;

/// Convert (when configured), write to disk, and count the final format
///
/// The original format comes from the analyzer's metadata when available,
/// avoiding a re-sniff; conversion failures log and fall back to writing
/// the original bytes rather than dropping the item.
pub async fn save_image(
    buffer: Vec<u8>,
    path: &Path,
    url: &str,
    stats: &StatsHandle,
    format_config: &FormatConfig,
    analysis: Option<&AnalysisMetadata>,
    info_list: Option<&ImageInfoList>,
) -> Result<()> {
    let original = analysis
        .and_then(|meta| meta.format)
        .or_else(|| sniff::detect_format(&buffer));

    let Some(original) = original else {
        tracing::warn!(url = %url, "no format derivable at save time, dropping item");
        stats.record_failure(url);
        return Ok(());
    };

    let (final_buffer, final_path) = match conversion_target(format_config, original) {
        Some(target) => match convert(buffer.clone(), target).await {
            Ok(converted) => {
                let rewritten = path.with_extension(target.extension());
                (converted, rewritten)
            }
            Err(error) => {
                tracing::warn!(url = %url, error = %error, "conversion failed, keeping original format");
                (buffer, path.to_path_buf())
            }
        },
        None => (buffer, path.to_path_buf()),
    };

    let final_path = unique_path(&final_path);
    if let Some(parent) = final_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| Error::CriticalWrite {
                path: final_path.clone(),
                source,
            })?;
    }
    tokio::fs::write(&final_path, &final_buffer)
        .await
        .map_err(|source| Error::CriticalWrite {
            path: final_path.clone(),
            source,
        })?;

    // Count under the format of the bytes actually on disk
    let final_format = sniff::detect_format(&final_buffer).unwrap_or(original);
    stats.record_success(final_format.as_str());
    tracing::info!(
        url = %url,
        path = %final_path.display(),
        format = %final_format,
        bytes = final_buffer.len(),
        "image saved"
    );

    if let Some(info_list) = info_list {
        let record = ImageInfo {
            url: url.to_string(),
            path: final_path,
            format: final_format,
            width: analysis.and_then(|m| m.width),
            height: analysis.and_then(|m| m.height),
            size: final_buffer.len(),
        };
        if let Ok(mut list) = info_list.lock() {
            list.push(record);
        }
    }

    Ok(())
}

/// The format to convert to, or `None` when no conversion applies
///
/// SVG is never converted: it is vector text the raster pipeline cannot
/// represent.
fn conversion_target(config: &FormatConfig, original: ImageFormat) -> Option<ImageFormat> {
    if !config.enable_conversion {
        return None;
    }
    let target = config.convert_to.as_format()?;
    if target == original || original == ImageFormat::Svg {
        return None;
    }
    Some(target)
}

/// Re-encode a buffer into `target` on a blocking task
async fn convert(buffer: Vec<u8>, target: ImageFormat) -> Result<Vec<u8>> {
    let crate_format = target
        .to_image_crate_format()
        .ok_or_else(|| Error::Other(format!("no encoder for {target}")))?;
    let converted = tokio::task::spawn_blocking(move || -> std::result::Result<Vec<u8>, image::ImageError> {
        let decoded = image::load_from_memory(&buffer)?;
        // JPEG has no alpha channel
        let decoded = if crate_format == image::ImageFormat::Jpeg {
            image::DynamicImage::ImageRgb8(decoded.to_rgb8())
        } else {
            decoded
        };
        let mut out = Cursor::new(Vec::new());
        decoded.write_to(&mut out, crate_format)?;
        Ok(out.into_inner())
    })
    .await
    .map_err(|e| Error::Other(format!("conversion task failed: {e}")))??;
    Ok(converted)
}

/// Resolve filename collisions by suffixing ` (1)`, ` (2)`, ...
pub fn unique_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("image");
    let extension = path.extension().and_then(|e| e.to_str());
    let parent = path.parent().unwrap_or_else(|| Path::new("."));

    for i in 1..=MAX_RENAME_ATTEMPTS {
        let name = match extension {
            Some(ext) => format!("{stem} ({i}).{ext}"),
            None => format!("{stem} ({i})"),
        };
        let candidate = parent.join(name);
        if !candidate.exists() {
            return candidate;
        }
    }
    // Astronomically unlikely; overwrite rather than grow forever
    path.to_path_buf()
}

/// Derive an on-disk filename for a URL, preferring the URL's path segment
pub fn derive_file_name(url: &str, format: Option<ImageFormat>) -> String {
    let from_path = Url::parse(url).ok().and_then(|parsed| {
        parsed
            .path_segments()
            .and_then(|segments| segments.last().map(str::to_string))
            .filter(|segment| !segment.is_empty())
    });

    let mut name = from_path.unwrap_or_else(|| "image".to_string());
    // data: URIs and querystring-only names need a stable fallback
    if name.len() > 100 || name.contains(':') {
        name = "image".to_string();
    }
    let has_extension = Path::new(&name).extension().is_some();
    match (has_extension, format) {
        (false, Some(format)) => format!("{name}.{}", format.extension()),
        _ => name,
    }
}
