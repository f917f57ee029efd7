//! Magic-byte format detection
//!
//! Raster formats are detected through the `image` crate's signature
//! tables; SVG needs its own detector because it is XML text with optional
//! BOM, prolog, comments, and DOCTYPE before the root element.

use crate::types::ImageFormat;

/// How many leading bytes to examine when looking for an SVG root element
const SVG_SCAN_WINDOW: usize = 1024;

/// Detect an image format from a buffer's leading bytes
///
/// Returns `None` when the buffer matches none of the supported formats
/// (JPEG/PNG/GIF/WEBP/BMP/TIFF/SVG).
pub fn detect_format(buffer: &[u8]) -> Option<ImageFormat> {
    if buffer.is_empty() {
        return None;
    }
    if let Ok(format) = image::guess_format(buffer) {
        if let Some(known) = ImageFormat::from_image_crate_format(format) {
            return Some(known);
        }
    }
    if looks_like_svg(buffer) {
        return Some(ImageFormat::Svg);
    }
    None
}

/// Heuristic SVG detection: an `<svg` root element near the start of the
/// buffer, allowing a UTF-8 BOM, XML prolog, comments, and whitespace
pub fn looks_like_svg(buffer: &[u8]) -> bool {
    let window = &buffer[..buffer.len().min(SVG_SCAN_WINDOW)];
    let text = String::from_utf8_lossy(window);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    if !trimmed.starts_with('<') {
        return false;
    }
    trimmed.to_lowercase().contains("<svg")
}
