//! Content acceptance policy for fetched responses
//!
//! A pure decision over response headers: is this payload plausibly an
//! image we should keep, an HTML page we must reject (and treat as a page,
//! not an error), or a generic binary we accept only when configured to be
//! lenient? The same policy runs at the fetch boundary and again, with a
//! narrower header set, inside the analyzer's SVG exception handling.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Generic binary MIME types accepted under lenient binary handling
const GENERIC_BINARY_TYPES: &[&str] = &[
    "application/octet-stream",
    "binary/octet-stream",
    "application/binary",
    "application/x-binary",
];

/// How to treat responses whose content-type is missing or generically binary
///
/// Deserializes from `false`, `true`, or an array of MIME strings, matching
/// the shape of the `accept_binary_content_types` config surface.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AcceptBinary {
    /// `false`: reject non-image types; `true`: accept a missing
    /// content-type or a fixed whitelist of generic binary MIME types
    Flag(bool),
    /// Accept exactly these (lower-cased) MIME base tokens; an empty string
    /// entry means "a missing content-type is acceptable"
    List(Vec<String>),
}

impl Default for AcceptBinary {
    fn default() -> Self {
        AcceptBinary::Flag(false)
    }
}

/// Extract the base token of a content-type value (before any `;` parameter)
fn base_token(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_lowercase()
}

/// Case-insensitive header lookup
fn header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

/// Decide whether response headers indicate acceptable image/binary content
///
/// Rules, in order:
/// 1. `text/html` base token rejects — the payload is a page, not an image.
/// 2. `content-disposition: attachment` accepts regardless of content-type.
/// 3. An `image/` base token accepts.
/// 4. Otherwise `accept_binary` decides how lenient to be about missing or
///    generic binary content-types.
///
/// The policy fails closed: anything it cannot place is rejected.
pub fn accept(headers: &HashMap<String, String>, accept_binary: &AcceptBinary) -> bool {
    let content_type = header(headers, "content-type").map(base_token);

    if let Some(ref token) = content_type {
        if token.contains("text/html") {
            return false;
        }
    }

    if let Some(disposition) = header(headers, "content-disposition") {
        if disposition.to_lowercase().contains("attachment") {
            return true;
        }
    }

    if let Some(ref token) = content_type {
        if token.starts_with("image/") {
            return true;
        }
    }

    match accept_binary {
        AcceptBinary::Flag(true) => match content_type {
            None => true,
            Some(token) => token.is_empty() || GENERIC_BINARY_TYPES.contains(&token.as_str()),
        },
        AcceptBinary::Flag(false) => false,
        AcceptBinary::List(allowed) => match content_type {
            None => allowed.iter().any(|entry| entry.is_empty()),
            Some(token) => allowed
                .iter()
                .any(|entry| entry.to_lowercase() == token),
        },
    }
}
