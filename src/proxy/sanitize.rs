//! Header and Content-Type sanitization at the proxy boundary.
//!
//! # Responsibilities
//! - Strip transport-hop headers in both directions
//! - Normalize the inbound `Content-Type` (defaults, wildcards, malformed values)
//!
//! # Design Decisions
//! - Pure functions; identical input always yields identical output
//! - Hop headers are regenerated by the outbound transport, never copied
//! - Response headers are filtered only, never content-type normalized

use std::borrow::Cow;

use axum::http::header::CONTENT_TYPE;
use axum::http::{HeaderMap, HeaderValue};

/// Header names that never cross the proxy in either direction.
pub const DENIED_HEADERS: [&str; 4] = ["host", "connection", "transfer-encoding", "content-length"];

/// Any header starting with this prefix is dropped as well.
pub const DENIED_PREFIX: &str = "proxy-";

/// Used when the inbound content type is missing, blank, malformed or `*/*`.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

const OCTET_STREAM: &str = "application/octet-stream";

/// Returns true if `name` is a hop-scoped header (case-insensitive).
pub fn is_denied(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    DENIED_HEADERS.contains(&lower.as_str()) || lower.starts_with(DENIED_PREFIX)
}

/// Copy every header except the deny-listed ones. Repeated headers are kept.
pub fn filter_hop_headers(headers: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(headers.len());
    for (name, value) in headers.iter() {
        if !is_denied(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

/// Build the header set sent upstream.
///
/// The result never contains a deny-listed header and always carries
/// exactly one `Content-Type`.
pub fn sanitize_request_headers(headers: &HeaderMap) -> HeaderMap {
    let mut outbound = filter_hop_headers(headers);
    let inbound = headers.get(CONTENT_TYPE);
    outbound.remove(CONTENT_TYPE);

    let inbound_str = inbound.and_then(|v| v.to_str().ok());
    let value = match (inbound, normalize_content_type(inbound_str)) {
        // Well-formed values go through byte-for-byte.
        (Some(original), Cow::Borrowed(_)) => original.clone(),
        (_, normalized) => HeaderValue::from_str(&normalized)
            .unwrap_or_else(|_| HeaderValue::from_static(DEFAULT_CONTENT_TYPE)),
    };
    outbound.insert(CONTENT_TYPE, value);
    outbound
}

/// Normalize an inbound `Content-Type` value.
///
/// Returns `Cow::Borrowed(value)` when the value is passed through
/// unchanged, `Cow::Owned` when a replacement was chosen.
pub fn normalize_content_type(value: Option<&str>) -> Cow<'_, str> {
    let raw = match value {
        Some(v) if !v.trim().is_empty() => v,
        _ => return Cow::Owned(DEFAULT_CONTENT_TYPE.to_string()),
    };

    let media_type = raw.split(';').next().unwrap_or(raw).trim();
    if media_type == "*" {
        return Cow::Owned(DEFAULT_CONTENT_TYPE.to_string());
    }

    let Some((top, sub)) = media_type.split_once('/') else {
        return Cow::Owned(DEFAULT_CONTENT_TYPE.to_string());
    };
    let (top, sub) = (top.trim(), sub.trim());
    if top != "*" && sub != "*" {
        return Cow::Borrowed(raw);
    }

    let replacement = match (top.to_ascii_lowercase().as_str(), sub) {
        ("*", "*") => DEFAULT_CONTENT_TYPE,
        ("application", "*") => DEFAULT_CONTENT_TYPE,
        ("text", "*") => "text/plain",
        ("image", "*") => "image/png",
        _ => OCTET_STREAM,
    };
    Cow::Owned(replacement.to_string())
}
