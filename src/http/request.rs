//! Request identification.
//!
//! Every inbound request carries an `x-request-id`: the client's own, or a
//! UUID v4 assigned at the edge. The same value is echoed on the response.

use axum::http::HeaderMap;

pub const X_REQUEST_ID: &str = "x-request-id";

/// The request ID from `headers`, or `"unknown"` if absent.
pub fn request_id(headers: &HeaderMap) -> &str {
    headers
        .get(X_REQUEST_ID)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("unknown")
}
