//! Stateless request forwarding to the CA.
//!
//! # Responsibilities
//! - Reject unsupported verbs before any I/O
//! - Sanitize outbound headers, attach the body only where it belongs
//! - Execute exactly one round-trip through the shared transport
//! - Relay status and body unchanged, with hop headers filtered

use std::sync::Arc;
use std::time::Instant;

use axum::http::{HeaderMap, Method, StatusCode};
use bytes::Bytes;

use crate::observability::metrics;
use crate::proxy::error::ProxyError;
use crate::proxy::method::ProxyMethod;
use crate::proxy::sanitize::{filter_hop_headers, sanitize_request_headers};
use crate::transport::{OutboundRequest, Transport};

/// Response relayed back to the caller.
#[derive(Debug, Clone)]
pub struct ForwardedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Forwards requests to the CA through a shared [`Transport`].
///
/// Cheap to clone; safe to use from any number of tasks at once.
#[derive(Clone)]
pub struct Forwarder {
    transport: Arc<dyn Transport>,
}

impl Forwarder {
    /// Create a forwarder sending every request through `transport`.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    /// Forward an inbound request given its raw HTTP method.
    pub async fn forward(
        &self,
        method: &Method,
        target_url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ForwardedResponse, ProxyError> {
        let method = match ProxyMethod::try_from(method) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(method = %method, target = %target_url, "Rejecting unsupported method");
                metrics::record_forward_error("unsupported_method");
                return Err(e);
            }
        };
        self.send(method, target_url, headers, body).await
    }

    /// Forward with an already validated method.
    pub async fn send(
        &self,
        method: ProxyMethod,
        target_url: &str,
        headers: &HeaderMap,
        body: Bytes,
    ) -> Result<ForwardedResponse, ProxyError> {
        let start_time = Instant::now();
        let body = if method.carries_body() && !body.is_empty() {
            Some(body)
        } else {
            None
        };

        tracing::info!(
            method = %method,
            target = %target_url,
            body_bytes = body.as_ref().map_or(0, Bytes::len),
            "Forwarding request"
        );

        let request = OutboundRequest {
            method,
            url: target_url.to_string(),
            headers: sanitize_request_headers(headers),
            body,
        };

        let response = match self.transport.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::error!(method = %method, target = %target_url, error = %e, "Upstream transport error");
                metrics::record_forward_error(e.kind());
                return Err(ProxyError::Transport(e));
            }
        };

        tracing::info!(
            status = response.status.as_u16(),
            body_bytes = response.body.len(),
            "Upstream responded"
        );
        metrics::record_forward(method.as_str(), response.status.as_u16(), start_time);

        Ok(ForwardedResponse {
            status: response.status,
            headers: filter_hop_headers(&response.headers),
            body: response.body,
        })
    }
}

/// Upstream URL for an inbound path: `{base}{path}` plus `?{query}` when present.
///
/// The query string is appended verbatim. A single trailing `/` on the
/// base is dropped so `https://ca/` and `https://ca` behave the same.
pub fn target_url(base: &str, path: &str, query: Option<&str>) -> String {
    let base = base.strip_suffix('/').unwrap_or(base);
    match query {
        Some(q) if !q.is_empty() => format!("{}{}?{}", base, path, q),
        _ => format!("{}{}", base, path),
    }
}
