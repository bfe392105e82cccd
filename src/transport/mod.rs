//! Outbound transport to the CA.
//!
//! # Data Flow
//! ```text
//! Forwarder / ACME session
//!     → OutboundRequest (sanitized headers, optional body)
//!     → Transport::execute (pool.rs: bounded permits + reqwest client)
//!     → UpstreamResponse (status, raw headers, buffered body)
//! ```
//!
//! # Design Decisions
//! - The transport is constructed once at startup and handed to every
//!   consumer as `Arc<dyn Transport>`; there is no global client
//! - Connection usage is bounded globally and per upstream route
//! - A single round-trip per call; retry policy lives with the caller

pub mod pool;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use bytes::Bytes;
use thiserror::Error;

use crate::proxy::ProxyMethod;

pub use pool::PooledTransport;

/// Boxed error carried as the cause of a transport failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A request ready to leave the process.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: ProxyMethod,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Bytes>,
}

/// A fully buffered upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Errors reaching the upstream CA.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("invalid upstream URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("failed to connect to upstream: {0}")]
    Connect(#[source] BoxError),

    #[error("upstream request timed out: {0}")]
    Timeout(#[source] BoxError),

    #[error("upstream request failed: {0}")]
    Request(#[source] BoxError),

    #[error("failed to read upstream response body: {0}")]
    Body(#[source] BoxError),

    #[error("upstream connection pool is closed")]
    PoolClosed,
}

impl TransportError {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TransportError::InvalidUrl { .. } => "invalid_url",
            TransportError::Connect(_) => "connect",
            TransportError::Timeout(_) => "timeout",
            TransportError::Request(_) => "request",
            TransportError::Body(_) => "body",
            TransportError::PoolClosed => "pool_closed",
        }
    }
}

/// A single request/response exchange with the upstream.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn execute(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError>;
}
