//! Proxy error definitions.

use axum::http::StatusCode;
use thiserror::Error;

use crate::transport::TransportError;

/// Errors raised while forwarding a request to the CA.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Verb outside GET/POST/PUT/DELETE/PATCH. Raised before any I/O.
    #[error("unsupported HTTP method: {0}")]
    UnsupportedMethod(String),

    /// Network or TLS failure reaching the CA. Never retried here.
    #[error("upstream transport error: {0}")]
    Transport(#[from] TransportError),
}

impl ProxyError {
    /// Status code reported to the downstream client.
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProxyError::UnsupportedMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
            ProxyError::Transport(_) => StatusCode::BAD_GATEWAY,
        }
    }
}
