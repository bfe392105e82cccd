//! Response mapping.
//!
//! # Responsibilities
//! - Relay upstream responses (status, filtered headers, body) unchanged
//! - Map proxy failures to 405 / 502 with a problem document body

use axum::body::Body;
use axum::http::header::{ALLOW, CONTENT_TYPE};
use axum::http::HeaderValue;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::proxy::{ForwardedResponse, ProxyError};

const ALLOWED_METHODS: &str = "GET, POST, PUT, DELETE, PATCH";

impl IntoResponse for ForwardedResponse {
    fn into_response(self) -> Response {
        let mut response = Response::new(Body::from(self.body));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers;
        response
    }
}

impl IntoResponse for ProxyError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = json!({
            "type": "about:blank",
            "title": status.canonical_reason().unwrap_or("Error"),
            "status": status.as_u16(),
            "detail": self.to_string(),
        });

        let mut response = Response::new(Body::from(body.to_string()));
        *response.status_mut() = status;
        response.headers_mut().insert(
            CONTENT_TYPE,
            HeaderValue::from_static("application/problem+json"),
        );
        if matches!(self, ProxyError::UnsupportedMethod(_)) {
            response
                .headers_mut()
                .insert(ALLOW, HeaderValue::from_static(ALLOWED_METHODS));
        }
        response
    }
}
