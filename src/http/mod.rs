//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP/TLS connection
//!     → server.rs (Axum setup, request ID, limits, tracing)
//!     → /acme/{*path}, /roots.pem → proxy::Forwarder → CA
//!     → /.well-known/acme-challenge/{token} → ChallengeStore
//!     → response.rs (relay upstream response or map proxy errors)
//!     → Send to client
//! ```

pub mod request;
pub mod response;
pub mod server;
pub mod tls;

pub use request::{request_id, X_REQUEST_ID};
pub use server::{challenge_router, AppState, HttpServer};
