//! Protocol-preserving proxy subsystem.
//!
//! # Data Flow
//! ```text
//! Inbound request (axum handler or ACME session client)
//!     → method.rs (closed verb set, reject anything else before I/O)
//!     → sanitize.rs (drop hop-scoped headers, normalize Content-Type)
//!     → forwarder.rs (single round-trip through the shared Transport)
//!     → sanitize.rs (filter hop-scoped headers off the upstream response)
//!     → status + headers + body relayed unchanged
//! ```
//!
//! # Design Decisions
//! - Exactly one upstream (the CA); the target URL is base + path + query
//! - No retries at this layer; callers own retry policy
//! - Response bodies are never inspected or rewritten

pub mod error;
pub mod forwarder;
pub mod method;
pub mod sanitize;

pub use error::ProxyError;
pub use forwarder::{target_url, ForwardedResponse, Forwarder};
pub use method::ProxyMethod;
