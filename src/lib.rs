//! ACME front proxy for a step-ca style certificate authority.
//!
//! # Architecture Overview
//!
//! ```text
//!     ACME client ──▶ http::server ──▶ proxy::Forwarder ──▶ transport::PooledTransport ──▶ CA
//!                          │
//!                          └── /.well-known/acme-challenge ◀── acme::ChallengeStore
//!                                                                   ▲
//!     operator ──▶ acme::SessionClient ──(signed JWS)──▶ proxy::Forwarder
//!                        │
//!                        └── resilience::poll_until (challenge, order)
//! ```
//!
//! The proxy relays traffic unchanged apart from hop-scoped headers and
//! wildcard content types. The session client drives a full RFC 8555
//! issuance through the same forwarder and connection pool.

// Core subsystems
pub mod config;
pub mod http;
pub mod proxy;
pub mod transport;

// ACME issuance
pub mod acme;

// Cross-cutting concerns
pub mod lifecycle;
pub mod observability;
pub mod resilience;

pub use acme::{AcmeError, Certificate, ChallengeStore, SessionClient};
pub use config::schema::ProxyConfig;
pub use http::HttpServer;
pub use lifecycle::Shutdown;
pub use proxy::{Forwarder, ProxyError};
pub use transport::{PooledTransport, Transport};
