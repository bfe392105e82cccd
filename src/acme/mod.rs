//! ACME issuance subsystem (RFC 8555).
//!
//! # Data Flow
//! ```text
//! SessionClient::issue(identifiers)
//!     → session.rs (account → order → authz → challenge → finalize → download)
//!     → client.rs (directory, nonces, badNonce retry)
//!     → jose.rs (ES256 flattened JWS, key authorization)
//!     → proxy::Forwarder → Transport → CA
//!
//! Collaborators:
//!     → responder.rs (publish / withdraw HTTP-01 key authorizations)
//!     → csr.rs (PKCS#10 for finalize)
//!     → store.rs (persist issued certificates)
//! ```
//!
//! # Design Decisions
//! - Waits on the CA go through the bounded polling controller only
//! - CA error bodies are always captured as problem documents
//! - The account key never leaves the process except as the operator's PKCS#8 file
//! - Collaborators are trait objects so tests and deployments can swap them

pub mod certificate;
pub mod client;
pub mod csr;
pub mod error;
pub mod jose;
pub mod responder;
pub mod session;
pub mod store;
pub mod types;

pub use certificate::{Certificate, CertificateError};
pub use client::{AcmeClient, AcmeResponse};
pub use csr::{CsrBuilder, RcgenCsrBuilder};
pub use error::{AcmeError, AcmeResult, FailureKind, PollStage};
pub use jose::{AccountKey, JoseError};
pub use responder::{ChallengeResponder, ChallengeStore};
pub use session::{SessionClient, SessionSettings};
pub use store::{CertificateRecord, CertificateStore, DirStore};
pub use types::{
    Account, Authorization, AuthorizationStatus, Challenge, ChallengeStatus, Directory,
    Identifier, Order, OrderStatus, Problem, RevocationReason,
};
