//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Issuance step waiting on the CA:
//!     → polling.rs (fetch, check terminal, sleep fixed interval, repeat)
//!     → Polled::Succeeded / Polled::Failed / PollError::Timeout
//! ```
//!
//! # Design Decisions
//! - Every wait on the CA is bounded by an attempt count
//! - Fixed interval, no backoff; the CA's own pace dominates
//! - Fetch errors abort immediately, they are never retried here

pub mod polling;

pub use polling::{poll_until, PollError, PollPolicy, Polled};
