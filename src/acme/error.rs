//! Issuance error definitions.

use std::fmt;

use thiserror::Error;

use crate::acme::certificate::CertificateError;
use crate::acme::jose::JoseError;
use crate::acme::types::Problem;
use crate::proxy::ProxyError;
use crate::transport::BoxError;

/// Which wait ran out of attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStage {
    Challenge,
    Order,
}

impl PollStage {
    pub fn as_str(self) -> &'static str {
        match self {
            PollStage::Challenge => "challenge",
            PollStage::Order => "order",
        }
    }
}

impl fmt::Display for PollStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse failure classification reported to callers and metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    NoSupportedChallenge,
    ChallengeFailed,
    OrderFailed,
    PollingTimeout,
    CaRejected,
    Transport,
    Protocol,
    Local,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FailureKind::NoSupportedChallenge => "no_supported_challenge",
            FailureKind::ChallengeFailed => "challenge_failed",
            FailureKind::OrderFailed => "order_failed",
            FailureKind::PollingTimeout => "polling_timeout",
            FailureKind::CaRejected => "ca_rejected",
            FailureKind::Transport => "transport",
            FailureKind::Protocol => "protocol",
            FailureKind::Local => "local",
        }
    }
}

/// Errors that end an issuance (or another session operation).
#[derive(Debug, Error)]
pub enum AcmeError {
    #[error("at least one identifier is required")]
    NoIdentifiers,

    /// The request never produced a CA response.
    #[error(transparent)]
    Proxy(#[from] ProxyError),

    /// Non-success response from the CA, body kept as a problem document.
    #[error("CA rejected request with HTTP {status}: {problem}")]
    Ca { status: u16, problem: Problem },

    #[error("no http-01 challenge offered for {domain}")]
    NoSupportedChallenge { domain: String },

    #[error("challenge for {domain} failed: {ca_error}")]
    ChallengeFailed { domain: String, ca_error: Problem },

    #[error("order failed: {ca_error}")]
    OrderFailed { ca_error: Problem },

    /// Retryable: `order_url` can be handed to `SessionClient::resume_order`.
    #[error("{stage} polling gave up after {attempts} attempts (last status: {last_status})")]
    PollingTimeout {
        stage: PollStage,
        attempts: u32,
        last_status: String,
        order_url: Option<String>,
        challenge_url: Option<String>,
    },

    /// The CA answered with something RFC 8555 does not allow here.
    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("account key error: {0}")]
    Jose(#[from] JoseError),

    #[error("unknown revocation reason '{0}'")]
    UnknownRevocationReason(String),

    #[error("failed to generate certificate key: {0}")]
    Key(#[from] rcgen::Error),

    #[error("failed to build CSR: {0}")]
    Csr(#[source] BoxError),

    #[error("challenge responder failed: {0}")]
    Responder(#[source] BoxError),

    #[error("failed to store issued certificate: {0}")]
    Store(#[source] BoxError),

    #[error(transparent)]
    Certificate(#[from] CertificateError),
}

impl AcmeError {
    pub fn kind(&self) -> FailureKind {
        match self {
            AcmeError::NoSupportedChallenge { .. } => FailureKind::NoSupportedChallenge,
            AcmeError::ChallengeFailed { .. } => FailureKind::ChallengeFailed,
            AcmeError::OrderFailed { .. } => FailureKind::OrderFailed,
            AcmeError::PollingTimeout { .. } => FailureKind::PollingTimeout,
            AcmeError::Ca { .. } => FailureKind::CaRejected,
            AcmeError::Proxy(_) => FailureKind::Transport,
            AcmeError::Protocol(_) | AcmeError::Certificate(_) => FailureKind::Protocol,
            AcmeError::NoIdentifiers
            | AcmeError::Jose(_)
            | AcmeError::UnknownRevocationReason(_)
            | AcmeError::Key(_)
            | AcmeError::Csr(_)
            | AcmeError::Responder(_)
            | AcmeError::Store(_) => FailureKind::Local,
        }
    }

    /// Only a polling timeout may succeed if the caller simply tries again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AcmeError::PollingTimeout { .. })
    }

    pub(crate) fn protocol(context: &str, err: impl fmt::Display) -> Self {
        AcmeError::Protocol(format!("{}: {}", context, err))
    }
}

/// Result type for ACME operations.
pub type AcmeResult<T> = Result<T, AcmeError>;
