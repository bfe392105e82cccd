//! ACME resource objects (RFC 8555 §7.1) and problem documents.

use std::fmt;
use std::str::FromStr;

use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

use crate::acme::error::AcmeError;

/// Challenge type this client knows how to satisfy.
pub const HTTP_01: &str = "http-01";

/// Problem type the CA returns when a nonce was rejected.
pub const BAD_NONCE: &str = "urn:ietf:params:acme:error:badNonce";

/// Problem type for requests that carry no problem document of their own.
pub const ABOUT_BLANK: &str = "about:blank";

/// Directory resource listing the CA's endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Directory {
    pub new_nonce: String,
    pub new_account: String,
    pub new_order: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revoke_cert: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_change: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Identifier {
    pub fn dns(name: impl Into<String>) -> Self {
        Self {
            kind: "dns".to_string(),
            value: name.into(),
        }
    }
}

/// Order lifecycle. Ranks only ever increase within one issuance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Ready,
    Processing,
    Valid,
    Invalid,
}

impl OrderStatus {
    /// Position in the pending → ready → processing → terminal sequence.
    pub fn rank(self) -> u8 {
        match self {
            OrderStatus::Pending => 0,
            OrderStatus::Ready => 1,
            OrderStatus::Processing => 2,
            OrderStatus::Valid | OrderStatus::Invalid => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Valid | OrderStatus::Invalid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Ready => "ready",
            OrderStatus::Processing => "processing",
            OrderStatus::Valid => "valid",
            OrderStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub status: OrderStatus,
    #[serde(default)]
    pub identifiers: Vec<Identifier>,
    #[serde(default)]
    pub authorizations: Vec<String>,
    pub finalize: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub certificate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<String>,
    /// Order URL, taken from the `Location` header on creation.
    #[serde(skip)]
    pub location: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthorizationStatus {
    Pending,
    Valid,
    Invalid,
    Deactivated,
    Expired,
    Revoked,
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthorizationStatus::Pending => "pending",
            AuthorizationStatus::Valid => "valid",
            AuthorizationStatus::Invalid => "invalid",
            AuthorizationStatus::Deactivated => "deactivated",
            AuthorizationStatus::Expired => "expired",
            AuthorizationStatus::Revoked => "revoked",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authorization {
    pub identifier: Identifier,
    pub status: AuthorizationStatus,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
    #[serde(default)]
    pub wildcard: bool,
}

impl Authorization {
    /// The HTTP-01 challenge offered for this identifier, if any.
    pub fn http01(&self) -> Option<&Challenge> {
        self.challenges.iter().find(|c| c.kind == HTTP_01)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Processing,
    Valid,
    Invalid,
}

impl ChallengeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, ChallengeStatus::Valid | ChallengeStatus::Invalid)
    }
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Processing => "processing",
            ChallengeStatus::Valid => "valid",
            ChallengeStatus::Invalid => "invalid",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type")]
    pub kind: String,
    pub url: String,
    #[serde(default)]
    pub token: String,
    pub status: ChallengeStatus,
    /// Present only once the challenge is invalid.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Problem>,
}

/// RFC 7807 problem document as returned by the CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default = "about_blank")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

fn about_blank() -> String {
    ABOUT_BLANK.to_string()
}

impl Problem {
    /// Interpret an error response body.
    ///
    /// Bodies that are not a problem document keep their text as `detail`.
    pub fn from_body(status: StatusCode, body: &[u8]) -> Self {
        match serde_json::from_slice::<Problem>(body) {
            Ok(mut problem) => {
                problem.status.get_or_insert(status.as_u16());
                problem
            }
            Err(_) => {
                let text = String::from_utf8_lossy(body).trim().to_string();
                Problem {
                    kind: about_blank(),
                    detail: (!text.is_empty()).then_some(text),
                    status: Some(status.as_u16()),
                }
            }
        }
    }

    /// Untyped problem for failures the CA reported without a document.
    pub fn untyped(detail: impl Into<String>) -> Self {
        Problem {
            kind: about_blank(),
            detail: Some(detail.into()),
            status: None,
        }
    }

    pub fn is_bad_nonce(&self) -> bool {
        self.kind == BAD_NONCE
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}: {}", self.kind, detail),
            None => f.write_str(&self.kind),
        }
    }
}

/// Account binding acknowledged by the CA.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    /// Account URL, used as `kid` in every later request.
    pub location: String,
    pub contact_email: String,
}

/// RFC 5280 §5.3.1 CRL reason codes accepted by `revokeCert`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevocationReason {
    Unspecified,
    KeyCompromise,
    CaCompromise,
    AffiliationChanged,
    Superseded,
    CessationOfOperation,
    CertificateHold,
    RemoveFromCrl,
    PrivilegeWithdrawn,
    AaCompromise,
}

impl RevocationReason {
    pub fn code(self) -> u8 {
        match self {
            RevocationReason::Unspecified => 0,
            RevocationReason::KeyCompromise => 1,
            RevocationReason::CaCompromise => 2,
            RevocationReason::AffiliationChanged => 3,
            RevocationReason::Superseded => 4,
            RevocationReason::CessationOfOperation => 5,
            RevocationReason::CertificateHold => 6,
            // 7 is unassigned.
            RevocationReason::RemoveFromCrl => 8,
            RevocationReason::PrivilegeWithdrawn => 9,
            RevocationReason::AaCompromise => 10,
        }
    }
}

impl FromStr for RevocationReason {
    type Err = AcmeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "unspecified" => Ok(RevocationReason::Unspecified),
            "keycompromise" => Ok(RevocationReason::KeyCompromise),
            "cacompromise" => Ok(RevocationReason::CaCompromise),
            "affiliationchanged" => Ok(RevocationReason::AffiliationChanged),
            "superseded" => Ok(RevocationReason::Superseded),
            "cessationofoperation" => Ok(RevocationReason::CessationOfOperation),
            "certificatehold" => Ok(RevocationReason::CertificateHold),
            "removefromcrl" => Ok(RevocationReason::RemoveFromCrl),
            "privilegewithdrawn" => Ok(RevocationReason::PrivilegeWithdrawn),
            "aacompromise" => Ok(RevocationReason::AaCompromise),
            _ => Err(AcmeError::UnknownRevocationReason(s.to_string())),
        }
    }
}
