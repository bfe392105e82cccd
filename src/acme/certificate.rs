//! Issued certificate and leaf metadata extraction.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::X509Certificate;

#[derive(Debug, Error)]
pub enum CertificateError {
    #[error("certificate chain contains no PEM block: {0}")]
    Pem(String),

    #[error("leaf certificate is not valid X.509: {0}")]
    X509(String),

    #[error("certificate chain is not UTF-8")]
    Encoding,

    #[error("certificate validity timestamp out of range")]
    Timestamp,
}

/// A certificate as issued by the CA, with its private key.
///
/// `pem_chain` holds the downloaded bytes unmodified; only the leaf is
/// parsed, to read serial and validity.
#[derive(Clone)]
pub struct Certificate {
    pub identifiers: Vec<String>,
    /// Lowercase hex of the leaf's serial number bytes.
    pub serial_number: String,
    pub pem_chain: String,
    pub private_key_pem: String,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
}

impl Certificate {
    pub fn from_pem_chain(
        pem_chain: String,
        private_key_pem: String,
        identifiers: Vec<String>,
    ) -> Result<Self, CertificateError> {
        let der = leaf_der(&pem_chain)?;
        let (_, leaf) = x509_parser::parse_x509_certificate(&der)
            .map_err(|e| CertificateError::X509(e.to_string()))?;

        let serial_number = serial_hex(&leaf);
        let validity = leaf.validity();
        let not_before = DateTime::from_timestamp(validity.not_before.timestamp(), 0)
            .ok_or(CertificateError::Timestamp)?;
        let not_after = DateTime::from_timestamp(validity.not_after.timestamp(), 0)
            .ok_or(CertificateError::Timestamp)?;

        Ok(Self {
            identifiers,
            serial_number,
            pem_chain,
            private_key_pem,
            not_before,
            not_after,
        })
    }
}

impl fmt::Debug for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Certificate")
            .field("identifiers", &self.identifiers)
            .field("serial_number", &self.serial_number)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("private_key_pem", &"<redacted>")
            .finish()
    }
}

/// DER bytes of the first certificate in a PEM chain.
pub fn leaf_der(pem_chain: &str) -> Result<Vec<u8>, CertificateError> {
    let (_, pem) =
        parse_x509_pem(pem_chain.as_bytes()).map_err(|e| CertificateError::Pem(e.to_string()))?;
    Ok(pem.contents)
}

fn serial_hex(cert: &X509Certificate<'_>) -> String {
    cert.raw_serial().iter().map(|b| format!("{:02x}", b)).collect()
}
