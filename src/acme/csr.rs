//! CSR construction for finalize.

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair};

use crate::transport::BoxError;

/// Produces PKCS#10 DER for an order's identifiers.
pub trait CsrBuilder: Send + Sync {
    fn build(&self, identifiers: &[String], key: &KeyPair) -> Result<Vec<u8>, BoxError>;
}

/// rcgen-backed builder: CN is the first identifier, every identifier is a SAN.
#[derive(Debug, Default, Clone, Copy)]
pub struct RcgenCsrBuilder;

impl CsrBuilder for RcgenCsrBuilder {
    fn build(&self, identifiers: &[String], key: &KeyPair) -> Result<Vec<u8>, BoxError> {
        let common_name = identifiers.first().ok_or("CSR requires at least one identifier")?;

        let mut params = CertificateParams::new(identifiers.to_vec())?;
        let mut dn = DistinguishedName::new();
        dn.push(DnType::CommonName, common_name.as_str());
        params.distinguished_name = dn;

        let csr = params.serialize_request(key)?;
        Ok(csr.der().to_vec())
    }
}
