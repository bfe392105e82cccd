//! Account key and JWS signing (RFC 7515, RFC 7638, RFC 8555 §6.2).

use std::fmt;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ring::rand::SystemRandom;
use ring::signature::{EcdsaKeyPair, KeyPair, ECDSA_P256_SHA256_FIXED_SIGNING};
use serde_json::{json, Value};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JoseError {
    #[error("key rejected: {0}")]
    KeyRejected(String),

    #[error("signing failed")]
    Signing,

    #[error("account key file {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// ECDSA P-256 account key.
pub struct AccountKey {
    key_pair: EcdsaKeyPair,
    pkcs8_der: Vec<u8>,
    rng: SystemRandom,
}

impl AccountKey {
    pub fn generate() -> Result<Self, JoseError> {
        let rng = SystemRandom::new();
        let pkcs8 = EcdsaKeyPair::generate_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, &rng)
            .map_err(|_| JoseError::KeyRejected("key generation failed".to_string()))?;
        Self::from_pkcs8(pkcs8.as_ref())
    }

    pub fn from_pkcs8(der: &[u8]) -> Result<Self, JoseError> {
        let rng = SystemRandom::new();
        let key_pair = EcdsaKeyPair::from_pkcs8(&ECDSA_P256_SHA256_FIXED_SIGNING, der, &rng)
            .map_err(|e| JoseError::KeyRejected(e.to_string()))?;
        Ok(Self {
            key_pair,
            pkcs8_der: der.to_vec(),
            rng,
        })
    }

    /// Load the key from `path`, or generate one and write it there.
    ///
    /// Without a path the key lives only in memory.
    pub fn load_or_create(path: Option<&Path>) -> Result<Self, JoseError> {
        let Some(path) = path else {
            tracing::info!("Generated ephemeral ACME account key");
            return Self::generate();
        };

        let io_err = |source| JoseError::Io {
            path: path.to_path_buf(),
            source,
        };

        if path.exists() {
            let der = std::fs::read(path).map_err(io_err)?;
            let key = Self::from_pkcs8(&der)?;
            tracing::info!(path = %path.display(), "Loaded ACME account key");
            return Ok(key);
        }

        let key = Self::generate()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(io_err)?;
        }
        std::fs::write(path, &key.pkcs8_der).map_err(io_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
                .map_err(io_err)?;
        }
        tracing::info!(path = %path.display(), "Generated and saved ACME account key");
        Ok(key)
    }

    pub fn pkcs8_der(&self) -> &[u8] {
        &self.pkcs8_der
    }

    fn coordinates(&self) -> (String, String) {
        // Uncompressed point: 0x04 || x (32 bytes) || y (32 bytes)
        let point = self.key_pair.public_key().as_ref();
        (
            URL_SAFE_NO_PAD.encode(&point[1..33]),
            URL_SAFE_NO_PAD.encode(&point[33..65]),
        )
    }

    /// Public key as a JWK.
    pub fn jwk(&self) -> Value {
        let (x, y) = self.coordinates();
        json!({
            "kty": "EC",
            "crv": "P-256",
            "x": x,
            "y": y,
        })
    }

    /// RFC 7638 thumbprint: SHA-256 over the members in lexicographic order.
    pub fn thumbprint(&self) -> String {
        let (x, y) = self.coordinates();
        let canonical = format!(r#"{{"crv":"P-256","kty":"EC","x":"{}","y":"{}"}}"#, x, y);
        let digest = ring::digest::digest(&ring::digest::SHA256, canonical.as_bytes());
        URL_SAFE_NO_PAD.encode(digest.as_ref())
    }

    /// `token "." thumbprint`, the value an HTTP-01 responder must serve.
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint())
    }

    pub fn sign(&self, data: &[u8]) -> Result<Vec<u8>, JoseError> {
        let sig = self
            .key_pair
            .sign(&self.rng, data)
            .map_err(|_| JoseError::Signing)?;
        Ok(sig.as_ref().to_vec())
    }

    /// Flattened JWS for an ACME POST.
    ///
    /// `kid` selects the key identification: the account URL once the
    /// account exists, the embedded JWK before that. A `None` payload
    /// produces a POST-as-GET (empty payload string).
    pub fn sign_jws(
        &self,
        url: &str,
        nonce: &str,
        kid: Option<&str>,
        payload: Option<&Value>,
    ) -> Result<Value, JoseError> {
        let header = match kid {
            Some(kid) => json!({ "alg": "ES256", "kid": kid, "nonce": nonce, "url": url }),
            None => json!({ "alg": "ES256", "jwk": self.jwk(), "nonce": nonce, "url": url }),
        };

        let protected = URL_SAFE_NO_PAD.encode(header.to_string().as_bytes());
        let payload = match payload {
            Some(p) => URL_SAFE_NO_PAD.encode(p.to_string().as_bytes()),
            None => String::new(),
        };

        let signing_input = format!("{}.{}", protected, payload);
        let signature = self.sign(signing_input.as_bytes())?;

        Ok(json!({
            "protected": protected,
            "payload": payload,
            "signature": URL_SAFE_NO_PAD.encode(signature),
        }))
    }
}

impl fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKey")
            .field("thumbprint", &self.thumbprint())
            .finish_non_exhaustive()
    }
}
