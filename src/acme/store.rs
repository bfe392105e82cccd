//! Persistence of issued certificates.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::acme::certificate::Certificate;
use crate::transport::BoxError;

/// Receives every successfully issued certificate.
#[async_trait]
pub trait CertificateStore: Send + Sync {
    async fn store(&self, certificate: &Certificate) -> Result<(), BoxError>;
}

/// Metadata written next to the PEM files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    pub serial_number: String,
    pub identifiers: Vec<String>,
    pub not_before: DateTime<Utc>,
    pub not_after: DateTime<Utc>,
    pub stored_at: DateTime<Utc>,
}

/// Writes `<serial>.crt.pem`, `<serial>.key.pem` and `<serial>.json` into a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    dir: PathBuf,
}

impl DirStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn load_record(&self, serial: &str) -> Result<CertificateRecord, BoxError> {
        let raw = tokio::fs::read(self.dir.join(format!("{}.json", serial))).await?;
        Ok(serde_json::from_slice(&raw)?)
    }
}

#[async_trait]
impl CertificateStore for DirStore {
    async fn store(&self, certificate: &Certificate) -> Result<(), BoxError> {
        let serial = &certificate.serial_number;
        tokio::fs::create_dir_all(&self.dir).await?;

        tokio::fs::write(
            self.dir.join(format!("{}.crt.pem", serial)),
            &certificate.pem_chain,
        )
        .await?;

        let key_path = self.dir.join(format!("{}.key.pem", serial));
        tokio::fs::write(&key_path, &certificate.private_key_pem).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&key_path, std::fs::Permissions::from_mode(0o600)).await?;
        }

        let record = CertificateRecord {
            serial_number: serial.clone(),
            identifiers: certificate.identifiers.clone(),
            not_before: certificate.not_before,
            not_after: certificate.not_after,
            stored_at: Utc::now(),
        };
        tokio::fs::write(
            self.dir.join(format!("{}.json", serial)),
            serde_json::to_vec_pretty(&record)?,
        )
        .await?;

        tracing::info!(
            serial = %serial,
            dir = %self.dir.display(),
            "Stored issued certificate"
        );
        Ok(())
    }
}
