//! Listener TLS configuration.

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;

/// Load the listener certificate and key (PEM).
pub async fn load_tls_config(tls: &TlsConfig) -> Result<RustlsConfig, std::io::Error> {
    for (what, path) in [("certificate", &tls.cert_path), ("private key", &tls.key_path)] {
        if !path.exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("TLS {} not found: {}", what, path.display()),
            ));
        }
    }
    RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path).await
}
