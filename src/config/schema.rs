//! Configuration schema definitions.
//!
//! All sections default so a minimal (or empty) file is a valid
//! configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::resilience::PollPolicy;

/// Root configuration for the ACME front proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TLS, request limits).
    pub listener: ListenerConfig,

    /// The CA being fronted and how to reach it.
    pub upstream: UpstreamConfig,

    /// Issuance settings.
    pub acme: AcmeConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl ProxyConfig {
    /// Full URL of the CA's ACME directory.
    pub fn directory_url(&self) -> String {
        crate::proxy::target_url(&self.upstream.ca_url, &self.acme.directory_path, None)
    }
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional TLS configuration.
    pub tls: Option<TlsConfig>,

    /// Largest request body accepted for forwarding.
    pub max_body_bytes: usize,

    /// Deadline for a whole inbound request, upstream round-trip included.
    pub request_timeout_secs: u64,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            tls: None,
            max_body_bytes: 1024 * 1024,
            request_timeout_secs: 30,
        }
    }
}

/// TLS configuration for the listener.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TlsConfig {
    /// Path to certificate file (PEM).
    pub cert_path: PathBuf,

    /// Path to private key file (PEM).
    pub key_path: PathBuf,
}

/// Upstream CA connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Base URL of the CA (scheme, host, optional port).
    pub ca_url: String,

    /// Accept any upstream certificate. Only for private CAs whose root is
    /// not in the system store.
    pub trust_all_certs: bool,

    /// Upper bound on concurrent upstream requests.
    pub max_total_connections: usize,

    /// Upper bound on concurrent requests to one scheme/host/port.
    pub max_connections_per_route: usize,

    pub connect_timeout_secs: u64,

    pub request_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            ca_url: "https://step.it.com".to_string(),
            trust_all_certs: false,
            max_total_connections: 100,
            max_connections_per_route: 20,
            connect_timeout_secs: 5,
            request_timeout_secs: 30,
        }
    }
}

/// Issuance configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AcmeConfig {
    /// Directory path on the CA, appended to `upstream.ca_url`.
    pub directory_path: String,

    /// Contact registered with the account (`mailto:` is added).
    pub contact_email: String,

    /// PKCS#8 DER account key. Generated on first use when missing;
    /// without a path the key is ephemeral.
    pub account_key_path: Option<PathBuf>,

    /// Where issued certificates are written. Nothing is stored when unset.
    pub certificate_dir: Option<PathBuf>,

    pub challenge_polling: PollPolicy,

    pub order_polling: PollPolicy,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            directory_path: "/acme/acme/directory".to_string(),
            contact_email: "admin@example.com".to_string(),
            account_key_path: None,
            certificate_dir: None,
            challenge_polling: PollPolicy::challenge_default(),
            order_polling: PollPolicy::order_default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProxyConfig::default();
        assert_eq!(config.listener.bind_address, "0.0.0.0:8080");
        assert_eq!(config.listener.max_body_bytes, 1_048_576);
        assert_eq!(config.upstream.ca_url, "https://step.it.com");
        assert!(!config.upstream.trust_all_certs);
        assert_eq!(config.upstream.max_total_connections, 100);
        assert_eq!(config.upstream.max_connections_per_route, 20);
        assert_eq!(config.acme.challenge_polling, PollPolicy::challenge_default());
        assert_eq!(config.acme.order_polling, PollPolicy::order_default());
        assert_eq!(
            config.directory_url(),
            "https://step.it.com/acme/acme/directory"
        );
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: ProxyConfig = toml::from_str(
            r#"
            [upstream]
            ca_url = "https://ca.internal:9000/"

            [acme.order_polling]
            interval_ms = 500
            max_attempts = 4

            [observability]
            log_format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.directory_url(), "https://ca.internal:9000/acme/acme/directory");
        assert_eq!(config.upstream.max_total_connections, 100);
        assert_eq!(config.acme.order_polling.max_attempts, 4);
        assert_eq!(config.acme.challenge_polling, PollPolicy::challenge_default());
        assert_eq!(config.observability.log_format, LogFormat::Json);
    }
}
