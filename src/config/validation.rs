//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (pool sizes, polling attempts, timeouts > 0)
//! - Check that URLs and socket addresses parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;
use crate::resilience::PollPolicy;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field}: '{value}' is not a valid socket address")]
    InvalidAddress { field: &'static str, value: String },

    #[error("upstream.ca_url: '{value}' is not a valid http(s) URL")]
    InvalidCaUrl { value: String },

    #[error("acme.directory_path must start with '/', got '{0}'")]
    InvalidDirectoryPath(String),

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("upstream.max_connections_per_route ({per_route}) exceeds max_total_connections ({total})")]
    RouteExceedsTotal { per_route: usize, total: usize },

    #[error("acme.contact_email '{0}' is not an email address")]
    InvalidContact(String),

    #[error("observability.log_level '{0}' is not a valid filter")]
    InvalidLogLevel(String),
}

/// Check a parsed configuration, collecting every problem found.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidAddress {
            field: "listener.bind_address",
            value: config.listener.bind_address.clone(),
        });
    }
    if config.listener.max_body_bytes == 0 {
        errors.push(ValidationError::Zero("listener.max_body_bytes"));
    }
    if config.listener.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero("listener.request_timeout_secs"));
    }

    let upstream = &config.upstream;
    match Url::parse(&upstream.ca_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {}
        _ => errors.push(ValidationError::InvalidCaUrl {
            value: upstream.ca_url.clone(),
        }),
    }
    if upstream.max_total_connections == 0 {
        errors.push(ValidationError::Zero("upstream.max_total_connections"));
    }
    if upstream.max_connections_per_route == 0 {
        errors.push(ValidationError::Zero("upstream.max_connections_per_route"));
    }
    if upstream.max_connections_per_route > upstream.max_total_connections {
        errors.push(ValidationError::RouteExceedsTotal {
            per_route: upstream.max_connections_per_route,
            total: upstream.max_total_connections,
        });
    }
    if upstream.connect_timeout_secs == 0 {
        errors.push(ValidationError::Zero("upstream.connect_timeout_secs"));
    }
    if upstream.request_timeout_secs == 0 {
        errors.push(ValidationError::Zero("upstream.request_timeout_secs"));
    }

    let acme = &config.acme;
    if !acme.directory_path.starts_with('/') {
        errors.push(ValidationError::InvalidDirectoryPath(acme.directory_path.clone()));
    }
    if !is_plausible_email(&acme.contact_email) {
        errors.push(ValidationError::InvalidContact(acme.contact_email.clone()));
    }
    check_policy(&acme.challenge_polling, "acme.challenge_polling.max_attempts", &mut errors);
    check_policy(&acme.order_polling, "acme.order_polling.max_attempts", &mut errors);

    let observability = &config.observability;
    if tracing_subscriber::EnvFilter::try_new(&observability.log_level).is_err() {
        errors.push(ValidationError::InvalidLogLevel(observability.log_level.clone()));
    }
    if observability.metrics_enabled
        && observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::InvalidAddress {
            field: "observability.metrics_address",
            value: observability.metrics_address.clone(),
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn check_policy(policy: &PollPolicy, field: &'static str, errors: &mut Vec<ValidationError>) {
    if policy.max_attempts == 0 {
        errors.push(ValidationError::Zero(field));
    }
}

fn is_plausible_email(value: &str) -> bool {
    match value.split_once('@') {
        Some((local, domain)) => !local.is_empty() && !domain.is_empty() && !value.contains(char::is_whitespace),
        None => false,
    }
}
