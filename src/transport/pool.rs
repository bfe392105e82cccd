//! Pooled HTTP transport backed by reqwest.
//!
//! # Responsibilities
//! - Own the single outbound HTTP client for the process
//! - Bound concurrent upstream requests in total and per route
//! - Translate reqwest failures into [`TransportError`]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use url::Url;

use crate::config::UpstreamConfig;
use crate::transport::{OutboundRequest, Transport, TransportError, UpstreamResponse};

/// Reqwest client with bounded connection usage.
///
/// The total limit is a single semaphore; routes (scheme, host, port) get
/// their own semaphore created on first use. Permits are held for the whole
/// round-trip, body included.
#[derive(Debug)]
pub struct PooledTransport {
    client: reqwest::Client,
    total: Arc<Semaphore>,
    routes: DashMap<String, Arc<Semaphore>>,
    max_per_route: usize,
}

impl PooledTransport {
    /// Build the transport from upstream configuration.
    pub fn new(config: &UpstreamConfig) -> Result<Self, TransportError> {
        if config.trust_all_certs {
            tracing::warn!(ca_url = %config.ca_url, "Upstream certificate verification disabled");
        }

        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(config.trust_all_certs)
            .pool_max_idle_per_host(config.max_connections_per_route)
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .timeout(Duration::from_secs(config.request_timeout_secs))
            // 3xx responses are relayed, not followed.
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| TransportError::Request(e.into()))?;

        tracing::info!(
            max_total = config.max_total_connections,
            max_per_route = config.max_connections_per_route,
            "Upstream connection pool configured"
        );

        Ok(Self {
            client,
            total: Arc::new(Semaphore::new(config.max_total_connections)),
            routes: DashMap::new(),
            max_per_route: config.max_connections_per_route,
        })
    }

    /// Permits currently free in the global pool.
    pub fn available_permits(&self) -> usize {
        self.total.available_permits()
    }

    fn route_limit(&self, route: &str) -> Arc<Semaphore> {
        self.routes
            .entry(route.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.max_per_route)))
            .clone()
    }
}

/// Pool key for a URL: `scheme://host:port`.
pub fn route_key(url: &Url) -> String {
    format!(
        "{}://{}:{}",
        url.scheme(),
        url.host_str().unwrap_or_default(),
        url.port_or_known_default().unwrap_or_default()
    )
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.into())
    } else if err.is_connect() {
        TransportError::Connect(err.into())
    } else {
        TransportError::Request(err.into())
    }
}

#[async_trait]
impl Transport for PooledTransport {
    async fn execute(&self, request: OutboundRequest) -> Result<UpstreamResponse, TransportError> {
        let url = Url::parse(&request.url).map_err(|e| TransportError::InvalidUrl {
            url: request.url.clone(),
            reason: e.to_string(),
        })?;

        let route = self.route_limit(&route_key(&url));
        let _route_permit = route
            .acquire_owned()
            .await
            .map_err(|_| TransportError::PoolClosed)?;
        let _total_permit = self
            .total
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| TransportError::PoolClosed)?;

        let mut builder = self
            .client
            .request(request.method.into(), url)
            .headers(request.headers);
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(classify)?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response
            .bytes()
            .await
            .map_err(|e| TransportError::Body(e.into()))?;

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
