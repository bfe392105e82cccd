//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the ACME, roots and challenge handlers
//! - Wire up middleware (request ID, body limit, timeout, tracing)
//! - Bind server to a plain or TLS listener
//! - Drain in-flight requests on shutdown

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, FromRef, Path, State},
    http::{header, HeaderMap, Method, Request, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get},
    Router,
};
use axum_server::tls_rustls::RustlsConfig;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::acme::ChallengeStore;
use crate::config::ProxyConfig;
use crate::http::request::request_id;
use crate::proxy::{target_url, Forwarder};
use crate::transport::Transport;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub forwarder: Forwarder,
    pub ca_base_url: Arc<str>,
    pub challenges: ChallengeStore,
}

/// HTTP front end for the CA.
pub struct HttpServer {
    router: Router,
    config: ProxyConfig,
}

impl HttpServer {
    /// `challenges` backs `/.well-known/acme-challenge/{token}`. Hand a clone
    /// of the same store to a [`crate::SessionClient`] running in this
    /// process as its responder and the CA can validate through this server.
    pub fn new(config: ProxyConfig, transport: Arc<dyn Transport>, challenges: ChallengeStore) -> Self {
        let state = AppState {
            forwarder: Forwarder::new(transport),
            ca_base_url: Arc::from(config.upstream.ca_url.as_str()),
            challenges,
        };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    ///
    /// Layer order, outermost first: request ID assignment, tracing,
    /// request ID propagation, timeout, body limit.
    #[allow(deprecated)]
    fn build_router(config: &ProxyConfig, state: AppState) -> Router {
        let listener = &config.listener;
        Router::new()
            .route("/acme/{*path}", any(proxy_handler))
            .route("/roots.pem", any(roots_handler))
            .route("/.well-known/acme-challenge/{token}", get(challenge_handler))
            .with_state(state)
            .layer(DefaultBodyLimit::disable())
            .layer(RequestBodyLimitLayer::new(listener.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(listener.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http().make_span_with(|req: &Request<Body>| {
                tracing::info_span!(
                    "request",
                    method = %req.method(),
                    uri = %req.uri(),
                    request_id = %request_id(req.headers()),
                )
            }))
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for serving on a custom listener.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Serve plain HTTP until `shutdown` fires, then drain.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, ca_url = %self.config.upstream.ca_url, "HTTP server starting");

        axum::serve(listener, self.router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received, draining connections");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Serve HTTPS on `addr` until `shutdown` fires, then drain.
    pub async fn run_tls(
        self,
        addr: SocketAddr,
        tls: RustlsConfig,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        tracing::info!(address = %addr, ca_url = %self.config.upstream.ca_url, "HTTPS server starting");

        let handle = axum_server::Handle::new();
        let drain = handle.clone();
        tokio::spawn(async move {
            let _ = shutdown.recv().await;
            tracing::info!("Shutdown signal received, draining connections");
            drain.graceful_shutdown(Some(SHUTDOWN_GRACE));
        });

        axum_server::bind_rustls(addr, tls)
            .handle(handle)
            .serve(self.router.into_make_service())
            .await?;

        tracing::info!("HTTPS server stopped");
        Ok(())
    }
}

/// Router serving only the HTTP-01 challenge path.
pub fn challenge_router(challenges: ChallengeStore) -> Router {
    Router::new()
        .route("/.well-known/acme-challenge/{token}", get(challenge_handler))
        .with_state(challenges)
}

/// Relay `/acme/**` to the CA: same method, path, query, headers and body.
async fn proxy_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let target = target_url(&state.ca_base_url, uri.path(), uri.query());
    tracing::debug!(
        request_id = %request_id(&headers),
        method = %method,
        target = %target,
        "Proxying request"
    );

    match state.forwarder.forward(&method, &target, &headers, body).await {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    }
}

/// Relay the CA's root bundle. GET only; a GET route alone would also
/// answer HEAD.
async fn roots_handler(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
) -> Response {
    if method != Method::GET {
        tracing::debug!(method = %method, "Rejecting non-GET roots request");
        return (StatusCode::METHOD_NOT_ALLOWED, [(header::ALLOW, "GET")]).into_response();
    }

    let target = target_url(&state.ca_base_url, uri.path(), uri.query());
    match state
        .forwarder
        .forward(&Method::GET, &target, &headers, Bytes::new())
        .await
    {
        Ok(response) => response.into_response(),
        Err(e) => e.into_response(),
    }
}

async fn challenge_handler(
    State(store): State<ChallengeStore>,
    Path(token): Path<String>,
) -> Response {
    match store.get(&token) {
        Some(key_authorization) => (
            [(header::CONTENT_TYPE, "text/plain")],
            key_authorization,
        )
            .into_response(),
        None => {
            tracing::debug!(token = %token, "Unknown challenge token");
            StatusCode::NOT_FOUND.into_response()
        }
    }
}

impl FromRef<AppState> for ChallengeStore {
    fn from_ref(state: &AppState) -> Self {
        state.challenges.clone()
    }
}
