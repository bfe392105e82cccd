use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::net::TcpListener;

use acme_proxy::acme::ChallengeStore;
use acme_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use acme_proxy::http::tls::load_tls_config;
use acme_proxy::lifecycle::{shutdown_on_signal, Shutdown};
use acme_proxy::observability::{init_logging, init_metrics};
use acme_proxy::transport::{PooledTransport, Transport};
use acme_proxy::HttpServer;

/// ACME front proxy for a step-ca style CA.
#[derive(Parser)]
#[command(name = "acme-proxy", version)]
struct Args {
    /// TOML configuration file; built-in defaults when omitted.
    #[arg(short, long, env = "ACME_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override upstream.ca_url.
    #[arg(long)]
    ca_url: Option<String>,

    /// Override listener.bind_address.
    #[arg(long)]
    bind: Option<String>,
}

fn resolve_config(args: &Args) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(ca_url) = &args.ca_url {
        config.upstream.ca_url = ca_url.clone();
    }
    if let Some(bind) = &args.bind {
        config.listener.bind_address = bind.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let config = resolve_config(&args)?;

    init_logging(&config.observability)?;
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = ?args.config,
        "acme-proxy starting"
    );
    tracing::info!(
        bind_address = %config.listener.bind_address,
        ca_url = %config.upstream.ca_url,
        max_total_connections = config.upstream.max_total_connections,
        max_connections_per_route = config.upstream.max_connections_per_route,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        let addr = config.observability.metrics_address.parse()?;
        init_metrics(addr)?;
    }

    let transport: Arc<dyn Transport> = Arc::new(PooledTransport::new(&config.upstream)?);

    let shutdown = Shutdown::new();
    let shutdown_rx = shutdown.subscribe();
    tokio::spawn(shutdown_on_signal(shutdown));

    let tls = match &config.listener.tls {
        Some(tls) => Some(load_tls_config(tls).await?),
        None => None,
    };
    let bind_address = config.listener.bind_address.clone();
    // The proxy never issues, so nothing publishes here; embedders share the
    // store with their SessionClient, and acme-cli serves its own.
    let server = HttpServer::new(config, transport, ChallengeStore::new());

    match tls {
        Some(tls) => {
            let addr = bind_address.parse()?;
            server.run_tls(addr, tls, shutdown_rx).await?;
        }
        None => {
            let listener = TcpListener::bind(&bind_address).await?;
            server.run(listener, shutdown_rx).await?;
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
