use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;
use tokio::net::TcpListener;

use acme_proxy::acme::{CertificateStore, ChallengeStore, DirStore, RevocationReason, SessionClient};
use acme_proxy::config::{load_config, validate_config, ConfigError, ProxyConfig};
use acme_proxy::http::challenge_router;
use acme_proxy::lifecycle::Shutdown;
use acme_proxy::observability::init_logging;
use acme_proxy::transport::{PooledTransport, Transport};

#[derive(Parser)]
#[command(name = "acme-cli")]
#[command(about = "Issue and revoke certificates against the configured CA", long_about = None)]
struct Cli {
    /// TOML configuration file shared with the proxy.
    #[arg(short, long, env = "ACME_PROXY_CONFIG")]
    config: Option<PathBuf>,

    /// Override upstream.ca_url.
    #[arg(long)]
    ca_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the CA's ACME directory
    Directory,
    /// Register (or look up) the ACME account
    Account,
    /// Run a full HTTP-01 issuance for one or more DNS names
    Issue {
        #[arg(required = true)]
        domains: Vec<String>,

        /// Address serving /.well-known/acme-challenge during validation
        #[arg(long, default_value = "0.0.0.0:80")]
        http01_bind: String,

        /// Write <serial>.crt.pem, <serial>.key.pem and <serial>.json here instead of stdout
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Revoke a PEM certificate
    Revoke {
        cert: PathBuf,

        /// RFC 5280 reason name, e.g. keyCompromise
        #[arg(long, default_value = "unspecified")]
        reason: String,
    },
}

fn resolve_config(cli: &Cli) -> Result<ProxyConfig, ConfigError> {
    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => ProxyConfig::default(),
    };
    if let Some(ca_url) = &cli.ca_url {
        config.upstream.ca_url = ca_url.clone();
    }
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = resolve_config(&cli)?;
    init_logging(&config.observability)?;

    let transport: Arc<dyn Transport> = Arc::new(PooledTransport::new(&config.upstream)?);
    let challenges = ChallengeStore::new();
    let session = SessionClient::from_config(&config, transport, Arc::new(challenges.clone()))?;

    match cli.command {
        Commands::Directory => {
            let directory = session.directory().await?;
            println!("{}", serde_json::to_string_pretty(directory)?);
        }
        Commands::Account => {
            let account = session.account().await?;
            println!("{}", serde_json::to_string_pretty(account)?);
        }
        Commands::Issue {
            domains,
            http01_bind,
            out,
        } => {
            let shutdown = Shutdown::new();
            let listener = TcpListener::bind(&http01_bind).await?;
            tracing::info!(address = %listener.local_addr()?, "HTTP-01 responder listening");

            let mut stop = shutdown.subscribe();
            let responder = tokio::spawn(async move {
                axum::serve(listener, challenge_router(challenges))
                    .with_graceful_shutdown(async move {
                        let _ = stop.recv().await;
                    })
                    .await
            });

            let result = session.issue(&domains).await;
            shutdown.trigger();
            responder.await??;
            let certificate = result?;

            match out {
                Some(dir) => {
                    let store = DirStore::new(dir);
                    store.store(&certificate).await.map_err(|e| -> Box<dyn std::error::Error> { e })?;
                    println!(
                        "{}",
                        serde_json::to_string_pretty(&json!({
                            "serial_number": certificate.serial_number,
                            "identifiers": certificate.identifiers,
                            "not_before": certificate.not_before,
                            "not_after": certificate.not_after,
                            "directory": store.dir(),
                        }))?
                    );
                }
                None => {
                    print!("{}", certificate.pem_chain);
                    print!("{}", certificate.private_key_pem);
                }
            }
        }
        Commands::Revoke { cert, reason } => {
            let reason: RevocationReason = reason.parse()?;
            let pem = tokio::fs::read_to_string(&cert).await?;
            session.revoke(&pem, reason).await?;
            println!("Revoked {} ({:?})", cert.display(), reason);
        }
    }

    Ok(())
}
