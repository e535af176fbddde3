//! Kiosk engine entry point.

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use asset_kiosk::config::loader::{load_config, load_default_config};
use asset_kiosk::{HttpServer, Shutdown};

#[derive(Parser, Debug)]
#[command(name = "asset-kiosk", about = "Secure asset checkout kiosk engine")]
struct Args {
    /// Path to the TOML configuration file. Defaults plus environment
    /// overrides are used when omitted.
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Override the listener bind address.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize tracing subscriber
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "asset_kiosk=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("asset-kiosk v0.1.0 starting");

    let mut config = match &args.config {
        Some(path) => load_config(path)?,
        None => load_default_config()?,
    };
    if let Some(bind) = args.bind {
        config.listener.bind_address = bind;
    }

    tracing::info!(
        bind_address = %config.listener.bind_address,
        inventory_url = %config.inventory.base_url,
        request_timeout_secs = config.listener.request_timeout_secs,
        "Configuration loaded"
    );
    if config.inventory.api_token.is_empty() {
        tracing::warn!("No inventory API token configured; remote calls will be rejected");
    }

    if config.observability.metrics_enabled {
        if let Ok(addr) = config.observability.metrics_address.parse() {
            asset_kiosk::observability::metrics::init_metrics(addr);
        } else {
            tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            );
        }
    }

    let listener = TcpListener::bind(&config.listener.bind_address).await?;
    tracing::info!(address = %listener.local_addr()?, "Listening for connections");

    let shutdown = Shutdown::new();
    let server = HttpServer::new(config)?;
    let server_shutdown = shutdown.subscribe();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            return;
        }
        shutdown.trigger();
    });

    server.run(listener, server_shutdown).await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
