//! Chunk Relay - stateless relay for Resumable.js chunked uploads

use clap::Parser;
use chunk_relay::config::Config;
use chunk_relay::metrics::server::MetricsServer;
use chunk_relay::{ChunkRelay, RelayServer};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// Chunk Relay - forwards upload chunks to remote storage with their byte ranges
#[derive(Parser, Debug)]
#[command(name = "chunk-relay")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;
    let _guard = init_logging(&config, &args.log_level)?;

    info!(version = chunk_relay::VERSION, "Starting chunk-relay");
    info!(path = ?args.config, "Loaded configuration");

    let mut metrics_server = None;
    if config.metrics.enabled {
        let mut server = MetricsServer::from_config(&config.metrics);
        server.start().await?;
        metrics_server = Some(server);
    }

    let relay = Arc::new(ChunkRelay::from_config(&config)?);
    info!(
        endpoint = %config.upstream.endpoint,
        max_chunk_size = config.relay.max_chunk_size,
        "Relay ready"
    );

    let server = RelayServer::bind(&config.server, relay).await?;
    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    if let Some(mut server) = metrics_server {
        server.shutdown().await;
    }

    info!("Shutdown complete");
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(
    config: &Config,
    level: &str,
) -> anyhow::Result<Option<chunk_relay::tracing::TracingGuard>> {
    match &config.tracing {
        Some(tracing_config) => Ok(Some(chunk_relay::tracing::init_subscriber(
            tracing_config,
            level,
        )?)),
        None => {
            init_fmt(level)?;
            Ok(None)
        }
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(_config: &Config, level: &str) -> anyhow::Result<Option<()>> {
    init_fmt(level)?;
    Ok(None)
}

fn init_fmt(level: &str) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .json()
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}
