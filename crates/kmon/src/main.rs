//! kmon entry point.

use anyhow::{Context, Result};
use clap::Parser;
use kmon::{KmonConfig, Supervisor};
use kmon_monitoring::{init_tracing, MetricsRegistry, MetricsServer};
use std::path::PathBuf;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(
    name = "kmon",
    about = "Black-box latency monitor for Kafka clusters",
    version
)]
struct Args {
    /// Enable debug logging
    #[arg(long)]
    debug: bool,

    /// Port for the Prometheus metrics server
    #[arg(long = "metrics.port", default_value = "2112")]
    metrics_port: u16,

    /// Path to the JSON configuration file
    #[arg(long = "config.path", default_value = "config.json")]
    config_path: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.debug);

    info!("kmon v{}", env!("CARGO_PKG_VERSION"));
    info!("Using config file: {}", args.config_path.display());
    let config = KmonConfig::load(&args.config_path)
        .with_context(|| format!("failed to load config from {}", args.config_path.display()))?;

    let registry = MetricsRegistry::new();
    let metrics_server = MetricsServer::bind(registry, args.metrics_port)?;
    tokio::spawn(async move {
        if let Err(e) = metrics_server.run().await {
            error!("Metrics server error: {}", e);
        }
    });

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown signal received");
        let _ = shutdown_tx.send(true);
    });

    let supervisor = Supervisor::new(config).context("failed to build supervisor")?;
    supervisor.run(shutdown_rx).await;

    info!("kmon stopped");
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(_) => {
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
