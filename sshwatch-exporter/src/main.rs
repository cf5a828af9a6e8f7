//! Prometheus exporter sampling remote hosts over SSH.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::watch;
use tracing::{error, info, warn};

use sshwatch_collector::{FleetCollector, FleetSettings, MetricRegistry, SshExecutorFactory};
use sshwatch_exporter::{ExporterConfig, HttpServer};

/// Prometheus exporter sampling remote hosts over SSH.
#[derive(Parser, Debug)]
#[command(name = "sshwatch-exporter")]
#[command(about = "Export CPU, memory, disk, process and file metrics of SSH hosts")]
#[command(version)]
struct Args {
    /// Path to configuration file (JSON5 format).
    #[arg(short, long, default_value = "sshwatch.json5")]
    config: PathBuf,

    /// HTTP listen address (overrides config).
    #[arg(long)]
    listen: Option<String>,

    /// Log level (trace, debug, info, warn, error). Overrides config.
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = ExporterConfig::load_from_file(&args.config)
        .with_context(|| format!("Failed to load config from {}", args.config.display()))?;

    // Override listen address from CLI
    if let Some(listen) = args.listen {
        config.exporter.listen = listen;
        config.validate()?;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    sshwatch_common::init_tracing(&config.logging)?;

    info!(config = %args.config.display(), "Starting SSH exporter");

    let targets = config.targets()?;
    if targets.is_empty() {
        warn!("No hosts configured, only scrape metadata will be exported");
    }

    let listen_addr: SocketAddr = config
        .exporter
        .listen
        .parse()
        .map_err(|e| anyhow::anyhow!("Invalid listen address: {}", e))?;

    let collector = Arc::new(FleetCollector::new(
        targets,
        Arc::new(MetricRegistry::standard()),
        SshExecutorFactory::new(config.ssh.clone()),
        FleetSettings::from(&config.ssh),
    ));

    let http_server = HttpServer::new(
        collector.clone(),
        listen_addr,
        config.exporter.path.clone(),
        config.exporter.auth(),
    );

    // Create shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut http_task = tokio::spawn(async move { http_server.run(shutdown_rx).await });

    // Wait for shutdown signal, or for the server to give up on its own
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = terminate() => {
            info!("Received SIGTERM, shutting down...");
        }
        result = &mut http_task => {
            return match result {
                Ok(Ok(())) => Err(anyhow::anyhow!("HTTP server stopped unexpectedly")),
                Ok(Err(e)) => Err(e),
                Err(e) => Err(anyhow::anyhow!("HTTP server task failed: {}", e)),
            };
        }
    }

    // Signal shutdown
    shutdown_tx.send(true)?;

    // Let an in-flight scrape finish its CPU sample
    match tokio::time::timeout(Duration::from_secs(5), http_task).await {
        Ok(Ok(Err(e))) => error!("HTTP server error: {}", e),
        Ok(Err(e)) => error!("HTTP server task failed: {}", e),
        Err(_) => warn!("HTTP server did not stop within 5s"),
        Ok(Ok(Ok(()))) => {}
    }

    info!(hosts = collector.hosts().len(), "Exporter stopped");
    Ok(())
}

async fn terminate() {
    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        std::future::pending::<()>().await;
    }
}
