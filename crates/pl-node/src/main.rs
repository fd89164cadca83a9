//! Peerlink Node Daemon
//!
//! Runs the local control-plane listener and the peer transport
//! acceptor for this machine.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use pl_core::config::{self, NodeConfig};
use pl_node::pidfile;

#[derive(Parser)]
#[command(name = "pl-node")]
#[command(about = "peerlink node daemon")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Control port (overrides config)
    #[arg(long)]
    control_port: Option<u16>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| args.log_level.clone()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Peerlink node starting...");

    // Load configuration
    let mut config = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                NodeConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            NodeConfig::default()
        }
    };

    if let Some(port) = args.control_port {
        config.control_port = port;
    }

    // Refuse to race another daemon for the same ports
    let pid_path = pidfile::default_pid_path();
    if let Ok(Some(pid)) = pidfile::read_pid_file(&pid_path) {
        if pidfile::is_process_alive(pid) {
            anyhow::bail!("Another node is already running (PID {})", pid);
        }
    }
    let _pid_guard = pidfile::PidFileGuard::new(pid_path, std::process::id())?;

    // Cancellation on Ctrl+C / SIGTERM
    let cancel = CancellationToken::new();
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install signal handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {
                tracing::info!("Received Ctrl+C, initiating shutdown...");
            }
            _ = terminate => {
                tracing::info!("Received SIGTERM, initiating shutdown...");
            }
        }

        cancel_clone.cancel();
    });

    pl_node::daemon::run(config, cancel)
        .await
        .context("Node failed")?;
    Ok(())
}
