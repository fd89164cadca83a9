//! peerlink CLI
//!
//! Single binary for all peerlink operations:
//! - Node daemon (`serve`/`stop`)
//! - Interactive shells (`connect`)
//! - Port forwards (`forward start`/`forward stop`)
//! - Session management (`list`, `status`, `kill`)
//! - Configuration (`config`)

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use peerlink::commands;
use peerlink::control::ControlClient;
use peerlink::output::{print_error, print_info, print_success, print_warning};
use pl_core::config::{self, NodeConfig};
use pl_node::pidfile;

#[derive(Parser)]
#[command(name = "peerlink")]
#[command(author, version, about = "Peer-to-peer tunnel broker")]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the local node daemon
    /// Alias: start
    #[command(alias = "start")]
    Serve {
        /// Run in foreground (don't daemonize)
        #[arg(short, long)]
        foreground: bool,
    },

    /// Stop the local node daemon
    Stop,

    /// Open an interactive shell on a remote peer
    Connect {
        /// Remote target as [user@]peer
        target: String,

        /// Private key for authentication
        #[arg(short = 'i', long)]
        key: Option<PathBuf>,

        /// Install the local public key instead of opening a shell
        #[arg(long)]
        copy_id: bool,
    },

    /// Manage port forwards
    Forward {
        #[command(subcommand)]
        action: ForwardAction,
    },

    /// List active sessions
    List {
        /// Show a single session by pair id
        session: Option<String>,
    },

    /// Show node status
    Status,

    /// Terminate sessions by pair id
    Kill {
        /// Pair id(s) to kill
        #[arg(required = true)]
        sessions: Vec<String>,

        /// Skip confirmation
        #[arg(short, long)]
        force: bool,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ForwardAction {
    /// Start a port forward and keep it running
    Start {
        /// Local port to listen on
        #[arg(short = 'L', long)]
        local: u16,

        /// Remote port to forward to
        #[arg(short = 'R', long)]
        remote: u16,

        /// Remote peer owning the forwarded service
        target: String,
    },

    /// Stop a port forward by pair id
    Stop {
        /// Pair id shown by `peerlink list`
        pair_id: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a specific config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// Show the config directory path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging based on verbosity
    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let config = load_config(cli.config.as_ref())?;
    let client = ControlClient::new(config.clone());

    match cli.command {
        Commands::Serve { foreground } => {
            run_node(foreground, cli.config.as_ref(), config).await?;
        }

        Commands::Stop => {
            stop_node()?;
        }

        Commands::Connect {
            target,
            key,
            copy_id,
        } => {
            commands::connect_command(&config, &target, key, copy_id).await?;
        }

        Commands::Forward { action } => match action {
            ForwardAction::Start {
                local,
                remote,
                target,
            } => {
                commands::forward_start(&config, local, remote, &target).await?;
            }
            ForwardAction::Stop { pair_id } => {
                commands::forward_stop(&config, &pair_id).await?;
            }
        },

        Commands::List { session } => {
            commands::list_command(&client, session.as_deref()).await?;
        }

        Commands::Status => {
            commands::status_command(&client, &config).await?;
        }

        Commands::Kill { sessions, force } => {
            commands::kill_command(&client, &sessions, force).await?;
        }

        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
            ConfigAction::Get { key } => commands::config_get(cli.config.as_ref(), &key)?,
            ConfigAction::Set { key, value } => {
                commands::config_set(cli.config.as_ref(), &key, &value)?
            }
            ConfigAction::Path => commands::config_path()?,
        },
    }

    Ok(())
}

/// Load configuration, falling back to defaults when no file exists
fn load_config(config_path: Option<&PathBuf>) -> Result<NodeConfig> {
    if let Some(path) = config_path {
        return config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path));
    }

    let default_path = config::default_config_path();
    if default_path.exists() {
        Ok(config::load_config(&default_path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
            NodeConfig::default()
        }))
    } else {
        Ok(NodeConfig::default())
    }
}

/// Run the node daemon, in-process or detached
async fn run_node(
    foreground: bool,
    config_path: Option<&PathBuf>,
    config: NodeConfig,
) -> Result<()> {
    // Refuse to race a node that is already up
    let pid_path = pidfile::default_pid_path();
    if let Ok(Some(pid)) = pidfile::read_pid_file(&pid_path) {
        if pidfile::is_process_alive(pid) {
            print_warning(&format!("Node is already running (PID {})", pid));
            return Ok(());
        }
    }

    if !foreground {
        // Daemonize by re-spawning ourselves
        let exe = std::env::current_exe()?;
        let mut cmd = std::process::Command::new(exe);
        cmd.arg("serve").arg("--foreground");
        if let Some(path) = config_path {
            cmd.arg("--config").arg(path);
        }

        let child = cmd
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .spawn()?;

        print_success(&format!("Node started (PID: {})", child.id()));
        return Ok(());
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

    print_info(&format!(
        "Node running at {} (peer port {})",
        config.control_address(),
        config.peer_port
    ));
    pl_node::daemon::run(config, cancel).await.context("Node failed")?;
    Ok(())
}

/// Stop a daemonized node via its PID file
fn stop_node() -> Result<()> {
    let pid_path = pidfile::default_pid_path();
    let Some(pid) = pidfile::read_pid_file(&pid_path)? else {
        print_warning("Node is not running");
        return Ok(());
    };

    if !pidfile::is_process_alive(pid) {
        print_warning("Node is not running (stale PID file)");
        pidfile::remove_pid_file(&pid_path)?;
        return Ok(());
    }

    #[cfg(unix)]
    {
        let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
        if result != 0 {
            let err = std::io::Error::last_os_error();
            print_error(&format!("Failed to stop node (PID {}): {}", pid, err));
            return Err(err.into());
        }
        print_success(&format!("Node stopped (PID {})", pid));
    }

    #[cfg(not(unix))]
    {
        print_error(&format!(
            "Stopping by PID is not supported on this platform; kill PID {} manually",
            pid
        ));
    }

    Ok(())
}
