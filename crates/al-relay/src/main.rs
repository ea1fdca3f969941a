//! agentlink relay daemon
//!
//! Accepts WebSocket clients and relays their chat messages to an agent
//! listening on a loopback socket behind an SSH host.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use al_core::config::{self, RelayConfig};
use al_relay::server::RelayServer;
use al_relay::tunnel::SshConnector;
use al_relay::RelayState;

#[derive(Parser)]
#[command(name = "al-relay")]
#[command(about = "agentlink relay - WebSocket clients to an SSH-tunneled agent")]
#[command(version)]
struct Args {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides config)
    #[arg(short, long)]
    bind: Option<String>,

    /// Agent host on the SSH server (overrides config)
    #[arg(long)]
    agent_host: Option<String>,

    /// Agent port on the SSH server (overrides config)
    #[arg(long)]
    agent_port: Option<u16>,

    /// Directory of static files to serve at / (overrides config)
    #[arg(long)]
    static_dir: Option<PathBuf>,

    /// Run in foreground with verbose output
    #[arg(short, long)]
    foreground: bool,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.foreground { "debug" } else { &args.log_level };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("agentlink relay starting...");

    // Load configuration
    let mut config: RelayConfig = if let Some(config_path) = &args.config {
        config::load_config(config_path)
            .with_context(|| format!("Failed to load config from {:?}", config_path))?
    } else {
        let default_path = config::default_config_path();
        if default_path.exists() {
            config::load_config(&default_path).unwrap_or_else(|e| {
                tracing::warn!("Failed to load config from {:?}: {}", default_path, e);
                RelayConfig::default()
            })
        } else {
            tracing::info!("Using default configuration");
            RelayConfig::default()
        }
    };

    // Apply command-line overrides
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }
    if let Some(host) = args.agent_host {
        config.agent.host = host;
    }
    if let Some(port) = args.agent_port {
        config.agent.port = port;
    }
    if let Some(dir) = args.static_dir {
        config.static_dir = Some(dir);
    }
    config.validate().context("Invalid configuration")?;

    tracing::info!("Agent target on SSH hosts: {}", config.agent);
    if config.expected_host_key.is_none() {
        tracing::warn!("No expected_host_key configured - any SSH host key will be accepted");
    }

    let bind_addr = config.bind_address.clone();
    let connector = Arc::new(SshConnector::from_config(&config));
    let state = Arc::new(RelayState::new(config, connector));

    // Create cancellation token for graceful shutdown
    let cancel = CancellationToken::new();

    // Setup signal handlers
    let cancel_clone = cancel.clone();
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        let terminate = async {
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(mut signal) => {
                    signal.recv().await;
                }
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
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

    let server = RelayServer::new(state, cancel);
    server.run(&bind_addr).await?;

    tracing::info!("Relay shutdown complete");
    Ok(())
}
