//! agentlink chat client
//!
//! Opens a relay session, asks the relay for a tunnel to the agent, then
//! sends each stdin line as a message and prints the agent's replies.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use al_chat::output::{print_error, print_info, print_response, print_success, print_warning};
use al_chat::RelayClient;
use al_core::config::{self, ChatConfig};
use al_core::ConfigError;
use al_protocol::{ServerEnvelope, SshCredentials};

#[derive(Parser)]
#[command(name = "al-chat")]
#[command(author, version, about = "Chat with an agent behind SSH through an agentlink relay")]
struct Cli {
    /// Path to configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Relay WebSocket URL (overrides config)
    #[arg(long)]
    url: Option<String>,

    /// SSH host the relay tunnels through (overrides config)
    #[arg(long)]
    host: Option<String>,

    /// SSH port (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// SSH username (overrides config)
    #[arg(short, long)]
    username: Option<String>,

    /// SSH password
    #[arg(long, env = "AL_SSH_PASSWORD", hide_env_values = true, conflicts_with = "key")]
    password: Option<String>,

    /// Path to an SSH private key, sent to the relay instead of a password
    #[arg(short, long)]
    key: Option<PathBuf>,

    /// Passphrase for an encrypted private key
    #[arg(long, env = "AL_SSH_PASSPHRASE", hide_env_values = true, requires = "key")]
    passphrase: Option<String>,

    /// Enable verbose output
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

/// How long to wait for the relay to acknowledge `disconnect`
const LEAVE_TIMEOUT: Duration = Duration::from_secs(5);

/// What woke the chat loop
enum Input {
    Line(Option<String>),
    Event(Option<ServerEnvelope>),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let config = load_chat_config(cli.config.as_deref())?;
    let url = cli.url.clone().unwrap_or_else(|| config.relay_url.clone());
    let credentials = build_credentials(&cli, &config)?;

    let mut client = RelayClient::connect(&url)
        .await
        .with_context(|| format!("Failed to connect to relay at {}", url))?;
    print_info(&format!(
        "Connected to relay, opening tunnel via {}@{}:{}",
        credentials.username, credentials.host, credentials.port
    ));

    client.open_tunnel(credentials).await?;
    wait_for_tunnel(&mut client).await?;
    print_success("Tunnel to agent is up. Type a message, /quit to leave.");

    chat(&mut client).await?;

    if let Err(e) = client.close().await {
        tracing::debug!("Error closing relay socket: {}", e);
    }
    Ok(())
}

fn load_chat_config(path: Option<&std::path::Path>) -> Result<ChatConfig> {
    match path {
        Some(path) => config::load_config(path)
            .with_context(|| format!("Failed to load config from {:?}", path)),
        None => match config::load_config(&config::default_chat_config_path()) {
            Ok(config) => Ok(config),
            Err(ConfigError::NotFound(_)) => Ok(ChatConfig::default()),
            Err(e) => {
                print_warning(&format!("Ignoring chat config: {}", e));
                Ok(ChatConfig::default())
            }
        },
    }
}

fn build_credentials(cli: &Cli, config: &ChatConfig) -> Result<SshCredentials> {
    let host = cli
        .host
        .clone()
        .or_else(|| config.ssh_host.clone())
        .context("No SSH host given (use --host or set ssh_host in chat.toml)")?;
    let username = cli
        .username
        .clone()
        .or_else(|| config.ssh_username.clone())
        .context("No SSH username given (use --username or set ssh_username in chat.toml)")?;
    let port = cli.port.unwrap_or(config.ssh_port);

    let private_key = match &cli.key {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read private key {:?}", path))?,
        ),
        None => None,
    };

    if private_key.is_none() && cli.password.is_none() {
        bail!("No SSH credential given (use --password, AL_SSH_PASSWORD or --key)");
    }

    Ok(SshCredentials {
        host,
        port,
        username,
        password: cli.password.clone(),
        private_key,
        passphrase: cli.passphrase.clone(),
    })
}

async fn wait_for_tunnel(client: &mut RelayClient) -> Result<()> {
    loop {
        match client.next_event().await? {
            Some(ServerEnvelope::Connected) => return Ok(()),
            Some(ServerEnvelope::Error { content }) => {
                print_error(&content);
                bail!("Tunnel could not be opened");
            }
            Some(other) => tracing::debug!("Ignoring {:?} while connecting", other),
            None => bail!("Relay closed the connection"),
        }
    }
}

async fn chat(client: &mut RelayClient) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let input = tokio::select! {
            line = lines.next_line() => Input::Line(line?),
            event = client.next_event() => Input::Event(event?),
        };

        match input {
            Input::Line(Some(line)) => {
                let line = line.trim();
                if line == "/quit" {
                    return leave(client).await;
                }
                if !line.is_empty() {
                    client.send_message(line).await?;
                }
            }
            Input::Line(None) => return leave(client).await,
            Input::Event(Some(ServerEnvelope::Response { content })) => print_response(&content),
            Input::Event(Some(ServerEnvelope::Error { content })) => print_error(&content),
            Input::Event(Some(ServerEnvelope::Disconnected)) => {
                print_warning("Agent closed the conversation");
                return Ok(());
            }
            Input::Event(Some(ServerEnvelope::Connected)) => {}
            Input::Event(None) => {
                print_warning("Relay closed the connection");
                return Ok(());
            }
        }
    }
}

/// Send `disconnect` and print whatever the agent still says before the ack
async fn leave(client: &mut RelayClient) -> Result<()> {
    client.disconnect().await?;

    let drain = async {
        while let Some(event) = client.next_event().await? {
            match event {
                ServerEnvelope::Response { content } => print_response(&content),
                ServerEnvelope::Disconnected => break,
                _ => {}
            }
        }
        Ok::<_, anyhow::Error>(())
    };

    if tokio::time::timeout(LEAVE_TIMEOUT, drain).await.is_err() {
        tracing::debug!("No disconnect acknowledgement from relay");
    }
    Ok(())
}
