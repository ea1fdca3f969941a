//! russh-backed tunnel connector
//!
//! Opens an SSH client connection, authenticates with the credentials the
//! client supplied, and requests a `direct-tcpip` channel to the agent's
//! loopback socket on the SSH host.

use std::sync::Arc;

use async_trait::async_trait;
use russh::client::{self, Config, Handle};
use russh::Disconnect;
use russh_keys::key::PublicKey;

use al_core::config::RelayConfig;
use al_core::traits::{AgentStream, SshSession, TunnelConnector};
use al_core::{AgentTarget, Credential, SshEndpoint, TunnelError};

/// Originator reported in the `direct-tcpip` request
const ORIGINATOR_ADDRESS: &str = "127.0.0.1";
const ORIGINATOR_PORT: u32 = 0;

/// Opens tunnels over real SSH connections
pub struct SshConnector {
    /// Shared client configuration
    ssh_config: Arc<Config>,
    /// Expected host key fingerprint (any key accepted when unset)
    expected_host_key: Option<String>,
}

impl SshConnector {
    /// Create a connector with an optional pinned host key
    pub fn new(expected_host_key: Option<String>) -> Self {
        Self {
            ssh_config: Arc::new(Config::default()),
            expected_host_key,
        }
    }

    /// Create a connector from the relay configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self::new(config.expected_host_key.clone())
    }
}

#[async_trait]
impl TunnelConnector for SshConnector {
    async fn handshake(&self, endpoint: &SshEndpoint) -> Result<Box<dyn SshSession>, TunnelError> {
        let handler = ClientHandler::new(self.expected_host_key.clone());

        tracing::debug!("Connecting to {}", endpoint.address());
        let mut handle = client::connect(
            Arc::clone(&self.ssh_config),
            (endpoint.host.as_str(), endpoint.port),
            handler,
        )
        .await
        .map_err(|e| {
            TunnelError::Handshake(format!("failed to connect to {}: {}", endpoint.address(), e))
        })?;

        tracing::debug!(
            "Authenticating as user '{}' ({})",
            endpoint.username,
            endpoint.credential.method()
        );
        let authenticated = match &endpoint.credential {
            Credential::Password(password) => {
                handle
                    .authenticate_password(endpoint.username.as_str(), password.as_str())
                    .await
            }
            Credential::PrivateKey { pem, passphrase } => {
                let key = russh_keys::decode_secret_key(pem, passphrase.as_deref())
                    .map_err(|e| TunnelError::Handshake(format!("invalid private key: {}", e)))?;
                handle
                    .authenticate_publickey(endpoint.username.as_str(), Arc::new(key))
                    .await
            }
        }
        .map_err(|e| TunnelError::Handshake(format!("authentication error: {}", e)))?;

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "authentication failed", "en")
                .await;
            return Err(TunnelError::Handshake(format!(
                "authentication rejected for user '{}'",
                endpoint.username
            )));
        }

        Ok(Box::new(SshConnection {
            handle,
            address: endpoint.to_string(),
        }))
    }
}

/// Authenticated SSH connection
struct SshConnection {
    handle: Handle<ClientHandler>,
    /// `user@host:port`, for error messages
    address: String,
}

#[async_trait]
impl SshSession for SshConnection {
    async fn forward(&mut self, target: &AgentTarget) -> Result<Box<dyn AgentStream>, TunnelError> {
        tracing::debug!("SSH connected, forwarding to {}", target);
        let channel = self
            .handle
            .channel_open_direct_tcpip(
                target.host.clone(),
                u32::from(target.port),
                ORIGINATOR_ADDRESS,
                ORIGINATOR_PORT,
            )
            .await
            .map_err(|e| TunnelError::Forward(format!("{} via {}: {}", target, self.address, e)))?;

        Ok(Box::new(channel.into_stream()))
    }

    async fn close(self: Box<Self>) -> Result<(), TunnelError> {
        self.handle
            .disconnect(Disconnect::ByApplication, "closing", "en")
            .await
            .map_err(|e| TunnelError::Close(e.to_string()))
    }
}

/// SSH client handler for the relay
struct ClientHandler {
    /// Expected host key fingerprint (for verification)
    expected_host_key: Option<String>,
}

impl ClientHandler {
    fn new(expected_host_key: Option<String>) -> Self {
        Self { expected_host_key }
    }
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = anyhow::Error;

    /// Verify the server's host key
    ///
    /// Without a configured fingerprint every key is accepted and logged.
    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();

        match &self.expected_host_key {
            Some(expected) if *expected == fingerprint => {
                tracing::debug!("Host key verified against configured fingerprint");
                Ok(true)
            }
            Some(expected) => {
                tracing::warn!(
                    "Host key mismatch: expected {}, got {}",
                    expected,
                    fingerprint
                );
                Ok(false)
            }
            None => {
                tracing::debug!("Server host key: {}", fingerprint);
                Ok(true)
            }
        }
    }
}
