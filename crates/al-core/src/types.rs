//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use al_protocol::SshCredentials;

use crate::error::RelayError;

/// Loopback socket on the SSH host where the agent listens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentTarget {
    /// Host as seen from the SSH server (normally a loopback address)
    pub host: String,
    /// Port the agent listens on
    pub port: u16,
}

impl AgentTarget {
    /// Create a new agent target
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for AgentTarget {
    fn default() -> Self {
        Self::new("127.0.0.1", 8888)
    }
}

impl fmt::Display for AgentTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// How the relay authenticates to the SSH host
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Password authentication
    Password(String),
    /// Public key authentication with an OpenSSH/PEM private key
    PrivateKey {
        pem: String,
        passphrase: Option<String>,
    },
}

impl Credential {
    /// Name of the authentication method, for logs
    pub fn method(&self) -> &'static str {
        match self {
            Credential::Password(_) => "password",
            Credential::PrivateKey { .. } => "publickey",
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Credential::{}(<redacted>)", self.method())
    }
}

/// SSH host the tunnel is opened through
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshEndpoint {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
}

impl SshEndpoint {
    /// `host:port` for dialing
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for SshEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

impl TryFrom<SshCredentials> for SshEndpoint {
    type Error = RelayError;

    /// A private key wins over a password when both are supplied.
    fn try_from(creds: SshCredentials) -> Result<Self, Self::Error> {
        if creds.host.trim().is_empty() {
            return Err(RelayError::InvalidInput("ssh.host is empty".to_string()));
        }
        if creds.username.is_empty() {
            return Err(RelayError::InvalidInput("ssh.username is empty".to_string()));
        }

        let credential = match (creds.private_key, creds.password) {
            (Some(pem), _) => Credential::PrivateKey {
                pem,
                passphrase: creds.passphrase,
            },
            (None, Some(password)) => Credential::Password(password),
            (None, None) => {
                return Err(RelayError::InvalidInput(
                    "ssh credentials need a password or private_key".to_string(),
                ))
            }
        };

        Ok(Self {
            host: creds.host,
            port: creds.port,
            username: creds.username,
            credential,
        })
    }
}

/// Lifecycle state of a relay session's tunnel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No tunnel
    Idle,
    /// SSH handshake or forward request in flight
    Connecting,
    /// Tunnel open, frames are being relayed
    Active,
    /// Tunnel is being torn down
    Closing,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Active => write!(f, "active"),
            SessionState::Closing => write!(f, "closing"),
        }
    }
}
