//! Client-facing envelopes
//!
//! Every WebSocket text message between a UI client and the relay is one
//! JSON object tagged by `type`:
//!
//! | client → relay | relay → client |
//! |----------------|----------------|
//! | `connect`      | `connected`    |
//! | `message`      | `response`     |
//! | `disconnect`   | `error`        |
//! |                | `disconnected` |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;

/// Port used when a `connect` directive omits `ssh.port`.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Directive sent by a client to the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEnvelope {
    /// Open the SSH tunnel to the agent
    Connect { ssh: SshCredentials },

    /// Forward one chat message to the agent
    Message { content: String },

    /// Tear the tunnel down
    Disconnect,
}

impl ClientEnvelope {
    /// Parse a client envelope from a WebSocket text payload
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::InvalidEnvelope)
    }

    /// Encode as a WebSocket text payload
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Short name for logs (never includes credentials)
    pub fn kind(&self) -> &'static str {
        match self {
            ClientEnvelope::Connect { .. } => "connect",
            ClientEnvelope::Message { .. } => "message",
            ClientEnvelope::Disconnect => "disconnect",
        }
    }
}

/// Event sent by the relay to a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEnvelope {
    /// Tunnel to the agent is up
    Connected,

    /// One line from the agent
    Response { content: String },

    /// A connect attempt failed
    Error { content: String },

    /// The agent stream ended
    Disconnected,
}

impl ServerEnvelope {
    /// Parse a relay event from a WebSocket text payload
    pub fn from_json(text: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(text).map_err(ProtocolError::InvalidEnvelope)
    }

    /// Encode as a WebSocket text payload
    pub fn to_json(&self) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// SSH credentials carried by a `connect` directive
///
/// `password` is the documented field; `private_key` (OpenSSH or PEM text,
/// optionally encrypted with `passphrase`) is accepted as an alternative.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshCredentials {
    pub host: String,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    pub username: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub passphrase: Option<String>,
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

impl SshCredentials {
    /// Password credentials for `username@host:port`
    pub fn password(
        host: impl Into<String>,
        port: u16,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
            password: Some(password.into()),
            private_key: None,
            passphrase: None,
        }
    }
}

// Secrets stay out of logs.
impl fmt::Debug for SshCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SshCredentials")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("private_key", &self.private_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}
