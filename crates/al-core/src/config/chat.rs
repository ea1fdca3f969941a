//! Chat client configuration

use serde::{Deserialize, Serialize};

/// Defaults for the `al-chat` client
///
/// Secrets are never stored here; they come from flags or the environment.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// WebSocket URL of the relay
    pub relay_url: String,

    /// SSH host the relay should tunnel through
    pub ssh_host: Option<String>,

    /// SSH port
    pub ssh_port: u16,

    /// SSH username
    pub ssh_username: Option<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://127.0.0.1:3000/ws".to_string(),
            ssh_host: None,
            ssh_port: al_protocol::DEFAULT_SSH_PORT,
            ssh_username: None,
        }
    }
}
