//! Relay daemon configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use super::serde_utils::duration_secs;
use crate::error::ConfigError;
use crate::types::AgentTarget;

/// Configuration for the relay daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Address the WebSocket server binds to
    pub bind_address: String,

    /// Agent socket on the SSH host, shared by every session
    pub agent: AgentTarget,

    /// Upper bound on the SSH handshake plus forward request
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Upper bound on each teardown step (channel close, SSH disconnect)
    #[serde(with = "duration_secs")]
    pub close_timeout: Duration,

    /// Expected SSH host key fingerprint; any key is accepted when unset
    pub expected_host_key: Option<String>,

    /// Directory of static files served at `/` (browser UI)
    pub static_dir: Option<PathBuf>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:3000".to_string(),
            agent: AgentTarget::default(),
            connect_timeout: Duration::from_secs(30),
            close_timeout: Duration::from_secs(5),
            expected_host_key: None,
            static_dir: None,
        }
    }
}

impl RelayConfig {
    /// Reject values the relay cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.agent.host.trim().is_empty() {
            return Err(ConfigError::Invalid("agent.host must not be empty".into()));
        }
        if self.agent.port == 0 {
            return Err(ConfigError::Invalid("agent.port must not be 0".into()));
        }
        if self.connect_timeout.is_zero() {
            return Err(ConfigError::Invalid("connect_timeout must be positive".into()));
        }
        if self.close_timeout.is_zero() {
            return Err(ConfigError::Invalid("close_timeout must be positive".into()));
        }
        Ok(())
    }
}
