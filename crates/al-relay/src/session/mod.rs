//! Relay sessions
//!
//! One [`RelaySession`] exists per WebSocket client. It owns the session's
//! tunnel state machine (`Idle → Connecting → Active → Closing → Idle`) and
//! the frame pumps that move lines between the client and the agent.

mod machine;
mod pump;
mod registry;

use std::time::Duration;

use al_core::config::RelayConfig;
use al_core::AgentTarget;

pub use machine::{ClientSender, RelaySession};
pub use registry::SessionRegistry;

/// Per-session tunnel settings, fixed for the relay process
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Agent socket every tunnel is forwarded to
    pub target: AgentTarget,
    /// Upper bound on handshake plus forward request
    pub connect_timeout: Duration,
    /// Upper bound on each teardown step
    pub close_timeout: Duration,
}

impl SessionSettings {
    /// Derive session settings from the relay configuration
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            target: config.agent.clone(),
            connect_timeout: config.connect_timeout,
            close_timeout: config.close_timeout,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&RelayConfig::default())
    }
}
