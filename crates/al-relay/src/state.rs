//! Global relay state

use std::sync::Arc;

use al_core::config::RelayConfig;
use al_core::traits::TunnelConnector;
use al_protocol::SessionId;

use crate::session::{ClientSender, RelaySession, SessionRegistry, SessionSettings};

/// Global state for the relay daemon
pub struct RelayState {
    /// Configuration
    pub config: RelayConfig,
    /// Live sessions
    pub sessions: SessionRegistry,
    /// Opens tunnels for every session
    connector: Arc<dyn TunnelConnector>,
    /// Settings handed to each new session
    settings: SessionSettings,
}

impl RelayState {
    /// Create relay state using `connector` for every tunnel
    pub fn new(config: RelayConfig, connector: Arc<dyn TunnelConnector>) -> Self {
        let settings = SessionSettings::from_config(&config);
        Self {
            config,
            sessions: SessionRegistry::new(),
            connector,
            settings,
        }
    }

    /// Register a session for a newly accepted client
    pub fn open_session(&self, client_tx: ClientSender) -> Arc<RelaySession> {
        let session = RelaySession::new(
            SessionId::next(),
            Arc::clone(&self.connector),
            self.settings.clone(),
            client_tx,
        );
        self.sessions.insert(Arc::clone(&session));
        tracing::debug!("{} sessions open", self.sessions.len());
        session
    }

    /// Client transport closed: unregister and tear the session down
    pub async fn close_session(&self, id: SessionId) {
        if let Some(session) = self.sessions.remove(id) {
            session.shutdown().await;
        }
        tracing::debug!("{} sessions open", self.sessions.len());
    }
}
