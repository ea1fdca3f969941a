//! Session registry

use dashmap::DashMap;
use std::sync::Arc;

use al_protocol::SessionId;

use super::machine::RelaySession;

/// Index of live sessions, one per connected client
///
/// Sessions never look each other up; the registry exists so the daemon can
/// count them and drive every one of them through teardown on shutdown.
pub struct SessionRegistry {
    /// Sessions indexed by session ID
    sessions: DashMap<SessionId, Arc<RelaySession>>,
}

impl SessionRegistry {
    /// Create a new session registry
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Track a new session
    pub fn insert(&self, session: Arc<RelaySession>) {
        self.sessions.insert(session.id(), session);
    }

    /// Stop tracking a session
    pub fn remove(&self, id: SessionId) -> Option<Arc<RelaySession>> {
        self.sessions.remove(&id).map(|(_, session)| session)
    }

    /// IDs of all live sessions
    pub fn ids(&self) -> Vec<SessionId> {
        let mut ids: Vec<_> = self.sessions.iter().map(|r| *r.key()).collect();
        ids.sort();
        ids
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Remove every session and tear down its tunnel
    pub async fn shutdown_all(&self) {
        let sessions: Vec<_> = self.ids().into_iter().filter_map(|id| self.remove(id)).collect();
        if sessions.is_empty() {
            return;
        }

        tracing::info!("Closing {} sessions", sessions.len());
        futures::future::join_all(sessions.iter().map(|s| s.shutdown())).await;
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
