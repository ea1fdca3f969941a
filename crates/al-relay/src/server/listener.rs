//! Relay server listener
//!
//! Serves the WebSocket endpoint and, optionally, a static browser UI.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{routing::get, Router};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::server::ws::ws_handler;
use crate::state::RelayState;

/// Build the relay's HTTP router
///
/// - `GET /ws` upgrades to a relay session
/// - `GET /health` answers `ok`
/// - everything else is served from `static_dir` when configured
pub fn router(state: Arc<RelayState>) -> Router {
    let static_dir = state.config.static_dir.clone();

    let mut router = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .with_state(state);

    if let Some(dir) = static_dir {
        tracing::info!("Serving static files from {:?}", dir);
        router = router.fallback_service(ServeDir::new(dir));
    }

    router.layer(TraceLayer::new_for_http())
}

async fn health() -> &'static str {
    "ok"
}

/// WebSocket relay server
pub struct RelayServer {
    /// Shared relay state
    state: Arc<RelayState>,
    /// Cancellation token for graceful shutdown
    cancel: CancellationToken,
}

impl RelayServer {
    /// Create a new relay server
    pub fn new(state: Arc<RelayState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Bind `bind_addr` and serve until cancelled
    pub async fn run(&self, bind_addr: &str) -> Result<()> {
        let listener = TcpListener::bind(bind_addr)
            .await
            .with_context(|| format!("Failed to bind to {}", bind_addr))?;

        self.serve(listener).await
    }

    /// Serve on an already bound listener until cancelled
    ///
    /// On shutdown every live session is driven through teardown so no SSH
    /// connection outlives the server.
    pub async fn serve(&self, listener: TcpListener) -> Result<()> {
        let local_addr = listener.local_addr()?;
        tracing::info!("Relay listening on {}", local_addr);

        let cancel = self.cancel.clone();
        axum::serve(listener, router(Arc::clone(&self.state)))
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
            .context("Relay server failed")?;

        tracing::info!("Relay server shutting down");
        self.state.sessions.shutdown_all().await;
        Ok(())
    }
}
