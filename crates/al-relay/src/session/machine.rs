//! Per-session tunnel state machine
//!
//! All state transitions happen under the session's single mutex. Work that
//! may block on the network (handshake, forward request, channel reads and
//! writes, teardown) runs on its own task outside it, and results are
//! applied only if the attempt or tunnel they belong to is still current.
//! Each connect attempt gets a fresh generation number for that check.
//!
//! Closing a tunnel never blocks the client's directive loop. A tunnel being
//! closed leaves the session in `Closing`; a new connect attempt waits for
//! that close before it dials.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use al_core::traits::{AgentLink, TunnelConnector};
use al_core::{SessionState, SshEndpoint, TunnelError};
use al_protocol::{AgentRequest, ClientEnvelope, ServerEnvelope, SessionId, SshCredentials};

use super::pump::{close_ssh, discard_link, Tunnel, TunnelEnd};
use super::SessionSettings;

/// Outbound queue to the session's client transport
pub type ClientSender = mpsc::UnboundedSender<ServerEnvelope>;

/// Tunnel phase, one variant per state
enum Phase {
    Idle,
    Connecting {
        generation: u64,
        cancel: CancellationToken,
    },
    Active(Tunnel),
    Closing {
        generation: u64,
        /// Fires once the tunnel is closed
        closed: CancellationToken,
    },
}

impl Phase {
    fn state(&self) -> SessionState {
        match self {
            Phase::Idle => SessionState::Idle,
            Phase::Connecting { .. } => SessionState::Connecting,
            Phase::Active(_) => SessionState::Active,
            Phase::Closing { .. } => SessionState::Closing,
        }
    }
}

struct SessionInner {
    phase: Phase,
    /// Last generation handed to a connect attempt
    generation: u64,
}

/// One client's relay session
pub struct RelaySession {
    id: SessionId,
    connector: Arc<dyn TunnelConnector>,
    settings: SessionSettings,
    client_tx: ClientSender,
    inner: Mutex<SessionInner>,
    span: tracing::Span,
}

impl RelaySession {
    /// Create an idle session that reports to `client_tx`
    pub fn new(
        id: SessionId,
        connector: Arc<dyn TunnelConnector>,
        settings: SessionSettings,
        client_tx: ClientSender,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            connector,
            settings,
            client_tx,
            inner: Mutex::new(SessionInner {
                phase: Phase::Idle,
                generation: 0,
            }),
            span: tracing::info_span!("session", id = %id),
        })
    }

    /// Session identifier
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Current tunnel state
    pub async fn state(&self) -> SessionState {
        self.inner.lock().await.phase.state()
    }

    /// Apply one client directive
    pub async fn handle(self: &Arc<Self>, envelope: ClientEnvelope) {
        let span = self.span.clone();
        async move {
            tracing::debug!("Client directive: {}", envelope.kind());
            match envelope {
                ClientEnvelope::Connect { ssh } => self.connect(ssh).await,
                ClientEnvelope::Message { content } => self.send_message(content).await,
                ClientEnvelope::Disconnect => self.disconnect().await,
            }
        }
        .instrument(span)
        .await
    }

    /// Client transport closed: tear down without notifying anyone
    ///
    /// Returns once any live tunnel is fully closed.
    pub async fn shutdown(self: &Arc<Self>) {
        let closed = {
            let mut inner = self.inner.lock().await;
            match std::mem::replace(&mut inner.phase, Phase::Idle) {
                Phase::Idle => return,
                Phase::Connecting { generation, cancel } => {
                    tracing::info!("Cancelling connect attempt {}", generation);
                    cancel.cancel();
                    return;
                }
                Phase::Active(tunnel) => self.close_in_background(&mut inner, tunnel, false),
                Phase::Closing { generation, closed } => {
                    inner.phase = Phase::Closing {
                        generation,
                        closed: closed.clone(),
                    };
                    closed
                }
            }
        };

        closed.cancelled().await;
    }

    fn notify(&self, envelope: ServerEnvelope) {
        if self.client_tx.send(envelope).is_err() {
            tracing::debug!("Client transport gone, dropping notification");
        }
    }

    async fn connect(self: &Arc<Self>, credentials: SshCredentials) {
        let endpoint = SshEndpoint::try_from(credentials);

        let mut inner = self.inner.lock().await;

        // At most one live tunnel or attempt: the old one goes first
        let previous_close = match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Idle => None,
            Phase::Connecting { generation, cancel } => {
                tracing::info!("Cancelling connect attempt {}", generation);
                cancel.cancel();
                None
            }
            Phase::Active(tunnel) => {
                tracing::info!("Replacing live tunnel");
                Some(self.close_in_background(&mut inner, tunnel, false))
            }
            Phase::Closing { generation, closed } => {
                inner.phase = Phase::Closing {
                    generation,
                    closed: closed.clone(),
                };
                Some(closed)
            }
        };

        let endpoint = match endpoint {
            Ok(endpoint) => endpoint,
            Err(e) => {
                tracing::warn!("Rejecting connect directive: {}", e);
                self.notify(ServerEnvelope::Error {
                    content: TunnelError::Handshake(e.to_string()).to_string(),
                });
                return;
            }
        };

        inner.generation += 1;
        let generation = inner.generation;

        tracing::info!(
            "Connecting to {} ({} auth), forwarding to {}",
            endpoint,
            endpoint.credential.method(),
            self.settings.target
        );

        let cancel = CancellationToken::new();
        inner.phase = Phase::Connecting {
            generation,
            cancel: cancel.clone(),
        };
        drop(inner);

        let session = Arc::clone(self);
        tokio::spawn(
            async move {
                session
                    .run_connect(generation, endpoint, cancel, previous_close)
                    .await
            }
            .instrument(self.span.clone()),
        );
    }

    async fn run_connect(
        self: Arc<Self>,
        generation: u64,
        endpoint: SshEndpoint,
        cancel: CancellationToken,
        previous_close: Option<CancellationToken>,
    ) {
        let Some(result) = self.open_link(&endpoint, &cancel, previous_close).await else {
            tracing::debug!("Connect attempt {} cancelled", generation);
            return;
        };

        self.finish_connect(generation, result).await;
    }

    /// Handshake, then forward request, each bounded by `connect_timeout`
    ///
    /// Returns `None` once cancelled. An SSH connection that is not handed
    /// back is closed here.
    async fn open_link(
        &self,
        endpoint: &SshEndpoint,
        cancel: &CancellationToken,
        previous_close: Option<CancellationToken>,
    ) -> Option<Result<AgentLink, TunnelError>> {
        let connect_timeout = self.settings.connect_timeout;
        let close_timeout = self.settings.close_timeout;
        let target = &self.settings.target;

        if let Some(closed) = previous_close {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = closed.cancelled() => {}
            }
        }

        let handshake = tokio::select! {
            biased;
            _ = cancel.cancelled() => return None,
            result = tokio::time::timeout(connect_timeout, self.connector.handshake(endpoint)) => result,
        };
        let mut ssh = match handshake {
            Ok(Ok(ssh)) => ssh,
            Ok(Err(e)) => return Some(Err(e)),
            Err(_) => {
                return Some(Err(TunnelError::Handshake(format!(
                    "timed out connecting to {} after {:?}",
                    endpoint.address(),
                    connect_timeout
                ))))
            }
        };

        let forward = tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            result = tokio::time::timeout(connect_timeout, ssh.forward(target)) => Some(result),
        };
        let error = match forward {
            Some(Ok(Ok(stream))) => return Some(Ok(AgentLink::new(stream, ssh))),
            Some(Ok(Err(e))) => Some(e),
            Some(Err(_)) => Some(TunnelError::Forward(format!(
                "timed out forwarding to {} after {:?}",
                target, connect_timeout
            ))),
            None => None,
        };

        close_ssh(ssh, close_timeout).await;
        error.map(Err)
    }

    async fn finish_connect(self: &Arc<Self>, generation: u64, result: Result<AgentLink, TunnelError>) {
        let mut inner = self.inner.lock().await;
        let current = matches!(
            &inner.phase,
            Phase::Connecting { generation: g, .. } if *g == generation
        );

        match result {
            Ok(link) if current => {
                let tunnel = Tunnel::start(
                    Arc::downgrade(self),
                    generation,
                    link,
                    self.client_tx.clone(),
                    self.settings.close_timeout,
                );
                inner.phase = Phase::Active(tunnel);
                tracing::info!("Tunnel to agent established");
                self.notify(ServerEnvelope::Connected);
            }
            Ok(link) => {
                drop(inner);
                tracing::debug!("Connect attempt {} superseded, closing its tunnel", generation);
                discard_link(link, self.settings.close_timeout).await;
            }
            Err(e) if current => {
                inner.phase = Phase::Idle;
                tracing::warn!("{}", e);
                self.notify(ServerEnvelope::Error {
                    content: e.to_string(),
                });
            }
            Err(e) => {
                tracing::debug!("Superseded connect attempt {} failed: {}", generation, e);
            }
        }
    }

    async fn send_message(&self, content: String) {
        let inner = self.inner.lock().await;
        match &inner.phase {
            Phase::Active(tunnel) => {
                if !tunnel.send(AgentRequest::new(content)) {
                    tracing::debug!("Tunnel writer stopped, dropping message");
                }
            }
            phase => {
                tracing::debug!("Dropping message while {}", phase.state());
            }
        }
    }

    async fn disconnect(self: &Arc<Self>) {
        let mut inner = self.inner.lock().await;
        match std::mem::replace(&mut inner.phase, Phase::Idle) {
            Phase::Idle => {
                tracing::debug!("Disconnect while idle");
            }
            Phase::Connecting { generation, cancel } => {
                tracing::info!("Cancelling connect attempt {}", generation);
                cancel.cancel();
                self.notify(ServerEnvelope::Disconnected);
            }
            Phase::Active(tunnel) => {
                self.close_in_background(&mut inner, tunnel, true);
            }
            Phase::Closing { generation, closed } => {
                // Already on its way down
                inner.phase = Phase::Closing { generation, closed };
            }
        }
    }

    /// Put the session in `Closing` and close `tunnel` on its own task
    ///
    /// The close runs channel first, then SSH. When it is done the session
    /// returns to `Idle` (unless a newer attempt took over), `disconnected`
    /// is sent if `acknowledge` is set, and the returned token fires.
    fn close_in_background(
        self: &Arc<Self>,
        inner: &mut SessionInner,
        tunnel: Tunnel,
        acknowledge: bool,
    ) -> CancellationToken {
        let generation = tunnel.generation;
        let closed = CancellationToken::new();
        inner.phase = Phase::Closing {
            generation,
            closed: closed.clone(),
        };

        tracing::info!("Closing tunnel");
        let session = Arc::clone(self);
        let done = closed.clone();
        tokio::spawn(
            async move {
                tunnel.close(session.settings.close_timeout).await;

                let mut inner = session.inner.lock().await;
                if matches!(
                    &inner.phase,
                    Phase::Closing { generation: g, .. } if *g == generation
                ) {
                    inner.phase = Phase::Idle;
                }
                tracing::info!("Tunnel closed");
                if acknowledge {
                    session.notify(ServerEnvelope::Disconnected);
                }
                drop(inner);
                done.cancel();
            }
            .instrument(self.span.clone()),
        );

        closed
    }

    /// The reader saw the tunnel stop on its own
    pub(crate) async fn tunnel_ended(&self, generation: u64, end: TunnelEnd) {
        let tunnel = {
            let mut inner = self.inner.lock().await;
            match &inner.phase {
                Phase::Active(tunnel) if tunnel.generation == generation => {}
                _ => return,
            }
            let Phase::Active(tunnel) = std::mem::replace(&mut inner.phase, Phase::Idle) else {
                return;
            };
            tracing::info!("Tunnel ended: {}", end);
            self.notify(ServerEnvelope::Disconnected);
            tunnel
        };

        // The caller is this tunnel's reader, so close from a fresh task
        let close_timeout = self.settings.close_timeout;
        tokio::spawn(tunnel.close(close_timeout).instrument(self.span.clone()));
    }
}

impl std::fmt::Debug for RelaySession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelaySession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}
