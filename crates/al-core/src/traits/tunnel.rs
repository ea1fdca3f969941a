//! Tunnel traits
//!
//! Opening a tunnel takes two steps: an SSH handshake, then a forward request
//! for a channel to the agent socket. Each step is a separate call so the
//! session can bound and report them separately, and so the state machine
//! can run against in-memory streams in tests.

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TunnelError;
use crate::types::{AgentTarget, SshEndpoint};

/// Duplex byte stream to the agent socket
pub trait AgentStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T> AgentStream for T where T: AsyncRead + AsyncWrite + Send + Unpin {}

/// An authenticated SSH connection
#[async_trait]
pub trait SshSession: Send {
    /// Request a channel to `target` on the SSH host
    ///
    /// Failures are [`TunnelError::Forward`]. The connection stays open; the
    /// caller closes it.
    async fn forward(&mut self, target: &AgentTarget) -> Result<Box<dyn AgentStream>, TunnelError>;

    /// Disconnect from the SSH host
    ///
    /// Called after the forwarded channel has been closed.
    async fn close(self: Box<Self>) -> Result<(), TunnelError>;
}

/// A freshly opened tunnel: the forwarded channel and its SSH connection
pub struct AgentLink {
    /// Forwarded channel to the agent
    pub stream: Box<dyn AgentStream>,
    /// Connection the channel runs over
    pub session: Box<dyn SshSession>,
}

impl AgentLink {
    /// Bundle a channel stream with its SSH connection
    pub fn new(stream: Box<dyn AgentStream>, session: Box<dyn SshSession>) -> Self {
        Self { stream, session }
    }
}

impl std::fmt::Debug for AgentLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentLink").finish_non_exhaustive()
    }
}

/// Opens SSH connections for tunnels
#[async_trait]
pub trait TunnelConnector: Send + Sync {
    /// Connect and authenticate to `endpoint`
    ///
    /// Failures are [`TunnelError::Handshake`].
    async fn handshake(&self, endpoint: &SshEndpoint) -> Result<Box<dyn SshSession>, TunnelError>;
}
