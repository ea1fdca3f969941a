//! WebSocket client for the relay
//!
//! One [`RelayClient`] is one relay session. Directives go out as tagged
//! JSON text frames; events come back the same way and are decoded into
//! [`ServerEnvelope`]s.

use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use al_protocol::{ClientEnvelope, ProtocolError, ServerEnvelope, SshCredentials};

/// Errors talking to the relay
#[derive(Debug, Error)]
pub enum ClientError {
    /// WebSocket transport failure
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Envelope could not be encoded
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Client side of one relay session
pub struct RelayClient {
    url: String,
    socket: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl RelayClient {
    /// Open a WebSocket to the relay at `url` (e.g. `ws://127.0.0.1:3000/ws`)
    pub async fn connect(url: &str) -> Result<Self, ClientError> {
        tracing::debug!("Connecting to relay at {}", url);
        let (socket, _response) = connect_async(url).await?;
        Ok(Self {
            url: url.to_string(),
            socket,
        })
    }

    /// Relay URL this client is connected to
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Ask the relay to open a tunnel with these credentials
    ///
    /// The outcome arrives later as a `connected` or `error` event.
    pub async fn open_tunnel(&mut self, ssh: SshCredentials) -> Result<(), ClientError> {
        tracing::debug!("Requesting tunnel via {}@{}:{}", ssh.username, ssh.host, ssh.port);
        self.send(ClientEnvelope::Connect { ssh }).await
    }

    /// Send one chat message to the agent
    pub async fn send_message(&mut self, content: impl Into<String>) -> Result<(), ClientError> {
        self.send(ClientEnvelope::Message {
            content: content.into(),
        })
        .await
    }

    /// Ask the relay to tear the tunnel down
    pub async fn disconnect(&mut self) -> Result<(), ClientError> {
        self.send(ClientEnvelope::Disconnect).await
    }

    /// Next event from the relay, `None` once the socket is closed
    ///
    /// Frames that are not valid envelopes are skipped.
    pub async fn next_event(&mut self) -> Result<Option<ServerEnvelope>, ClientError> {
        while let Some(msg) = self.socket.next().await {
            let text = match msg? {
                Message::Text(text) => text,
                Message::Close(_) => return Ok(None),
                _ => continue,
            };

            match ServerEnvelope::from_json(&text) {
                Ok(event) => return Ok(Some(event)),
                Err(e) => tracing::warn!("Skipping relay frame: {}", e),
            }
        }
        Ok(None)
    }

    /// Close the WebSocket
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.socket.close(None).await?;
        Ok(())
    }

    async fn send(&mut self, envelope: ClientEnvelope) -> Result<(), ClientError> {
        let json = envelope.to_json()?;
        self.socket.send(Message::Text(json)).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RelayClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}
