//! WebSocket transport for relay sessions
//!
//! Each upgraded socket becomes one [`RelaySession`](crate::RelaySession).
//! A send task drains the session's envelope queue into the socket while
//! this task reads directives; when the socket closes for any reason the
//! session is torn down exactly once.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use al_protocol::{ClientEnvelope, ServerEnvelope};

use crate::state::RelayState;

/// WebSocket upgrade handler for `/ws`
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<RelayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: Arc<RelayState>) {
    let (mut sender, mut receiver) = socket.split();

    // Channel for sending envelopes to the client
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerEnvelope>();
    let session = state.open_session(tx);
    tracing::info!("Client connected ({})", session.id());

    // Spawn task to forward envelopes to the WebSocket
    let send_task = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let json = match envelope.to_json() {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!("Failed to serialize envelope: {}", e);
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // Handle incoming directives
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(data)) => match String::from_utf8(data) {
                Ok(text) => text,
                Err(_) => {
                    tracing::debug!("Dropping non-UTF-8 binary frame");
                    continue;
                }
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("WebSocket error: {}", e);
                break;
            }
        };

        match ClientEnvelope::from_json(&text) {
            Ok(envelope) => session.handle(envelope).await,
            Err(e) => tracing::debug!("Dropping client frame: {}", e),
        }
    }

    tracing::info!("Client disconnected ({})", session.id());
    state.close_session(session.id()).await;
    send_task.abort();
}
