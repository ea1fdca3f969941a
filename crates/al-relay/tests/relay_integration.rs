//! End-to-end relay tests
//!
//! Runs the real HTTP/WebSocket server on a loopback port with an
//! in-memory tunnel connector, and drives it with a WebSocket client.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use al_core::config::RelayConfig;
use al_relay::server::RelayServer;
use al_relay::RelayState;

use common::MockConnector;

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct TestRelay {
    url: String,
    state: Arc<RelayState>,
    cancel: CancellationToken,
    handle: tokio::task::JoinHandle<anyhow::Result<()>>,
}

async fn start_relay(connector: Arc<MockConnector>) -> TestRelay {
    let mut config = RelayConfig::default();
    config.connect_timeout = Duration::from_secs(2);
    config.close_timeout = Duration::from_millis(500);

    let state = Arc::new(RelayState::new(config, connector));
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let cancel = CancellationToken::new();

    let server = RelayServer::new(Arc::clone(&state), cancel.clone());
    let handle = tokio::spawn(async move { server.serve(listener).await });

    TestRelay {
        url: format!("ws://{}/ws", addr),
        state,
        cancel,
        handle,
    }
}

async fn send(client: &mut Client, json: &str) {
    client.send(Message::Text(json.to_string())).await.unwrap();
}

/// Next text frame from the relay, parsed as JSON
async fn recv(client: &mut Client) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .expect("Timed out waiting for relay frame")
            .expect("Relay closed the socket")
            .expect("WebSocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("Unexpected frame: {:?}", other),
        }
    }
}

async fn assert_no_frame(client: &mut Client) {
    if let Ok(Some(msg)) = tokio::time::timeout(Duration::from_millis(150), client.next()).await {
        panic!("Unexpected frame: {:?}", msg);
    }
}

const CONNECT: &str =
    r#"{"type":"connect","ssh":{"host":"h","port":22,"username":"u","password":"p"}}"#;

#[tokio::test]
async fn test_chat_round_trip_over_websocket() {
    let (connector, mut agents) = MockConnector::new();
    let relay = start_relay(connector).await;
    let (mut client, _) = connect_async(relay.url.as_str()).await.unwrap();

    send(&mut client, CONNECT).await;
    assert_eq!(recv(&mut client).await, serde_json::json!({"type": "connected"}));
    let mut agent = common::next_agent(&mut agents).await;

    send(&mut client, r#"{"type":"message","content":"hi"}"#).await;
    assert_eq!(agent.read_line().await.unwrap(), r#"{"content":"hi"}"#);

    agent.write(br#"{"cont"#).await;
    agent.write(b"ent\":\"hello\"}\n").await;
    assert_eq!(
        recv(&mut client).await,
        serde_json::json!({"type": "response", "content": "hello"})
    );
    assert_no_frame(&mut client).await;

    send(&mut client, r#"{"type":"disconnect"}"#).await;
    assert_eq!(recv(&mut client).await, serde_json::json!({"type": "disconnected"}));
    assert_eq!(agent.read_line().await, None);
    assert!(agent.ssh_closed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_malformed_frames_are_dropped() {
    let (connector, mut agents) = MockConnector::new();
    let relay = start_relay(Arc::clone(&connector)).await;
    let (mut client, _) = connect_async(relay.url.as_str()).await.unwrap();

    send(&mut client, "not json").await;
    send(&mut client, r#"{"type":"teleport"}"#).await;
    send(&mut client, r#"{"type":"message"}"#).await;
    assert_no_frame(&mut client).await;
    assert_eq!(connector.opens(), 0);

    // The session is still usable afterwards
    send(&mut client, CONNECT).await;
    assert_eq!(recv(&mut client).await, serde_json::json!({"type": "connected"}));
    let mut agent = common::next_agent(&mut agents).await;

    send(&mut client, r#"{"type":"message","content":"after"}"#).await;
    assert_eq!(agent.read_line().await.unwrap(), r#"{"content":"after"}"#);
}

#[tokio::test]
async fn test_forward_failure_is_reported() {
    let (connector, _agents) = MockConnector::new();
    connector.push(common::Outcome::ForwardFails("administratively prohibited"));
    let relay = start_relay(connector).await;
    let (mut client, _) = connect_async(relay.url.as_str()).await.unwrap();

    send(&mut client, CONNECT).await;
    let frame = recv(&mut client).await;
    assert_eq!(frame["type"], "error");
    assert_eq!(
        frame["content"],
        "Tunnel failed: administratively prohibited"
    );
    assert_no_frame(&mut client).await;
}

#[tokio::test]
async fn test_client_close_tears_down_tunnel() {
    let (connector, mut agents) = MockConnector::new();
    let relay = start_relay(connector).await;
    let (mut client, _) = connect_async(relay.url.as_str()).await.unwrap();

    send(&mut client, CONNECT).await;
    assert_eq!(recv(&mut client).await, serde_json::json!({"type": "connected"}));
    let mut agent = common::next_agent(&mut agents).await;
    assert_eq!(relay.state.sessions.len(), 1);

    client.close(None).await.unwrap();

    assert_eq!(agent.read_line().await, None);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(agent.ssh_closed.load(Ordering::SeqCst));
    assert!(relay.state.sessions.is_empty());
}

#[tokio::test]
async fn test_clients_get_separate_sessions() {
    let (connector, mut agents) = MockConnector::new();
    let relay = start_relay(connector).await;
    let (mut alice, _) = connect_async(relay.url.as_str()).await.unwrap();
    let (mut bob, _) = connect_async(relay.url.as_str()).await.unwrap();

    send(&mut alice, CONNECT).await;
    assert_eq!(recv(&mut alice).await, serde_json::json!({"type": "connected"}));
    let mut alice_agent = common::next_agent(&mut agents).await;

    send(&mut bob, CONNECT).await;
    assert_eq!(recv(&mut bob).await, serde_json::json!({"type": "connected"}));
    let mut bob_agent = common::next_agent(&mut agents).await;

    alice_agent.write(b"{\"content\":\"for alice\"}\n").await;
    bob_agent.write(b"{\"content\":\"for bob\"}\n").await;

    assert_eq!(recv(&mut alice).await["content"], "for alice");
    assert_eq!(recv(&mut bob).await["content"], "for bob");
    assert_no_frame(&mut alice).await;
    assert_no_frame(&mut bob).await;

    send(&mut bob, r#"{"type":"message","content":"from bob"}"#).await;
    assert_eq!(bob_agent.read_line().await.unwrap(), r#"{"content":"from bob"}"#);
    assert_eq!(relay.state.sessions.len(), 2);
}

#[tokio::test]
async fn test_shutdown_closes_live_tunnels() {
    let (connector, mut agents) = MockConnector::new();
    let relay = start_relay(connector).await;
    let (mut client, _) = connect_async(relay.url.as_str()).await.unwrap();

    send(&mut client, CONNECT).await;
    assert_eq!(recv(&mut client).await, serde_json::json!({"type": "connected"}));
    let agent = common::next_agent(&mut agents).await;

    // Graceful shutdown waits for open sockets, so hang up the client too
    relay.cancel.cancel();
    drop(client);

    tokio::time::timeout(Duration::from_secs(3), relay.handle)
        .await
        .expect("Relay did not shut down")
        .unwrap()
        .unwrap();
    assert!(agent.ssh_closed.load(Ordering::SeqCst));
}
