//! Shared test fixtures: an in-memory tunnel connector
//!
//! Each successful forward hands the test the agent's end of a duplex pipe,
//! so tests can play the agent: read request lines, write reply bytes in
//! arbitrary chunks, or hang up.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{
    AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, DuplexStream, ReadBuf,
    ReadHalf, WriteHalf,
};
use tokio::sync::mpsc;

use al_core::traits::{AgentStream, SshSession, TunnelConnector};
use al_core::{AgentTarget, SshEndpoint, TunnelError};
use al_protocol::{ClientEnvelope, ServerEnvelope, SshCredentials};
use al_relay::SessionSettings;

/// What the next connect attempt does
#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Open,
    HandshakeFails(&'static str),
    /// Handshake never answers
    Hang,
    ForwardFails(&'static str),
    /// Handshake succeeds, forward request never answers
    ForwardHangs,
}

/// The agent's side of one opened tunnel
pub struct AgentEnd {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
    /// Makes every relay-side write fail from now on
    broken: Arc<AtomicBool>,
    /// Set once the relay disconnected the SSH session
    pub ssh_closed: Arc<AtomicBool>,
    /// Endpoint the relay dialed
    pub endpoint: SshEndpoint,
}

impl AgentEnd {
    /// Next request line (without the delimiter), `None` once the relay closed
    /// the channel
    pub async fn read_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let n = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("Timed out waiting for agent request")
            .expect("Agent read failed");
        if n == 0 {
            return None;
        }
        assert!(line.ends_with('\n'), "request not newline-terminated: {:?}", line);
        line.pop();
        Some(line)
    }

    /// Write raw bytes as the agent
    pub async fn write(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.expect("Agent write failed");
        self.writer.flush().await.expect("Agent flush failed");
    }

    /// Write raw bytes, ignoring a channel the relay already dropped
    pub async fn write_lossy(&mut self, bytes: &[u8]) {
        let _ = self.writer.write_all(bytes).await;
        let _ = self.writer.flush().await;
    }

    /// Make the relay's writes on this channel fail
    pub fn break_writes(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    /// Hang up the agent side
    pub async fn hang_up(mut self) {
        let _ = self.writer.shutdown().await;
    }
}

/// Relay's end of the pipe, with writes that can be made to fail
struct RelaySide {
    inner: DuplexStream,
    broken: Arc<AtomicBool>,
}

impl AsyncRead for RelaySide {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_read(cx, buf)
    }
}

impl AsyncWrite for RelaySide {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.broken.load(Ordering::SeqCst) {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "channel reset",
            )));
        }
        Pin::new(&mut self.inner).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.inner).poll_shutdown(cx)
    }
}

struct MockSsh {
    outcome: Outcome,
    endpoint: SshEndpoint,
    agents: mpsc::UnboundedSender<AgentEnd>,
    closed: Arc<AtomicBool>,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
    close_delay: Duration,
}

#[async_trait]
impl SshSession for MockSsh {
    async fn forward(
        &mut self,
        _target: &AgentTarget,
    ) -> Result<Box<dyn AgentStream>, TunnelError> {
        match self.outcome {
            Outcome::ForwardFails(msg) => Err(TunnelError::Forward(msg.to_string())),
            Outcome::ForwardHangs => std::future::pending().await,
            _ => {
                let (relay_side, agent_side) = tokio::io::duplex(64 * 1024);
                let (reader, writer) = tokio::io::split(agent_side);
                let broken = Arc::new(AtomicBool::new(false));
                let _ = self.agents.send(AgentEnd {
                    reader: BufReader::new(reader),
                    writer,
                    broken: Arc::clone(&broken),
                    ssh_closed: Arc::clone(&self.closed),
                    endpoint: self.endpoint.clone(),
                });
                Ok(Box::new(RelaySide {
                    inner: relay_side,
                    broken,
                }))
            }
        }
    }

    async fn close(self: Box<Self>) -> Result<(), TunnelError> {
        if !self.close_delay.is_zero() {
            tokio::time::sleep(self.close_delay).await;
        }
        self.closed.store(true, Ordering::SeqCst);
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            Err(TunnelError::Close("connection reset".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Tunnel connector backed by in-memory pipes
pub struct MockConnector {
    outcomes: Mutex<VecDeque<Outcome>>,
    agents: mpsc::UnboundedSender<AgentEnd>,
    opens: AtomicUsize,
    closes: Arc<AtomicUsize>,
    fail_close: bool,
    close_delay: Duration,
}

impl MockConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<AgentEnd>) {
        Self::build(false, Duration::ZERO)
    }

    /// Connector whose SSH sessions fail to close
    pub fn failing_close() -> (Arc<Self>, mpsc::UnboundedReceiver<AgentEnd>) {
        Self::build(true, Duration::ZERO)
    }

    /// Connector whose SSH sessions take `delay` to close
    pub fn slow_close(delay: Duration) -> (Arc<Self>, mpsc::UnboundedReceiver<AgentEnd>) {
        Self::build(false, delay)
    }

    fn build(
        fail_close: bool,
        close_delay: Duration,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<AgentEnd>) {
        let (agents, agent_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            outcomes: Mutex::new(VecDeque::new()),
            agents,
            opens: AtomicUsize::new(0),
            closes: Arc::new(AtomicUsize::new(0)),
            fail_close,
            close_delay,
        });
        (connector, agent_rx)
    }

    /// Script the next connect attempt; unscripted attempts succeed
    pub fn push(&self, outcome: Outcome) {
        self.outcomes.lock().unwrap().push_back(outcome);
    }

    /// Number of handshakes started so far
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Number of SSH sessions closed so far
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Wait until `n` handshakes have started
    pub async fn wait_for_opens(&self, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while self.opens() < n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("Timed out waiting for handshake");
    }
}

#[async_trait]
impl TunnelConnector for MockConnector {
    async fn handshake(&self, endpoint: &SshEndpoint) -> Result<Box<dyn SshSession>, TunnelError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Open);

        match outcome {
            Outcome::HandshakeFails(msg) => Err(TunnelError::Handshake(msg.to_string())),
            Outcome::Hang => std::future::pending().await,
            outcome => Ok(Box::new(MockSsh {
                outcome,
                endpoint: endpoint.clone(),
                agents: self.agents.clone(),
                closed: Arc::new(AtomicBool::new(false)),
                closes: Arc::clone(&self.closes),
                fail_close: self.fail_close,
                close_delay: self.close_delay,
            })),
        }
    }
}

/// Session settings with short timeouts
pub fn test_settings() -> SessionSettings {
    SessionSettings {
        target: AgentTarget::default(),
        connect_timeout: Duration::from_secs(2),
        close_timeout: Duration::from_millis(500),
    }
}

pub fn connect_directive() -> ClientEnvelope {
    ClientEnvelope::Connect {
        ssh: SshCredentials::password("h", 22, "u", "p"),
    }
}

pub fn message(content: &str) -> ClientEnvelope {
    ClientEnvelope::Message {
        content: content.to_string(),
    }
}

/// Next envelope sent to the client
pub async fn next_envelope(rx: &mut mpsc::UnboundedReceiver<ServerEnvelope>) -> ServerEnvelope {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for envelope")
        .expect("Client channel closed")
}

/// Assert nothing else reaches the client for a short while
pub async fn assert_quiet(rx: &mut mpsc::UnboundedReceiver<ServerEnvelope>) {
    tokio::time::sleep(Duration::from_millis(100)).await;
    if let Ok(envelope) = rx.try_recv() {
        panic!("Unexpected envelope: {:?}", envelope);
    }
}

/// Next opened agent end
pub async fn next_agent(rx: &mut mpsc::UnboundedReceiver<AgentEnd>) -> AgentEnd {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for tunnel")
        .expect("Connector dropped")
}

/// Wait for a flag another task sets
pub async fn wait_for_flag(flag: &AtomicBool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !flag.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("Timed out waiting for flag");
}
