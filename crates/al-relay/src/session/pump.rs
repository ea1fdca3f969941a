//! Frame pumps between a session and its forwarded channel
//!
//! Each live tunnel has exactly one reader task and one writer task. The
//! reader owns the reassembly buffer (inside `FramedRead`) and turns every
//! complete agent line into a `response` envelope. The writer owns the
//! write half and sends one JSON line per client message, in order.
//!
//! Only the reader talks to the client. A failed write is handed to the
//! reader, which stops and reports the end of the tunnel, so no `response`
//! can follow the `disconnected` it causes.

use std::sync::Weak;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use al_core::traits::{AgentLink, AgentStream, SshSession};
use al_protocol::{AgentLineCodec, AgentRequest, ServerEnvelope};

use super::machine::{ClientSender, RelaySession};

/// Why a tunnel stopped on its own
#[derive(Debug)]
pub(crate) enum TunnelEnd {
    /// Agent side closed the channel
    Eof,
    /// Reading from the channel failed
    ReadFailed(String),
    /// Writing to the channel failed
    WriteFailed(String),
}

impl std::fmt::Display for TunnelEnd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TunnelEnd::Eof => write!(f, "agent closed the stream"),
            TunnelEnd::ReadFailed(e) => write!(f, "read failed: {}", e),
            TunnelEnd::WriteFailed(e) => write!(f, "write failed: {}", e),
        }
    }
}

/// A live tunnel: the forwarded channel's pumps plus its SSH connection
pub(crate) struct Tunnel {
    /// Connect attempt this tunnel came from
    pub(crate) generation: u64,
    /// Queue feeding the writer task
    requests: mpsc::UnboundedSender<AgentRequest>,
    /// Stops both pumps
    cancel: CancellationToken,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
    ssh: Box<dyn SshSession>,
}

impl Tunnel {
    /// Split the link and start its pumps
    pub(crate) fn start(
        session: Weak<RelaySession>,
        generation: u64,
        link: AgentLink,
        client_tx: ClientSender,
        close_timeout: Duration,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(link.stream);
        let (requests, request_rx) = mpsc::unbounded_channel();
        let (failure_tx, failure_rx) = oneshot::channel();
        let cancel = CancellationToken::new();
        let span = tracing::Span::current();

        let reader = tokio::spawn(
            run_reader(
                session,
                generation,
                read_half,
                client_tx,
                failure_rx,
                cancel.clone(),
            )
            .instrument(span.clone()),
        );
        let writer = tokio::spawn(
            run_writer(write_half, request_rx, failure_tx, cancel.clone(), close_timeout)
            .instrument(span),
        );

        Self {
            generation,
            requests,
            cancel,
            reader,
            writer,
            ssh: link.session,
        }
    }

    /// Queue one client message for the agent
    ///
    /// Returns false when the writer has already stopped.
    pub(crate) fn send(&self, request: AgentRequest) -> bool {
        self.requests.send(request).is_ok()
    }

    /// Close the channel, then the SSH connection
    ///
    /// Best effort: failures and timeouts are logged, never returned.
    pub(crate) async fn close(self, close_timeout: Duration) {
        let Tunnel {
            requests,
            cancel,
            reader,
            writer,
            ssh,
            ..
        } = self;

        cancel.cancel();
        drop(requests);

        // Channel first: the writer shuts its half down on cancel
        join_pump("writer", writer, close_timeout).await;
        join_pump("reader", reader, close_timeout).await;

        close_ssh(ssh, close_timeout).await;
    }
}

/// Disconnect an SSH connection, logging failures
pub(crate) async fn close_ssh(ssh: Box<dyn SshSession>, close_timeout: Duration) {
    match tokio::time::timeout(close_timeout, ssh.close()).await {
        Ok(Ok(())) => tracing::debug!("SSH connection closed"),
        Ok(Err(e)) => tracing::warn!("Error closing SSH connection: {}", e),
        Err(_) => tracing::warn!("Timed out closing SSH connection after {:?}", close_timeout),
    }
}

async fn join_pump(name: &str, mut handle: JoinHandle<()>, close_timeout: Duration) {
    match tokio::time::timeout(close_timeout, &mut handle).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) if e.is_cancelled() => {}
        Ok(Err(e)) => tracing::warn!("Tunnel {} task failed: {}", name, e),
        Err(_) => {
            tracing::warn!("Tunnel {} task did not stop in {:?}, aborting", name, close_timeout);
            handle.abort();
        }
    }
}

/// Release a link that was opened for an attempt nobody is waiting on
pub(crate) async fn discard_link(link: AgentLink, close_timeout: Duration) {
    let AgentLink { stream, session } = link;
    drop(stream);
    close_ssh(session, close_timeout).await;
}

async fn run_reader(
    session: Weak<RelaySession>,
    generation: u64,
    read_half: ReadHalf<Box<dyn AgentStream>>,
    client_tx: ClientSender,
    mut write_failure: oneshot::Receiver<String>,
    cancel: CancellationToken,
) {
    let mut frames = FramedRead::new(read_half, AgentLineCodec::new());
    let mut writer_running = true;

    let end = loop {
        tokio::select! {
            biased;

            _ = cancel.cancelled() => return,

            failure = &mut write_failure, if writer_running => match failure {
                Ok(e) => break TunnelEnd::WriteFailed(e),
                // Writer stopped without failing
                Err(_) => writer_running = false,
            },

            next = frames.next() => match next {
                Some(Ok(frame)) => {
                    tracing::trace!("Agent line: {} bytes", frame.content.len());
                    let envelope = ServerEnvelope::Response { content: frame.content };
                    if client_tx.send(envelope).is_err() {
                        // Client transport is gone; its teardown cancels us
                        return;
                    }
                }
                Some(Err(e)) => break TunnelEnd::ReadFailed(e.to_string()),
                None => break TunnelEnd::Eof,
            },
        }
    };

    if let Some(session) = session.upgrade() {
        session.tunnel_ended(generation, end).await;
    }
}

/// How the writer loop stopped
enum WriterExit {
    Cancelled,
    QueueClosed,
    Failed(String),
}

async fn run_writer(
    write_half: WriteHalf<Box<dyn AgentStream>>,
    mut requests: mpsc::UnboundedReceiver<AgentRequest>,
    failure_tx: oneshot::Sender<String>,
    cancel: CancellationToken,
    close_timeout: Duration,
) {
    let mut sink = FramedWrite::new(write_half, AgentLineCodec::new());

    let exit = tokio::select! {
        biased;

        _ = cancel.cancelled() => WriterExit::Cancelled,

        exit = async {
            while let Some(request) = requests.recv().await {
                if let Err(e) = sink.send(request).await {
                    return WriterExit::Failed(e.to_string());
                }
            }
            WriterExit::QueueClosed
        } => exit,
    };

    match exit {
        WriterExit::Cancelled | WriterExit::QueueClosed => {
            // Half-close the channel so the agent sees EOF
            match tokio::time::timeout(close_timeout, sink.close()).await {
                Ok(Ok(())) => tracing::debug!("Tunnel channel closed"),
                Ok(Err(e)) => tracing::debug!("Error closing tunnel channel: {}", e),
                Err(_) => tracing::debug!("Timed out closing tunnel channel"),
            }
        }
        WriterExit::Failed(e) => {
            let _ = failure_tx.send(e);
        }
    }
}
