//! al-protocol: Wire protocol for agentlink
//!
//! Two framings meet in the relay:
//!
//! - the client-facing envelope, one JSON object per WebSocket message,
//!   tagged by `type` ([`ClientEnvelope`], [`ServerEnvelope`]);
//! - the agent-facing stream, one JSON object per `\n`-terminated line
//!   ([`AgentRequest`], [`AgentFrame`]) decoded by [`AgentLineCodec`].

pub mod codec;
pub mod envelope;
pub mod error;
pub mod frame;
pub mod session;

pub use codec::AgentLineCodec;
pub use envelope::{ClientEnvelope, ServerEnvelope, SshCredentials, DEFAULT_SSH_PORT};
pub use error::ProtocolError;
pub use frame::{AgentFrame, AgentRequest};
pub use session::SessionId;
