//! al-relay: WebSocket to SSH relay for agentlink
//!
//! The relay accepts WebSocket clients, and for each one opens an SSH
//! connection on request, forwards a channel to the agent's loopback
//! socket on the SSH host, and relays chat messages as JSON lines across
//! that tunnel.

pub mod server;
pub mod session;
pub mod state;
pub mod tunnel;

pub use session::{RelaySession, SessionRegistry, SessionSettings};
pub use state::RelayState;
