//! al-chat: Client for the agentlink relay
//!
//! Provides [`RelayClient`], a typed wrapper over the relay's WebSocket
//! envelope protocol, and the terminal helpers used by the `al-chat` binary.

pub mod client;
pub mod output;

pub use client::{ClientError, RelayClient};
