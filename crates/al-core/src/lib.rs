//! al-core: Core abstractions and configuration for agentlink
//!
//! This crate provides shared types, traits, and configuration structures
//! used by the relay daemon and the chat client.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use error::{ConfigError, RelayError, TunnelError};
pub use types::{AgentTarget, Credential, SessionState, SshEndpoint};
