//! Core trait definitions

mod tunnel;

pub use tunnel::{AgentLink, AgentStream, SshSession, TunnelConnector};
