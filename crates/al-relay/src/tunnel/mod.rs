//! SSH tunnels to the agent socket

mod ssh;

pub use ssh::SshConnector;
