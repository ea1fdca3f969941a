//! Core error types for agentlink

use al_protocol::ProtocolError;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error type for the agentlink ecosystem
#[derive(Error, Debug)]
pub enum RelayError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Tunnel error
    #[error("{0}")]
    Tunnel(#[from] TunnelError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A client directive was well-formed JSON but unusable
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures of the SSH leg
///
/// The display text is what the client sees in an `error` envelope, so the
/// prefix tells the operator which leg broke.
#[derive(Error, Debug)]
pub enum TunnelError {
    /// TCP connect, key exchange, host key check or authentication failed
    #[error("SSH error: {0}")]
    Handshake(String),

    /// SSH session is up but the forwarded channel could not be opened
    #[error("Tunnel failed: {0}")]
    Forward(String),

    /// Closing the channel or SSH connection failed
    #[error("Close failed: {0}")]
    Close(String),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
}
