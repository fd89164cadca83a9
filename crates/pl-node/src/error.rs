//! Node error type

use pl_core::error::{ConfigError, SessionError, TransportError, TrustError};
use pl_protocol::{status, ProtocolError};
use thiserror::Error;

/// Top-level error for node and variant operations
#[derive(Error, Debug)]
pub enum NodeError {
    /// Malformed control message or unknown protocol code
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Peer transport failure
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Host-key trust failure
    #[error("Trust error: {0}")]
    Trust(#[from] TrustError),

    /// Session lifecycle failure
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration failure
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// SSH transport failure
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// SSH key handling failure
    #[error("SSH key error: {0}")]
    Keys(#[from] russh_keys::Error),

    /// All authentication methods exhausted
    #[error("Authentication failed for {user}@{host}")]
    AuthenticationFailed { user: String, host: String },

    /// Remote shell exited with a non-zero status
    #[error("Shell exited with status {0}")]
    ShellExit(u32),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl NodeError {
    /// Response status code reported for this error
    pub fn status_code(&self) -> i32 {
        match self {
            NodeError::Protocol(_) => status::DECODE,
            NodeError::Transport(_) => status::DIAL,
            NodeError::Trust(_) => status::TRUST,
            NodeError::Session(SessionError::NotFound(_)) => status::NOT_FOUND,
            NodeError::Session(SessionError::Rejected { status }) => *status,
            NodeError::Session(SessionError::TargetUnset) => status::DIAL,
            _ => status::ERROR,
        }
    }
}
