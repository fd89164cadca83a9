//! Core error types for peerlink

use std::path::PathBuf;
use thiserror::Error;

/// Peer-transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    /// No route to the named peer
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),

    /// Dial failed
    #[error("Failed to dial {target}: {source}")]
    Dial {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Dial timed out
    #[error("Dialing {target} timed out")]
    Timeout { target: String },

    /// Listener closed or unusable
    #[error("Transport closed")]
    Closed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Host-key trust errors
#[derive(Error, Debug)]
pub enum TrustError {
    /// Host is known but presented a different key
    #[error("Host key for {host} changed (expected {expected})")]
    KeyChanged { host: String, expected: String },

    /// Trust store entry that cannot be parsed
    #[error("Malformed trust store entry at {path}:{line}")]
    Malformed { path: PathBuf, line: usize },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Session lifecycle errors
#[derive(Error, Debug)]
pub enum SessionError {
    /// No session with the given pair id
    #[error("Session not found: {0}")]
    NotFound(String),

    /// A session with this pair id is already open
    #[error("Duplicate pair id: {0}")]
    DuplicatePairId(String),

    /// Forward service asked to dial before its target port was set
    #[error("Forward target port not set")]
    TargetUnset,

    /// Variant has no acceptor-side half
    #[error("Variant has no acceptor side")]
    NoAcceptor,

    /// The control plane rejected the request
    #[error("Request rejected with status {status}")]
    Rejected { status: i32 },

    /// Session torn down while establishing
    #[error("Session cancelled")]
    Cancelled,
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
