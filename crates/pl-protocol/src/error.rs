//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Unknown operation code in the low bits of the packed type field
    #[error("Unknown opcode: {0:#04x}")]
    UnknownOpcode(u8),

    /// Unknown protocol code in the high bits of the packed type field
    #[error("Unknown protocol code: {0:#x}")]
    UnknownProtocolCode(u32),

    /// Pair identifier that is not a valid pool id string
    #[error("Invalid pair id: {0}")]
    InvalidPairId(String),

    /// Frame exceeds maximum size
    #[error("Frame too large: {size} bytes exceeds maximum of {max} bytes")]
    FrameTooLarge { size: usize, max: usize },

    /// Peer closed the connection before a full message arrived
    #[error("Connection closed mid-message")]
    ConnectionClosed,

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
