//! pl-protocol: Wire protocol for peerlink session brokering
//!
//! This crate defines the binary control protocol spoken over the local
//! loopback control socket and as the session-open preamble on peer
//! streams: pool identifiers, opcodes, the control message, and the
//! length-framed codec.

pub mod codec;
pub mod control;
pub mod error;
pub mod pool_id;

pub use codec::{ControlCodec, MAX_FRAME_SIZE};
pub use control::{status, ControlMessage, MessageKind, Opcode, ProtocolCode};
pub use error::ProtocolError;
pub use pool_id::PoolId;
