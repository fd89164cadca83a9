//! peerlink CLI library
//!
//! Command implementations, the control-plane client, and output
//! formatting for the `peerlink` binary.

pub mod commands;
pub mod control;
pub mod output;
