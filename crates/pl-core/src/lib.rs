//! pl-core: Core abstractions and configuration for peerlink
//!
//! This crate provides shared types, the error hierarchy, node
//! configuration, and the collaborator traits (peer transport, trust
//! store) consumed by the node and the CLI.

pub mod config;
pub mod error;
pub mod traits;
pub mod types;

pub use types::{Direction, HostId, SessionStatus};
