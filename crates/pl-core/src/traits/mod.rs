//! Collaborator traits consumed by the session core

pub mod transport;
pub mod trust;

pub use transport::{BoxedDuplex, Duplex, PeerTransport};
pub use trust::{TrustDecision, TrustStore};
