//! Peer transport abstraction
//!
//! The session core treats the peer link as an opaque reliable duplex
//! byte stream once established. How the link comes to exist (signaling,
//! hole punching, transport crypto) is the provider's concern.

use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::error::TransportError;
use crate::types::HostId;

/// A reliable bidirectional byte stream
pub trait Duplex: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> Duplex for T {}

/// An established peer stream with its concrete type erased
pub type BoxedDuplex = Box<dyn Duplex>;

/// Provider of peer-to-peer links
#[async_trait]
pub trait PeerTransport: Send + Sync {
    /// Open a stream to the named peer
    async fn dial(&self, target: &HostId) -> Result<BoxedDuplex, TransportError>;

    /// Wait for the next incoming peer stream
    async fn accept(&self) -> Result<(BoxedDuplex, SocketAddr), TransportError>;
}
