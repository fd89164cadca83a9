//! Direct-TCP peer transport
//!
//! The minimal transport provider: peers are reached by dialing a
//! configured address (or a literal `host:port` identifier) directly.
//! Signaling, hole punching, and link-layer crypto belong to richer
//! providers behind the same trait.

use std::collections::HashMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use pl_core::error::TransportError;
use pl_core::traits::{BoxedDuplex, PeerTransport};
use pl_core::HostId;

/// Peer transport over plain TCP
pub struct TcpPeerTransport {
    listener: TcpListener,
    peers: HashMap<String, String>,
    connect_timeout: Duration,
}

impl TcpPeerTransport {
    /// Bind the peer listener
    pub async fn bind(
        bind_address: &str,
        peers: HashMap<String, String>,
        connect_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(bind_address).await?;
        Ok(Self {
            listener,
            peers,
            connect_timeout,
        })
    }

    /// Address the listener actually bound to
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    fn resolve(&self, target: &HostId) -> Result<String, TransportError> {
        if let Some(address) = self.peers.get(target.as_str()) {
            return Ok(address.clone());
        }
        // A literal address works without a peers entry.
        if target.as_str().contains(':') {
            return Ok(target.as_str().to_string());
        }
        Err(TransportError::UnknownPeer(target.to_string()))
    }
}

#[async_trait]
impl PeerTransport for TcpPeerTransport {
    async fn dial(&self, target: &HostId) -> Result<BoxedDuplex, TransportError> {
        let address = self.resolve(target)?;
        tracing::debug!("Dialing peer {} at {}", target, address);

        let stream = timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::Timeout {
                target: address.clone(),
            })?
            .map_err(|e| TransportError::Dial {
                target: address,
                source: e,
            })?;

        let _ = stream.set_nodelay(true);
        Ok(Box::new(stream))
    }

    async fn accept(&self) -> Result<(BoxedDuplex, SocketAddr), TransportError> {
        let (stream, peer_addr) = self.listener.accept().await?;
        let _ = stream.set_nodelay(true);
        Ok((Box::new(stream), peer_addr))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn transport_with(peers: HashMap<String, String>) -> TcpPeerTransport {
        TcpPeerTransport::bind("127.0.0.1:0", peers, Duration::from_secs(1))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_unknown_peer_is_rejected() {
        let transport = transport_with(HashMap::new()).await;
        let err = match transport.dial(&HostId::new("nowhere")).await {
            Ok(_) => panic!("expected dial to fail for unknown peer"),
            Err(e) => e,
        };
        assert!(matches!(err, TransportError::UnknownPeer(_)));
    }

    #[tokio::test]
    async fn test_dial_resolves_configured_peer() {
        let far = transport_with(HashMap::new()).await;
        let far_addr = far.local_addr().unwrap().to_string();

        let mut peers = HashMap::new();
        peers.insert("far".to_string(), far_addr);
        let near = transport_with(peers).await;

        let accepted = tokio::spawn(async move { far.accept().await });
        near.dial(&HostId::new("far")).await.unwrap();
        accepted.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_dial_accepts_literal_address() {
        let far = transport_with(HashMap::new()).await;
        let far_addr = far.local_addr().unwrap().to_string();

        let near = transport_with(HashMap::new()).await;
        let accepted = tokio::spawn(async move { far.accept().await });
        near.dial(&HostId::new(far_addr)).await.unwrap();
        accepted.await.unwrap().unwrap();
    }
}
