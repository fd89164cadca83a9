//! Forward-service variant: the remote half of a port forward
//!
//! Lives on the node that owns the forwarded service. The target port
//! arrives on the variant instance itself (decoded from the session-open
//! payload); there is deliberately no process-wide port state, so any
//! number of forward sessions can coexist.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio::time::timeout;

use pl_core::error::{SessionError, TransportError};
use pl_core::HostId;

use crate::error::NodeError;
use crate::variant::VariantContext;

/// Wire parameters of a forward-service session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwardServiceParams {
    /// Peer that originated the forward
    pub host: HostId,
    /// Local port to dial once the session opens; `0` means not yet set
    pub target_port: u16,
}

/// Remote-side counterpart of a port forward
pub struct ForwardServiceVariant {
    params: ForwardServiceParams,
    pair_id: String,
    connect_timeout: Duration,
    prepared: bool,
}

impl ForwardServiceVariant {
    /// Create the initiator-side instance for one forwarded connection
    pub fn new(host: HostId, target_port: u16) -> Self {
        Self::from_params(ForwardServiceParams { host, target_port })
    }

    /// Reconstruct from decoded wire parameters
    pub fn from_params(params: ForwardServiceParams) -> Self {
        Self {
            params,
            pair_id: String::new(),
            connect_timeout: Duration::from_secs(10),
            prepared: false,
        }
    }

    /// Wire parameters
    pub fn params(&self) -> &ForwardServiceParams {
        &self.params
    }

    pub(crate) fn init(&mut self, ctx: &VariantContext) {
        self.connect_timeout = ctx.connect_timeout;
    }

    /// Mark the variant ready to receive its target
    pub(crate) fn prepare(&mut self) -> Result<(), NodeError> {
        self.prepared = true;
        Ok(())
    }

    /// Dial the forwarded local service.
    ///
    /// Refuses to dial until prepared and the target port is set.
    pub(crate) async fn respond(&mut self) -> Result<TcpStream, NodeError> {
        if !self.prepared || self.params.target_port == 0 {
            return Err(SessionError::TargetUnset.into());
        }

        let address = format!("127.0.0.1:{}", self.params.target_port);
        tracing::debug!("Dialing forwarded service at {}", address);

        let stream = timeout(self.connect_timeout, TcpStream::connect(&address))
            .await
            .map_err(|_| TransportError::Timeout {
                target: address.clone(),
            })?
            .map_err(|e| TransportError::Dial {
                target: address,
                source: e,
            })?;

        Ok(stream)
    }

    pub(crate) async fn close(&mut self) {
        // Acceptor-side resources are owned by the session relay.
    }

    pub(crate) fn host_id(&self) -> &HostId {
        &self.params.host
    }

    pub(crate) fn pair_id(&self) -> &str {
        &self.pair_id
    }

    pub(crate) fn set_pair_id(&mut self, id: &str) {
        if self.pair_id.is_empty() {
            self.pair_id = id.to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_respond_refuses_unset_target() {
        let mut variant = ForwardServiceVariant::new(HostId::new("origin"), 0);
        variant.prepare().unwrap();

        let err = variant.respond().await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Session(SessionError::TargetUnset)
        ));
    }

    #[tokio::test]
    async fn test_respond_refuses_before_prepare() {
        let mut variant = ForwardServiceVariant::new(HostId::new("origin"), 8080);
        let err = variant.respond().await.unwrap_err();
        assert!(matches!(
            err,
            NodeError::Session(SessionError::TargetUnset)
        ));
    }

    #[tokio::test]
    async fn test_respond_dials_target() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut variant = ForwardServiceVariant::new(HostId::new("origin"), port);
        variant.prepare().unwrap();

        let accepted = tokio::spawn(async move { listener.accept().await });
        variant.respond().await.unwrap();
        accepted.await.unwrap().unwrap();
    }
}
