//! Port-forward variant: a local listener tunneled to a remote port
//!
//! Runs on the initiating side. The variant registers itself with the
//! local node (for status queries and remote teardown), then accepts
//! local connections without bound; every accepted connection becomes an
//! independent forward-service session with a fresh pair id. Sessions are
//! never pooled or reused.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};

use pl_core::error::{ConfigError, SessionError};
use pl_core::HostId;
use pl_protocol::{MessageKind, Opcode, ProtocolCode, ProtocolError};

use crate::error::NodeError;
use crate::pipe::{pipe, Rewound};
use crate::sender::Sender;
use crate::variant::{ForwardServiceParams, VariantContext};

/// Wire parameters of a port-forward session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortForwardParams {
    /// Peer that owns the forwarded service
    pub host: HostId,
    /// Local port to listen on
    pub listen_port: u16,
    /// Remote port to forward to
    pub target_port: u16,
}

/// Local listener forwarding each accepted connection to a remote port
pub struct PortForwardVariant {
    params: PortForwardParams,
    pair_id: String,
    control_address: String,
    /// Registration stream; the node closing it stops the accept loop
    control: Option<Rewound<TcpStream>>,
    initiator: bool,
}

impl PortForwardVariant {
    /// Create the initiator-side instance
    pub fn new(host: HostId, listen_port: u16, target_port: u16) -> Self {
        Self {
            params: PortForwardParams {
                host,
                listen_port,
                target_port,
            },
            pair_id: String::new(),
            control_address: String::new(),
            control: None,
            initiator: true,
        }
    }

    /// Reconstruct from decoded wire parameters
    pub fn from_params(params: PortForwardParams) -> Self {
        Self {
            params,
            pair_id: String::new(),
            control_address: String::new(),
            control: None,
            initiator: false,
        }
    }

    /// Wire parameters
    pub fn params(&self) -> &PortForwardParams {
        &self.params
    }

    pub(crate) fn init(&mut self, ctx: &VariantContext) {
        self.control_address = ctx.control_address.clone();
    }

    pub(crate) fn prepare(&mut self) -> Result<(), NodeError> {
        if self.params.listen_port == 0 || self.params.target_port == 0 {
            return Err(ConfigError::Invalid("forward ports must be non-zero".to_string()).into());
        }
        if self.params.host.is_empty() {
            return Err(ConfigError::Invalid("forward target host is required".to_string()).into());
        }
        Ok(())
    }

    /// Register with the local node, then serve local connections until
    /// the registration is torn down.
    pub(crate) async fn dial(&mut self) -> Result<(), NodeError> {
        let payload = Bytes::from(bincode::serialize(&self.params).map_err(ProtocolError::from)?);
        let sender = Sender::from_parts(
            MessageKind::new(Opcode::Up, ProtocolCode::PortForward),
            self.pair_id.clone(),
            payload,
            self.control_address.clone(),
        );

        let (stream, response) = sender.send().await?;
        self.set_pair_id(&response.pair_id);
        self.control = Some(stream);
        tracing::info!(
            "Forward {} registered: 127.0.0.1:{} -> {}:{}",
            self.pair_id,
            self.params.listen_port,
            self.params.host,
            self.params.target_port
        );

        if let Err(e) = self.serve().await {
            self.close().await;
            return Err(e);
        }
        Ok(())
    }

    /// Accept loop: one forward-service session per local connection
    async fn serve(&mut self) -> Result<(), NodeError> {
        let mut control = self
            .control
            .take()
            .ok_or_else(|| SessionError::NotFound(self.pair_id.clone()))?;

        let listener = TcpListener::bind(("127.0.0.1", self.params.listen_port)).await?;
        let mut scratch = [0u8; 32];

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let socket = match accepted {
                        Ok((socket, _)) => socket,
                        Err(e) => {
                            tracing::warn!("Accept failed on forward {}: {}", self.pair_id, e);
                            continue;
                        }
                    };
                    let child = ForwardServiceParams {
                        host: self.params.host.clone(),
                        target_port: self.params.target_port,
                    };
                    let control_address = self.control_address.clone();
                    tokio::spawn(async move {
                        if let Err(e) = forward_one(child, control_address, socket).await {
                            tracing::warn!("Forwarded connection failed: {}", e);
                        }
                    });
                }
                // Nothing is expected on the registration stream; it going
                // quiet means the node tore the forward down.
                read = control.read(&mut scratch) => match read {
                    Ok(0) | Err(_) => {
                        tracing::info!("Forward {} closed by node", self.pair_id);
                        return Ok(());
                    }
                    Ok(_) => {}
                },
            }
        }
    }

    pub(crate) async fn respond(&mut self) -> Result<TcpStream, NodeError> {
        // The acceptor half of a forward is a forward-service session.
        Err(SessionError::NoAcceptor.into())
    }

    pub(crate) async fn close(&mut self) {
        self.control = None;
        if !self.initiator || self.pair_id.is_empty() {
            return;
        }
        let sender = Sender::from_parts(
            MessageKind::new(Opcode::Down, ProtocolCode::PortForward),
            self.pair_id.clone(),
            Bytes::new(),
            self.control_address.clone(),
        );
        if let Err(e) = sender.send_detach().await {
            tracing::debug!("Teardown notice not delivered: {}", e);
        }
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

/// Open one forward-service session and pump the accepted socket
/// through it.
async fn forward_one(
    params: ForwardServiceParams,
    control_address: String,
    socket: TcpStream,
) -> Result<(), NodeError> {
    let payload = Bytes::from(bincode::serialize(&params).map_err(ProtocolError::from)?);
    let sender = Sender::from_parts(
        MessageKind::new(Opcode::Up, ProtocolCode::ForwardService),
        String::new(),
        payload,
        control_address,
    );

    let (stream, response) = sender.send().await?;
    tracing::debug!("Forward session {} established", response.pair_id);

    let summary = pipe(socket, stream).await?;
    tracing::debug!(
        "Forward session {} done ({} bytes out, {} bytes in)",
        response.pair_id,
        summary.a_to_b,
        summary.b_to_a
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_validates_ports() {
        let mut variant = PortForwardVariant::new(HostId::new("host"), 0, 80);
        assert!(variant.prepare().is_err());

        let mut variant = PortForwardVariant::new(HostId::new("host"), 9000, 0);
        assert!(variant.prepare().is_err());

        let mut variant = PortForwardVariant::new(HostId::new(""), 9000, 80);
        assert!(variant.prepare().is_err());

        let mut variant = PortForwardVariant::new(HostId::new("host"), 9000, 80);
        assert!(variant.prepare().is_ok());
    }

    #[tokio::test]
    async fn test_respond_has_no_acceptor_half() {
        let mut variant = PortForwardVariant::new(HostId::new("host"), 9000, 80);
        assert!(matches!(
            variant.respond().await.unwrap_err(),
            NodeError::Session(SessionError::NoAcceptor)
        ));
    }
}
