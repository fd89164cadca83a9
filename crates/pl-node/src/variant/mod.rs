//! Session variants
//!
//! One variant per tunneled protocol, all behind the closed [`Variant`]
//! enum: a stable protocol code, serializable parameters, and the shared
//! lifecycle (`init` → `prepare` → `dial`/`respond` → `close`). Decoding
//! maps protocol code to constructor; an unknown code is a decode error.
//! Variants are created fresh per session and never reused.

pub mod forward_service;
pub mod port_forward;
pub mod shell;

pub use forward_service::{ForwardServiceParams, ForwardServiceVariant};
pub use port_forward::{PortForwardParams, PortForwardVariant};
pub use shell::{ShellParams, ShellVariant};

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tokio::net::TcpStream;

use pl_core::config::NodeConfig;
use pl_core::HostId;
use pl_protocol::{ProtocolCode, ProtocolError};

use crate::error::NodeError;

/// Local addressing and policy a variant needs, resolved from the node
/// configuration once at init time.
#[derive(Debug, Clone)]
pub struct VariantContext {
    /// Loopback address of the control-plane listener
    pub control_address: String,
    /// Loopback address of the local shell service
    pub shell_address: String,
    /// Timeout for peer and local-service dials
    pub connect_timeout: Duration,
    /// Host-key trust store location
    pub known_hosts_path: PathBuf,
    /// Allow hosts whose recorded key changed
    pub accept_changed_host_keys: bool,
}

impl VariantContext {
    /// Resolve the context from a node configuration
    pub fn from_config(config: &NodeConfig) -> Self {
        Self {
            control_address: config.control_address(),
            shell_address: config.shell_address(),
            connect_timeout: config.connect_timeout,
            known_hosts_path: config.known_hosts_path.clone(),
            accept_changed_host_keys: config.accept_changed_host_keys,
        }
    }
}

/// A protocol-specific session behavior
pub enum Variant {
    /// Interactive shell session
    Shell(ShellVariant),
    /// Local listener forwarding to a remote port
    PortForward(PortForwardVariant),
    /// Remote-side counterpart of a port forward
    ForwardService(ForwardServiceVariant),
}

impl Variant {
    /// Stable protocol code of this variant
    pub fn code(&self) -> ProtocolCode {
        match self {
            Variant::Shell(_) => ProtocolCode::Shell,
            Variant::PortForward(_) => ProtocolCode::PortForward,
            Variant::ForwardService(_) => ProtocolCode::ForwardService,
        }
    }

    /// Construct a variant from a protocol code and its serialized
    /// parameters. One constructor per known code; anything else is a
    /// malformed request, not a crash.
    pub fn decode(code: ProtocolCode, payload: &[u8]) -> Result<Self, ProtocolError> {
        match code {
            ProtocolCode::Shell => Ok(Variant::Shell(ShellVariant::from_params(
                bincode::deserialize(payload)?,
            ))),
            ProtocolCode::PortForward => Ok(Variant::PortForward(PortForwardVariant::from_params(
                bincode::deserialize(payload)?,
            ))),
            ProtocolCode::ForwardService => Ok(Variant::ForwardService(
                ForwardServiceVariant::from_params(bincode::deserialize(payload)?),
            )),
            ProtocolCode::Control => {
                Err(ProtocolError::UnknownProtocolCode(code.as_u16() as u32))
            }
        }
    }

    /// Serialize the variant's parameters for the control message payload
    pub fn encode_payload(&self) -> Result<Bytes, ProtocolError> {
        let bytes = match self {
            Variant::Shell(v) => bincode::serialize(v.params())?,
            Variant::PortForward(v) => bincode::serialize(v.params())?,
            Variant::ForwardService(v) => bincode::serialize(v.params())?,
        };
        Ok(Bytes::from(bytes))
    }

    /// Configure local addressing and policy. Called exactly once before
    /// any lifecycle method.
    pub fn init(&mut self, ctx: &VariantContext) {
        match self {
            Variant::Shell(v) => v.init(ctx),
            Variant::PortForward(v) => v.init(ctx),
            Variant::ForwardService(v) => v.init(ctx),
        }
    }

    /// Variant-specific pre-flight
    pub fn prepare(&mut self) -> Result<(), NodeError> {
        match self {
            Variant::Shell(v) => v.prepare(),
            Variant::PortForward(v) => v.prepare(),
            Variant::ForwardService(v) => v.prepare(),
        }
    }

    /// Initiator-side action: request a session and run the variant's
    /// client half to completion. On failure past registration the
    /// variant closes itself before the error propagates.
    pub async fn dial(&mut self) -> Result<(), NodeError> {
        match self {
            Variant::Shell(v) => v.dial().await,
            Variant::PortForward(v) => v.dial().await,
            Variant::ForwardService(_) => Ok(()),
        }
    }

    /// Acceptor-side action: given an established peer link, dial the
    /// locally proxied service and hand its socket back for relaying.
    pub async fn respond(&mut self) -> Result<TcpStream, NodeError> {
        match self {
            Variant::Shell(v) => v.respond().await,
            Variant::PortForward(v) => v.respond().await,
            Variant::ForwardService(v) => v.respond().await,
        }
    }

    /// Release owned resources and, for initiator-side variants,
    /// best-effort notify the local node of teardown.
    pub async fn close(&mut self) {
        match self {
            Variant::Shell(v) => v.close().await,
            Variant::PortForward(v) => v.close().await,
            Variant::ForwardService(v) => v.close().await,
        }
    }

    /// Remote peer this variant targets
    pub fn host_id(&self) -> &HostId {
        match self {
            Variant::Shell(v) => v.host_id(),
            Variant::PortForward(v) => v.host_id(),
            Variant::ForwardService(v) => v.host_id(),
        }
    }

    /// Pair identifier correlating the two session halves
    pub fn pair_id(&self) -> &str {
        match self {
            Variant::Shell(v) => v.pair_id(),
            Variant::PortForward(v) => v.pair_id(),
            Variant::ForwardService(v) => v.pair_id(),
        }
    }

    /// Assign the pair identifier; the first assignment wins
    pub fn set_pair_id(&mut self, id: &str) {
        match self {
            Variant::Shell(v) => v.set_pair_id(id),
            Variant::PortForward(v) => v.set_pair_id(id),
            Variant::ForwardService(v) => v.set_pair_id(id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_rejects_control_code() {
        assert!(Variant::decode(ProtocolCode::Control, &[]).is_err());
    }

    #[test]
    fn test_params_roundtrip_through_payload() {
        let variant = Variant::ForwardService(ForwardServiceVariant::new(
            HostId::new("workstation"),
            8080,
        ));
        let payload = variant.encode_payload().unwrap();

        let decoded = Variant::decode(ProtocolCode::ForwardService, &payload).unwrap();
        assert_eq!(decoded.code(), ProtocolCode::ForwardService);
        assert_eq!(decoded.host_id().as_str(), "workstation");
        match decoded {
            Variant::ForwardService(v) => assert_eq!(v.params().target_port, 8080),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_decode_rejects_garbage_payload() {
        // A truncated bincode body must not produce a variant.
        assert!(Variant::decode(ProtocolCode::Shell, &[0x01]).is_err());
    }

    #[test]
    fn test_set_pair_id_first_assignment_wins() {
        let mut variant =
            Variant::ForwardService(ForwardServiceVariant::new(HostId::new("host"), 80));
        assert_eq!(variant.pair_id(), "");

        variant.set_pair_id("1f-03");
        variant.set_pair_id("2f-03");
        assert_eq!(variant.pair_id(), "1f-03");
    }
}
