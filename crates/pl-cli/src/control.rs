//! Control-plane client for management commands
//!
//! Thin wrapper over [`Sender`] for the request/response commands
//! (status queries, teardown). Session-opening commands drive their
//! variant directly instead.

use anyhow::{Context, Result};
use bytes::Bytes;

use pl_core::config::NodeConfig;
use pl_core::SessionStatus;
use pl_node::Sender;
use pl_protocol::{MessageKind, Opcode, PoolId, ProtocolCode};

/// Client for one node's control plane
pub struct ControlClient {
    config: NodeConfig,
}

impl ControlClient {
    /// Create a client against the configured node
    pub fn new(config: NodeConfig) -> Self {
        Self { config }
    }

    /// Check whether the node answers on its control socket
    pub async fn ping(&self) -> bool {
        self.sessions().await.is_ok()
    }

    /// Status of every open session
    pub async fn sessions(&self) -> Result<Vec<SessionStatus>> {
        let sender = Sender::from_parts(
            MessageKind::new(Opcode::Stat, ProtocolCode::Control),
            String::new(),
            Bytes::new(),
            self.config.control_address(),
        );
        let (_stream, response) = sender.send().await.with_context(|| {
            format!(
                "Failed to query the node at {}. Is it running?",
                self.config.control_address()
            )
        })?;

        let sessions: Vec<SessionStatus> =
            bincode::deserialize(&response.payload).context("Malformed status payload")?;
        Ok(sessions)
    }

    /// Status of one session
    pub async fn session(&self, pair_id: &str) -> Result<SessionStatus> {
        let kind = MessageKind::new(Opcode::Stat, protocol_of(pair_id));
        let sender = Sender::from_parts(
            kind,
            pair_id,
            Bytes::new(),
            self.config.control_address(),
        );
        let (_stream, response) = sender.send().await?;

        let mut sessions: Vec<SessionStatus> =
            bincode::deserialize(&response.payload).context("Malformed status payload")?;
        sessions
            .pop()
            .ok_or_else(|| anyhow::anyhow!("Session not found: {}", pair_id))
    }

    /// Tear a session down
    pub async fn kill(&self, pair_id: &str) -> Result<()> {
        let kind = MessageKind::new(Opcode::Down, protocol_of(pair_id));
        let sender = Sender::from_parts(
            kind,
            pair_id,
            Bytes::new(),
            self.config.control_address(),
        );
        sender.send().await?;
        Ok(())
    }
}

/// Protocol code embedded in a pair id, for addressing the request
fn protocol_of(pair_id: &str) -> ProtocolCode {
    pair_id
        .parse::<PoolId>()
        .map(|id| id.code())
        .unwrap_or(ProtocolCode::Control)
}
