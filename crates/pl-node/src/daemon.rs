//! Daemon assembly: wire the transport, the control listener, and the
//! peer acceptor together and run until cancelled.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use pl_core::config::NodeConfig;

use crate::dispatch::{run_peer_acceptor, ControlListener};
use crate::error::NodeError;
use crate::state::NodeState;
use crate::transport::TcpPeerTransport;

/// Run a node until the token is cancelled.
///
/// Failing to bind either listener is fatal and propagates; everything
/// past startup is logged and survived.
pub async fn run(config: NodeConfig, cancel: CancellationToken) -> Result<(), NodeError> {
    let transport = TcpPeerTransport::bind(
        &config.peer_bind_address(),
        config.peers.clone(),
        config.connect_timeout,
    )
    .await?;
    tracing::info!(
        "Peer transport listening on {} (node id {})",
        transport.local_addr()?,
        config.node_id
    );

    let state = NodeState::new(config, Arc::new(transport));

    let listener = ControlListener::bind(Arc::clone(&state)).await?;

    let peer_task = tokio::spawn(run_peer_acceptor(Arc::clone(&state), cancel.clone()));
    listener.run(cancel).await;
    let _ = peer_task.await;

    tracing::info!("Node shutdown complete");
    Ok(())
}
