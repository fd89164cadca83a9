//! Peer-stream acceptor
//!
//! Every incoming peer stream opens with one control message: `Up`
//! creates the acceptor half of a session (the initiator's pool id is
//! authoritative), `Down` is a teardown notice. After a successful `Up`
//! the same stream becomes the session's byte relay.

use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use pl_core::error::TransportError;
use pl_core::traits::BoxedDuplex;
use pl_core::Direction;
use pl_protocol::{status, ControlCodec, ControlMessage, Opcode, PoolId};

use crate::error::NodeError;
use crate::pipe::Rewound;
use crate::session::Connection;
use crate::state::NodeState;
use crate::variant::{Variant, VariantContext};

/// Accept peer streams until cancelled
pub async fn run_peer_acceptor(state: Arc<NodeState>, cancel: CancellationToken) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = state.transport.accept() => match accepted {
                Ok((stream, peer_addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        if let Err(e) = serve_peer(state, stream, peer_addr).await {
                            tracing::warn!("Peer stream from {} failed: {}", peer_addr, e);
                        }
                    });
                }
                Err(TransportError::Closed) => {
                    tracing::error!("Peer transport closed");
                    break;
                }
                Err(e) => {
                    tracing::error!("Failed to accept peer stream: {}", e);
                }
            },
        }
    }
}

/// Serve one incoming peer stream
async fn serve_peer(
    state: Arc<NodeState>,
    stream: BoxedDuplex,
    peer_addr: SocketAddr,
) -> Result<(), NodeError> {
    let mut framed = Framed::new(stream, ControlCodec::new());

    let msg = match framed.next().await {
        Some(Ok(msg)) => msg,
        Some(Err(e)) => {
            tracing::warn!("Malformed session preamble from {}: {}", peer_addr, e);
            return Ok(());
        }
        None => return Ok(()),
    };

    match msg.op_code() {
        Opcode::Up => serve_session_open(state, framed, msg, peer_addr).await,
        Opcode::Down => {
            if let Some(conn) = state.table.remove(&msg.pair_id) {
                tracing::info!("Peer tore down session {}", msg.pair_id);
                // The peer initiated this; do not notify it back.
                conn.teardown(&state, false).await;
            }
            framed
                .send(ControlMessage::response(msg.kind, msg.pair_id, status::OK))
                .await?;
            Ok(())
        }
        _ => {
            framed
                .send(ControlMessage::response(msg.kind, msg.pair_id, status::ERROR))
                .await?;
            Ok(())
        }
    }
}

/// Build the acceptor half of a session and relay over the stream
async fn serve_session_open(
    state: Arc<NodeState>,
    mut framed: Framed<BoxedDuplex, ControlCodec>,
    msg: ControlMessage,
    peer_addr: SocketAddr,
) -> Result<(), NodeError> {
    let kind = msg.kind;

    let mut variant = match Variant::decode(msg.app_code(), &msg.payload) {
        Ok(variant) => variant,
        Err(e) => {
            tracing::warn!("Rejecting session open from {}: {}", peer_addr, e);
            framed
                .send(ControlMessage::response(kind, msg.pair_id, status::DECODE))
                .await?;
            return Ok(());
        }
    };

    variant.init(&VariantContext::from_config(&state.config));
    variant.set_pair_id(&msg.pair_id);
    if let Err(e) = variant.prepare() {
        framed
            .send(ControlMessage::response(kind, msg.pair_id, e.status_code()))
            .await?;
        return Ok(());
    }

    // The initiator's id is authoritative; mint only when handed an
    // unset one.
    let pool_id = match msg.pair_id.parse::<PoolId>() {
        Ok(id) if !id.is_unset() => id,
        _ => PoolId::mint(variant.code()),
    };

    let conn = Connection::new(variant, Direction::Inbound, pool_id);
    if let Err(e) = state.table.register(&conn) {
        tracing::warn!("Refusing session open from {}: {}", peer_addr, e);
        framed
            .send(ControlMessage::response(kind, msg.pair_id, status::ERROR))
            .await?;
        return Ok(());
    }

    let local = match conn.respond().await {
        Ok(stream) => stream,
        Err(e) => {
            tracing::warn!("Session {} acceptor failed: {}", conn.pair_id(), e);
            state.table.remove_id(conn.pool_id());
            framed
                .send(ControlMessage::response(kind, msg.pair_id, e.status_code()))
                .await?;
            return Ok(());
        }
    };

    framed
        .send(ControlMessage::response(kind, conn.pair_id(), status::OK))
        .await?;
    tracing::info!(
        "Session {} open from {} ({})",
        conn.pair_id(),
        peer_addr,
        conn.protocol()
    );

    let parts = framed.into_parts();
    let peer: BoxedDuplex = Box::new(Rewound::new(parts.read_buf.freeze(), parts.io));
    conn.serve(state, peer, Box::new(local)).await;
    Ok(())
}
