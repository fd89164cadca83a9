//! Control request handlers
//!
//! Each control connection carries exactly one request; the handler
//! decodes it and routes on the opcode. Errors are answered with a
//! status code and never mutate the session table partially.

use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;

use pl_core::Direction;
use pl_protocol::{
    status, ControlCodec, ControlMessage, Opcode, PoolId, ProtocolError,
};

use crate::error::NodeError;
use crate::pipe::Rewound;
use crate::session::Connection;
use crate::state::NodeState;
use crate::variant::{Variant, VariantContext};

type ControlFramed = Framed<TcpStream, ControlCodec>;

/// Serve one control connection
pub async fn handle_control(state: Arc<NodeState>, stream: TcpStream) -> Result<(), NodeError> {
    let mut framed = Framed::new(stream, ControlCodec::new());

    let msg = match framed.next().await {
        Some(Ok(msg)) => msg,
        Some(Err(e)) => {
            // Malformed request: drop the socket, touch nothing.
            tracing::warn!("Rejecting malformed control request: {}", e);
            return Ok(());
        }
        None => return Ok(()),
    };

    tracing::debug!(
        "Control request: {:?} {} pair={}",
        msg.op_code(),
        msg.app_code(),
        if msg.pair_id.is_empty() { "<unset>" } else { msg.pair_id.as_str() }
    );

    match msg.op_code() {
        Opcode::Up => handle_up(state, framed, msg).await,
        Opcode::Down => handle_down(state, framed, msg).await,
        Opcode::Stat => handle_stat(state, framed, msg).await,
        Opcode::Attach => handle_attach(state, framed, msg).await,
    }
}

/// Create a session: decode the variant, mint a pool id if the request
/// carries none, register, report the pair id back, then establish the
/// peer link in the background.
async fn handle_up(
    state: Arc<NodeState>,
    mut framed: ControlFramed,
    msg: ControlMessage,
) -> Result<(), NodeError> {
    let kind = msg.kind;

    let mut variant = match Variant::decode(msg.app_code(), &msg.payload) {
        Ok(variant) => variant,
        Err(e) => {
            tracing::warn!("Rejecting session request: {}", e);
            framed
                .send(ControlMessage::response(kind, msg.pair_id, status::DECODE))
                .await?;
            return Ok(());
        }
    };

    variant.init(&VariantContext::from_config(&state.config));
    if let Err(e) = variant.prepare() {
        framed
            .send(ControlMessage::response(kind, msg.pair_id, e.status_code()))
            .await?;
        return Ok(());
    }

    let pool_id = match msg.pair_id.parse::<PoolId>() {
        Ok(id) if !id.is_unset() => id,
        _ => PoolId::mint(variant.code()),
    };
    variant.set_pair_id(&pool_id.to_string());

    let conn = Connection::new(variant, Direction::Outbound, pool_id);
    let pool_id = state.table.register_minting(&conn);

    framed
        .send(ControlMessage::response(
            kind,
            pool_id.to_string(),
            status::OK,
        ))
        .await?;

    let parts = framed.into_parts();
    let client = Box::new(Rewound::new(parts.read_buf.freeze(), parts.io));
    tokio::spawn(conn.establish(state, client));
    Ok(())
}

/// Tear a session down. Absent entries are a successful no-op: the
/// session may already be gone through the other teardown path.
async fn handle_down(
    state: Arc<NodeState>,
    mut framed: ControlFramed,
    msg: ControlMessage,
) -> Result<(), NodeError> {
    match state.table.remove(&msg.pair_id) {
        Some(conn) => {
            tracing::info!("Tearing down session {}", msg.pair_id);
            conn.teardown(&state, true).await;
        }
        None => {
            tracing::debug!("Down for unknown session {} (already gone)", msg.pair_id);
        }
    }

    framed
        .send(ControlMessage::response(msg.kind, msg.pair_id, status::OK))
        .await?;
    Ok(())
}

/// Report session metadata without mutating anything
async fn handle_stat(
    state: Arc<NodeState>,
    mut framed: ControlFramed,
    msg: ControlMessage,
) -> Result<(), NodeError> {
    let statuses = if msg.pair_id.is_empty() {
        state.table.list()
    } else {
        match state.table.get(&msg.pair_id) {
            Some(conn) => vec![conn.status()],
            None => {
                framed
                    .send(ControlMessage::response(
                        msg.kind,
                        msg.pair_id,
                        status::NOT_FOUND,
                    ))
                    .await?;
                return Ok(());
            }
        }
    };

    let mut response = ControlMessage::response(msg.kind, msg.pair_id, status::OK);
    response.payload = Bytes::from(bincode::serialize(&statuses).map_err(ProtocolError::from)?);
    framed.send(response).await?;
    Ok(())
}

/// Rebind an existing session to this socket
async fn handle_attach(
    state: Arc<NodeState>,
    mut framed: ControlFramed,
    msg: ControlMessage,
) -> Result<(), NodeError> {
    let Some(conn) = state.table.get(&msg.pair_id) else {
        framed
            .send(ControlMessage::response(
                msg.kind,
                msg.pair_id,
                status::NOT_FOUND,
            ))
            .await?;
        return Ok(());
    };

    framed
        .send(ControlMessage::response(
            msg.kind,
            msg.pair_id.clone(),
            status::OK,
        ))
        .await?;

    let parts = framed.into_parts();
    let endpoint = Box::new(Rewound::new(parts.read_buf.freeze(), parts.io));
    if conn.attach(endpoint).await.is_err() {
        tracing::warn!("Session {} is not accepting attachments", msg.pair_id);
    }
    Ok(())
}
