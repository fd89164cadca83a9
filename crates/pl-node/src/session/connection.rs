//! Connection: one session half and its lifecycle
//!
//! A connection binds a session variant to a direction, a target peer, a
//! pool id, and a readiness flag, and drives the variant's lifecycle.
//! The variant sits behind an async mutex because its acceptor half can
//! race a concurrent teardown; the pool id has its own lock, separate
//! from the table-wide map.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

use pl_core::error::{SessionError, TransportError};
use pl_core::traits::{BoxedDuplex, PeerTransport};
use pl_core::{Direction, HostId, SessionStatus};
use pl_protocol::{
    status, ControlCodec, ControlMessage, MessageKind, Opcode, PoolId, ProtocolCode, ProtocolError,
};

use crate::error::NodeError;
use crate::pipe::Rewound;
use crate::sender::NOTIFY_TIMEOUT;
use crate::state::NodeState;
use crate::variant::Variant;

const RELAY_BUFFER_SIZE: usize = 16 * 1024;

/// Why a relay run ended
enum RelayOutcome {
    /// Peer stream ended or failed; the session is over
    PeerClosed,
    /// Teardown cancelled the relay
    Cancelled,
}

/// One half of a logical session
pub struct Connection {
    variant: Mutex<Variant>,
    direction: Direction,
    target: HostId,
    protocol: ProtocolCode,
    pool_id: std::sync::Mutex<PoolId>,
    ready: AtomicBool,
    closed: AtomicBool,
    cancel: CancellationToken,
    attach_tx: mpsc::Sender<BoxedDuplex>,
    /// Taken once by the relay task
    attach_rx: Mutex<Option<mpsc::Receiver<BoxedDuplex>>>,
}

impl Connection {
    /// Bind a variant into a new connection
    pub fn new(variant: Variant, direction: Direction, pool_id: PoolId) -> Arc<Self> {
        let target = variant.host_id().clone();
        let protocol = variant.code();
        let (attach_tx, attach_rx) = mpsc::channel(1);

        Arc::new(Self {
            variant: Mutex::new(variant),
            direction,
            target,
            protocol,
            pool_id: std::sync::Mutex::new(pool_id),
            ready: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            cancel: CancellationToken::new(),
            attach_tx,
            attach_rx: Mutex::new(Some(attach_rx)),
        })
    }

    /// Current pool id
    pub fn pool_id(&self) -> PoolId {
        *self.pool_id.lock().unwrap()
    }

    /// Replace the pool id (collision remint, or a peer-authoritative id
    /// arriving during handshake)
    pub fn reset_pool_id(&self, id: PoolId) {
        let mut slot = self.pool_id.lock().unwrap();
        tracing::debug!("Resetting pool id {} -> {}", *slot, id);
        *slot = id;
    }

    /// Pair id string form
    pub fn pair_id(&self) -> String {
        self.pool_id().to_string()
    }

    /// Which side created this half
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Remote peer this session targets
    pub fn target(&self) -> &HostId {
        &self.target
    }

    /// Protocol code of the bound variant
    pub fn protocol(&self) -> ProtocolCode {
        self.protocol
    }

    /// Whether establishment finished
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Flip the readiness flag
    pub fn mark_ready(&self) {
        self.ready.store(true, Ordering::Release);
    }

    /// Status snapshot for `Stat` queries
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            pair_id: self.pair_id(),
            protocol: self.protocol.as_u16(),
            direction: self.direction,
            target: self.target.to_string(),
            ready: self.is_ready(),
        }
    }

    /// Run the variant's acceptor half
    pub async fn respond(&self) -> Result<TcpStream, NodeError> {
        self.variant.lock().await.respond().await
    }

    /// Hand a fresh local endpoint to the session relay
    pub async fn attach(&self, endpoint: BoxedDuplex) -> Result<(), SessionError> {
        self.attach_tx
            .send(endpoint)
            .await
            .map_err(|_| SessionError::NotFound(self.pair_id()))
    }

    /// Outbound establishment: open the peer link, handshake, relay.
    ///
    /// The client already holds its success response; failures here tear
    /// the registration down and close the client socket.
    pub async fn establish(self: Arc<Self>, state: Arc<NodeState>, client: BoxedDuplex) {
        if self.protocol == ProtocolCode::PortForward {
            // A port forward has no peer half of its own; the
            // registration just pins the client's accept loop.
            self.hold_registration(&state, client).await;
            return;
        }

        match self.open_peer_link(&state).await {
            Ok(peer) => {
                self.mark_ready();
                self.run_relay(&state, peer, Some(client)).await;
            }
            Err(e) => {
                tracing::warn!("Session {} failed to establish: {}", self.pair_id(), e);
                self.teardown(&state, false).await;
            }
        }
    }

    /// Inbound establishment is driven by the peer acceptor; once the
    /// ack is on the wire it hands the streams here.
    pub async fn serve(
        self: Arc<Self>,
        state: Arc<NodeState>,
        peer: BoxedDuplex,
        local: BoxedDuplex,
    ) {
        self.mark_ready();
        self.run_relay(&state, peer, Some(local)).await;
    }

    /// Dial the peer, send the session-open preamble, await the ack
    async fn open_peer_link(&self, state: &Arc<NodeState>) -> Result<BoxedDuplex, NodeError> {
        let payload = self.variant.lock().await.encode_payload()?;
        let pair_id = self.pair_id();

        let peer = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled.into()),
            dialed = state.transport.dial(&self.target) => dialed?,
        };

        let mut framed = Framed::new(peer, ControlCodec::new());
        let mut open = ControlMessage::request(
            MessageKind::new(Opcode::Up, self.protocol),
            pair_id,
            payload,
        );
        open.local_entry = state.config.control_address();

        tokio::select! {
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled.into()),
            sent = framed.send(open) => sent?,
        }

        let ack = tokio::select! {
            _ = self.cancel.cancelled() => return Err(SessionError::Cancelled.into()),
            next = timeout(state.config.connect_timeout, framed.next()) => match next {
                Ok(Some(Ok(msg))) => msg,
                Ok(Some(Err(e))) => return Err(e.into()),
                Ok(None) => return Err(ProtocolError::ConnectionClosed.into()),
                Err(_) => {
                    return Err(TransportError::Timeout {
                        target: self.target.to_string(),
                    }
                    .into())
                }
            },
        };

        if !ack.is_ok() {
            return Err(SessionError::Rejected { status: ack.status }.into());
        }

        let parts = framed.into_parts();
        Ok(Box::new(Rewound::new(parts.read_buf.freeze(), parts.io)))
    }

    /// Keep a registration-only session pinned to its client socket
    async fn hold_registration(self: &Arc<Self>, state: &Arc<NodeState>, mut client: BoxedDuplex) {
        self.mark_ready();
        let mut scratch = [0u8; 32];
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                read = client.read(&mut scratch) => match read {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                },
            }
        }
        self.teardown(state, false).await;
    }

    /// Drive the relay and tear down when the peer side ends
    pub(crate) async fn run_relay(
        self: &Arc<Self>,
        state: &Arc<NodeState>,
        peer: BoxedDuplex,
        local: Option<BoxedDuplex>,
    ) {
        let mut attach_rx = match self.attach_rx.lock().await.take() {
            Some(rx) => rx,
            None => return,
        };

        match self.relay(peer, local, &mut attach_rx).await {
            RelayOutcome::PeerClosed => self.teardown(state, false).await,
            // Whoever cancelled is already running the teardown.
            RelayOutcome::Cancelled => {}
        }
    }

    /// Attach-aware duplex relay.
    ///
    /// The peer stream ending is the hard stop. The local endpoint going
    /// away merely parks the session: a clean end-of-stream propagates a
    /// half-close to the peer, a broken socket does not, and either way a
    /// later attach resumes traffic over the surviving peer stream.
    async fn relay(
        &self,
        peer: BoxedDuplex,
        local: Option<BoxedDuplex>,
        attach_rx: &mut mpsc::Receiver<BoxedDuplex>,
    ) -> RelayOutcome {
        let (mut peer_read, mut peer_write) = tokio::io::split(peer);
        let (mut local_read, mut local_write) = match local {
            Some(stream) => {
                let (r, w) = tokio::io::split(stream);
                (Some(r), Some(w))
            }
            None => (None, None),
        };

        let mut peer_buf = vec![0u8; RELAY_BUFFER_SIZE];
        let mut local_buf = vec![0u8; RELAY_BUFFER_SIZE];

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return RelayOutcome::Cancelled,

                read = peer_read.read(&mut peer_buf) => match read {
                    Ok(0) | Err(_) => {
                        if let Some(w) = local_write.as_mut() {
                            let _ = w.shutdown().await;
                        }
                        return RelayOutcome::PeerClosed;
                    }
                    Ok(n) => {
                        let mut lost = false;
                        if let Some(w) = local_write.as_mut() {
                            if w.write_all(&peer_buf[..n]).await.is_err() {
                                lost = true;
                            } else {
                                let _ = w.flush().await;
                            }
                        }
                        if lost {
                            local_read = None;
                            local_write = None;
                        }
                    }
                },

                read = read_opt(&mut local_read, &mut local_buf) => match read {
                    Ok(0) => {
                        // Deliberate end-of-stream: propagate the half-close.
                        let _ = peer_write.shutdown().await;
                        local_read = None;
                    }
                    Ok(n) => {
                        if peer_write.write_all(&local_buf[..n]).await.is_err() {
                            return RelayOutcome::PeerClosed;
                        }
                        let _ = peer_write.flush().await;
                    }
                    Err(_) => {
                        // Lost socket: park and wait for a reattach.
                        local_read = None;
                    }
                },

                Some(endpoint) = attach_rx.recv() => {
                    tracing::debug!("Session {} rebound to a new local endpoint", self.pair_id());
                    let (r, w) = tokio::io::split(endpoint);
                    local_read = Some(r);
                    local_write = Some(w);
                }
            }
        }
    }

    /// Tear the session down: cancel in-flight work, drop the table
    /// entry, close the variant, and (when locally initiated) fire a
    /// detached best-effort teardown notice at the peer.
    pub async fn teardown(&self, state: &Arc<NodeState>, notify_peer: bool) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.cancel.cancel();
        state.table.remove_id(self.pool_id());

        self.variant.lock().await.close().await;

        let has_peer_half =
            self.protocol != ProtocolCode::PortForward && !self.target.is_empty();
        if notify_peer && has_peer_half {
            let transport = Arc::clone(&state.transport);
            let target = self.target.clone();
            let pair_id = self.pair_id();
            let protocol = self.protocol;
            tokio::spawn(async move {
                if let Err(e) = notify_peer_down(transport, target, pair_id, protocol).await {
                    tracing::debug!("Peer teardown notice not delivered: {}", e);
                }
            });
        }
    }
}

/// Read from an optional source, pending forever when it is gone
async fn read_opt<R: AsyncRead + Unpin>(
    source: &mut Option<R>,
    buf: &mut [u8],
) -> std::io::Result<usize> {
    match source.as_mut() {
        Some(r) => r.read(buf).await,
        None => std::future::pending().await,
    }
}

/// One-shot `Down` notice to the remote half. Bounded, never retried;
/// delivery is not guaranteed.
async fn notify_peer_down(
    transport: Arc<dyn PeerTransport>,
    target: HostId,
    pair_id: String,
    protocol: ProtocolCode,
) -> Result<(), NodeError> {
    let notice = async {
        let peer = transport.dial(&target).await?;
        let mut framed = Framed::new(peer, ControlCodec::new());
        let mut msg = ControlMessage::request(
            MessageKind::new(Opcode::Down, protocol),
            pair_id,
            Bytes::new(),
        );
        msg.detach = true;
        framed.send(msg).await?;
        // The ack is nice to have but not worth waiting on.
        if let Some(Ok(ack)) = framed.next().await {
            if !ack.is_ok() && ack.status != status::NOT_FOUND {
                tracing::debug!("Peer answered teardown notice with status {}", ack.status);
            }
        }
        Ok::<(), NodeError>(())
    };

    timeout(NOTIFY_TIMEOUT, notice)
        .await
        .map_err(|_| TransportError::Timeout {
            target: target.to_string(),
        })?
}
