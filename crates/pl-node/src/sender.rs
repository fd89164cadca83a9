//! Control message client
//!
//! A [`Sender`] wraps one control-plane request: the serialized variant
//! parameters, the opcode, the pair id, and the control-plane address to
//! deliver them to. It connects to the local control listener and
//! exchanges exactly one framed request/response pair. On success the
//! caller owns the connection, which from then on carries the session's
//! raw byte stream.

use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use pl_core::error::{SessionError, TransportError};
use pl_protocol::{ControlCodec, ControlMessage, MessageKind, ProtocolError};
use tokio_util::codec::Framed;

use crate::error::NodeError;
use crate::pipe::Rewound;

/// Deadline for fire-and-forget teardown notices
pub const NOTIFY_TIMEOUT: Duration = Duration::from_secs(2);

/// One control-plane request, ready to send
#[derive(Debug, Clone)]
pub struct Sender {
    msg: ControlMessage,
}

impl Sender {
    /// Build a request from its parts
    pub fn from_parts(
        kind: MessageKind,
        pair_id: impl Into<String>,
        payload: Bytes,
        local_entry: impl Into<String>,
    ) -> Self {
        let mut msg = ControlMessage::request(kind, pair_id, payload);
        msg.local_entry = local_entry.into();
        Self { msg }
    }

    /// Send the request and read the response envelope.
    ///
    /// A non-zero response status is an error. Otherwise the caller owns
    /// the returned stream; bytes the response decoder over-read are
    /// preserved at the front of it.
    pub async fn send(self) -> Result<(Rewound<TcpStream>, ControlMessage), NodeError> {
        let stream = TcpStream::connect(&self.msg.local_entry).await?;
        let mut framed = Framed::new(stream, ControlCodec::new());

        framed.send(self.msg).await?;

        let response = match framed.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => return Err(e.into()),
            None => return Err(ProtocolError::ConnectionClosed.into()),
        };

        if !response.is_ok() {
            return Err(SessionError::Rejected {
                status: response.status,
            }
            .into());
        }

        let parts = framed.into_parts();
        Ok((Rewound::new(parts.read_buf.freeze(), parts.io), response))
    }

    /// Send with the detach flag set, bounded by [`NOTIFY_TIMEOUT`].
    ///
    /// Used for teardown notices that do not expect the stream to stay
    /// open. Delivery is not guaranteed and is never retried.
    pub async fn send_detach(mut self) -> Result<(), NodeError> {
        self.msg.detach = true;
        let target = self.msg.local_entry.clone();
        match timeout(NOTIFY_TIMEOUT, self.send()).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::Timeout { target }.into()),
        }
    }
}
