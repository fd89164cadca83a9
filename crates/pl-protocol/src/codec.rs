//! Tokio codec for framed control messages
//!
//! Frames are a 4-byte big-endian length prefix followed by a bincode
//! body. The packed `kind` integer exists only inside the wire
//! representation; decoded messages carry the two-field [`MessageKind`].

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::control::{ControlMessage, MessageKind};
use crate::error::ProtocolError;

/// Size of the length prefix in bytes
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Maximum frame body size (16MB - 1)
pub const MAX_FRAME_SIZE: usize = 0x00FF_FFFF;

/// On-the-wire shape of a control message
#[derive(Serialize, Deserialize)]
struct WireControl {
    kind: u32,
    pair_id: Vec<u8>,
    detach: bool,
    local_entry: String,
    payload: Vec<u8>,
    status: i32,
}

/// Codec for encoding/decoding control message frames
#[derive(Debug, Default)]
pub struct ControlCodec {
    /// Body length read from a prefix whose body has not fully arrived
    pending_len: Option<usize>,
}

impl ControlCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self { pending_len: None }
    }
}

impl Decoder for ControlCodec {
    type Item = ControlMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let frame_len = match self.pending_len.take() {
            Some(n) => n,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None); // Need more data
                }
                let n = src.get_u32() as usize;
                if n > MAX_FRAME_SIZE {
                    return Err(ProtocolError::FrameTooLarge {
                        size: n,
                        max: MAX_FRAME_SIZE,
                    });
                }
                n
            }
        };

        if src.len() < frame_len {
            // Save length and wait for more data
            self.pending_len = Some(frame_len);
            return Ok(None);
        }

        let frame = src.split_to(frame_len);
        let wire: WireControl = bincode::deserialize(&frame)?;

        let kind = MessageKind::unpack(wire.kind)?;
        let pair_id = String::from_utf8(wire.pair_id)
            .map_err(|_| ProtocolError::InvalidPairId("non-utf8 pair id".to_string()))?;

        Ok(Some(ControlMessage {
            kind,
            pair_id,
            detach: wire.detach,
            local_entry: wire.local_entry,
            payload: Bytes::from(wire.payload),
            status: wire.status,
        }))
    }
}

impl Encoder<ControlMessage> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, msg: ControlMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let wire = WireControl {
            kind: msg.kind.pack(),
            pair_id: msg.pair_id.into_bytes(),
            detach: msg.detach,
            local_entry: msg.local_entry,
            payload: msg.payload.to_vec(),
            status: msg.status,
        };

        let body = bincode::serialize(&wire)?;
        if body.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge {
                size: body.len(),
                max: MAX_FRAME_SIZE,
            });
        }

        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.put_u32(body.len() as u32);
        dst.extend_from_slice(&body);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::{status, Opcode, ProtocolCode};
    use crate::pool_id::PoolId;

    fn sample_message(kind: MessageKind) -> ControlMessage {
        ControlMessage {
            kind,
            pair_id: PoolId::mint(kind.protocol).to_string(),
            detach: true,
            local_entry: "127.0.0.1:2224".to_string(),
            payload: Bytes::from_static(b"\x01\x02\x03variant-params"),
            status: status::NOT_FOUND,
        }
    }

    #[test]
    fn test_codec_roundtrip_all_kinds() {
        // Every field, including the packed kind, must survive the trip.
        let mut codec = ControlCodec::new();
        for protocol in [
            ProtocolCode::Shell,
            ProtocolCode::PortForward,
            ProtocolCode::ForwardService,
        ] {
            for opcode in [Opcode::Up, Opcode::Down, Opcode::Stat, Opcode::Attach] {
                let msg = sample_message(MessageKind::new(opcode, protocol));

                let mut buf = BytesMut::new();
                codec.encode(msg.clone(), &mut buf).unwrap();

                let decoded = codec.decode(&mut buf).unwrap().unwrap();
                assert_eq!(decoded, msg);
                assert!(buf.is_empty());
            }
        }
    }

    #[test]
    fn test_codec_partial_read() {
        let mut codec = ControlCodec::new();
        let msg = sample_message(MessageKind::new(Opcode::Up, ProtocolCode::Shell));

        let mut full = BytesMut::new();
        codec.encode(msg.clone(), &mut full).unwrap();

        // Deliver the prefix plus one body byte, then the rest.
        let mut partial = full.split_to(LENGTH_PREFIX_SIZE + 1);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full);
        let decoded = codec.decode(&mut partial).unwrap().unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_codec_rejects_oversized_prefix() {
        let mut codec = ControlCodec::new();
        let mut buf = BytesMut::new();
        buf.put_u32(u32::MAX);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_codec_rejects_unknown_kind() {
        // Hand-build a frame whose packed kind has a bogus opcode.
        let wire = WireControl {
            kind: (0x01 << 8) | 0xEE,
            pair_id: vec![],
            detach: false,
            local_entry: String::new(),
            payload: vec![],
            status: 0,
        };
        let body = bincode::serialize(&wire).unwrap();

        let mut buf = BytesMut::new();
        buf.put_u32(body.len() as u32);
        buf.extend_from_slice(&body);

        let mut codec = ControlCodec::new();
        assert!(matches!(
            codec.decode(&mut buf),
            Err(ProtocolError::UnknownOpcode(0xEE))
        ));
    }

    #[test]
    fn test_codec_back_to_back_frames() {
        let mut codec = ControlCodec::new();
        let first = sample_message(MessageKind::new(Opcode::Stat, ProtocolCode::Control));
        let second = sample_message(MessageKind::new(Opcode::Down, ProtocolCode::PortForward));

        let mut buf = BytesMut::new();
        codec.encode(first.clone(), &mut buf).unwrap();
        codec.encode(second.clone(), &mut buf).unwrap();

        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), first);
        assert_eq!(codec.decode(&mut buf).unwrap().unwrap(), second);
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }
}
