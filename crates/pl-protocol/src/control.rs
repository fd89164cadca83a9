//! Control message types
//!
//! A control message carries one session lifecycle request (or its
//! response) over the loopback control socket, and doubles as the
//! session-open preamble on freshly dialed peer streams. The operation
//! and the session variant's protocol code travel as two separate fields
//! everywhere inside the process; they are packed into a single `u32`
//! only at the wire boundary, by the codec.

use bytes::Bytes;

use crate::error::ProtocolError;

/// Number of low bits holding the opcode in the packed wire type.
pub(crate) const OPCODE_BITS: u32 = 8;
pub(crate) const OPCODE_MASK: u32 = 0xff;

/// Session lifecycle operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Opcode {
    /// Create a session
    Up = 0x01,
    /// Tear a session down
    Down = 0x02,
    /// Query session status
    Stat = 0x03,
    /// Rebind an existing session to this socket
    Attach = 0x04,
}

impl Opcode {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Up),
            0x02 => Some(Self::Down),
            0x03 => Some(Self::Stat),
            0x04 => Some(Self::Attach),
            _ => None,
        }
    }
}

/// Stable identifier of a session variant across the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ProtocolCode {
    /// No variant attached (table-wide queries)
    Control = 0x00,
    /// Interactive shell session
    Shell = 0x01,
    /// Local listener forwarding to a remote port
    PortForward = 0x02,
    /// Remote-side counterpart of a port forward
    ForwardService = 0x03,
}

impl ProtocolCode {
    /// Convert to u16
    pub fn as_u16(&self) -> u16 {
        *self as u16
    }

    /// Convert from u16
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x00 => Some(Self::Control),
            0x01 => Some(Self::Shell),
            0x02 => Some(Self::PortForward),
            0x03 => Some(Self::ForwardService),
            _ => None,
        }
    }
}

impl std::fmt::Display for ProtocolCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProtocolCode::Control => write!(f, "control"),
            ProtocolCode::Shell => write!(f, "shell"),
            ProtocolCode::PortForward => write!(f, "port-forward"),
            ProtocolCode::ForwardService => write!(f, "forward-service"),
        }
    }
}

/// Operation and protocol code of a control message.
///
/// Kept as two fields in memory; [`MessageKind::pack`] and
/// [`MessageKind::unpack`] convert to and from the single wire integer
/// (`protocol << 8 | opcode`) and must invert each other exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageKind {
    /// Lifecycle operation
    pub opcode: Opcode,
    /// Protocol code of the variant the operation applies to
    pub protocol: ProtocolCode,
}

impl MessageKind {
    /// Create a new message kind
    pub fn new(opcode: Opcode, protocol: ProtocolCode) -> Self {
        Self { opcode, protocol }
    }

    /// Pack into the single wire integer
    pub fn pack(&self) -> u32 {
        ((self.protocol.as_u16() as u32) << OPCODE_BITS) | self.opcode.as_u8() as u32
    }

    /// Unpack from the wire integer, rejecting unknown codes
    pub fn unpack(raw: u32) -> Result<Self, ProtocolError> {
        let op_raw = (raw & OPCODE_MASK) as u8;
        let opcode = Opcode::from_u8(op_raw).ok_or(ProtocolError::UnknownOpcode(op_raw))?;

        let proto_raw = raw >> OPCODE_BITS;
        let protocol = u16::try_from(proto_raw)
            .ok()
            .and_then(ProtocolCode::from_u16)
            .ok_or(ProtocolError::UnknownProtocolCode(proto_raw))?;

        Ok(Self { opcode, protocol })
    }
}

/// Response status codes
pub mod status {
    /// Request succeeded
    pub const OK: i32 = 0;
    /// Unspecified failure
    pub const ERROR: i32 = 1;
    /// No session with the given pair id
    pub const NOT_FOUND: i32 = 2;
    /// Malformed request or unknown protocol code
    pub const DECODE: i32 = 3;
    /// Peer transport or local service unreachable
    pub const DIAL: i32 = 4;
    /// Host key verification failed
    pub const TRUST: i32 = 5;
}

/// One control-plane request or response
#[derive(Debug, Clone, PartialEq)]
pub struct ControlMessage {
    /// Operation + protocol code
    pub kind: MessageKind,
    /// Pair identifier (string form of the pool id, empty when unset)
    pub pair_id: String,
    /// Sender does not intend to keep the resulting stream open
    pub detach: bool,
    /// Loopback address of the control-plane listener the sender targets
    pub local_entry: String,
    /// Serialized session variant parameters
    pub payload: Bytes,
    /// Response status; non-zero signals failure
    pub status: i32,
}

impl ControlMessage {
    /// Build a request message
    pub fn request(kind: MessageKind, pair_id: impl Into<String>, payload: Bytes) -> Self {
        Self {
            kind,
            pair_id: pair_id.into(),
            detach: false,
            local_entry: String::new(),
            payload,
            status: status::OK,
        }
    }

    /// Build a response envelope with the given status
    pub fn response(kind: MessageKind, pair_id: impl Into<String>, status: i32) -> Self {
        Self {
            kind,
            pair_id: pair_id.into(),
            detach: false,
            local_entry: String::new(),
            payload: Bytes::new(),
            status,
        }
    }

    /// Protocol code of the variant this message is about
    pub fn app_code(&self) -> ProtocolCode {
        self.kind.protocol
    }

    /// Lifecycle operation requested
    pub fn op_code(&self) -> Opcode {
        self.kind.opcode
    }

    /// Whether a response signals success
    pub fn is_ok(&self) -> bool {
        self.status == status::OK
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip() {
        for op in [Opcode::Up, Opcode::Down, Opcode::Stat, Opcode::Attach] {
            assert_eq!(Opcode::from_u8(op.as_u8()), Some(op));
        }
        assert_eq!(Opcode::from_u8(0x00), None);
        assert_eq!(Opcode::from_u8(0xFE), None);
    }

    #[test]
    fn test_kind_pack_unpack() {
        for protocol in [
            ProtocolCode::Control,
            ProtocolCode::Shell,
            ProtocolCode::PortForward,
            ProtocolCode::ForwardService,
        ] {
            for opcode in [Opcode::Up, Opcode::Down, Opcode::Stat, Opcode::Attach] {
                let kind = MessageKind::new(opcode, protocol);
                let packed = kind.pack();
                assert_eq!(MessageKind::unpack(packed).unwrap(), kind);
            }
        }
    }

    #[test]
    fn test_pack_layout() {
        let kind = MessageKind::new(Opcode::Down, ProtocolCode::ForwardService);
        assert_eq!(kind.pack(), (0x03 << 8) | 0x02);
    }

    #[test]
    fn test_unpack_rejects_unknown() {
        // Opcode 0 is reserved
        assert!(matches!(
            MessageKind::unpack(0x0100),
            Err(ProtocolError::UnknownOpcode(0x00))
        ));
        // Protocol code far outside the known range
        assert!(matches!(
            MessageKind::unpack((0xBEEF << 8) | 0x01),
            Err(ProtocolError::UnknownProtocolCode(0xBEEF))
        ));
    }
}
