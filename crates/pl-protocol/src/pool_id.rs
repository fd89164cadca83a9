//! Pool identifier correlating the two halves of a tunneled session

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::control::ProtocolCode;
use crate::error::ProtocolError;

// Process-local tiebreaker mixed into minted nonces so two mints within
// the same clock tick still differ.
static MINT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Opaque identifier correlating the local and remote halves of one
/// logical session.
///
/// The nonce is minted from a nanosecond-resolution timestamp on the side
/// that registers the session; a nonce of `0` means "unset" and obliges
/// the receiver to mint a fresh one. The string form is the wire pair id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PoolId {
    nonce: u64,
    code: ProtocolCode,
}

impl PoolId {
    /// Mint a fresh id for the given variant
    pub fn mint(code: ProtocolCode) -> Self {
        let stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        let seq = MINT_SEQ.fetch_add(1, Ordering::Relaxed);
        let nonce = stamp.wrapping_add(seq);
        Self {
            nonce: if nonce == 0 { 1 } else { nonce },
            code,
        }
    }

    /// The unset id for the given variant
    pub fn unset(code: ProtocolCode) -> Self {
        Self { nonce: 0, code }
    }

    /// Construct from raw parts
    pub fn from_parts(nonce: u64, code: ProtocolCode) -> Self {
        Self { nonce, code }
    }

    /// Whether the nonce still needs to be minted
    pub fn is_unset(&self) -> bool {
        self.nonce == 0
    }

    /// A fresh id for the same variant, used when a minted nonce collides
    pub fn remint(&self) -> Self {
        Self::mint(self.code)
    }

    /// Raw nonce value
    pub fn nonce(&self) -> u64 {
        self.nonce
    }

    /// Protocol code of the owning variant
    pub fn code(&self) -> ProtocolCode {
        self.code
    }
}

impl fmt::Display for PoolId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}-{:02x}", self.nonce, self.code.as_u16())
    }
}

impl FromStr for PoolId {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (nonce_part, code_part) = s
            .rsplit_once('-')
            .ok_or_else(|| ProtocolError::InvalidPairId(s.to_string()))?;

        let nonce = u64::from_str_radix(nonce_part, 16)
            .map_err(|_| ProtocolError::InvalidPairId(s.to_string()))?;
        let code = u16::from_str_radix(code_part, 16)
            .ok()
            .and_then(ProtocolCode::from_u16)
            .ok_or_else(|| ProtocolError::InvalidPairId(s.to_string()))?;

        Ok(Self { nonce, code })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_mint_is_never_unset() {
        let id = PoolId::mint(ProtocolCode::Shell);
        assert!(!id.is_unset());
    }

    #[test]
    fn test_mint_distinct_within_one_tick() {
        // Minting in a tight loop lands many ids in the same clock tick;
        // the sequence counter must keep them distinct.
        let mut seen = HashSet::new();
        for _ in 0..10_000 {
            assert!(seen.insert(PoolId::mint(ProtocolCode::ForwardService)));
        }
    }

    #[test]
    fn test_display_parse_roundtrip() {
        for id in [
            PoolId::mint(ProtocolCode::Shell),
            PoolId::mint(ProtocolCode::PortForward),
            PoolId::unset(ProtocolCode::ForwardService),
            PoolId::from_parts(u64::MAX, ProtocolCode::Shell),
        ] {
            let parsed: PoolId = id.to_string().parse().unwrap();
            assert_eq!(parsed, id);
        }
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<PoolId>().is_err());
        assert!("abc".parse::<PoolId>().is_err());
        assert!("xyz-01".parse::<PoolId>().is_err());
        // Unknown protocol code
        assert!("1f-7f".parse::<PoolId>().is_err());
    }

    #[test]
    fn test_remint_keeps_code() {
        let id = PoolId::unset(ProtocolCode::PortForward);
        let fresh = id.remint();
        assert_eq!(fresh.code(), ProtocolCode::PortForward);
        assert!(!fresh.is_unset());
        assert_ne!(fresh, id);
    }
}
