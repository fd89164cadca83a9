//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a remote peer: a configured peer name or a literal
/// `host:port` address the transport can dial directly.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostId(pub String);

impl HostId {
    /// Create a new host ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the identifier has been assigned yet
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for HostId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for HostId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for HostId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Which side of the peer link a session half sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Created on behalf of a remote peer
    Inbound,
    /// Created by a local client
    Outbound,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Inbound => write!(f, "inbound"),
            Direction::Outbound => write!(f, "outbound"),
        }
    }
}

/// Session metadata reported by a `Stat` query
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Pair identifier
    pub pair_id: String,
    /// Protocol code of the session variant
    pub protocol: u16,
    /// Which side created the session half
    pub direction: Direction,
    /// Remote peer the session targets
    pub target: String,
    /// Whether the session finished establishing
    pub ready: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_id_display() {
        let id = HostId::new("workstation");
        assert_eq!(id.to_string(), "workstation");
        assert!(!id.is_empty());
        assert!(HostId::default().is_empty());
    }

    #[test]
    fn test_direction_display() {
        assert_eq!(Direction::Inbound.to_string(), "inbound");
        assert_eq!(Direction::Outbound.to_string(), "outbound");
    }
}
