//! Host-key trust store abstraction

use crate::error::TrustError;

/// Outcome of a host-key lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrustDecision {
    /// Key is recorded for this host and matches
    Known,
    /// Host has never been seen
    Unknown,
    /// Host is recorded with a different key
    Changed {
        /// The recorded key
        expected: String,
    },
}

/// Host-key trust decisions, consulted synchronously during dial
pub trait TrustStore: Send + Sync {
    /// Look up the key recorded for a host
    fn verify(&self, host: &str, key: &str) -> Result<TrustDecision, TrustError>;

    /// Record a key for a host
    fn record(&self, host: &str, key: &str) -> Result<(), TrustError>;
}
