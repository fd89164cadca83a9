//! Session table: pool id -> connection
//!
//! The only value shared across dispatcher tasks. Table-wide mutation is
//! safe under concurrent create/remove; per-connection state has its own
//! locks inside [`Connection`].

use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use pl_core::error::SessionError;
use pl_core::SessionStatus;
use pl_protocol::PoolId;

use crate::session::Connection;

/// All open sessions of one node
pub struct SessionTable {
    entries: DashMap<PoolId, Arc<Connection>>,
}

impl SessionTable {
    /// Create an empty table
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Register a connection under its current pool id, reminting the
    /// nonce until the id is unique. Used for locally minted ids; two
    /// concurrently open sessions never share a pool id.
    pub fn register_minting(&self, conn: &Arc<Connection>) -> PoolId {
        loop {
            let id = conn.pool_id();
            match self.entries.entry(id) {
                Entry::Vacant(slot) => {
                    slot.insert(Arc::clone(conn));
                    return id;
                }
                Entry::Occupied(_) => {
                    // Caller-supplied nonce collided; mint a fresh one.
                    conn.reset_pool_id(id.remint());
                }
            }
        }
    }

    /// Register a connection under a peer-authoritative pool id.
    /// A duplicate is an error here, never a remint.
    pub fn register(&self, conn: &Arc<Connection>) -> Result<(), SessionError> {
        match self.entries.entry(conn.pool_id()) {
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(conn));
                Ok(())
            }
            Entry::Occupied(_) => Err(SessionError::DuplicatePairId(conn.pair_id())),
        }
    }

    /// Look up a connection by pair id string
    pub fn get(&self, pair_id: &str) -> Option<Arc<Connection>> {
        let id: PoolId = pair_id.parse().ok()?;
        self.entries.get(&id).map(|entry| Arc::clone(&entry))
    }

    /// Remove a connection by pair id string; absent entries are fine
    pub fn remove(&self, pair_id: &str) -> Option<Arc<Connection>> {
        let id: PoolId = pair_id.parse().ok()?;
        self.remove_id(id)
    }

    /// Remove a connection by pool id; absent entries are fine
    pub fn remove_id(&self, id: PoolId) -> Option<Arc<Connection>> {
        self.entries.remove(&id).map(|(_, conn)| conn)
    }

    /// Status of every open session
    pub fn list(&self) -> Vec<SessionStatus> {
        self.entries.iter().map(|entry| entry.status()).collect()
    }

    /// Number of open sessions
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for SessionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pl_core::{Direction, HostId};
    use pl_protocol::ProtocolCode;

    use crate::variant::{ForwardServiceVariant, Variant};

    fn test_conn(pool_id: PoolId) -> Arc<Connection> {
        let variant =
            Variant::ForwardService(ForwardServiceVariant::new(HostId::new("peer"), 4000));
        Connection::new(variant, Direction::Outbound, pool_id)
    }

    #[test]
    fn test_register_minting_fills_unset_id() {
        let table = SessionTable::new();
        let conn = test_conn(PoolId::mint(ProtocolCode::ForwardService));
        let id = table.register_minting(&conn);
        assert!(!id.is_unset());
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_register_minting_resolves_forced_collision() {
        let table = SessionTable::new();
        let fixed = PoolId::from_parts(42, ProtocolCode::ForwardService);

        let first = test_conn(fixed);
        let second = test_conn(fixed);
        let first_id = table.register_minting(&first);
        let second_id = table.register_minting(&second);

        assert_eq!(first_id, fixed);
        assert_ne!(second_id, first_id);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_register_rejects_duplicate_authoritative_id() {
        let table = SessionTable::new();
        let fixed = PoolId::from_parts(7, ProtocolCode::ForwardService);

        table.register(&test_conn(fixed)).unwrap();
        let err = table.register(&test_conn(fixed)).unwrap_err();
        assert!(matches!(err, SessionError::DuplicatePairId(_)));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let table = SessionTable::new();
        let conn = test_conn(PoolId::mint(ProtocolCode::ForwardService));
        let id = table.register_minting(&conn);

        assert!(table.remove(&id.to_string()).is_some());
        assert!(table.remove(&id.to_string()).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_lookup_with_bogus_pair_id() {
        let table = SessionTable::new();
        assert!(table.get("not-a-pool-id").is_none());
        assert!(table.remove("not-a-pool-id").is_none());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_concurrent_registration_yields_distinct_entries() {
        let table = Arc::new(SessionTable::new());
        let mut handles = Vec::new();

        for _ in 0..64 {
            let table = Arc::clone(&table);
            handles.push(tokio::spawn(async move {
                // Every task starts from the same nonce to force the
                // remint fallback under contention.
                let conn = test_conn(PoolId::from_parts(1, ProtocolCode::ForwardService));
                table.register_minting(&conn)
            }));
        }

        let mut ids = std::collections::HashSet::new();
        for handle in handles {
            assert!(ids.insert(handle.await.unwrap()));
        }
        assert_eq!(table.len(), 64);
    }
}
