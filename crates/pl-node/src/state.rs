//! Global node state

use std::sync::Arc;

use pl_core::config::NodeConfig;
use pl_core::traits::PeerTransport;

use crate::session::SessionTable;

/// State shared by every dispatcher task of one node
pub struct NodeState {
    /// Configuration
    pub config: NodeConfig,
    /// All open sessions
    pub table: SessionTable,
    /// Peer transport provider
    pub transport: Arc<dyn PeerTransport>,
}

impl NodeState {
    /// Create node state around a transport provider
    pub fn new(config: NodeConfig, transport: Arc<dyn PeerTransport>) -> Arc<Self> {
        Arc::new(Self {
            config,
            table: SessionTable::new(),
            transport,
        })
    }
}
