//! Shared node state for the API handlers.

use meridian_settlement::{ClaimReceiver, SettlementRouter, StaticPeerDirectory};
use std::sync::Arc;
use std::time::Instant;

/// Shared state for the running node, accessible from HTTP handlers.
pub struct NodeState {
    /// Id this node announces to peers.
    pub node_id: String,
    /// When the node started.
    pub start_time: Instant,
    /// Settlement orchestrator, with every registered adapter.
    pub router: Arc<SettlementRouter>,
    /// Inbound claim verification.
    pub receiver: Arc<ClaimReceiver>,
    /// Peer connections.
    pub directory: Arc<StaticPeerDirectory>,
}

impl NodeState {
    pub fn new(
        node_id: impl Into<String>,
        router: Arc<SettlementRouter>,
        receiver: Arc<ClaimReceiver>,
        directory: Arc<StaticPeerDirectory>,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            start_time: Instant::now(),
            router,
            receiver,
            directory,
        }
    }
}
