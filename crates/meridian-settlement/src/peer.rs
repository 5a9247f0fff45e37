//! Messaging transport seam.
//!
//! The settlement layer only needs to push opaque bytes to a peer under a
//! protocol name; connection management belongs to the transport.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

/// Peer transport errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("peer unreachable: {0}")]
    Unreachable(String),

    #[error("peer rejected message: {0}")]
    Rejected(String),

    #[error("connection inactive")]
    Inactive,

    #[error("transport I/O error: {0}")]
    Io(String),
}

/// A connection to one peer.
#[async_trait]
pub trait PeerHandle: Send + Sync {
    fn peer_id(&self) -> &str;

    /// Whether the connection currently accepts messages.
    fn is_active(&self) -> bool;

    async fn send_protocol_data(
        &self,
        protocol_name: &str,
        content_type: u8,
        data: Vec<u8>,
    ) -> Result<(), TransportError>;
}

/// Lookup of peer connections.
pub trait PeerDirectory: Send + Sync {
    fn client_for_peer(&self, peer_id: &str) -> Option<Arc<dyn PeerHandle>>;

    fn is_connected(&self, peer_id: &str) -> bool {
        self.client_for_peer(peer_id).is_some_and(|h| h.is_active())
    }
}

/// Directory over explicitly registered handles.
#[derive(Default)]
pub struct StaticPeerDirectory {
    handles: DashMap<String, Arc<dyn PeerHandle>>,
}

impl StaticPeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, handle: Arc<dyn PeerHandle>) {
        tracing::debug!(peer_id = %handle.peer_id(), "Registered peer handle");
        self.handles.insert(handle.peer_id().to_string(), handle);
    }

    pub fn remove(&self, peer_id: &str) -> Option<Arc<dyn PeerHandle>> {
        self.handles.remove(peer_id).map(|(_, h)| h)
    }

    pub fn peer_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.handles.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

impl PeerDirectory for StaticPeerDirectory {
    fn client_for_peer(&self, peer_id: &str) -> Option<Arc<dyn PeerHandle>> {
        self.handles.get(peer_id).map(|h| Arc::clone(h.value()))
    }
}
