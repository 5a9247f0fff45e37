//! HTTP delivery of protocol data to peer nodes.

use async_trait::async_trait;
use meridian_settlement::{PeerHandle, StaticPeerDirectory, TransportError};
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::PeerEndpoint;

/// Header carrying the protocol name of a protocol-data request.
pub const PROTOCOL_NAME_HEADER: &str = "x-protocol-name";
/// Header carrying the content type tag of a protocol-data request.
pub const CONTENT_TYPE_HEADER: &str = "x-content-type";

const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Verdict a peer returns for delivered protocol data.
#[derive(Debug, Deserialize)]
struct DeliveryReply {
    verified: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Connection to a peer node's HTTP API.
pub struct HttpPeerHandle {
    peer_id: String,
    /// `POST` target on the peer, already scoped to this node's id.
    url: String,
    active: AtomicBool,
    client: reqwest::Client,
}

impl HttpPeerHandle {
    pub fn new(local_node_id: &str, endpoint: &PeerEndpoint, client: reqwest::Client) -> Self {
        let base = endpoint.url.trim_end_matches('/');
        Self {
            peer_id: endpoint.peer_id.clone(),
            url: format!("{}/api/v1/peers/{}/protocol-data", base, local_node_id),
            active: AtomicBool::new(endpoint.enabled),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

#[async_trait]
impl PeerHandle for HttpPeerHandle {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn send_protocol_data(
        &self,
        protocol_name: &str,
        content_type: u8,
        data: Vec<u8>,
    ) -> Result<(), TransportError> {
        if !self.is_active() {
            return Err(TransportError::Inactive);
        }

        let resp = self
            .client
            .post(&self.url)
            .header(PROTOCOL_NAME_HEADER, protocol_name)
            .header(CONTENT_TYPE_HEADER, content_type.to_string())
            .body(data)
            .send()
            .await
            .map_err(|e| {
                if e.is_connect() || e.is_timeout() {
                    TransportError::Unreachable(e.to_string())
                } else {
                    TransportError::Io(e.to_string())
                }
            })?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(|e| TransportError::Io(e.to_string()))?;
        if !status.is_success() {
            return Err(TransportError::Rejected(format!(
                "HTTP {}: {}",
                status,
                String::from_utf8_lossy(&body)
            )));
        }

        // A 200 only means the peer parsed the request; the claim counts as
        // delivered once the peer has verified it.
        let reply: DeliveryReply = serde_json::from_slice(&body)
            .map_err(|e| TransportError::Rejected(format!("unreadable delivery reply: {}", e)))?;
        if reply.verified {
            Ok(())
        } else {
            Err(TransportError::Rejected(
                reply.error.unwrap_or_else(|| "claim not verified".to_string()),
            ))
        }
    }
}

/// Register one [`HttpPeerHandle`] per configured endpoint.
pub fn register_endpoints(
    directory: &StaticPeerDirectory,
    local_node_id: &str,
    endpoints: &[PeerEndpoint],
) -> anyhow::Result<()> {
    let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
    for endpoint in endpoints {
        let handle = HttpPeerHandle::new(local_node_id, endpoint, client.clone());
        tracing::info!(
            peer_id = %endpoint.peer_id,
            url = %handle.url(),
            enabled = endpoint.enabled,
            "Peer endpoint configured"
        );
        directory.register(Arc::new(handle));
    }
    Ok(())
}
