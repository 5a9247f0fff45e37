//! Inbound claim verification.
//!
//! Checks and persistence for one `(peer, chain, channel)` run under that
//! channel's lock, so accepted ordering keys strictly increase even when
//! deliveries arrive concurrently.

use std::sync::{Arc, Mutex, PoisonError};

use chrono::Utc;
use dashmap::DashMap;
use meridian_core::{ChainKind, Claim, ClaimMessage, MessageId, SettlementConfig};
use serde::Serialize;

use crate::store::{ClaimStore, InsertOutcome, ReceivedClaimRecord, StoreError};
use crate::telemetry::{Telemetry, TelemetryEvent};

pub const INVALID_SIGNATURE: &str = "Invalid signature";
pub const AMOUNT_NOT_MONOTONIC: &str = "Claim amount not monotonically increasing";
pub const NONCE_NOT_MONOTONIC: &str = "Claim nonce not monotonically increasing";

/// Verification result of one inbound message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveOutcome {
    pub verified: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<MessageId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain: Option<ChainKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Verifies claims received from peers and keeps them as evidence.
pub struct ClaimReceiver {
    store: Arc<dyn ClaimStore>,
    channel_locks: DashMap<String, Arc<Mutex<()>>>,
    telemetry: Telemetry,
    protocol_name: String,
    content_type: u8,
}

impl ClaimReceiver {
    pub fn new(store: Arc<dyn ClaimStore>, telemetry: Telemetry, config: &SettlementConfig) -> Self {
        Self {
            store,
            channel_locks: DashMap::new(),
            telemetry,
            protocol_name: config.protocol_name.clone(),
            content_type: config.content_type,
        }
    }

    /// Entry point for protocol data from the messaging transport. Returns
    /// `None` for messages of other protocols or content types.
    pub fn handle_protocol_data(
        &self,
        peer_id: &str,
        protocol_name: &str,
        content_type: u8,
        data: &[u8],
    ) -> Option<ReceiveOutcome> {
        if protocol_name != self.protocol_name || content_type != self.content_type {
            tracing::trace!(
                peer_id = %peer_id,
                protocol = %protocol_name,
                content_type,
                "Ignoring non-claim protocol data"
            );
            return None;
        }
        Some(self.receive(peer_id, data))
    }

    /// Parse, verify, check monotonicity and persist one inbound claim.
    pub fn receive(&self, peer_id: &str, data: &[u8]) -> ReceiveOutcome {
        let message = match ClaimMessage::from_bytes(data) {
            Ok(message) => message,
            Err(e) => {
                let error = format!("Malformed claim message: {}", e);
                tracing::warn!(peer_id = %peer_id, error = %error, "Rejected inbound claim");
                self.telemetry.emit_or_drop(TelemetryEvent::ClaimReceived {
                    peer_id: peer_id.to_string(),
                    chain: None,
                    message_id: None,
                    channel_id: None,
                    amount: None,
                    verified: false,
                    error: Some(error.clone()),
                });
                return ReceiveOutcome {
                    verified: false,
                    message_id: None,
                    chain: None,
                    channel_id: None,
                    error: Some(error),
                };
            }
        };

        let claim = &message.claim;
        let lock = self.channel_lock(peer_id, claim);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        if let Some(stored) = self.already_received(peer_id, &message.message_id) {
            tracing::debug!(
                peer_id = %peer_id,
                message_id = %message.message_id,
                verified = stored.verified,
                "Duplicate inbound claim ignored"
            );
            return ReceiveOutcome {
                verified: stored.verified,
                message_id: Some(stored.message_id),
                chain: Some(stored.chain),
                channel_id: Some(stored.channel_id),
                error: stored.error,
            };
        }

        let error = self.check(peer_id, claim);
        let verified = error.is_none();

        if verified {
            tracing::info!(
                peer_id = %peer_id,
                chain = %claim.chain(),
                channel_id = %claim.channel_id(),
                message_id = %message.message_id,
                amount = %claim.amount(),
                "Verified inbound claim"
            );
        } else {
            tracing::warn!(
                peer_id = %peer_id,
                chain = %claim.chain(),
                channel_id = %claim.channel_id(),
                message_id = %message.message_id,
                error = error.as_deref().unwrap_or_default(),
                "Rejected inbound claim"
            );
        }

        self.persist(ReceivedClaimRecord {
            message_id: message.message_id.clone(),
            peer_id: peer_id.to_string(),
            chain: claim.chain(),
            channel_id: claim.channel_id().to_string(),
            claim: claim.clone(),
            verified,
            error: error.clone(),
            timestamp_ms: Utc::now().timestamp_millis(),
        });
        self.telemetry.emit_or_drop(TelemetryEvent::ClaimReceived {
            peer_id: peer_id.to_string(),
            chain: Some(claim.chain()),
            message_id: Some(message.message_id.clone()),
            channel_id: Some(claim.channel_id().to_string()),
            amount: Some(claim.amount().to_string()),
            verified,
            error: error.clone(),
        });

        ReceiveOutcome {
            verified,
            message_id: Some(message.message_id),
            chain: Some(claim.chain()),
            channel_id: Some(claim.channel_id().to_string()),
            error,
        }
    }

    fn channel_lock(&self, peer_id: &str, claim: &Claim) -> Arc<Mutex<()>> {
        let key = format!("{}\0{}\0{}", peer_id, claim.chain(), claim.channel_id());
        self.channel_locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// The record of an earlier delivery of `message_id` from `peer_id`.
    fn already_received(&self, peer_id: &str, message_id: &MessageId) -> Option<ReceivedClaimRecord> {
        match self.store.received_by_id(message_id) {
            Ok(record) => record.filter(|r| r.peer_id == peer_id),
            Err(e) => {
                tracing::error!(message_id = %message_id, error = %e, "Failed to look up received claim");
                None
            }
        }
    }

    /// Signature, then strict monotonicity against the last verified claim.
    fn check(&self, peer_id: &str, claim: &Claim) -> Option<String> {
        if meridian_crypto::verify_claim(claim).is_err() {
            return Some(INVALID_SIGNATURE.to_string());
        }
        let previous = match self
            .store
            .latest_verified_received(peer_id, claim.chain(), claim.channel_id())
        {
            Ok(previous) => previous,
            Err(e) => {
                tracing::error!(peer_id = %peer_id, error = %e, "Failed to load previous claim");
                None
            }
        };
        match previous {
            Some(prev) if claim.ordering_key() <= prev.claim.ordering_key() => {
                let reason = if claim.chain().orders_by_nonce() {
                    NONCE_NOT_MONOTONIC
                } else {
                    AMOUNT_NOT_MONOTONIC
                };
                Some(reason.to_string())
            }
            _ => None,
        }
    }

    fn persist(&self, record: ReceivedClaimRecord) {
        match self.store.insert_received(&record) {
            Ok(InsertOutcome::Inserted) => {}
            Ok(InsertOutcome::Duplicate) => {
                tracing::debug!(message_id = %record.message_id, "Duplicate inbound claim ignored");
            }
            Err(e) => {
                tracing::error!(message_id = %record.message_id, error = %e, "Failed to persist received claim");
            }
        }
    }

    /// Latest verified claim on a channel, for disputes. Storage failures
    /// read as "no claim".
    pub fn get_latest_verified_claim(&self, peer_id: &str, chain: ChainKind, channel_id: &str) -> Option<Claim> {
        match self.store.latest_verified_received(peer_id, chain, channel_id) {
            Ok(record) => record.map(|r| r.claim),
            Err(e) => {
                tracing::error!(
                    peer_id = %peer_id,
                    chain = %chain,
                    channel_id = %channel_id,
                    error = %e,
                    "Failed to query latest verified claim"
                );
                None
            }
        }
    }

    /// Every claim received on a channel, oldest first.
    pub fn received_claims(
        &self,
        peer_id: &str,
        chain: ChainKind,
        channel_id: &str,
    ) -> Result<Vec<ReceivedClaimRecord>, StoreError> {
        self.store.received_for_channel(peer_id, chain, channel_id)
    }
}
