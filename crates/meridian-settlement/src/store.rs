//! Durable log of claims sent and received.
//!
//! Records are keyed by message id and never deleted by normal operation;
//! the received log doubles as dispute evidence. Inserting an id that
//! already exists leaves the first record in place.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use meridian_core::{ChainKind, Claim, MessageId};
use serde::{Deserialize, Serialize};

/// Claim store errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(String),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Whether an insert created a row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Duplicate,
}

/// One `send` call's outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentClaimRecord {
    pub message_id: MessageId,
    pub peer_id: String,
    pub chain: ChainKind,
    pub channel_id: String,
    pub claim: Claim,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp_ms: i64,
}

/// One inbound claim and its verification outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedClaimRecord {
    pub message_id: MessageId,
    pub peer_id: String,
    pub chain: ChainKind,
    pub channel_id: String,
    pub claim: Claim,
    pub verified: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp_ms: i64,
}

impl ReceivedClaimRecord {
    fn matches(&self, peer_id: &str, chain: ChainKind, channel_id: &str) -> bool {
        self.peer_id == peer_id && self.chain == chain && self.channel_id == channel_id
    }
}

/// Pick the verified record with the highest ordering key; ties go to the
/// most recent.
pub fn latest_verified<'a, I>(records: I) -> Option<ReceivedClaimRecord>
where
    I: IntoIterator<Item = &'a ReceivedClaimRecord>,
{
    records
        .into_iter()
        .filter(|r| r.verified)
        .max_by_key(|r| (r.claim.ordering_key(), r.timestamp_ms))
        .cloned()
}

/// Append-only claim log. Sent and received records live in separate
/// tables so the sender and the receiver can append concurrently.
pub trait ClaimStore: Send + Sync {
    fn insert_sent(&self, record: &SentClaimRecord) -> Result<InsertOutcome, StoreError>;

    fn insert_received(&self, record: &ReceivedClaimRecord) -> Result<InsertOutcome, StoreError>;

    /// Received record stored under `message_id`, if any.
    fn received_by_id(&self, message_id: &MessageId) -> Result<Option<ReceivedClaimRecord>, StoreError>;

    /// Latest verified claim received from `peer_id` on a channel.
    fn latest_verified_received(
        &self,
        peer_id: &str,
        chain: ChainKind,
        channel_id: &str,
    ) -> Result<Option<ReceivedClaimRecord>, StoreError>;

    /// Sent records for a peer, oldest first.
    fn sent_for_peer(&self, peer_id: &str) -> Result<Vec<SentClaimRecord>, StoreError>;

    /// Received records for a channel, oldest first.
    fn received_for_channel(
        &self,
        peer_id: &str,
        chain: ChainKind,
        channel_id: &str,
    ) -> Result<Vec<ReceivedClaimRecord>, StoreError>;
}

/// In-memory [`ClaimStore`].
#[derive(Debug, Default)]
pub struct MemoryClaimStore {
    sent: DashMap<String, SentClaimRecord>,
    received: DashMap<String, ReceivedClaimRecord>,
}

impl MemoryClaimStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.len()
    }

    pub fn received_count(&self) -> usize {
        self.received.len()
    }
}

fn insert_once<V: Clone>(map: &DashMap<String, V>, key: &MessageId, value: &V) -> InsertOutcome {
    match map.entry(key.as_str().to_string()) {
        Entry::Occupied(_) => InsertOutcome::Duplicate,
        Entry::Vacant(slot) => {
            slot.insert(value.clone());
            InsertOutcome::Inserted
        }
    }
}

impl ClaimStore for MemoryClaimStore {
    fn insert_sent(&self, record: &SentClaimRecord) -> Result<InsertOutcome, StoreError> {
        Ok(insert_once(&self.sent, &record.message_id, record))
    }

    fn insert_received(&self, record: &ReceivedClaimRecord) -> Result<InsertOutcome, StoreError> {
        Ok(insert_once(&self.received, &record.message_id, record))
    }

    fn received_by_id(&self, message_id: &MessageId) -> Result<Option<ReceivedClaimRecord>, StoreError> {
        Ok(self.received.get(message_id.as_str()).map(|r| r.value().clone()))
    }

    fn latest_verified_received(
        &self,
        peer_id: &str,
        chain: ChainKind,
        channel_id: &str,
    ) -> Result<Option<ReceivedClaimRecord>, StoreError> {
        Ok(latest_verified(
            self.received_for_channel(peer_id, chain, channel_id)?.iter(),
        ))
    }

    fn sent_for_peer(&self, peer_id: &str) -> Result<Vec<SentClaimRecord>, StoreError> {
        let mut records: Vec<SentClaimRecord> = self
            .sent
            .iter()
            .filter(|e| e.value().peer_id == peer_id)
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.timestamp_ms);
        Ok(records)
    }

    fn received_for_channel(
        &self,
        peer_id: &str,
        chain: ChainKind,
        channel_id: &str,
    ) -> Result<Vec<ReceivedClaimRecord>, StoreError> {
        let mut records: Vec<ReceivedClaimRecord> = self
            .received
            .iter()
            .filter(|e| e.value().matches(peer_id, chain, channel_id))
            .map(|e| e.value().clone())
            .collect();
        records.sort_by_key(|r| r.timestamp_ms);
        Ok(records)
    }
}
