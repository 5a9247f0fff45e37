use chrono::{DateTime, Utc};
use meridian_core::{ChainKind, Claim, MessageId};
use serde::{Deserialize, Serialize};

/// Proof that a settlement was delivered and recorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementReceipt {
    pub peer_id: String,
    pub token_id: String,
    /// Rail the settlement went over.
    pub chain: ChainKind,
    pub channel_id: String,
    /// Amount settled by this attempt.
    #[serde(with = "meridian_core::amount::as_string")]
    pub amount: u128,
    /// Id of the claim message the peer acknowledged.
    pub message_id: MessageId,
    pub claim: Claim,
    pub settled_at: DateTime<Utc>,
}
