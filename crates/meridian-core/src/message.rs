//! Claim wire envelope and message ids.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::claim::Claim;
use crate::error::CoreError;
use crate::types::ChainKind;

/// Envelope version emitted by this implementation.
pub const CLAIM_MESSAGE_VERSION: &str = "1.0";
/// Protocol name claims travel under on the messaging transport.
pub const CLAIM_PROTOCOL_NAME: &str = "payment-channel-claim";
/// Content type tag for JSON payloads, agreed out of band with peers.
pub const CLAIM_CONTENT_TYPE_JSON: u8 = 1;

const CHANNEL_PREFIX_LEN: usize = 8;

/// Unique id of one claim send: `{chain}-{channelPrefix}-{nonce|n/a}-{unixMillis}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    /// Build the id for sending `claim` at `at`.
    pub fn for_claim(claim: &Claim, at: DateTime<Utc>) -> Self {
        Self::from_parts(claim.chain(), claim.channel_id(), claim.nonce(), at.timestamp_millis())
    }

    /// Build an id from its components.
    pub fn from_parts(chain: ChainKind, channel_id: &str, nonce: Option<u64>, unix_millis: i64) -> Self {
        let prefix: String = channel_id.chars().take(CHANNEL_PREFIX_LEN).collect();
        let nonce = nonce.map_or_else(|| "n/a".to_string(), |n| n.to_string());
        Self(format!("{}-{}-{}-{}", chain, prefix, nonce, unix_millis))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for MessageId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// JSON envelope carrying one claim to a peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimMessage {
    pub version: String,
    pub message_id: MessageId,
    pub timestamp: DateTime<Utc>,
    pub sender_id: String,
    #[serde(flatten)]
    pub claim: Claim,
}

impl ClaimMessage {
    /// Wrap a signed claim for sending.
    pub fn new(message_id: MessageId, sender_id: impl Into<String>, claim: Claim, timestamp: DateTime<Utc>) -> Self {
        Self {
            version: CLAIM_MESSAGE_VERSION.to_string(),
            message_id,
            timestamp,
            sender_id: sender_id.into(),
            claim,
        }
    }

    /// Serialize to the JSON bytes sent over the transport.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse an inbound payload.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        let message: Self = serde_json::from_slice(bytes)?;
        if message.message_id.as_str().is_empty() {
            return Err(CoreError::MissingField("messageId".into()));
        }
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claim::{AptosClaim, XrpClaim};
    use chrono::TimeZone;

    fn at() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_123).unwrap()
    }

    fn xrp_claim() -> Claim {
        Claim::Xrp(XrpClaim {
            channel_id: "5DB01B7FFED6B67E6B0414DED11E051D2EE2B7619CE0EAA6286D67A3A4D5BDB3".into(),
            amount: 1_000_000,
            signature: "abcd".into(),
            public_key: "ED01".into(),
        })
    }

    #[test]
    fn test_message_id_format() {
        let id = MessageId::for_claim(&xrp_claim(), at());
        assert_eq!(id.as_str(), "xrp-5DB01B7F-n/a-1700000000123");

        let aptos = Claim::Aptos(AptosClaim {
            channel_owner: "0x1234".into(),
            amount: 1,
            nonce: 4,
            signature: String::new(),
            public_key: String::new(),
        });
        let id = MessageId::for_claim(&aptos, at());
        assert_eq!(id.as_str(), "aptos-0x1234-4-1700000000123");
    }

    #[test]
    fn test_envelope_layout() {
        let msg = ClaimMessage::new(MessageId::for_claim(&xrp_claim(), at()), "peer-alice", xrp_claim(), at());
        let json: serde_json::Value = serde_json::from_slice(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(json["version"], CLAIM_MESSAGE_VERSION);
        assert_eq!(json["blockchain"], "xrp");
        assert_eq!(json["senderId"], "peer-alice");
        assert_eq!(json["amount"], "1000000");
        assert!(json["timestamp"].as_str().unwrap().starts_with("2023-11-14T22:13:20"));
    }

    #[test]
    fn test_envelope_parse_roundtrip() {
        let msg = ClaimMessage::new(MessageId::for_claim(&xrp_claim(), at()), "peer-alice", xrp_claim(), at());
        let parsed = ClaimMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(parsed, msg);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(ClaimMessage::from_bytes(b"not json").is_err());
        assert!(ClaimMessage::from_bytes(br#"{"version":"1.0","blockchain":"solana"}"#).is_err());
    }
}
