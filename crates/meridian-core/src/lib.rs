//! Meridian Core — domain types shared by every layer of the settlement
//! subsystem: rails, peer settlement configuration, payment channels,
//! chain-tagged claims and the claim wire envelope.

pub mod address;
pub mod amount;
pub mod channel;
pub mod claim;
pub mod config;
pub mod error;
pub mod message;
pub mod types;

pub use channel::{Channel, ChannelStatus};
pub use claim::{AptosClaim, Claim, EvmClaim, XrpClaim};
pub use config::SettlementConfig;
pub use error::CoreError;
pub use message::{ClaimMessage, MessageId, CLAIM_CONTENT_TYPE_JSON, CLAIM_MESSAGE_VERSION, CLAIM_PROTOCOL_NAME};
pub use types::{ChainKind, PeerSettlementConfig, SettlementPreference, SettlementRequiredEvent};
