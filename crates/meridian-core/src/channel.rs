use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::ChainKind;

/// Lifecycle status of a payment channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelStatus {
    /// Accepting deposits and claims.
    Open,
    /// Close requested; waiting for the settle delay to elapse.
    Closing,
    /// Finalized on-chain.
    Closed,
}

impl fmt::Display for ChannelStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => write!(f, "open"),
            Self::Closing => write!(f, "closing"),
            Self::Closed => write!(f, "closed"),
        }
    }
}

/// Snapshot of an on-chain unidirectional payment channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Channel {
    /// Channel identifier (the owner address on Aptos, the open transaction
    /// hash on EVM and XRP).
    pub channel_id: String,
    /// Rail the channel lives on.
    pub chain: ChainKind,
    /// Funding account (normalized).
    pub owner: String,
    /// Receiving account (normalized).
    pub destination: String,
    /// Destination public key, where the rail needs one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_public_key: Option<String>,
    /// Total deposited; never decreases.
    #[serde(with = "crate::amount::as_string")]
    pub deposited: u128,
    /// Total redeemed on-chain; never decreases, never exceeds `deposited`.
    #[serde(with = "crate::amount::as_string")]
    pub claimed: u128,
    /// Highest claim nonce redeemed on-chain.
    pub nonce: u64,
    /// Seconds between a close request and permitted finalization.
    pub settle_delay_secs: u64,
    /// Unix seconds of the close request; 0 when not closing.
    pub close_requested_at: u64,
    /// Set once finalization succeeded.
    #[serde(default)]
    pub finalized: bool,
}

impl Channel {
    /// Derived status.
    pub fn status(&self) -> ChannelStatus {
        if self.finalized {
            ChannelStatus::Closed
        } else if self.close_requested_at > 0 {
            ChannelStatus::Closing
        } else {
            ChannelStatus::Open
        }
    }

    /// Deposited funds not yet redeemed on-chain.
    pub fn remaining(&self) -> u128 {
        self.deposited.saturating_sub(self.claimed)
    }

    /// Earliest unix second at which a close may be finalized.
    pub fn finalizable_at(&self) -> Option<u64> {
        (self.close_requested_at > 0).then(|| self.close_requested_at + self.settle_delay_secs)
    }
}
