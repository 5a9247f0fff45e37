use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::error::CoreError;

/// A blockchain settlement rail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainKind {
    /// EVM-compatible chain (ERC-20 style tokens).
    Evm,
    /// XRP Ledger.
    Xrp,
    /// Aptos.
    Aptos,
}

impl ChainKind {
    /// All rails, in a stable order.
    pub const ALL: [ChainKind; 3] = [ChainKind::Evm, ChainKind::Xrp, ChainKind::Aptos];

    /// Lowercase tag used on the wire and in message ids.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Evm => "evm",
            Self::Xrp => "xrp",
            Self::Aptos => "aptos",
        }
    }

    /// Whether claims on this rail are ordered by nonce rather than by
    /// cumulative amount.
    pub fn orders_by_nonce(&self) -> bool {
        matches!(self, Self::Evm)
    }
}

impl fmt::Display for ChainKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChainKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            "xrp" => Ok(Self::Xrp),
            "aptos" => Ok(Self::Aptos),
            other => Err(CoreError::UnknownChain(other.to_string())),
        }
    }
}

/// Which rails a peer is willing to settle on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SettlementPreference {
    Evm,
    Xrp,
    Aptos,
    /// Any rail. The legacy value `both` is read as `any`.
    #[serde(alias = "both")]
    Any,
}

impl SettlementPreference {
    /// Whether this preference admits the given rail.
    pub fn allows(&self, chain: ChainKind) -> bool {
        match self {
            Self::Any => true,
            Self::Evm => chain == ChainKind::Evm,
            Self::Xrp => chain == ChainKind::Xrp,
            Self::Aptos => chain == ChainKind::Aptos,
        }
    }
}

impl fmt::Display for SettlementPreference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Evm => write!(f, "evm"),
            Self::Xrp => write!(f, "xrp"),
            Self::Aptos => write!(f, "aptos"),
            Self::Any => write!(f, "any"),
        }
    }
}

impl FromStr for SettlementPreference {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "evm" => Ok(Self::Evm),
            "xrp" => Ok(Self::Xrp),
            "aptos" => Ok(Self::Aptos),
            "any" | "both" => Ok(Self::Any),
            other => Err(CoreError::UnknownPreference(other.to_string())),
        }
    }
}

/// Per-peer settlement configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeerSettlementConfig {
    /// Peer identifier as known to the messaging transport.
    pub peer_id: String,
    /// Rail preference.
    pub settlement_preference: SettlementPreference,
    /// Accepted token ids. Empty means any token.
    #[serde(default)]
    pub tokens: BTreeSet<String>,
    /// Destination address on the EVM rail.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evm_address: Option<String>,
    /// Destination classic address on the XRP Ledger.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xrp_address: Option<String>,
    /// Destination account address on Aptos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aptos_address: Option<String>,
    /// Destination Ed25519 public key on Aptos.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aptos_public_key: Option<String>,
}

impl PeerSettlementConfig {
    /// Create a config with no tokens and no chain material.
    pub fn new(peer_id: impl Into<String>, settlement_preference: SettlementPreference) -> Self {
        Self {
            peer_id: peer_id.into(),
            settlement_preference,
            tokens: BTreeSet::new(),
            evm_address: None,
            xrp_address: None,
            aptos_address: None,
            aptos_public_key: None,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.tokens.insert(token.into());
        self
    }

    pub fn with_evm_address(mut self, address: impl Into<String>) -> Self {
        self.evm_address = Some(address.into());
        self
    }

    pub fn with_xrp_address(mut self, address: impl Into<String>) -> Self {
        self.xrp_address = Some(address.into());
        self
    }

    pub fn with_aptos(mut self, address: impl Into<String>, public_key: impl Into<String>) -> Self {
        self.aptos_address = Some(address.into());
        self.aptos_public_key = Some(public_key.into());
        self
    }

    /// Whether the peer accepts settlement in `token_id`.
    pub fn accepts_token(&self, token_id: &str) -> bool {
        self.tokens.is_empty() || self.tokens.contains(token_id)
    }
}

/// Signal from the balance monitor that a peer must be settled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementRequiredEvent {
    pub peer_id: String,
    pub token_id: String,
    #[serde(with = "crate::amount::as_string")]
    pub balance: u128,
    pub timestamp: DateTime<Utc>,
}

impl SettlementRequiredEvent {
    /// Create an event stamped with the current time.
    pub fn new(peer_id: impl Into<String>, token_id: impl Into<String>, balance: u128) -> Self {
        Self {
            peer_id: peer_id.into(),
            token_id: token_id.into(),
            balance,
            timestamp: Utc::now(),
        }
    }
}
