use meridian_core::{ChainKind, CoreError, SettlementPreference};
use meridian_crypto::CryptoError;

use crate::chain::ChainError;
use crate::ledger::LedgerError;
use crate::store::StoreError;

/// Settlement-layer errors.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("incompatible settlement: peer {peer_id} prefers {preference}, cannot settle token {token_id}")]
    IncompatibleSettlement {
        peer_id: String,
        token_id: String,
        preference: SettlementPreference,
    },

    #[error("{0} settlement is disabled")]
    SettlementDisabled(ChainKind),

    #[error("unknown peer: {0}")]
    UnknownPeer(String),

    #[error("peer {peer_id} is missing required field {field}")]
    MissingPeerField { peer_id: String, field: &'static str },

    #[error("no channel adapter registered for {0}")]
    AdapterNotFound(ChainKind),

    #[error("peer not connected: {0}")]
    PeerNotConnected(String),

    #[error("peer connection inactive: {0}")]
    PeerConnectionInactive(String),

    #[error("claim delivery to {peer_id} failed: {reason}")]
    TransportFailed { peer_id: String, reason: String },

    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    #[error("{chain} account already has channel {channel_id} open to {destination}; only one channel per owner is allowed")]
    ChannelAlreadyOpen {
        chain: ChainKind,
        channel_id: String,
        destination: String,
    },

    #[error("chain error: {0}")]
    Chain(#[from] ChainError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("claim store error: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Stable, machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::IncompatibleSettlement { .. } => "incompatible_settlement",
            Self::SettlementDisabled(_) => "settlement_disabled",
            Self::UnknownPeer(_) => "unknown_peer",
            Self::MissingPeerField { .. } => "missing_peer_field",
            Self::AdapterNotFound(_) => "adapter_not_found",
            Self::PeerNotConnected(_) => "peer_not_connected",
            Self::PeerConnectionInactive(_) => "peer_connection_inactive",
            Self::TransportFailed { .. } => "transport_failed",
            Self::ChannelNotFound(_) => "channel_not_found",
            Self::ChannelAlreadyOpen { .. } => "channel_already_open",
            Self::Chain(_) => "chain_error",
            Self::Ledger(_) => "ledger_error",
            Self::Store(_) => "store_error",
            Self::Core(CoreError::InvalidAddress { .. }) => "invalid_address",
            Self::Core(CoreError::InvalidAmount(_)) => "invalid_amount",
            Self::Core(_) => "invalid_input",
            Self::Crypto(_) => "crypto_error",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Disabled rails are an expected outcome; callers may skip alerting.
    pub fn is_disabled(&self) -> bool {
        matches!(self, Self::SettlementDisabled(_))
    }
}
