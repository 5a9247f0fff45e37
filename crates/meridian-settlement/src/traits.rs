use std::time::Duration;

use async_trait::async_trait;
use meridian_core::{ChainKind, Channel, Claim};

use crate::error::SettlementError;

/// Parameters for opening a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenChannelRequest {
    /// Receiving account on the adapter's rail.
    pub destination: String,
    /// Destination public key, required on rails that need one.
    pub destination_public_key: Option<String>,
    /// Initial deposit in base units.
    pub amount: u128,
    /// Overrides the configured default settle delay.
    pub settle_delay_secs: Option<u64>,
}

/// Payment channel lifecycle and claim handling for one rail.
///
/// Each implementation owns a local cache of the channels it opened. The
/// cache is advisory: on-chain state is authoritative and every
/// state-changing call refreshes the cached entry.
#[async_trait]
pub trait ChainChannelAdapter: Send + Sync {
    /// Rail this adapter drives.
    fn chain(&self) -> ChainKind;

    /// Normalized address of the channel owner (the local account).
    fn owner_address(&self) -> String;

    /// Open a channel and return its id.
    async fn open_channel(&self, request: OpenChannelRequest) -> Result<String, SettlementError>;

    /// Add funds to an open channel.
    async fn deposit(&self, channel_id: &str, amount: u128) -> Result<(), SettlementError>;

    /// Sign a claim adding `amount` to the channel's acknowledged cumulative
    /// amount, with a nonce one past the highest issued.
    async fn sign_claim(&self, channel_id: &str, amount: u128) -> Result<Claim, SettlementError>;

    /// Pure signature check of a claim on this rail.
    fn verify_claim(&self, claim: &Claim) -> bool;

    /// Redeem a claim on-chain as the channel destination.
    async fn submit_claim(&self, claim: &Claim) -> Result<(), SettlementError>;

    /// Start the settle delay. The cached channel moves to `closing`
    /// immediately.
    async fn request_close(&self, channel_id: &str) -> Result<(), SettlementError>;

    /// Finalize a close whose settle delay elapsed and evict the channel.
    async fn finalize_close(&self, channel_id: &str) -> Result<(), SettlementError>;

    /// Current on-chain state; `None` when the channel does not exist.
    async fn get_channel_state(&self, channel_id: &str) -> Result<Option<Channel>, SettlementError>;

    /// Contents of the local channel cache.
    fn cached_channels(&self) -> Vec<Channel>;

    /// Native balance of `address` on this rail, or of the owner account.
    async fn balance(&self, address: Option<&str>) -> Result<u128, SettlementError>;

    /// Cumulative amount the peer has acknowledged on `channel_id`.
    async fn acknowledged_amount(&self, channel_id: &str) -> u128;

    /// Mark `claim` as delivered.
    async fn acknowledge_claim(&self, claim: &Claim);

    /// Start refreshing every cached channel every `interval`. A second call
    /// while running is a no-op.
    fn start_auto_refresh(&self, interval: Duration);

    /// Stop the refresh task and wait for it to exit.
    async fn stop_auto_refresh(&self);
}
