//! Payment channel adapters.
//!
//! One [`ChannelAdapter`] drives the `payment_channel` module of one rail
//! through a [`ChainClient`]. The rail-specific parts (how a channel id is
//! assigned, whether the destination key is needed) live in the [`Rail`]
//! implementations in `aptos`, `evm` and `xrp`.

pub mod aptos;
pub mod cache;
pub mod evm;
pub mod refresh;
pub mod xrp;

use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use meridian_core::address::{normalize_address, normalize_channel_id};
use meridian_core::{ChainKind, Channel, Claim, CoreError, SettlementConfig};
use meridian_crypto::KeyPair;
use serde_json::{json, Value};

use crate::chain::{functions, ChainClient, ChainError, TransactionPayload, TransactionResult};
use crate::error::SettlementError;
use crate::signer::ClaimSigner;
use crate::traits::{ChainChannelAdapter, OpenChannelRequest};

pub use aptos::{AptosChannelAdapter, AptosRail};
pub use cache::ChannelCache;
pub use evm::{EvmChannelAdapter, EvmRail};
pub use refresh::RefreshTask;
pub use xrp::{XrpChannelAdapter, XrpRail};

/// Rail-specific channel rules.
pub trait Rail: Send + Sync + 'static {
    const CHAIN: ChainKind;
    /// Opening a channel needs the destination's public key.
    const REQUIRES_DESTINATION_KEY: bool;
    /// The owner account holds at most one live channel, so a channel id
    /// recurs when the owner reopens after finalizing.
    const SINGLE_CHANNEL_PER_OWNER: bool;

    /// Id of the channel created by a successful open transaction.
    fn channel_id_from_open(owner: &str, result: &TransactionResult) -> String;
}

/// State shared between an adapter and its refresh task.
struct AdapterInner {
    chain: ChainKind,
    owner: String,
    client: Arc<dyn ChainClient>,
    signer: ClaimSigner,
    cache: ChannelCache,
    /// Destinations of finalized channels whose id can be reopened.
    retired: DashMap<String, String>,
    default_settle_delay_secs: u64,
}

impl AdapterInner {
    fn channel_id(&self, channel_id: &str) -> Result<String, SettlementError> {
        Ok(normalize_channel_id(self.chain, channel_id)?)
    }

    async fn submit(&self, function: &str, args: Vec<Value>) -> Result<TransactionResult, SettlementError> {
        let result = self
            .client
            .submit_transaction(TransactionPayload::new(function, args))
            .await?
            .into_success()?;
        Ok(result)
    }

    async fn fetch(&self, channel_id: &str) -> Result<Option<Channel>, ChainError> {
        match self.client.view(functions::GET_CHANNEL, vec![json!(channel_id)]).await {
            Ok(values) => {
                let value = values
                    .into_iter()
                    .next()
                    .ok_or_else(|| ChainError::InvalidResponse("get_channel returned nothing".into()))?;
                serde_json::from_value(value)
                    .map(Some)
                    .map_err(|e| ChainError::InvalidResponse(e.to_string()))
            }
            Err(ChainError::ResourceNotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Re-read one channel and reconcile the cache and the signer with it.
    /// Only channels owned by the local account are cached.
    async fn refresh_channel(&self, channel_id: &str) -> Result<Option<Channel>, ChainError> {
        let channel = self.fetch(channel_id).await?;
        match &channel {
            Some(ch) if ch.owner == self.owner => {
                self.signer.observe_onchain(channel_id, ch.nonce, ch.claimed).await;
                self.cache.insert(ch.clone());
            }
            Some(_) => {}
            None => {
                if self.cache.remove(channel_id).is_some() {
                    tracing::info!(chain = %self.chain, channel_id = %channel_id, "Evicted channel no longer on-chain");
                }
            }
        }
        Ok(channel)
    }

    /// Refresh after a successful state change; a failed read keeps the
    /// cache entry as patched by `fallback`.
    async fn refresh_after_write(&self, channel_id: &str, fallback: impl FnOnce(&ChannelCache)) {
        if let Err(e) = self.refresh_channel(channel_id).await {
            tracing::warn!(chain = %self.chain, channel_id = %channel_id, error = %e, "Channel refresh failed");
            fallback(&self.cache);
        }
    }

    async fn refresh_all(&self) {
        let ids = self.cache.ids();
        tracing::debug!(chain = %self.chain, channels = ids.len(), "Refreshing cached channels");
        for id in ids {
            if let Err(e) = self.refresh_channel(&id).await {
                tracing::warn!(chain = %self.chain, channel_id = %id, error = %e, "Channel refresh failed");
            }
        }
    }
}

/// [`ChainChannelAdapter`] for the rail `R`.
pub struct ChannelAdapter<R: Rail> {
    inner: Arc<AdapterInner>,
    refresh: RefreshTask,
    _rail: PhantomData<fn() -> R>,
}

impl<R: Rail> ChannelAdapter<R> {
    /// Create an adapter submitting from `client`'s account, which must be
    /// the account controlled by `keypair`.
    pub fn new(
        client: Arc<dyn ChainClient>,
        keypair: Arc<KeyPair>,
        config: &SettlementConfig,
    ) -> Result<Self, SettlementError> {
        if client.chain() != R::CHAIN {
            return Err(SettlementError::Internal(format!(
                "{} client given to {} adapter",
                client.chain(),
                R::CHAIN
            )));
        }
        let owner = normalize_address(R::CHAIN, &client.address())?;
        let key_address = keypair.public_key().address_for(R::CHAIN);
        if key_address != owner {
            return Err(CoreError::ValidationError(format!(
                "signing key controls {} but client submits from {}",
                key_address, owner
            ))
            .into());
        }

        Ok(Self {
            inner: Arc::new(AdapterInner {
                chain: R::CHAIN,
                owner,
                client,
                signer: ClaimSigner::new(R::CHAIN, keypair),
                cache: ChannelCache::new(),
                retired: DashMap::new(),
                default_settle_delay_secs: config.default_settle_delay_secs,
            }),
            refresh: RefreshTask::new(R::CHAIN.as_str()),
            _rail: PhantomData,
        })
    }

    /// Whether the auto-refresh task is running.
    pub fn is_refreshing(&self) -> bool {
        self.refresh.is_running()
    }
}

fn unix_now() -> u64 {
    (Utc::now().timestamp() as u64).max(1)
}

#[async_trait]
impl<R: Rail> ChainChannelAdapter for ChannelAdapter<R> {
    fn chain(&self) -> ChainKind {
        R::CHAIN
    }

    fn owner_address(&self) -> String {
        self.inner.owner.clone()
    }

    async fn open_channel(&self, request: OpenChannelRequest) -> Result<String, SettlementError> {
        let inner = &self.inner;
        let destination = normalize_address(R::CHAIN, &request.destination)?;
        if R::REQUIRES_DESTINATION_KEY && request.destination_public_key.is_none() {
            return Err(CoreError::MissingField("destinationPublicKey".into()).into());
        }
        if request.amount == 0 {
            return Err(CoreError::InvalidAmount("initial deposit must be positive".into()).into());
        }
        let settle_delay_secs = request.settle_delay_secs.unwrap_or(inner.default_settle_delay_secs);

        if R::SINGLE_CHANNEL_PER_OWNER {
            let owner_channel = inner.channel_id(&inner.owner)?;
            if let Some(existing) = inner.refresh_channel(&owner_channel).await? {
                return Err(SettlementError::ChannelAlreadyOpen {
                    chain: R::CHAIN,
                    channel_id: existing.channel_id,
                    destination: existing.destination,
                });
            }
        }

        let result = inner
            .submit(
                functions::OPEN_CHANNEL,
                vec![
                    json!(destination),
                    request.destination_public_key.clone().map_or(Value::Null, Value::String),
                    json!(request.amount.to_string()),
                    json!(settle_delay_secs),
                ],
            )
            .await?;
        let channel_id = inner.channel_id(&R::channel_id_from_open(&inner.owner, &result))?;
        // The chain continues a reopened channel's claim sequence only for
        // the same destination; the counters follow the same rule.
        if let Some((_, previous)) = inner.retired.remove(&channel_id) {
            if previous != destination {
                inner.signer.forget(&channel_id);
            }
        }

        let snapshot = Channel {
            channel_id: channel_id.clone(),
            chain: R::CHAIN,
            owner: inner.owner.clone(),
            destination: destination.clone(),
            destination_public_key: request.destination_public_key,
            deposited: request.amount,
            claimed: 0,
            nonce: 0,
            settle_delay_secs,
            close_requested_at: 0,
            finalized: false,
        };
        inner
            .refresh_after_write(&channel_id, |cache| cache.insert(snapshot))
            .await;

        tracing::info!(
            chain = %R::CHAIN,
            channel_id = %channel_id,
            destination = %destination,
            amount = %request.amount,
            settle_delay_secs,
            "Opened payment channel"
        );
        Ok(channel_id)
    }

    async fn deposit(&self, channel_id: &str, amount: u128) -> Result<(), SettlementError> {
        let inner = &self.inner;
        let channel_id = inner.channel_id(channel_id)?;
        if amount == 0 {
            return Err(CoreError::InvalidAmount("deposit must be positive".into()).into());
        }
        inner
            .submit(functions::DEPOSIT, vec![json!(channel_id), json!(amount.to_string())])
            .await?;
        inner
            .refresh_after_write(&channel_id, |cache| {
                cache.update(&channel_id, |c| c.deposited += amount);
            })
            .await;
        tracing::info!(chain = %R::CHAIN, channel_id = %channel_id, amount = %amount, "Deposited to channel");
        Ok(())
    }

    async fn sign_claim(&self, channel_id: &str, amount: u128) -> Result<Claim, SettlementError> {
        let inner = &self.inner;
        let channel_id = inner.channel_id(channel_id)?;
        let channel = match inner.cache.get(&channel_id) {
            Some(channel) => channel,
            None => inner
                .refresh_channel(&channel_id)
                .await?
                .ok_or_else(|| SettlementError::ChannelNotFound(channel_id.clone()))?,
        };
        if channel.owner != inner.owner {
            return Err(SettlementError::ChannelNotFound(channel_id));
        }

        let cumulative = inner
            .signer
            .acknowledged_amount(&channel_id)
            .await
            .saturating_add(amount);
        if cumulative > channel.deposited {
            return Err(CoreError::InvalidAmount(format!(
                "cumulative claim {} exceeds deposit {}",
                cumulative, channel.deposited
            ))
            .into());
        }
        Ok(inner.signer.sign(&channel_id, amount).await)
    }

    fn verify_claim(&self, claim: &Claim) -> bool {
        claim.chain() == R::CHAIN && meridian_crypto::verify_claim(claim).is_ok()
    }

    async fn submit_claim(&self, claim: &Claim) -> Result<(), SettlementError> {
        let inner = &self.inner;
        if claim.chain() != R::CHAIN {
            return Err(SettlementError::Internal(format!(
                "{} claim submitted to {} adapter",
                claim.chain(),
                R::CHAIN
            )));
        }
        let channel_id = inner.channel_id(claim.channel_id())?;
        let encoded = serde_json::to_value(claim).map_err(CoreError::from)?;
        let result = inner.submit(functions::CLAIM, vec![encoded]).await?;
        inner.refresh_after_write(&channel_id, |_| {}).await;
        tracing::info!(
            chain = %R::CHAIN,
            channel_id = %channel_id,
            amount = %claim.amount(),
            hash = %result.hash,
            "Redeemed claim on-chain"
        );
        Ok(())
    }

    async fn request_close(&self, channel_id: &str) -> Result<(), SettlementError> {
        let inner = &self.inner;
        let channel_id = inner.channel_id(channel_id)?;
        inner
            .submit(functions::REQUEST_CLOSE, vec![json!(channel_id)])
            .await?;
        let now = unix_now();
        if !inner.cache.update(&channel_id, |c| {
            if c.close_requested_at == 0 {
                c.close_requested_at = now;
            }
        }) {
            inner.refresh_after_write(&channel_id, |_| {}).await;
        }
        tracing::info!(chain = %R::CHAIN, channel_id = %channel_id, "Requested channel close");
        Ok(())
    }

    async fn finalize_close(&self, channel_id: &str) -> Result<(), SettlementError> {
        let inner = &self.inner;
        let channel_id = inner.channel_id(channel_id)?;
        inner
            .submit(functions::FINALIZE_CLOSE, vec![json!(channel_id)])
            .await?;
        match inner.cache.remove(&channel_id) {
            Some(channel) if R::SINGLE_CHANNEL_PER_OWNER => {
                inner.retired.insert(channel_id.clone(), channel.destination);
            }
            _ => inner.signer.forget(&channel_id),
        }
        tracing::info!(chain = %R::CHAIN, channel_id = %channel_id, "Finalized channel close");
        Ok(())
    }

    async fn get_channel_state(&self, channel_id: &str) -> Result<Option<Channel>, SettlementError> {
        let channel_id = self.inner.channel_id(channel_id)?;
        Ok(self.inner.refresh_channel(&channel_id).await?)
    }

    fn cached_channels(&self) -> Vec<Channel> {
        self.inner.cache.list()
    }

    async fn balance(&self, address: Option<&str>) -> Result<u128, SettlementError> {
        let address = match address {
            Some(address) => normalize_address(R::CHAIN, address)?,
            None => self.inner.owner.clone(),
        };
        Ok(self.inner.client.balance(&address).await?)
    }

    async fn acknowledged_amount(&self, channel_id: &str) -> u128 {
        match self.inner.channel_id(channel_id) {
            Ok(id) => self.inner.signer.acknowledged_amount(&id).await,
            Err(_) => 0,
        }
    }

    async fn acknowledge_claim(&self, claim: &Claim) {
        self.inner.signer.acknowledge(claim).await;
    }

    fn start_auto_refresh(&self, interval: Duration) {
        let inner = Arc::clone(&self.inner);
        self.refresh.start(interval, move || {
            let inner = Arc::clone(&inner);
            async move { inner.refresh_all().await }
        });
    }

    async fn stop_auto_refresh(&self) {
        self.refresh.stop().await;
    }
}
