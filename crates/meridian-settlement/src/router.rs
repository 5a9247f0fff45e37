//! Settlement orchestration.
//!
//! The router maps a `(peer, token, balance)` settlement trigger onto exactly
//! one rail, drives that rail's channel adapter, delivers the signed claim to
//! the peer and only then records the settlement in the ledger.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use meridian_core::address::normalize_address;
use meridian_core::{
    ChainKind, Channel, CoreError, PeerSettlementConfig, SettlementConfig, SettlementPreference,
    SettlementRequiredEvent,
};
use tokio::sync::Mutex;

use crate::error::SettlementError;
use crate::ledger::SettlementLedger;
use crate::peer::{PeerDirectory, PeerHandle};
use crate::traits::{ChainChannelAdapter, OpenChannelRequest};
use crate::transport::ClaimTransport;
use crate::types::SettlementReceipt;

/// Native token of the Aptos rail.
pub const APTOS_TOKEN: &str = "APT";
/// Native token of the XRP Ledger rail.
pub const XRP_TOKEN: &str = "XRP";

/// Rail for a token under a peer's preference. `APT` and `XRP` settle on
/// their native rails, every other token on EVM. There is no fallback.
pub fn select_rail(preference: SettlementPreference, token_id: &str) -> Option<ChainKind> {
    let chain = match token_id {
        APTOS_TOKEN => ChainKind::Aptos,
        XRP_TOKEN => ChainKind::Xrp,
        _ => ChainKind::Evm,
    };
    preference.allows(chain).then_some(chain)
}

/// Destination material a rail needs from the peer config.
struct Destination {
    address: String,
    public_key: Option<String>,
}

fn required<'a>(peer: &'a PeerSettlementConfig, value: &'a Option<String>, field: &'static str) -> Result<&'a str, SettlementError> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| SettlementError::MissingPeerField {
            peer_id: peer.peer_id.clone(),
            field,
        })
}

fn destination_for(peer: &PeerSettlementConfig, chain: ChainKind) -> Result<Destination, SettlementError> {
    let (address, public_key) = match chain {
        ChainKind::Evm => (required(peer, &peer.evm_address, "evmAddress")?, None),
        ChainKind::Xrp => (required(peer, &peer.xrp_address, "xrpAddress")?, None),
        ChainKind::Aptos => (
            required(peer, &peer.aptos_address, "aptosAddress")?,
            Some(required(peer, &peer.aptos_public_key, "aptosPublicKey")?.to_string()),
        ),
    };
    Ok(Destination {
        address: normalize_address(chain, address)?,
        public_key,
    })
}

/// Top-level settlement orchestrator.
pub struct SettlementRouter {
    peers: DashMap<String, PeerSettlementConfig>,
    adapters: HashMap<ChainKind, Arc<dyn ChainChannelAdapter>>,
    rails_enabled: DashMap<ChainKind, bool>,
    peer_locks: DashMap<String, Arc<Mutex<()>>>,
    directory: Arc<dyn PeerDirectory>,
    transport: Arc<ClaimTransport>,
    ledger: Arc<dyn SettlementLedger>,
    config: SettlementConfig,
}

impl SettlementRouter {
    pub fn new(
        config: SettlementConfig,
        directory: Arc<dyn PeerDirectory>,
        transport: Arc<ClaimTransport>,
        ledger: Arc<dyn SettlementLedger>,
    ) -> Self {
        let rails_enabled = DashMap::new();
        for chain in ChainKind::ALL {
            rails_enabled.insert(chain, config.rail_enabled(chain));
        }
        Self {
            peers: DashMap::new(),
            adapters: HashMap::new(),
            rails_enabled,
            peer_locks: DashMap::new(),
            directory,
            transport,
            ledger,
            config,
        }
    }

    /// Register the adapter for its rail, replacing any previous one.
    pub fn register_adapter(&mut self, adapter: Arc<dyn ChainChannelAdapter>) {
        let chain = adapter.chain();
        tracing::info!(chain = %chain, owner = %adapter.owner_address(), "Registering channel adapter");
        self.adapters.insert(chain, adapter);
    }

    pub fn adapter(&self, chain: ChainKind) -> Result<Arc<dyn ChainChannelAdapter>, SettlementError> {
        self.adapters
            .get(&chain)
            .cloned()
            .ok_or(SettlementError::AdapterNotFound(chain))
    }

    pub fn adapters(&self) -> Vec<Arc<dyn ChainChannelAdapter>> {
        let mut adapters: Vec<_> = self.adapters.values().cloned().collect();
        adapters.sort_by_key(|a| a.chain());
        adapters
    }

    pub fn config(&self) -> &SettlementConfig {
        &self.config
    }

    // -- peer configuration ------------------------------------------------

    /// Add or replace a peer's settlement config.
    pub fn add_peer(&self, config: PeerSettlementConfig) {
        tracing::info!(
            peer_id = %config.peer_id,
            preference = %config.settlement_preference,
            "Peer settlement config set"
        );
        self.peers.insert(config.peer_id.clone(), config);
    }

    pub fn remove_peer(&self, peer_id: &str) -> Option<PeerSettlementConfig> {
        let removed = self.peers.remove(peer_id).map(|(_, c)| c);
        if removed.is_some() {
            tracing::info!(peer_id = %peer_id, "Peer settlement config removed");
        }
        removed
    }

    pub fn get_peer(&self, peer_id: &str) -> Option<PeerSettlementConfig> {
        self.peers.get(peer_id).map(|c| c.value().clone())
    }

    /// All peer configs, ordered by peer id.
    pub fn list_peers(&self) -> Vec<PeerSettlementConfig> {
        let mut peers: Vec<_> = self.peers.iter().map(|e| e.value().clone()).collect();
        peers.sort_by(|a, b| a.peer_id.cmp(&b.peer_id));
        peers
    }

    // -- rail switches -----------------------------------------------------

    pub fn set_rail_enabled(&self, chain: ChainKind, enabled: bool) {
        tracing::info!(chain = %chain, enabled, "Settlement rail switch changed");
        self.rails_enabled.insert(chain, enabled);
    }

    pub fn is_rail_enabled(&self, chain: ChainKind) -> bool {
        self.rails_enabled.get(&chain).map(|e| *e).unwrap_or(false)
    }

    // -- settlement --------------------------------------------------------

    /// Run one settlement attempt. Failures are logged with full context and
    /// returned; the ledger is untouched unless the peer received the claim.
    pub async fn handle_settlement_required(
        &self,
        event: &SettlementRequiredEvent,
    ) -> Result<SettlementReceipt, SettlementError> {
        match self.settle(event).await {
            Ok(receipt) => Ok(receipt),
            Err(e) => {
                if e.is_disabled() {
                    tracing::info!(
                        peer_id = %event.peer_id,
                        token_id = %event.token_id,
                        balance = %event.balance,
                        error = %e,
                        "Settlement skipped"
                    );
                } else {
                    tracing::error!(
                        peer_id = %event.peer_id,
                        token_id = %event.token_id,
                        balance = %event.balance,
                        kind = e.kind(),
                        error = %e,
                        "Settlement failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn settle(&self, event: &SettlementRequiredEvent) -> Result<SettlementReceipt, SettlementError> {
        let peer = self
            .get_peer(&event.peer_id)
            .ok_or_else(|| SettlementError::UnknownPeer(event.peer_id.clone()))?;
        if event.balance == 0 {
            return Err(CoreError::InvalidAmount("settlement balance must be positive".into()).into());
        }

        let incompatible = || SettlementError::IncompatibleSettlement {
            peer_id: peer.peer_id.clone(),
            token_id: event.token_id.clone(),
            preference: peer.settlement_preference,
        };
        if !peer.accepts_token(&event.token_id) {
            return Err(incompatible());
        }
        let chain = select_rail(peer.settlement_preference, &event.token_id).ok_or_else(incompatible)?;
        if !self.is_rail_enabled(chain) {
            return Err(SettlementError::SettlementDisabled(chain));
        }
        let adapter = self.adapter(chain)?;
        let destination = destination_for(&peer, chain)?;

        let lock = self.peer_lock(&peer.peer_id);
        let _guard = lock.lock().await;

        // Checked before touching the chain: an unreachable peer must not
        // cause a channel open or deposit.
        let handle = self.peer_handle(&peer.peer_id)?;

        let channel = self
            .ensure_channel(adapter.as_ref(), &destination, event.balance)
            .await?;
        let claim = adapter.sign_claim(&channel.channel_id, event.balance).await?;

        let outcome = self.transport.send(&peer.peer_id, handle.as_ref(), &claim).await;
        if !outcome.success {
            return Err(SettlementError::TransportFailed {
                peer_id: peer.peer_id.clone(),
                reason: outcome.error.unwrap_or_else(|| "delivery failed".into()),
            });
        }

        adapter.acknowledge_claim(&claim).await;
        self.ledger
            .record_settlement(&peer.peer_id, &event.token_id, event.balance)
            .await?;

        tracing::info!(
            peer_id = %peer.peer_id,
            token_id = %event.token_id,
            chain = %chain,
            channel_id = %channel.channel_id,
            amount = %event.balance,
            message_id = %outcome.message_id,
            "Settlement completed"
        );
        Ok(SettlementReceipt {
            peer_id: peer.peer_id,
            token_id: event.token_id.clone(),
            chain,
            channel_id: channel.channel_id,
            amount: event.balance,
            message_id: outcome.message_id,
            claim,
            settled_at: Utc::now(),
        })
    }

    fn peer_handle(&self, peer_id: &str) -> Result<Arc<dyn PeerHandle>, SettlementError> {
        let handle = self
            .directory
            .client_for_peer(peer_id)
            .ok_or_else(|| SettlementError::PeerNotConnected(peer_id.to_string()))?;
        if !handle.is_active() {
            return Err(SettlementError::PeerConnectionInactive(peer_id.to_string()));
        }
        Ok(handle)
    }

    /// Reuse the open channel to `destination` or open one funded with
    /// `balance`, then top it up when it cannot cover the acknowledged
    /// cumulative amount plus `balance`. A reopened channel that continues a
    /// finalized one's claim sequence may need that top-up straight away.
    async fn ensure_channel(
        &self,
        adapter: &dyn ChainChannelAdapter,
        destination: &Destination,
        balance: u128,
    ) -> Result<Channel, SettlementError> {
        let existing = adapter
            .cached_channels()
            .into_iter()
            .find(|c| c.status() == meridian_core::ChannelStatus::Open && c.destination == destination.address);

        let channel = match existing {
            Some(channel) => channel,
            None => {
                let channel_id = adapter
                    .open_channel(OpenChannelRequest {
                        destination: destination.address.clone(),
                        destination_public_key: destination.public_key.clone(),
                        amount: balance,
                        settle_delay_secs: Some(self.config.default_settle_delay_secs),
                    })
                    .await?;
                adapter
                    .cached_channels()
                    .into_iter()
                    .find(|c| c.channel_id == channel_id)
                    .ok_or(SettlementError::ChannelNotFound(channel_id))?
            }
        };

        let needed = adapter
            .acknowledged_amount(&channel.channel_id)
            .await
            .saturating_add(balance);
        if channel.deposited < needed {
            let shortfall = needed - channel.deposited;
            tracing::info!(
                chain = %adapter.chain(),
                channel_id = %channel.channel_id,
                shortfall = %shortfall,
                "Topping up channel"
            );
            adapter.deposit(&channel.channel_id, shortfall).await?;
        }
        Ok(channel)
    }

    /// Open a channel to a configured peer on `chain`, outside of any
    /// settlement trigger. The destination comes from the peer's config.
    pub async fn open_channel_for_peer(
        &self,
        peer_id: &str,
        chain: ChainKind,
        amount: u128,
        settle_delay_secs: Option<u64>,
    ) -> Result<Channel, SettlementError> {
        let peer = self
            .get_peer(peer_id)
            .ok_or_else(|| SettlementError::UnknownPeer(peer_id.to_string()))?;
        if !self.is_rail_enabled(chain) {
            return Err(SettlementError::SettlementDisabled(chain));
        }
        let adapter = self.adapter(chain)?;
        let destination = destination_for(&peer, chain)?;

        let lock = self.peer_lock(peer_id);
        let _guard = lock.lock().await;
        let channel_id = adapter
            .open_channel(OpenChannelRequest {
                destination: destination.address,
                destination_public_key: destination.public_key,
                amount,
                settle_delay_secs: settle_delay_secs.or(Some(self.config.default_settle_delay_secs)),
            })
            .await?;
        adapter
            .get_channel_state(&channel_id)
            .await?
            .ok_or(SettlementError::ChannelNotFound(channel_id))
    }

    fn peer_lock(&self, peer_id: &str) -> Arc<Mutex<()>> {
        self.peer_locks
            .entry(peer_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
