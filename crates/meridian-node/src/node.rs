//! The Meridian node orchestrator.
//!
//! Ties together the claim store, peer transport, channel adapters and the
//! settlement router, and serves them over the HTTP API.

use anyhow::Result;
use meridian_core::ChainKind;
use meridian_crypto::KeyPair;
use meridian_settlement::{
    AptosChannelAdapter, ChainChannelAdapter, ChainClient, ClaimReceiver, ClaimStore, ClaimTransport,
    EvmChannelAdapter, InMemoryChain, InMemoryLedger, SettlementRouter, StaticPeerDirectory, Telemetry,
    TracingSink, XrpChannelAdapter,
};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use zeroize::Zeroizing;

use crate::config::MeridianConfig;
use crate::state::NodeState;
use crate::storage::RocksClaimStore;
use crate::transport::register_endpoints;

/// A running Meridian connector node.
pub struct MeridianNode {
    config: MeridianConfig,
    /// Ed25519 key owning this node's account on every rail.
    keypair: Arc<KeyPair>,
    /// Shared state, set by `start`.
    node_state: Option<Arc<NodeState>>,
    api_task: Option<JoinHandle<()>>,
}

impl MeridianNode {
    /// Create a node, loading or generating its signing key.
    pub fn new(config: MeridianConfig) -> Result<Self> {
        let keypair = if let Some(ref path) = config.identity.seed_path {
            Self::load_or_generate_keypair(path)?
        } else {
            tracing::info!("generating ephemeral signing key");
            KeyPair::generate()
        };

        tracing::info!(
            node_id = %config.node.node_id,
            public_key = %keypair.public_key().to_hex(),
            "Meridian node created"
        );

        Ok(Self {
            config,
            keypair: Arc::new(keypair),
            node_state: None,
            api_task: None,
        })
    }

    /// Open storage, build the settlement stack and start the HTTP API.
    pub async fn start(&mut self) -> Result<()> {
        tracing::info!("starting Meridian node");
        let node_id = self.config.node.node_id.clone();
        let settlement = self.config.settlement.clone();

        let store: Arc<dyn ClaimStore> = Arc::new(RocksClaimStore::open(&self.config.claims_db_path())?);
        let telemetry = Telemetry::disabled().with_sink(Arc::new(TracingSink));

        let directory = Arc::new(StaticPeerDirectory::new());
        register_endpoints(&directory, &node_id, &self.config.endpoints)?;

        let transport = Arc::new(ClaimTransport::new(
            node_id.clone(),
            store.clone(),
            telemetry.clone(),
            &settlement,
        ));
        let mut router = SettlementRouter::new(
            settlement.clone(),
            directory.clone(),
            transport,
            Arc::new(InMemoryLedger::new()),
        );

        for chain in ChainKind::ALL {
            let chain_config = self.config.chains.get(chain);
            if !chain_config.enabled {
                tracing::info!(chain = %chain, "chain client disabled");
                continue;
            }
            let adapter = self.build_adapter(chain, chain_config.local_funding)?;
            if settlement.auto_refresh {
                adapter.start_auto_refresh(Duration::from_secs(settlement.refresh_interval_secs.max(1)));
            }
            router.register_adapter(adapter);
        }

        for peer in &self.config.peers {
            router.add_peer(peer.clone());
        }

        let receiver = Arc::new(ClaimReceiver::new(store, telemetry, &settlement));
        let node_state = Arc::new(NodeState::new(node_id, Arc::new(router), receiver, directory));
        self.node_state = Some(node_state.clone());

        let api_addr: SocketAddr = format!("{}:{}", self.config.api.listen_addr, self.config.api.port).parse()?;
        self.api_task = Some(tokio::spawn(async move {
            if let Err(e) = crate::api::start_api_server(api_addr, node_state).await {
                tracing::error!(error = %e, "API server error");
            }
        }));

        tracing::info!(
            peers = self.config.peers.len(),
            endpoints = self.config.endpoints.len(),
            "Meridian node started"
        );
        Ok(())
    }

    /// Adapter for `chain` over the local devnet, with this node's account
    /// funded with `funding`.
    fn build_adapter(&self, chain: ChainKind, funding: u128) -> Result<Arc<dyn ChainChannelAdapter>> {
        let address = self.keypair.public_key().address_for(chain);
        let client: Arc<dyn ChainClient> = Arc::new(InMemoryChain::new(chain, &address, funding)?);
        let keypair = self.keypair.clone();
        let settlement = &self.config.settlement;

        let adapter: Arc<dyn ChainChannelAdapter> = match chain {
            ChainKind::Evm => Arc::new(EvmChannelAdapter::new(client, keypair, settlement)?),
            ChainKind::Xrp => Arc::new(XrpChannelAdapter::new(client, keypair, settlement)?),
            ChainKind::Aptos => Arc::new(AptosChannelAdapter::new(client, keypair, settlement)?),
        };
        tracing::info!(chain = %chain, address = %address, "local devnet client ready");
        Ok(adapter)
    }

    /// Run until the API server exits.
    pub async fn run(&mut self) -> Result<()> {
        match self.api_task.as_mut() {
            Some(task) => {
                task.await?;
                anyhow::bail!("API server exited")
            }
            None => anyhow::bail!("node not started"),
        }
    }

    /// Stop background tasks.
    pub async fn shutdown(&mut self) -> Result<()> {
        tracing::info!("shutting down Meridian node");
        if let Some(state) = self.node_state.take() {
            for adapter in state.router.adapters() {
                adapter.stop_auto_refresh().await;
            }
        }
        if let Some(task) = self.api_task.take() {
            task.abort();
        }
        Ok(())
    }

    pub fn state(&self) -> Option<Arc<NodeState>> {
        self.node_state.clone()
    }

    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key().to_hex()
    }

    /// Load a hex seed from `path`, or generate one and save it there.
    fn load_or_generate_keypair(path: &Path) -> Result<KeyPair> {
        if path.exists() {
            let seed_hex = Zeroizing::new(std::fs::read_to_string(path)?);
            let keypair = KeyPair::from_hex(&seed_hex)
                .map_err(|e| anyhow::anyhow!("failed to decode signing seed: {}", e))?;
            tracing::info!(path = %path.display(), "loaded signing key from disk");
            Ok(keypair)
        } else {
            let keypair = KeyPair::generate();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let seed_hex = Zeroizing::new(hex::encode(Zeroizing::new(keypair.secret_bytes()).as_slice()));
            std::fs::write(path, seed_hex.as_bytes())?;
            tracing::info!(path = %path.display(), "generated and saved new signing key");
            Ok(keypair)
        }
    }
}
