//! Shared fixtures for the cross-crate settlement scenarios.
//!
//! Alice is the local node settling to Bob. Every rail runs on its own
//! in-memory chain funded for Alice; Bob's side is a [`ClaimReceiver`] that
//! claims are delivered to in-process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use meridian_core::{ChainKind, PeerSettlementConfig, SettlementConfig, SettlementPreference};
use meridian_crypto::KeyPair;
use meridian_settlement::{
    AptosChannelAdapter, BroadcastSink, ChainChannelAdapter, ClaimReceiver, ClaimTransport, EvmChannelAdapter,
    InMemoryChain, LedgerError, MemoryClaimStore, PeerHandle, ReceiveOutcome, SettlementLedger, SettlementRouter,
    StaticPeerDirectory, Telemetry, TransportError, XrpChannelAdapter,
};

pub const ALICE_NODE_ID: &str = "node-alice";
pub const BOB_PEER_ID: &str = "peer-bob";
pub const ALICE_SEED: [u8; 32] = [1u8; 32];
pub const BOB_SEED: [u8; 32] = [2u8; 32];
pub const ALICE_FUNDING: u128 = 1_000_000_000_000;

pub fn alice_keypair() -> KeyPair {
    KeyPair::from_seed(&ALICE_SEED)
}

pub fn bob_keypair() -> KeyPair {
    KeyPair::from_seed(&BOB_SEED)
}

/// Bob's settlement config with destination material for every rail.
pub fn bob_config(preference: SettlementPreference) -> PeerSettlementConfig {
    let bob = bob_keypair().public_key();
    PeerSettlementConfig::new(BOB_PEER_ID, preference)
        .with_evm_address(bob.evm_address())
        .with_xrp_address(bob.xrp_address())
        .with_aptos(bob.aptos_address(), bob.to_aptos_hex())
}

/// Delivers protocol data straight into a receiver, as `sender_id`. A claim
/// the receiver does not verify fails the send, as over HTTP.
pub struct LoopbackHandle {
    peer_id: String,
    sender_id: String,
    receiver: Arc<ClaimReceiver>,
    active: AtomicBool,
    deliveries: Mutex<Vec<ReceiveOutcome>>,
}

impl LoopbackHandle {
    pub fn new(peer_id: &str, sender_id: &str, receiver: Arc<ClaimReceiver>) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            sender_id: sender_id.to_string(),
            receiver,
            active: AtomicBool::new(true),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn set_active(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }

    /// Receiver outcomes of every delivery, in order.
    pub fn deliveries(&self) -> Vec<ReceiveOutcome> {
        self.deliveries.lock().map(|d| d.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl PeerHandle for LoopbackHandle {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }

    async fn send_protocol_data(&self, protocol_name: &str, content_type: u8, data: Vec<u8>) -> Result<(), TransportError> {
        let outcome = self
            .receiver
            .handle_protocol_data(&self.sender_id, protocol_name, content_type, &data)
            .ok_or_else(|| TransportError::Rejected(format!("unsupported protocol {}", protocol_name)))?;
        let verdict = if outcome.verified {
            Ok(())
        } else {
            Err(TransportError::Rejected(
                outcome.error.clone().unwrap_or_else(|| "claim not verified".to_string()),
            ))
        };
        if let Ok(mut deliveries) = self.deliveries.lock() {
            deliveries.push(outcome);
        }
        verdict
    }
}

/// Connected handle whose every send fails.
pub struct FailingHandle {
    peer_id: String,
    attempts: AtomicU32,
}

impl FailingHandle {
    pub fn new(peer_id: &str) -> Self {
        Self {
            peer_id: peer_id.to_string(),
            attempts: AtomicU32::new(0),
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PeerHandle for FailingHandle {
    fn peer_id(&self) -> &str {
        &self.peer_id
    }

    fn is_active(&self) -> bool {
        true
    }

    async fn send_protocol_data(&self, _: &str, _: u8, _: Vec<u8>) -> Result<(), TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(TransportError::Unreachable("connection refused".into()))
    }
}

/// Ledger that records every settlement call.
#[derive(Default)]
pub struct RecordingLedger {
    calls: Mutex<Vec<(String, String, u128)>>,
}

impl RecordingLedger {
    pub fn calls(&self) -> Vec<(String, String, u128)> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl SettlementLedger for RecordingLedger {
    async fn record_settlement(&self, peer_id: &str, token_id: &str, amount: u128) -> Result<(), LedgerError> {
        self.calls
            .lock()
            .map_err(|_| LedgerError::Unavailable("ledger lock poisoned".into()))?
            .push((peer_id.to_string(), token_id.to_string(), amount));
        Ok(())
    }
}

/// Alice's settlement stack plus Bob's receiving side.
pub struct Harness {
    pub router: Arc<SettlementRouter>,
    pub directory: Arc<StaticPeerDirectory>,
    pub alice_store: Arc<MemoryClaimStore>,
    pub ledger: Arc<RecordingLedger>,
    pub events: Arc<BroadcastSink>,
    pub chains: HashMap<ChainKind, InMemoryChain>,
    pub bob_store: Arc<MemoryClaimStore>,
    pub bob_receiver: Arc<ClaimReceiver>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(SettlementConfig::default())
    }

    pub fn with_config(config: SettlementConfig) -> Self {
        let alice_store = Arc::new(MemoryClaimStore::new());
        let events = Arc::new(BroadcastSink::new(64));
        let telemetry = Telemetry::disabled().with_sink(events.clone());
        let directory = Arc::new(StaticPeerDirectory::new());
        let ledger = Arc::new(RecordingLedger::default());
        let transport = Arc::new(ClaimTransport::new(
            ALICE_NODE_ID,
            alice_store.clone(),
            telemetry,
            &config,
        ));
        let mut router = SettlementRouter::new(config.clone(), directory.clone(), transport, ledger.clone());

        let alice = Arc::new(alice_keypair());
        let mut chains = HashMap::new();
        for chain_kind in ChainKind::ALL {
            let address = alice.public_key().address_for(chain_kind);
            let chain = InMemoryChain::new(chain_kind, &address, ALICE_FUNDING).expect("valid address");
            let client = Arc::new(chain.clone());
            let adapter: Arc<dyn ChainChannelAdapter> = match chain_kind {
                ChainKind::Evm => Arc::new(EvmChannelAdapter::new(client, alice.clone(), &config).expect("adapter")),
                ChainKind::Xrp => Arc::new(XrpChannelAdapter::new(client, alice.clone(), &config).expect("adapter")),
                ChainKind::Aptos => {
                    Arc::new(AptosChannelAdapter::new(client, alice.clone(), &config).expect("adapter"))
                }
            };
            router.register_adapter(adapter);
            chains.insert(chain_kind, chain);
        }

        let bob_store = Arc::new(MemoryClaimStore::new());
        let bob_receiver = Arc::new(ClaimReceiver::new(bob_store.clone(), Telemetry::disabled(), &config));

        Self {
            router: Arc::new(router),
            directory,
            alice_store,
            ledger,
            events,
            chains,
            bob_store,
            bob_receiver,
        }
    }

    /// Connect Bob through a loopback into his receiver.
    pub fn connect_bob(&self) -> Arc<LoopbackHandle> {
        let handle = Arc::new(LoopbackHandle::new(BOB_PEER_ID, ALICE_NODE_ID, self.bob_receiver.clone()));
        self.directory.register(handle.clone());
        handle
    }

    /// Connect another peer through a loopback into its own receiver.
    pub fn connect_peer(&self, peer_id: &str, receiver: Arc<ClaimReceiver>) -> Arc<LoopbackHandle> {
        let handle = Arc::new(LoopbackHandle::new(peer_id, ALICE_NODE_ID, receiver));
        self.directory.register(handle.clone());
        handle
    }

    /// Connect Bob through a handle that never delivers.
    pub fn connect_bob_failing(&self) -> Arc<FailingHandle> {
        let handle = Arc::new(FailingHandle::new(BOB_PEER_ID));
        self.directory.register(handle.clone());
        handle
    }

    pub fn chain(&self, chain: ChainKind) -> &InMemoryChain {
        &self.chains[&chain]
    }

    /// Transactions submitted across every rail.
    pub fn total_transactions(&self) -> u64 {
        self.chains.values().map(|c| c.transaction_count()).sum()
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}
