//! Integration test: settlement triggers driven through the router.
//!
//! Exercises rail selection, channel open and top-up, claim delivery into the
//! peer's receiver, and the ledger-after-delivery rule across
//! meridian-settlement, meridian-crypto and meridian-core.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use meridian_core::{
    ChainKind, Claim, ClaimMessage, MessageId, PeerSettlementConfig, SettlementConfig, SettlementPreference,
    SettlementRequiredEvent,
};
use meridian_crypto::{sign_aptos_claim, KeyPair};
use meridian_integration_tests::{alice_keypair, bob_config, bob_keypair, Harness, ALICE_NODE_ID, BOB_PEER_ID};
use meridian_settlement::receiver::AMOUNT_NOT_MONOTONIC;
use meridian_settlement::{
    ChainChannelAdapter, ClaimReceiver, ClaimStore, MemoryClaimStore, SettlementError, Telemetry, TelemetryEvent,
};
use tokio::time::Instant;

fn event(token: &str, balance: u128) -> SettlementRequiredEvent {
    SettlementRequiredEvent::new(BOB_PEER_ID, token, balance)
}

// =========================================================================
// Happy path
// =========================================================================

#[tokio::test]
async fn test_xrp_settlement_opens_channel_and_delivers_claim() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Xrp));
    let bob = harness.connect_bob();

    let receipt = harness
        .router
        .handle_settlement_required(&event("XRP", 1_000_000))
        .await
        .expect("settlement should succeed");

    assert_eq!(receipt.chain, ChainKind::Xrp);
    assert_eq!(receipt.amount, 1_000_000);
    assert!(matches!(receipt.claim, Claim::Xrp(_)));

    // One channel on the XRP rail, destined to Bob and funded with the balance.
    let channel = harness
        .chain(ChainKind::Xrp)
        .channel(&receipt.channel_id)
        .expect("channel exists on-chain");
    assert_eq!(channel.destination, bob_keypair().public_key().xrp_address());
    assert_eq!(channel.deposited, 1_000_000);
    assert_eq!(harness.chain(ChainKind::Evm).transaction_count(), 0);
    assert_eq!(harness.chain(ChainKind::Aptos).transaction_count(), 0);

    // Bob verified exactly one claim carrying the balance.
    let deliveries = bob.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert!(deliveries[0].verified, "{:?}", deliveries[0].error);
    let latest = harness
        .bob_receiver
        .get_latest_verified_claim(ALICE_NODE_ID, ChainKind::Xrp, &receipt.channel_id)
        .expect("Bob keeps the claim");
    assert_eq!(latest.amount(), 1_000_000);

    assert_eq!(
        harness.ledger.calls(),
        vec![(BOB_PEER_ID.to_string(), "XRP".to_string(), 1_000_000)]
    );
}

#[tokio::test]
async fn test_repeat_settlement_reuses_channel_and_tops_up() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Xrp));
    let bob = harness.connect_bob();

    let first = harness
        .router
        .handle_settlement_required(&event("XRP", 1_000_000))
        .await
        .unwrap();
    let second = harness
        .router
        .handle_settlement_required(&event("XRP", 500_000))
        .await
        .unwrap();

    assert_eq!(first.channel_id, second.channel_id);
    assert_eq!(second.claim.amount(), 1_500_000);

    let channel = harness.chain(ChainKind::Xrp).channel(&first.channel_id).unwrap();
    assert_eq!(channel.deposited, 1_500_000);

    assert!(bob.deliveries().iter().all(|d| d.verified));
    assert_eq!(harness.ledger.calls().len(), 2);
}

#[tokio::test]
async fn test_evm_claims_advance_nonce() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Evm));
    harness.connect_bob();

    let first = harness
        .router
        .handle_settlement_required(&event("USDC", 100))
        .await
        .unwrap();
    let second = harness
        .router
        .handle_settlement_required(&event("USDC", 100))
        .await
        .unwrap();

    assert_eq!(first.chain, ChainKind::Evm);
    assert_eq!(first.claim.nonce(), Some(1));
    assert_eq!(second.claim.nonce(), Some(2));
    assert_eq!(second.claim.amount(), 200);
}

#[tokio::test]
async fn test_aptos_channel_id_is_owner_address() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Any));
    harness.connect_bob();

    let receipt = harness
        .router
        .handle_settlement_required(&event("APT", 42))
        .await
        .unwrap();

    let adapter = harness.router.adapter(ChainKind::Aptos).unwrap();
    assert_eq!(receipt.chain, ChainKind::Aptos);
    assert_eq!(receipt.channel_id, adapter.owner_address());
    assert!(adapter.verify_claim(&receipt.claim));
}

#[tokio::test]
async fn test_reopened_aptos_channel_settles_again() {
    let harness = Harness::with_config(SettlementConfig {
        default_settle_delay_secs: 0,
        ..SettlementConfig::default()
    });
    harness.router.add_peer(bob_config(SettlementPreference::Any));
    let bob = harness.connect_bob();
    let adapter = harness.router.adapter(ChainKind::Aptos).unwrap();

    let first = harness
        .router
        .handle_settlement_required(&event("APT", 1_000))
        .await
        .unwrap();
    adapter.request_close(&first.channel_id).await.unwrap();
    adapter.finalize_close(&first.channel_id).await.unwrap();

    // Same owner, same channel id: the claim sequence carries on.
    let second = harness
        .router
        .handle_settlement_required(&event("APT", 500))
        .await
        .unwrap();
    assert_eq!(second.channel_id, first.channel_id);
    assert_eq!(second.claim.amount(), 1_500);
    assert_eq!(second.claim.nonce(), Some(2));

    let deliveries = bob.deliveries();
    assert_eq!(deliveries.len(), 2);
    assert!(deliveries.iter().all(|d| d.verified), "{:?}", deliveries);
    assert_eq!(harness.ledger.calls().len(), 2);

    let channel = harness.chain(ChainKind::Aptos).channel(&second.channel_id).unwrap();
    assert_eq!(channel.deposited, 1_500);
    assert!(!channel.finalized);
}

// =========================================================================
// Rejections
// =========================================================================

#[tokio::test]
async fn test_second_aptos_peer_is_told_channel_is_taken() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Aptos));
    harness.connect_bob();

    let carol = KeyPair::from_seed(&[3u8; 32]).public_key();
    harness.router.add_peer(
        PeerSettlementConfig::new("peer-carol", SettlementPreference::Aptos)
            .with_aptos(carol.aptos_address(), carol.to_aptos_hex()),
    );
    let carol_receiver = Arc::new(ClaimReceiver::new(
        Arc::new(MemoryClaimStore::new()),
        Telemetry::disabled(),
        &SettlementConfig::default(),
    ));
    let carol_handle = harness.connect_peer("peer-carol", carol_receiver);

    harness
        .router
        .handle_settlement_required(&event("APT", 100))
        .await
        .unwrap();
    let transactions = harness.total_transactions();

    let err = harness
        .router
        .handle_settlement_required(&SettlementRequiredEvent::new("peer-carol", "APT", 100))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "channel_already_open");
    match err {
        SettlementError::ChannelAlreadyOpen { destination, .. } => {
            assert_eq!(destination, bob_keypair().public_key().aptos_address())
        }
        other => panic!("unexpected {:?}", other),
    }

    assert_eq!(harness.total_transactions(), transactions);
    assert!(carol_handle.deliveries().is_empty());
    assert_eq!(harness.ledger.calls().len(), 1);
}

#[tokio::test]
async fn test_incompatible_token_touches_nothing() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Xrp));
    let bob = harness.connect_bob();

    let err = harness
        .router
        .handle_settlement_required(&event("APT", 1_000_000))
        .await
        .unwrap_err();

    assert!(matches!(err, SettlementError::IncompatibleSettlement { .. }));
    assert_eq!(harness.total_transactions(), 0);
    assert!(bob.deliveries().is_empty());
    assert!(harness.ledger.calls().is_empty());
}

#[tokio::test]
async fn test_routing_is_total() {
    use SettlementPreference::*;
    let cases = [
        (Evm, "APT", None),
        (Evm, "XRP", None),
        (Evm, "USDC", Some(ChainKind::Evm)),
        (Xrp, "APT", None),
        (Xrp, "XRP", Some(ChainKind::Xrp)),
        (Xrp, "USDC", None),
        (Aptos, "APT", Some(ChainKind::Aptos)),
        (Aptos, "XRP", None),
        (Aptos, "USDC", None),
        (Any, "APT", Some(ChainKind::Aptos)),
        (Any, "XRP", Some(ChainKind::Xrp)),
        (Any, "USDC", Some(ChainKind::Evm)),
    ];

    let harness = Harness::new();
    harness.connect_bob();
    for (preference, token, expected) in cases {
        harness.router.add_peer(bob_config(preference));
        let result = harness.router.handle_settlement_required(&event(token, 10)).await;
        match (result, expected) {
            (Ok(receipt), Some(chain)) => assert_eq!(receipt.chain, chain, "{} / {}", preference, token),
            (Err(SettlementError::IncompatibleSettlement { .. }), None) => {}
            (other, expected) => panic!(
                "{} / {}: expected {:?}, got {:?}",
                preference,
                token,
                expected,
                other.map(|r| r.chain)
            ),
        }
    }
}

#[tokio::test]
async fn test_token_allowlist_is_enforced() {
    let harness = Harness::new();
    harness
        .router
        .add_peer(bob_config(SettlementPreference::Evm).with_token("USDC"));
    harness.connect_bob();

    let err = harness
        .router
        .handle_settlement_required(&event("DAI", 10))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), "incompatible_settlement");
    assert!(harness
        .router
        .handle_settlement_required(&event("USDC", 10))
        .await
        .is_ok());
}

#[tokio::test]
async fn test_disabled_rail_is_distinct_and_silent() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Aptos));
    harness.connect_bob();
    harness.router.set_rail_enabled(ChainKind::Aptos, false);

    let err = harness
        .router
        .handle_settlement_required(&event("APT", 10))
        .await
        .unwrap_err();
    assert!(err.is_disabled());
    assert_eq!(harness.total_transactions(), 0);
}

#[tokio::test]
async fn test_missing_aptos_key_is_named() {
    let harness = Harness::new();
    let mut peer = bob_config(SettlementPreference::Aptos);
    peer.aptos_public_key = None;
    harness.router.add_peer(peer);
    harness.connect_bob();

    match harness.router.handle_settlement_required(&event("APT", 10)).await {
        Err(SettlementError::MissingPeerField { field, .. }) => assert_eq!(field, "aptosPublicKey"),
        other => panic!("unexpected {:?}", other.map(|r| r.chain)),
    }
}

#[tokio::test]
async fn test_unconnected_peer_opens_no_channel() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Xrp));

    let err = harness
        .router
        .handle_settlement_required(&event("XRP", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::PeerNotConnected(_)));

    let bob = harness.connect_bob();
    bob.set_active(false);
    let err = harness
        .router
        .handle_settlement_required(&event("XRP", 10))
        .await
        .unwrap_err();
    assert!(matches!(err, SettlementError::PeerConnectionInactive(_)));

    assert_eq!(harness.total_transactions(), 0);
    assert!(harness.ledger.calls().is_empty());
}

// =========================================================================
// Delivery failure
// =========================================================================

#[tokio::test(start_paused = true)]
async fn test_failed_delivery_never_reaches_ledger() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Xrp));
    let handle = harness.connect_bob_failing();
    let mut events = harness.events.subscribe();
    let started = Instant::now();

    let err = harness
        .router
        .handle_settlement_required(&event("XRP", 1_000_000))
        .await
        .unwrap_err();

    assert!(matches!(err, SettlementError::TransportFailed { .. }));
    assert_eq!(handle.attempts(), 3);
    assert_eq!(started.elapsed(), Duration::from_secs(7));
    assert!(harness.ledger.calls().is_empty());

    let sent = harness.alice_store.sent_for_peer(BOB_PEER_ID).unwrap();
    assert_eq!(sent.len(), 1);
    assert!(!sent[0].success);

    match events.try_recv().unwrap() {
        TelemetryEvent::ClaimSent { success, amount, .. } => {
            assert!(!success);
            assert_eq!(amount, "1000000");
        }
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_unacknowledged_claim_is_resigned_not_doubled() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Xrp));
    harness.connect_bob_failing();

    assert!(harness
        .router
        .handle_settlement_required(&event("XRP", 1_000))
        .await
        .is_err());

    // Bob comes back; the retried balance is not stacked on the lost claim.
    harness.connect_bob();
    let receipt = harness
        .router
        .handle_settlement_required(&event("XRP", 1_000))
        .await
        .unwrap();
    assert_eq!(receipt.claim.amount(), 1_000);
    assert_eq!(harness.ledger.calls().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_claim_refused_by_peer_never_reaches_ledger() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Aptos));
    let bob = harness.connect_bob();

    // Bob already holds a higher claim on Alice's Aptos channel.
    let alice = alice_keypair();
    let channel_id = alice.public_key().aptos_address();
    let seeded = Claim::Aptos(sign_aptos_claim(&alice, &channel_id, 10_000, 9));
    let at = Utc::now();
    let bytes = ClaimMessage::new(MessageId::for_claim(&seeded, at), ALICE_NODE_ID, seeded, at)
        .to_bytes()
        .unwrap();
    assert!(harness.bob_receiver.receive(ALICE_NODE_ID, &bytes).verified);

    let err = harness
        .router
        .handle_settlement_required(&event("APT", 1_000))
        .await
        .unwrap_err();
    match err {
        SettlementError::TransportFailed { reason, .. } => assert!(reason.contains(AMOUNT_NOT_MONOTONIC), "{}", reason),
        other => panic!("unexpected {:?}", other),
    }

    assert!(harness.ledger.calls().is_empty());
    assert!(bob.deliveries().iter().all(|d| !d.verified));
    let adapter = harness.router.adapter(ChainKind::Aptos).unwrap();
    assert_eq!(adapter.acknowledged_amount(&channel_id).await, 0);
}
