//! Integration test: claim exchange between a sender and a receiver.
//!
//! Covers the receiver's verification and monotonicity rules, idempotent
//! persistence, and redeeming received evidence on-chain.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use meridian_core::claim::EMPTY_LOCKS_ROOT;
use meridian_core::{ChainKind, Claim, ClaimMessage, MessageId, SettlementConfig, SettlementPreference, SettlementRequiredEvent};
use meridian_crypto::{sign_aptos_claim, sign_evm_claim, sign_xrp_claim, KeyPair};
use meridian_integration_tests::{
    alice_keypair, bob_config, bob_keypair, Harness, LoopbackHandle, ALICE_NODE_ID, BOB_PEER_ID,
};
use meridian_settlement::receiver::{AMOUNT_NOT_MONOTONIC, INVALID_SIGNATURE};
use meridian_settlement::{
    ChainChannelAdapter, ClaimReceiver, ClaimStore, ClaimTransport, MemoryClaimStore, Telemetry, XrpChannelAdapter,
};

const XRP_CHANNEL: &str = "C1AE6DDDEEC05CF2978C0BAD6FE302948E9533691DC749DCDD3B9E5992CA6198";

fn receiver() -> (ClaimReceiver, Arc<MemoryClaimStore>) {
    let store = Arc::new(MemoryClaimStore::new());
    let receiver = ClaimReceiver::new(store.clone(), Telemetry::disabled(), &SettlementConfig::default());
    (receiver, store)
}

fn envelope(claim: Claim, millis: i64) -> Vec<u8> {
    let at = Utc.timestamp_millis_opt(millis).unwrap();
    ClaimMessage::new(MessageId::for_claim(&claim, at), ALICE_NODE_ID, claim, at)
        .to_bytes()
        .unwrap()
}

fn xrp(amount: u128) -> Claim {
    Claim::Xrp(sign_xrp_claim(&alice_keypair(), XRP_CHANNEL, amount))
}

// =========================================================================
// Receiver rules
// =========================================================================

#[test]
fn test_amounts_must_strictly_increase() {
    let (receiver, store) = receiver();

    assert!(receiver.receive(ALICE_NODE_ID, &envelope(xrp(1_000_000), 1)).verified);
    assert!(receiver.receive(ALICE_NODE_ID, &envelope(xrp(2_000_000), 2)).verified);

    let stale = receiver.receive(ALICE_NODE_ID, &envelope(xrp(1_500_000), 3));
    assert!(!stale.verified);
    assert_eq!(stale.error.as_deref(), Some(AMOUNT_NOT_MONOTONIC));

    // The rejected claim is kept as evidence but never becomes the latest.
    assert_eq!(store.received_count(), 3);
    let latest = receiver
        .get_latest_verified_claim(ALICE_NODE_ID, ChainKind::Xrp, XRP_CHANNEL)
        .unwrap();
    assert_eq!(latest.amount(), 2_000_000);
}

#[test]
fn test_equal_amount_is_not_an_increase() {
    let (receiver, _store) = receiver();
    assert!(receiver.receive(ALICE_NODE_ID, &envelope(xrp(500), 1)).verified);
    let repeat = receiver.receive(ALICE_NODE_ID, &envelope(xrp(500), 2));
    assert_eq!(repeat.error.as_deref(), Some(AMOUNT_NOT_MONOTONIC));
}

#[test]
fn test_duplicate_message_is_stored_once() {
    let (receiver, store) = receiver();
    let bytes = envelope(xrp(1_000_000), 1);

    let first = receiver.receive(ALICE_NODE_ID, &bytes);
    let second = receiver.receive(ALICE_NODE_ID, &bytes);

    assert!(first.verified);
    assert!(second.verified);
    assert!(second.error.is_none());
    assert_eq!(first.message_id, second.message_id);
    assert_eq!(store.received_count(), 1);
    let rows = store
        .received_for_channel(ALICE_NODE_ID, ChainKind::Xrp, XRP_CHANNEL)
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert!(rows[0].verified);
}

#[test]
fn test_claim_signed_by_other_key_is_rejected() {
    let (receiver, _store) = receiver();
    let mut claim = sign_evm_claim(&alice_keypair(), "0xabc1", 1, 100, 0, EMPTY_LOCKS_ROOT);
    // Swap in a signer address the signature does not belong to.
    claim.signer_address = bob_keypair().public_key().evm_address();

    let outcome = receiver.receive(ALICE_NODE_ID, &envelope(Claim::Evm(claim), 1));
    assert!(!outcome.verified);
    assert_eq!(outcome.error.as_deref(), Some(INVALID_SIGNATURE));
}

#[test]
fn test_aptos_orders_by_amount() {
    let (receiver, _store) = receiver();
    let kp = KeyPair::from_seed(&[7u8; 32]);
    let owner = kp.public_key().aptos_address();

    let first = Claim::Aptos(sign_aptos_claim(&kp, &owner, 300, 1));
    let lower = Claim::Aptos(sign_aptos_claim(&kp, &owner, 200, 2));
    assert!(receiver.receive(ALICE_NODE_ID, &envelope(first, 1)).verified);
    let outcome = receiver.receive(ALICE_NODE_ID, &envelope(lower, 2));
    assert_eq!(outcome.error.as_deref(), Some(AMOUNT_NOT_MONOTONIC));
}

// =========================================================================
// Sender to receiver
// =========================================================================

#[tokio::test]
async fn test_transport_delivers_to_receiver() {
    let sender_store = Arc::new(MemoryClaimStore::new());
    let transport = ClaimTransport::new(
        ALICE_NODE_ID,
        sender_store.clone(),
        Telemetry::disabled(),
        &SettlementConfig::default(),
    );
    let (bob_receiver, bob_store) = receiver();
    let handle = LoopbackHandle::new(BOB_PEER_ID, ALICE_NODE_ID, Arc::new(bob_receiver));

    let claim = Claim::Evm(sign_evm_claim(&alice_keypair(), "0xabc1", 1, 250, 0, EMPTY_LOCKS_ROOT));
    let outcome = transport.send(BOB_PEER_ID, &handle, &claim).await;

    assert!(outcome.success);
    let delivered = handle.deliveries();
    assert_eq!(delivered.len(), 1);
    assert!(delivered[0].verified);
    assert_eq!(delivered[0].message_id.as_ref(), Some(&outcome.message_id));

    assert_eq!(sender_store.sent_for_peer(BOB_PEER_ID).unwrap().len(), 1);
    assert_eq!(bob_store.received_count(), 1);
}

#[tokio::test]
async fn test_receiver_redeems_latest_claim_on_chain() {
    let harness = Harness::new();
    harness.router.add_peer(bob_config(SettlementPreference::Xrp));
    harness.connect_bob();

    harness
        .router
        .handle_settlement_required(&SettlementRequiredEvent::new(BOB_PEER_ID, "XRP", 700))
        .await
        .unwrap();
    let receipt = harness
        .router
        .handle_settlement_required(&SettlementRequiredEvent::new(BOB_PEER_ID, "XRP", 300))
        .await
        .unwrap();

    // Bob redeems from his own account on the same ledger.
    let bob = Arc::new(bob_keypair());
    let xrp = harness.chain(ChainKind::Xrp);
    let bob_client = xrp
        .as_account(&bob.public_key().xrp_address(), 0)
        .unwrap();
    let bob_adapter =
        XrpChannelAdapter::new(Arc::new(bob_client), bob, &SettlementConfig::default()).unwrap();

    let latest = harness
        .bob_receiver
        .get_latest_verified_claim(ALICE_NODE_ID, ChainKind::Xrp, &receipt.channel_id)
        .unwrap();
    assert_eq!(latest.amount(), 1_000);
    bob_adapter.submit_claim(&latest).await.unwrap();

    let channel = xrp.channel(&receipt.channel_id).unwrap();
    assert_eq!(channel.claimed, 1_000);
    assert_eq!(channel.remaining(), 0);
}
