//! Per-channel claim issuance.
//!
//! The signer is the single owner of every channel's claim counters. Each
//! channel has its own async mutex, so concurrent settlements on one channel
//! are serialized while different channels proceed independently.

use std::sync::Arc;

use dashmap::DashMap;
use meridian_core::claim::EMPTY_LOCKS_ROOT;
use meridian_core::{ChainKind, Claim};
use meridian_crypto::{sign_aptos_claim, sign_evm_claim, sign_xrp_claim, KeyPair};
use tokio::sync::Mutex;

/// Claim counters of one channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimCounter {
    /// Highest nonce issued.
    pub nonce: u64,
    /// Cumulative amount of the latest signed claim.
    pub signed_amount: u128,
    /// Cumulative amount the peer has confirmed receiving.
    pub acknowledged_amount: u128,
}

/// Signs claims for channels owned by one key on one rail.
pub struct ClaimSigner {
    chain: ChainKind,
    keypair: Arc<KeyPair>,
    counters: DashMap<String, Arc<Mutex<ClaimCounter>>>,
}

impl ClaimSigner {
    pub fn new(chain: ChainKind, keypair: Arc<KeyPair>) -> Self {
        Self {
            chain,
            keypair,
            counters: DashMap::new(),
        }
    }

    fn counter(&self, channel_id: &str) -> Arc<Mutex<ClaimCounter>> {
        self.counters
            .entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ClaimCounter::default())))
            .clone()
    }

    /// Sign a claim granting `increment` on top of the acknowledged
    /// cumulative amount. The nonce is always one past the highest issued.
    pub async fn sign(&self, channel_id: &str, increment: u128) -> Claim {
        let counter = self.counter(channel_id);
        let mut counter = counter.lock().await;
        counter.nonce += 1;
        let amount = counter.acknowledged_amount.saturating_add(increment);
        counter.signed_amount = amount;

        let claim = match self.chain {
            ChainKind::Xrp => Claim::Xrp(sign_xrp_claim(&self.keypair, channel_id, amount)),
            ChainKind::Evm => Claim::Evm(sign_evm_claim(
                &self.keypair,
                channel_id,
                counter.nonce,
                amount,
                0,
                EMPTY_LOCKS_ROOT,
            )),
            ChainKind::Aptos => Claim::Aptos(sign_aptos_claim(&self.keypair, channel_id, amount, counter.nonce)),
        };
        tracing::debug!(
            chain = %self.chain,
            channel_id = %channel_id,
            nonce = counter.nonce,
            amount = %amount,
            "Signed claim"
        );
        claim
    }

    /// Record that the peer received `claim`.
    pub async fn acknowledge(&self, claim: &Claim) {
        let counter = self.counter(claim.channel_id());
        let mut counter = counter.lock().await;
        counter.acknowledged_amount = counter.acknowledged_amount.max(claim.amount());
    }

    /// Seed counters from on-chain state, never moving them backwards.
    pub async fn observe_onchain(&self, channel_id: &str, nonce: u64, claimed: u128) {
        let counter = self.counter(channel_id);
        let mut counter = counter.lock().await;
        counter.nonce = counter.nonce.max(nonce);
        counter.acknowledged_amount = counter.acknowledged_amount.max(claimed);
    }

    pub async fn acknowledged_amount(&self, channel_id: &str) -> u128 {
        match self.counters.get(channel_id).map(|c| Arc::clone(c.value())) {
            Some(counter) => counter.lock().await.acknowledged_amount,
            None => 0,
        }
    }

    pub async fn snapshot(&self, channel_id: &str) -> ClaimCounter {
        match self.counters.get(channel_id).map(|c| Arc::clone(c.value())) {
            Some(counter) => *counter.lock().await,
            None => ClaimCounter::default(),
        }
    }

    /// Drop the counters of a finalized channel.
    pub fn forget(&self, channel_id: &str) {
        self.counters.remove(channel_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signer(chain: ChainKind) -> ClaimSigner {
        ClaimSigner::new(chain, Arc::new(KeyPair::from_seed(&[5u8; 32])))
    }

    #[tokio::test]
    async fn test_nonce_increments_per_channel() {
        let signer = signer(ChainKind::Evm);
        let a1 = signer.sign("0xaa", 10).await;
        let a2 = signer.sign("0xaa", 10).await;
        let b1 = signer.sign("0xbb", 10).await;
        assert_eq!(a1.nonce(), Some(1));
        assert_eq!(a2.nonce(), Some(2));
        assert_eq!(b1.nonce(), Some(1));
        assert!(meridian_crypto::verify_claim(&a2).is_ok());
    }

    #[tokio::test]
    async fn test_amount_builds_on_acknowledged_only() {
        let signer = signer(ChainKind::Xrp);
        let first = signer.sign("ABCD", 100).await;
        assert_eq!(first.amount(), 100);

        // not acknowledged: the retry re-signs the same cumulative amount
        let retry = signer.sign("ABCD", 100).await;
        assert_eq!(retry.amount(), 100);

        signer.acknowledge(&retry).await;
        let next = signer.sign("ABCD", 50).await;
        assert_eq!(next.amount(), 150);
        assert_eq!(signer.acknowledged_amount("ABCD").await, 100);
    }

    #[tokio::test]
    async fn test_observe_onchain_never_regresses() {
        let signer = signer(ChainKind::Aptos);
        signer.observe_onchain("0x01", 5, 500).await;
        signer.observe_onchain("0x01", 2, 100).await;
        let snapshot = signer.snapshot("0x01").await;
        assert_eq!(snapshot.nonce, 5);
        assert_eq!(snapshot.acknowledged_amount, 500);

        let claim = signer.sign("0x01", 1).await;
        assert_eq!(claim.nonce(), Some(6));
        assert_eq!(claim.amount(), 501);
    }

    #[tokio::test]
    async fn test_concurrent_signing_never_reuses_nonce() {
        let signer = Arc::new(signer(ChainKind::Aptos));
        let mut handles = Vec::new();
        for _ in 0..16 {
            let signer = Arc::clone(&signer);
            handles.push(tokio::spawn(async move { signer.sign("0x02", 1).await.nonce() }));
        }
        let mut nonces = Vec::new();
        for handle in handles {
            nonces.push(handle.await.unwrap().unwrap());
        }
        nonces.sort_unstable();
        assert_eq!(nonces, (1..=16).collect::<Vec<_>>());
    }
}
