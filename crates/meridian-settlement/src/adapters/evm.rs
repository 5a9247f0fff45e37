use meridian_core::ChainKind;

use super::{ChannelAdapter, Rail};
use crate::chain::TransactionResult;

/// EVM: channels are identified by the hash of the opening transaction.
/// Claims are balance proofs ordered by nonce.
pub struct EvmRail;

impl Rail for EvmRail {
    const CHAIN: ChainKind = ChainKind::Evm;
    const REQUIRES_DESTINATION_KEY: bool = false;
    const SINGLE_CHANNEL_PER_OWNER: bool = false;

    fn channel_id_from_open(_owner: &str, result: &TransactionResult) -> String {
        result.hash.clone()
    }
}

pub type EvmChannelAdapter = ChannelAdapter<EvmRail>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::test_support::{adapter, peer_keypair, OWNER_SEED};
    use crate::chain::{functions, ChainClient, ChainError, TransactionPayload};
    use crate::traits::{ChainChannelAdapter, OpenChannelRequest};
    use meridian_core::{Claim, SettlementConfig};
    use meridian_crypto::KeyPair;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn open_request(amount: u128) -> OpenChannelRequest {
        OpenChannelRequest {
            destination: peer_keypair().public_key().evm_address().to_uppercase().replacen("0X", "0x", 1),
            destination_public_key: None,
            amount,
            settle_delay_secs: Some(0),
        }
    }

    #[tokio::test]
    async fn test_channel_id_is_open_tx_hash() {
        let (adapter, chain) = adapter::<EvmRail>(1_000_000);
        let channel_id = adapter.open_channel(open_request(5_000)).await.unwrap();
        assert!(channel_id.starts_with("0x"));
        assert_ne!(channel_id, adapter.owner_address());
        assert!(chain.channel(&channel_id).is_some());

        // destination was normalized before reaching the chain
        let cached = &adapter.cached_channels()[0];
        assert_eq!(cached.destination, peer_keypair().public_key().evm_address());
    }

    #[tokio::test]
    async fn test_balance_proofs_are_nonce_ordered() {
        let (adapter, _chain) = adapter::<EvmRail>(1_000_000);
        let channel_id = adapter.open_channel(open_request(5_000)).await.unwrap();

        let first = adapter.sign_claim(&channel_id, 100).await.unwrap();
        let second = adapter.sign_claim(&channel_id, 100).await.unwrap();
        match (&first, &second) {
            (Claim::Evm(a), Claim::Evm(b)) => {
                assert_eq!(a.nonce + 1, b.nonce);
                assert_eq!(b.signer_address, adapter.owner_address());
            }
            _ => panic!("expected EVM claims"),
        }
        assert!(second.ordering_key() > first.ordering_key());
    }

    #[tokio::test]
    async fn test_deposit_updates_cache() {
        let (adapter, _chain) = adapter::<EvmRail>(1_000_000);
        let channel_id = adapter.open_channel(open_request(5_000)).await.unwrap();
        adapter.deposit(&channel_id, 2_500).await.unwrap();
        assert_eq!(adapter.cached_channels()[0].deposited, 7_500);
        assert!(adapter.deposit(&channel_id, 0).await.is_err());
    }

    #[tokio::test]
    async fn test_deposit_beyond_funds_is_chain_error() {
        let (adapter, _chain) = adapter::<EvmRail>(6_000);
        let channel_id = adapter.open_channel(open_request(5_000)).await.unwrap();
        let err = adapter.deposit(&channel_id, 2_500).await.unwrap_err();
        assert_eq!(err.kind(), "chain_error");
        assert_eq!(adapter.cached_channels()[0].deposited, 5_000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_auto_refresh_evicts_finalized_channels() {
        let (adapter, chain) = adapter::<EvmRail>(1_000_000);
        let channel_id = adapter.open_channel(open_request(5_000)).await.unwrap();

        // close the channel behind the adapter's back
        let other = ChannelAdapter::<EvmRail>::new(
            std::sync::Arc::new(chain.clone()),
            std::sync::Arc::new(meridian_crypto::KeyPair::from_seed(&crate::adapters::test_support::OWNER_SEED)),
            &meridian_core::SettlementConfig::default(),
        )
        .unwrap();
        other.request_close(&channel_id).await.unwrap();
        other.finalize_close(&channel_id).await.unwrap();
        assert_eq!(adapter.cached_channels().len(), 1);

        adapter.start_auto_refresh(Duration::from_secs(30));
        adapter.start_auto_refresh(Duration::from_secs(30));
        assert!(adapter.is_refreshing());
        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(adapter.cached_channels().is_empty());

        adapter.stop_auto_refresh().await;
        assert!(!adapter.is_refreshing());
    }

    /// In-memory chain whose channel reads fail for one channel id.
    struct UnreadableChannel {
        chain: crate::chain::InMemoryChain,
        broken: std::sync::Mutex<Option<String>>,
    }

    #[async_trait::async_trait]
    impl ChainClient for UnreadableChannel {
        fn chain(&self) -> ChainKind {
            self.chain.chain()
        }

        async fn connect(&self) -> Result<(), ChainError> {
            self.chain.connect().await
        }

        async fn disconnect(&self) -> Result<(), ChainError> {
            self.chain.disconnect().await
        }

        async fn submit_transaction(&self, payload: TransactionPayload) -> Result<TransactionResult, ChainError> {
            self.chain.submit_transaction(payload).await
        }

        async fn view(&self, function: &str, args: Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, ChainError> {
            let broken = self.broken.lock().unwrap().clone();
            if broken.is_some() && args.first().and_then(|a| a.as_str()) == broken.as_deref() {
                return Err(ChainError::Rpc("node timed out".into()));
            }
            self.chain.view(function, args).await
        }

        fn address(&self) -> String {
            self.chain.address()
        }

        async fn balance(&self, address: &str) -> Result<u128, ChainError> {
            self.chain.balance(address).await
        }
    }

    #[tokio::test]
    async fn test_refresh_sweep_continues_past_failed_channel() {
        let keypair = Arc::new(KeyPair::from_seed(&OWNER_SEED));
        let address = keypair.public_key().address_for(ChainKind::Evm);
        let chain = crate::chain::InMemoryChain::new(ChainKind::Evm, &address, 1_000_000).unwrap();
        let client = Arc::new(UnreadableChannel {
            chain: chain.clone(),
            broken: std::sync::Mutex::new(None),
        });
        let adapter = ChannelAdapter::<EvmRail>::new(client.clone(), keypair, &SettlementConfig::default()).unwrap();

        let stuck = adapter.open_channel(open_request(7_000)).await.unwrap();
        let healthy = adapter.open_channel(open_request(5_000)).await.unwrap();
        *client.broken.lock().unwrap() = Some(stuck.clone());

        // Both channels are topped up behind the adapter's back.
        for id in [&stuck, &healthy] {
            let payload = TransactionPayload::new(functions::DEPOSIT, vec![json!(id), json!("1000")]);
            chain.submit_transaction(payload).await.unwrap().into_success().unwrap();
        }
        adapter.inner.refresh_all().await;

        let cached = |id: &str| {
            adapter
                .cached_channels()
                .into_iter()
                .find(|c| c.channel_id == id)
                .unwrap()
        };
        assert_eq!(cached(&healthy).deposited, 6_000);
        // the unreadable channel keeps its last known state
        assert_eq!(cached(&stuck).deposited, 7_000);
    }
}
