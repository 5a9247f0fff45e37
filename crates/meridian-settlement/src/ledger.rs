//! Accounting seam and an in-memory double-entry ledger.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

/// Local account credited with every settlement sent.
pub const SETTLEMENT_SENT_ACCOUNT: &str = "local:settlement-sent";

/// Ledger errors.
#[derive(Debug, thiserror::Error)]
pub enum LedgerError {
    #[error("refusing zero settlement for peer {0}")]
    ZeroAmount(String),

    #[error("amount {0} exceeds ledger range")]
    Overflow(u128),

    #[error("ledger unavailable: {0}")]
    Unavailable(String),
}

/// Accounting interface consumed by the settlement router.
#[async_trait]
pub trait SettlementLedger: Send + Sync {
    /// Record that `amount` of `token_id` was settled to `peer_id`.
    async fn record_settlement(&self, peer_id: &str, token_id: &str, amount: u128) -> Result<(), LedgerError>;
}

/// One side of a posting.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// Account whose balance changed.
    pub account: String,
    pub token_id: String,
    /// Positive = credit, negative = debit.
    pub delta: i128,
    /// Settlement the entry belongs to; both sides share it.
    pub posting_id: Uuid,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory double-entry ledger.
///
/// Each settlement debits the peer's settlement account and credits
/// [`SETTLEMENT_SENT_ACCOUNT`], so balances across all accounts of a token
/// always sum to zero.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    entries: DashMap<Uuid, LedgerEntry>,
    /// (account, token) -> signed balance.
    balances: DashMap<String, i128>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Settlement account of a peer.
    pub fn peer_account(peer_id: &str) -> String {
        format!("peer:{}:settlement", peer_id)
    }

    fn balance_key(account: &str, token_id: &str) -> String {
        format!("{}:{}", account, token_id)
    }

    pub fn balance(&self, account: &str, token_id: &str) -> i128 {
        let key = Self::balance_key(account, token_id);
        self.balances.get(&key).map(|v| *v).unwrap_or(0)
    }

    /// Entries touching `account`, oldest first.
    pub fn entries_for(&self, account: &str) -> Vec<LedgerEntry> {
        let mut entries: Vec<LedgerEntry> = self
            .entries
            .iter()
            .filter(|e| e.value().account == account)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by_key(|e| e.id);
        entries
    }

    pub fn entry_count(&self) -> usize {
        self.entries.len()
    }

    fn post(&self, posting_id: Uuid, account: &str, token_id: &str, delta: i128, at: DateTime<Utc>) {
        let id = Uuid::now_v7();
        self.entries.insert(
            id,
            LedgerEntry {
                id,
                account: account.to_string(),
                token_id: token_id.to_string(),
                delta,
                posting_id,
                recorded_at: at,
            },
        );
        self.balances
            .entry(Self::balance_key(account, token_id))
            .and_modify(|b| *b += delta)
            .or_insert(delta);
    }
}

#[async_trait]
impl SettlementLedger for InMemoryLedger {
    async fn record_settlement(&self, peer_id: &str, token_id: &str, amount: u128) -> Result<(), LedgerError> {
        if amount == 0 {
            return Err(LedgerError::ZeroAmount(peer_id.to_string()));
        }
        let value = i128::try_from(amount).map_err(|_| LedgerError::Overflow(amount))?;
        let posting_id = Uuid::now_v7();
        let now = Utc::now();

        self.post(posting_id, &Self::peer_account(peer_id), token_id, -value, now);
        self.post(posting_id, SETTLEMENT_SENT_ACCOUNT, token_id, value, now);

        tracing::info!(
            posting_id = %posting_id,
            peer_id = %peer_id,
            token_id = %token_id,
            amount = %amount,
            "Recorded settlement"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_double_entry_balances() {
        let ledger = InMemoryLedger::new();
        ledger.record_settlement("peer-bob", "XRP", 1_000_000).await.unwrap();
        ledger.record_settlement("peer-bob", "XRP", 500).await.unwrap();

        let peer = InMemoryLedger::peer_account("peer-bob");
        assert_eq!(ledger.balance(&peer, "XRP"), -1_000_500);
        assert_eq!(ledger.balance(SETTLEMENT_SENT_ACCOUNT, "XRP"), 1_000_500);
        assert_eq!(ledger.balance(&peer, "APT"), 0);
        assert_eq!(ledger.entry_count(), 4);

        let entries = ledger.entries_for(&peer);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].delta, -1_000_000);
    }

    #[tokio::test]
    async fn test_rejects_zero_and_oversized() {
        let ledger = InMemoryLedger::new();
        assert!(matches!(
            ledger.record_settlement("peer-bob", "XRP", 0).await,
            Err(LedgerError::ZeroAmount(_))
        ));
        assert!(matches!(
            ledger.record_settlement("peer-bob", "XRP", u128::MAX).await,
            Err(LedgerError::Overflow(_))
        ));
        assert_eq!(ledger.entry_count(), 0);
    }
}
