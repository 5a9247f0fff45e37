//! Meridian settlement layer
//!
//! Settles net peer balances over unidirectional payment channels on three
//! rails (EVM, XRP Ledger, Aptos). Claims are signed off-chain against a
//! channel's cumulative balance, delivered to the peer with bounded retry,
//! and only reconciled into the ledger once delivery is confirmed.

pub mod adapters;
pub mod chain;
pub mod error;
pub mod ledger;
pub mod peer;
pub mod receiver;
pub mod router;
pub mod signer;
pub mod store;
pub mod telemetry;
pub mod traits;
pub mod transport;
pub mod types;

pub use adapters::{AptosChannelAdapter, ChannelAdapter, EvmChannelAdapter, XrpChannelAdapter};
pub use chain::{ChainClient, ChainError, InMemoryChain, TransactionPayload, TransactionResult};
pub use error::SettlementError;
pub use ledger::{InMemoryLedger, LedgerError, SettlementLedger};
pub use peer::{PeerDirectory, PeerHandle, StaticPeerDirectory, TransportError};
pub use receiver::{ClaimReceiver, ReceiveOutcome};
pub use router::{select_rail, SettlementRouter};
pub use signer::ClaimSigner;
pub use store::{ClaimStore, InsertOutcome, MemoryClaimStore, ReceivedClaimRecord, SentClaimRecord, StoreError};
pub use telemetry::{BroadcastSink, Telemetry, TelemetryError, TelemetryEvent, TelemetrySink, TracingSink};
pub use traits::{ChainChannelAdapter, OpenChannelRequest};
pub use transport::{ClaimTransport, RetryPolicy, SendOutcome};
pub use types::SettlementReceipt;
