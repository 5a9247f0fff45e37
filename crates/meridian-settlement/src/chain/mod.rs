//! Chain client seam.
//!
//! Adapters talk to a rail exclusively through [`ChainClient`]: entry
//! function calls go through `submit_transaction`, reads through `view`.
//! Arguments and view results are JSON values so that one channel module
//! shape serves all three rails.

pub mod memory;

use async_trait::async_trait;
use meridian_core::ChainKind;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryChain;

/// Entry and view functions of the `payment_channel` module.
pub mod functions {
    pub const OPEN_CHANNEL: &str = "payment_channel::open_channel";
    pub const DEPOSIT: &str = "payment_channel::deposit";
    pub const CLAIM: &str = "payment_channel::claim";
    pub const REQUEST_CLOSE: &str = "payment_channel::request_close";
    pub const FINALIZE_CLOSE: &str = "payment_channel::finalize_close";
    pub const GET_CHANNEL: &str = "payment_channel::get_channel";
}

/// Chain client errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ChainError {
    #[error("client not connected")]
    NotConnected,

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("transaction {hash} failed: {vm_status}")]
    TransactionFailed { hash: String, vm_status: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("rpc error: {0}")]
    Rpc(String),
}

/// An entry function call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionPayload {
    pub function: String,
    #[serde(default)]
    pub type_args: Vec<String>,
    pub args: Vec<serde_json::Value>,
}

impl TransactionPayload {
    pub fn new(function: &str, args: Vec<serde_json::Value>) -> Self {
        Self {
            function: function.to_string(),
            type_args: Vec::new(),
            args,
        }
    }
}

/// Outcome of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionResult {
    pub success: bool,
    pub hash: String,
    pub vm_status: String,
}

impl TransactionResult {
    /// Turn a non-success result into [`ChainError::TransactionFailed`].
    pub fn into_success(self) -> Result<Self, ChainError> {
        if self.success {
            Ok(self)
        } else {
            Err(ChainError::TransactionFailed {
                hash: self.hash,
                vm_status: self.vm_status,
            })
        }
    }
}

/// Client for one account on one rail.
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Rail this client talks to.
    fn chain(&self) -> ChainKind;

    async fn connect(&self) -> Result<(), ChainError>;

    async fn disconnect(&self) -> Result<(), ChainError>;

    /// Sign and submit an entry function call from [`ChainClient::address`].
    async fn submit_transaction(&self, payload: TransactionPayload) -> Result<TransactionResult, ChainError>;

    /// Call a view function.
    async fn view(&self, function: &str, args: Vec<serde_json::Value>) -> Result<Vec<serde_json::Value>, ChainError>;

    /// Account the client submits from.
    fn address(&self) -> String;

    /// Native balance of `address` in base units.
    async fn balance(&self, address: &str) -> Result<u128, ChainError>;
}
