use crate::types::ChainKind;

/// Core domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("invalid {chain} address: {reason}")]
    InvalidAddress { chain: ChainKind, reason: String },

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("unknown chain: {0}")]
    UnknownChain(String),

    #[error("unknown settlement preference: {0}")]
    UnknownPreference(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("validation error: {0}")]
    ValidationError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
