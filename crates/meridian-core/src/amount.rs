//! Amounts are `u128` base units and travel as decimal strings, both on the
//! wire and in persisted records, so that no JSON consumer truncates them.

use serde::{de, Deserialize, Deserializer, Serializer};

use crate::error::CoreError;

/// Parse a decimal amount string into base units.
pub fn parse_amount(s: &str) -> Result<u128, CoreError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::InvalidAmount(format!(
            "expected a non-negative integer, got {:?}",
            s
        )));
    }
    trimmed
        .parse::<u128>()
        .map_err(|e| CoreError::InvalidAmount(format!("{}: {}", s, e)))
}

/// `#[serde(with = "amount::as_string")]` for `u128` fields.
pub mod as_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_amount(&raw).map_err(de::Error::custom)
    }
}
