//! Canonical address forms.
//!
//! Every address is normalized before it is compared, used as a cache key or
//! passed to a chain, so that `0xABC`, `0xabc` and `0x0…0abc` never alias.

use crate::error::CoreError;
use crate::types::ChainKind;

/// Hex digits in a canonical Aptos address (32 bytes).
pub const APTOS_ADDRESS_HEX_LEN: usize = 64;
/// Hex digits in a canonical EVM address (20 bytes).
pub const EVM_ADDRESS_HEX_LEN: usize = 40;

const XRP_ALPHABET: &str = "rpshnaf39wBUDNEGHJKLM4PQRST7VWXYZ2bcdeCg65jkm8oFqi1tuvAxyz";

fn strip_hex_prefix(s: &str) -> &str {
    s.strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s)
}

fn invalid(chain: ChainKind, reason: impl Into<String>) -> CoreError {
    CoreError::InvalidAddress {
        chain,
        reason: reason.into(),
    }
}

/// `0x` + 64 lowercase hex digits, left-padded with zeros.
pub fn normalize_aptos_address(address: &str) -> Result<String, CoreError> {
    let body = strip_hex_prefix(address.trim());
    if body.is_empty() {
        return Err(invalid(ChainKind::Aptos, "empty address"));
    }
    if body.len() > APTOS_ADDRESS_HEX_LEN {
        return Err(invalid(
            ChainKind::Aptos,
            format!("{} hex digits exceeds {}", body.len(), APTOS_ADDRESS_HEX_LEN),
        ));
    }
    if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid(ChainKind::Aptos, format!("non-hex characters in {:?}", address)));
    }
    Ok(format!(
        "0x{:0>width$}",
        body.to_ascii_lowercase(),
        width = APTOS_ADDRESS_HEX_LEN
    ))
}

/// `0x` + exactly 40 lowercase hex digits.
pub fn normalize_evm_address(address: &str) -> Result<String, CoreError> {
    let body = strip_hex_prefix(address.trim());
    if body.len() != EVM_ADDRESS_HEX_LEN {
        return Err(invalid(
            ChainKind::Evm,
            format!("expected {} hex digits, got {}", EVM_ADDRESS_HEX_LEN, body.len()),
        ));
    }
    if !body.bytes().all(|b| b.is_ascii_hexdigit()) {
        return Err(invalid(ChainKind::Evm, format!("non-hex characters in {:?}", address)));
    }
    Ok(format!("0x{}", body.to_ascii_lowercase()))
}

/// Classic XRP addresses are case-sensitive base58, so they are only trimmed
/// and validated.
pub fn normalize_xrp_address(address: &str) -> Result<String, CoreError> {
    let trimmed = address.trim();
    if !trimmed.starts_with('r') {
        return Err(invalid(ChainKind::Xrp, "classic address must start with 'r'"));
    }
    if !(25..=35).contains(&trimmed.len()) {
        return Err(invalid(
            ChainKind::Xrp,
            format!("length {} outside 25..=35", trimmed.len()),
        ));
    }
    if let Some(bad) = trimmed.chars().find(|c| !XRP_ALPHABET.contains(*c)) {
        return Err(invalid(ChainKind::Xrp, format!("character {:?} not in alphabet", bad)));
    }
    Ok(trimmed.to_string())
}

/// Normalize an address for the given rail.
pub fn normalize_address(chain: ChainKind, address: &str) -> Result<String, CoreError> {
    match chain {
        ChainKind::Aptos => normalize_aptos_address(address),
        ChainKind::Evm => normalize_evm_address(address),
        ChainKind::Xrp => normalize_xrp_address(address),
    }
}

/// Canonical channel id: the owner address on Aptos, a `0x`-prefixed
/// lowercase transaction hash on EVM, an uppercase hex hash on XRP.
pub fn normalize_channel_id(chain: ChainKind, channel_id: &str) -> Result<String, CoreError> {
    let trimmed = channel_id.trim();
    match chain {
        ChainKind::Aptos => normalize_aptos_address(trimmed),
        ChainKind::Evm | ChainKind::Xrp => {
            let body = strip_hex_prefix(trimmed);
            if body.is_empty() || !body.bytes().all(|b| b.is_ascii_hexdigit()) {
                return Err(CoreError::ValidationError(format!(
                    "invalid {} channel id {:?}",
                    chain, channel_id
                )));
            }
            Ok(if chain == ChainKind::Evm {
                format!("0x{}", body.to_ascii_lowercase())
            } else {
                body.to_ascii_uppercase()
            })
        }
    }
}
