//! Chain-tagged payment channel claims.
//!
//! A claim asserts that the channel destination may redeem up to a cumulative
//! amount. It is signed once by the channel owner and never mutated; a later
//! claim for the same channel supersedes it.

use serde::{Deserialize, Serialize};

use crate::types::ChainKind;

/// Zero locks root used when no conditional transfers are pending.
pub const EMPTY_LOCKS_ROOT: &str =
    "0x0000000000000000000000000000000000000000000000000000000000000000";

const XRP_DOMAIN: &[u8] = b"XRPCLM\0";
const EVM_DOMAIN: &[u8] = b"EVMBP\0";
const APTOS_DOMAIN: &[u8] = b"APTCLM\0";

/// XRP Ledger payment channel claim. Ordered by cumulative `amount`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct XrpClaim {
    pub channel_id: String,
    #[serde(with = "crate::amount::as_string")]
    pub amount: u128,
    pub signature: String,
    pub public_key: String,
}

/// EVM balance proof. Ordered by `nonce`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvmClaim {
    pub channel_id: String,
    pub nonce: u64,
    #[serde(with = "crate::amount::as_string")]
    pub transferred_amount: u128,
    #[serde(with = "crate::amount::as_string")]
    pub locked_amount: u128,
    pub locks_root: String,
    pub signature: String,
    pub signer_address: String,
}

/// Aptos payment channel claim. Ordered by cumulative `amount`; the nonce
/// guards against on-chain replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AptosClaim {
    pub channel_owner: String,
    #[serde(with = "crate::amount::as_string")]
    pub amount: u128,
    pub nonce: u64,
    pub signature: String,
    pub public_key: String,
}

/// A claim on one of the three rails, tagged by `blockchain` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "blockchain", rename_all = "lowercase")]
pub enum Claim {
    Xrp(XrpClaim),
    Evm(EvmClaim),
    Aptos(AptosClaim),
}

fn push_field(buf: &mut Vec<u8>, field: &[u8]) {
    buf.extend_from_slice(&(field.len() as u32).to_be_bytes());
    buf.extend_from_slice(field);
}

impl XrpClaim {
    /// Bytes covered by the owner's signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64 + self.channel_id.len());
        buf.extend_from_slice(XRP_DOMAIN);
        push_field(&mut buf, self.channel_id.as_bytes());
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf
    }
}

impl EvmClaim {
    /// Bytes covered by the owner's signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(128 + self.channel_id.len());
        buf.extend_from_slice(EVM_DOMAIN);
        push_field(&mut buf, self.channel_id.as_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf.extend_from_slice(&self.transferred_amount.to_be_bytes());
        buf.extend_from_slice(&self.locked_amount.to_be_bytes());
        push_field(&mut buf, self.locks_root.as_bytes());
        buf
    }
}

impl AptosClaim {
    /// Bytes covered by the owner's signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96 + self.channel_owner.len());
        buf.extend_from_slice(APTOS_DOMAIN);
        push_field(&mut buf, self.channel_owner.as_bytes());
        buf.extend_from_slice(&self.amount.to_be_bytes());
        buf.extend_from_slice(&self.nonce.to_be_bytes());
        buf
    }
}

impl Claim {
    /// Rail this claim belongs to.
    pub fn chain(&self) -> ChainKind {
        match self {
            Self::Xrp(_) => ChainKind::Xrp,
            Self::Evm(_) => ChainKind::Evm,
            Self::Aptos(_) => ChainKind::Aptos,
        }
    }

    /// Channel identifier (the channel owner on Aptos).
    pub fn channel_id(&self) -> &str {
        match self {
            Self::Xrp(c) => &c.channel_id,
            Self::Evm(c) => &c.channel_id,
            Self::Aptos(c) => &c.channel_owner,
        }
    }

    /// Cumulative amount the destination may redeem.
    pub fn amount(&self) -> u128 {
        match self {
            Self::Xrp(c) => c.amount,
            Self::Evm(c) => c.transferred_amount,
            Self::Aptos(c) => c.amount,
        }
    }

    /// Claim nonce, for rails that carry one.
    pub fn nonce(&self) -> Option<u64> {
        match self {
            Self::Xrp(_) => None,
            Self::Evm(c) => Some(c.nonce),
            Self::Aptos(c) => Some(c.nonce),
        }
    }

    /// Value that must strictly increase between successive claims on the
    /// same channel: the nonce on EVM, the cumulative amount elsewhere.
    pub fn ordering_key(&self) -> u128 {
        match self {
            Self::Evm(c) => u128::from(c.nonce),
            Self::Xrp(c) => c.amount,
            Self::Aptos(c) => c.amount,
        }
    }

    /// Hex-encoded signature.
    pub fn signature(&self) -> &str {
        match self {
            Self::Xrp(c) => &c.signature,
            Self::Evm(c) => &c.signature,
            Self::Aptos(c) => &c.signature,
        }
    }

    /// Bytes covered by the owner's signature.
    pub fn signing_payload(&self) -> Vec<u8> {
        match self {
            Self::Xrp(c) => c.signing_payload(),
            Self::Evm(c) => c.signing_payload(),
            Self::Aptos(c) => c.signing_payload(),
        }
    }
}
