//! Signing and verification of chain-tagged claims.
//!
//! All rails sign with Ed25519 over the claim's domain-separated signing
//! payload. EVM signatures carry the 32-byte signer key ahead of the 64-byte
//! signature, so a verifier holding only `signerAddress` can check the key
//! against the address before checking the signature.

use meridian_core::address::normalize_evm_address;
use meridian_core::claim::{AptosClaim, Claim, EvmClaim, XrpClaim};

use crate::error::CryptoError;
use crate::keys::{KeyPair, PublicKey};
use crate::signing::{sign, verify, Signature};

/// Sign an XRP claim for a cumulative `amount`.
pub fn sign_xrp_claim(keypair: &KeyPair, channel_id: &str, amount: u128) -> XrpClaim {
    let mut claim = XrpClaim {
        channel_id: channel_id.to_string(),
        amount,
        signature: String::new(),
        public_key: keypair.public_key().to_xrp_hex(),
    };
    claim.signature = sign(&claim.signing_payload(), keypair).to_hex();
    claim
}

/// Sign an EVM balance proof.
pub fn sign_evm_claim(
    keypair: &KeyPair,
    channel_id: &str,
    nonce: u64,
    transferred_amount: u128,
    locked_amount: u128,
    locks_root: &str,
) -> EvmClaim {
    let public_key = keypair.public_key();
    let mut claim = EvmClaim {
        channel_id: channel_id.to_string(),
        nonce,
        transferred_amount,
        locked_amount,
        locks_root: locks_root.to_string(),
        signature: String::new(),
        signer_address: public_key.evm_address(),
    };
    let sig = sign(&claim.signing_payload(), keypair);
    let mut packed = Vec::with_capacity(96);
    packed.extend_from_slice(public_key.as_bytes());
    packed.extend_from_slice(&sig.to_bytes());
    claim.signature = hex::encode(packed);
    claim
}

/// Sign an Aptos claim for a cumulative `amount` at `nonce`.
pub fn sign_aptos_claim(keypair: &KeyPair, channel_owner: &str, amount: u128, nonce: u64) -> AptosClaim {
    let mut claim = AptosClaim {
        channel_owner: channel_owner.to_string(),
        amount,
        nonce,
        signature: String::new(),
        public_key: keypair.public_key().to_aptos_hex(),
    };
    claim.signature = sign(&claim.signing_payload(), keypair).to_hex();
    claim
}

fn verify_with_key(payload: &[u8], signature_hex: &str, public_key_hex: &str) -> Result<(), CryptoError> {
    let public_key = PublicKey::from_hex(public_key_hex)?;
    let signature = Signature::from_hex(signature_hex)?;
    verify(payload, &signature, &public_key)
}

fn verify_evm(claim: &EvmClaim) -> Result<(), CryptoError> {
    let packed = hex::decode(claim.signature.trim_start_matches("0x"))
        .map_err(|e| CryptoError::InvalidInput(format!("invalid signature hex: {}", e)))?;
    if packed.len() != 96 {
        return Err(CryptoError::InvalidInput(format!(
            "evm signature must be 96 bytes, got {}",
            packed.len()
        )));
    }
    let public_key = PublicKey::from_bytes(&packed[..32])?;
    let expected = normalize_evm_address(&claim.signer_address)
        .map_err(|e| CryptoError::InvalidInput(e.to_string()))?;
    if public_key.evm_address() != expected {
        return Err(CryptoError::SignerMismatch(expected));
    }
    let signature = Signature::from_bytes(&packed[32..])?;
    verify(&claim.signing_payload(), &signature, &public_key)
}

/// Verify a claim's signature with the rail's verification routine.
pub fn verify_claim(claim: &Claim) -> Result<(), CryptoError> {
    match claim {
        Claim::Xrp(c) => verify_with_key(&c.signing_payload(), &c.signature, &c.public_key),
        Claim::Aptos(c) => verify_with_key(&c.signing_payload(), &c.signature, &c.public_key),
        Claim::Evm(c) => verify_evm(c),
    }
}
