use ed25519_dalek::{SigningKey, VerifyingKey};
use meridian_core::ChainKind;
use rand::rngs::OsRng;
use zeroize::Zeroize;

use crate::error::CryptoError;
use crate::hashing::{hash, hash_parts};

/// Ed25519 key pair owning a settlement account on every rail.
/// Private key material is zeroized on drop by `ed25519-dalek`.
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random key pair using OS-provided entropy.
    pub fn generate() -> Self {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self { signing_key }
    }

    /// Create a key pair from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(seed);
        Self { signing_key }
    }

    /// Create a key pair from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        if bytes.len() != 32 {
            return Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: bytes.len(),
            });
        }
        let mut seed = [0u8; 32];
        seed.copy_from_slice(bytes);
        let kp = Self::from_seed(&seed);
        seed.zeroize();
        Ok(kp)
    }

    /// Create a key pair from a hex-encoded 32-byte seed.
    pub fn from_hex(seed_hex: &str) -> Result<Self, CryptoError> {
        let mut bytes = hex::decode(seed_hex.trim())
            .map_err(|e| CryptoError::InvalidInput(format!("invalid hex seed: {}", e)))?;
        let kp = Self::from_bytes(&bytes);
        bytes.zeroize();
        kp
    }

    /// Get the public key.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Get the raw private key bytes (32 bytes).
    pub fn secret_bytes(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key().to_hex())
            .finish_non_exhaustive()
    }
}

/// Ed25519 public key, with the per-rail encodings of the account it controls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Create from raw bytes (32 bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        let bytes_arr: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
            expected: 32,
            actual: bytes.len(),
        })?;
        let verifying_key = VerifyingKey::from_bytes(&bytes_arr)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid public key: {}", e)))?;
        Ok(Self { verifying_key })
    }

    /// Get the raw bytes (32 bytes).
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    /// Encode as plain lowercase hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Decode from hex, accepting the `0x` (Aptos) and `ED` (XRP) prefixes.
    pub fn from_hex(hex_str: &str) -> Result<Self, CryptoError> {
        let trimmed = hex_str.trim();
        let body = if trimmed.len() == 66 {
            trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("ED"))
                .or_else(|| trimmed.strip_prefix("ed"))
                .unwrap_or(trimmed)
        } else {
            trimmed
        };
        let bytes = hex::decode(body)
            .map_err(|e| CryptoError::InvalidInput(format!("invalid hex: {}", e)))?;
        Self::from_bytes(&bytes)
    }

    /// XRP Ledger encoding: `ED` + uppercase hex.
    pub fn to_xrp_hex(&self) -> String {
        format!("ED{}", hex::encode_upper(self.as_bytes()))
    }

    /// Aptos encoding: `0x` + lowercase hex.
    pub fn to_aptos_hex(&self) -> String {
        format!("0x{}", self.to_hex())
    }

    /// Aptos account address: `0x` + hex(BLAKE3(key ‖ 0x00)).
    pub fn aptos_address(&self) -> String {
        format!("0x{}", hex::encode(hash_parts(&[self.as_bytes().as_slice(), &[0x00u8][..]])))
    }

    /// EVM address: `0x` + last 20 bytes of BLAKE3(key).
    pub fn evm_address(&self) -> String {
        let digest = hash(self.as_bytes());
        format!("0x{}", hex::encode(&digest[12..]))
    }

    /// XRP classic address: Ripple-alphabet base58 of
    /// `0x00 ‖ account_id ‖ checksum`, which always starts with `r`.
    pub fn xrp_address(&self) -> String {
        let digest = hash(self.as_bytes());
        let mut payload = Vec::with_capacity(25);
        payload.push(0x00);
        payload.extend_from_slice(&digest[..20]);
        let checksum = hash(&payload);
        payload.extend_from_slice(&checksum[..4]);
        bs58::encode(payload)
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .into_string()
    }

    /// Account address this key controls on `chain`.
    pub fn address_for(&self, chain: ChainKind) -> String {
        match chain {
            ChainKind::Evm => self.evm_address(),
            ChainKind::Xrp => self.xrp_address(),
            ChainKind::Aptos => self.aptos_address(),
        }
    }

    pub(crate) fn verifying_key(&self) -> &VerifyingKey {
        &self.verifying_key
    }
}
