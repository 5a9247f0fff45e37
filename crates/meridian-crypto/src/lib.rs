pub mod claims;
pub mod error;
pub mod hashing;
pub mod keys;
pub mod signing;

pub use claims::{sign_aptos_claim, sign_evm_claim, sign_xrp_claim, verify_claim};
pub use error::CryptoError;
pub use hashing::{hash, hash_hex};
pub use keys::{KeyPair, PublicKey};
pub use signing::{sign, verify, Signature};
