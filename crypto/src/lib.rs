//! SIBYL Cryptography Module
//! 
//! Provides the primitives the committee signs blocks with:
//! - secp256k1 recoverable ECDSA signatures
//! - Keccak-256 for hashing and address derivation
//! - HKDF for deterministic committee key derivation

pub mod keys;
pub mod signing;
pub mod hashing;
pub mod derivation;

pub use keys::*;
pub use signing::*;
pub use hashing::*;
pub use derivation::*;
