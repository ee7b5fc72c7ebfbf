//! Key management for SIBYL
//!
//! Handles secp256k1 key generation, storage, and address derivation.

use k256::ecdsa::{SigningKey, VerifyingKey};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sibyl_core::{Address, SibylError, SibylResult};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::hashing::keccak256;

/// A keypair for signing block messages
#[derive(Clone)]
pub struct KeyPair {
    signing_key: SigningKey,
}

impl KeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let signing_key = SigningKey::random(&mut OsRng);
        Self { signing_key }
    }

    /// Create keypair from 32 secret bytes
    ///
    /// Fails for the zero scalar and values not below the curve order.
    pub fn from_secret_bytes(bytes: &[u8]) -> SibylResult<Self> {
        let signing_key =
            SigningKey::from_slice(bytes).map_err(|_| SibylError::InvalidPrivateKey)?;
        Ok(Self { signing_key })
    }

    /// Uncompressed SEC1 public key (65 bytes, leading 0x04)
    pub fn public_key_bytes(&self) -> Vec<u8> {
        uncompressed_public_key(self.signing_key.verifying_key())
    }

    /// Get the address (right-most 20 bytes of the keccak of the public key)
    pub fn address(&self) -> Address {
        address_from_verifying_key(self.signing_key.verifying_key())
    }

    /// Get the secret key bytes (BE CAREFUL with this!)
    pub fn secret_bytes(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.signing_key.to_bytes());
        out
    }

    pub(crate) fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair({})", self.address())
    }
}

fn uncompressed_public_key(key: &VerifyingKey) -> Vec<u8> {
    key.as_affine().to_encoded_point(false).as_bytes().to_vec()
}

/// Derive the account address of a verifying key
pub fn address_from_verifying_key(key: &VerifyingKey) -> Address {
    let encoded = uncompressed_public_key(key);
    address_from_public_key(&encoded)
}

/// Derive an address from an uncompressed public key, with or without the 0x04 tag
pub fn address_from_public_key(public_key: &[u8]) -> Address {
    let body = match public_key.len() {
        65 => &public_key[1..],
        _ => public_key,
    };
    let hash = keccak256(body);
    let mut bytes = [0u8; 20];
    bytes.copy_from_slice(&hash.as_bytes()[12..]);
    Address::from_bytes(bytes)
}

/// Secure secret key storage (zeroizes on drop)
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
    bytes: [u8; 32],
}

impl SecretKey {
    pub fn new(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    pub fn to_keypair(&self) -> SibylResult<KeyPair> {
        KeyPair::from_secret_bytes(&self.bytes)
    }
}

/// Serializable public key info
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicKeyInfo {
    pub public_key: String,
    pub address: String,
}

impl From<&KeyPair> for PublicKeyInfo {
    fn from(keypair: &KeyPair) -> Self {
        Self {
            public_key: hex::encode(keypair.public_key_bytes()),
            address: keypair.address().to_string(),
        }
    }
}
