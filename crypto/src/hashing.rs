//! Hashing functions using Keccak-256

use sibyl_core::Hash;
use sha3::{Digest, Keccak256};

/// Prefix of the personal-sign envelope diviners sign block messages under
pub const PERSONAL_MESSAGE_PREFIX: &[u8] = b"\x19Ethereum Signed Message:\n32";

/// Compute Keccak-256 hash of data
pub fn keccak256(data: &[u8]) -> Hash {
    let mut hasher = Keccak256::new();
    hasher.update(data);
    Hash::from_bytes(hasher.finalize().into())
}

/// Default hash function (Keccak-256)
pub fn hash(data: &[u8]) -> Hash {
    keccak256(data)
}

/// Hash the tight concatenation of several parts
pub fn hash_multiple(parts: &[&[u8]]) -> Hash {
    let mut hasher = IncrementalHasher::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize()
}

/// Digest actually signed for a 32-byte message hash
pub fn personal_message_digest(message_hash: &Hash) -> Hash {
    hash_multiple(&[PERSONAL_MESSAGE_PREFIX, message_hash.as_bytes()])
}

/// Incremental hasher for large data
pub struct IncrementalHasher {
    hasher: Keccak256,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            hasher: Keccak256::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
    }

    pub fn finalize(self) -> Hash {
        Hash::from_bytes(self.hasher.finalize().into())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}
