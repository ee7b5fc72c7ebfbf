//! Committee key derivation using HKDF
//!
//! Used to build reproducible devnet committees from a single phrase.

use hkdf::Hkdf;
use sha2::Sha256;
use sibyl_core::{SibylError, SibylResult};
use zeroize::Zeroize;

use crate::keys::{KeyPair, SecretKey};

const PHRASE_SALT: &[u8] = b"sibyl-seed";

/// HKDF-SHA256 expansion of `ikm` into 32 bytes
pub fn hkdf_32(ikm: &[u8], salt: Option<&[u8]>, info: &[u8]) -> SibylResult<[u8; 32]> {
    let mut out = [0u8; 32];
    Hkdf::<Sha256>::new(salt, ikm)
        .expand(info, &mut out)
        .map_err(|e| SibylError::KeyDerivationFailed(e.to_string()))?;
    Ok(out)
}

/// Seed from which a whole committee is derived
pub struct MasterKey {
    seed: [u8; 32],
}

impl MasterKey {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self { seed }
    }

    pub fn from_phrase(phrase: &str) -> SibylResult<Self> {
        Ok(Self {
            seed: hkdf_32(phrase.as_bytes(), Some(PHRASE_SALT), b"master")?,
        })
    }

    /// Keypair of the diviner at `index`
    ///
    /// An expansion that is not a valid secp256k1 scalar is re-derived under
    /// the next attempt counter.
    pub fn derive_keypair(&self, index: u32) -> SibylResult<KeyPair> {
        for attempt in 0u32..16 {
            let info = format!("sibyl/diviner/{}/{}", index, attempt);
            let mut bytes = hkdf_32(&self.seed, None, info.as_bytes())?;
            let keypair = SecretKey::new(bytes).to_keypair();
            bytes.zeroize();
            if let Ok(keypair) = keypair {
                return Ok(keypair);
            }
        }
        Err(SibylError::KeyDerivationFailed(format!(
            "no valid scalar for diviner {}",
            index
        )))
    }

    /// Keypairs of diviners `0..count`
    pub fn derive_committee(&self, count: u32) -> SibylResult<Vec<KeyPair>> {
        (0..count).map(|i| self.derive_keypair(i)).collect()
    }
}

impl Drop for MasterKey {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}
