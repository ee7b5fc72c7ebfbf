//! Recoverable secp256k1 signatures over block message hashes

use k256::ecdsa::{RecoveryId, Signature, VerifyingKey};
use sibyl_core::{Address, Hash, RecoverableSignature, SibylError, SibylResult};

use crate::hashing::personal_message_digest;
use crate::keys::{address_from_verifying_key, KeyPair};

/// Sign a 32-byte message hash under the personal-sign envelope
///
/// The returned `v` is offset by 27, as carried in submissions.
pub fn sign_hash(keypair: &KeyPair, message_hash: &Hash) -> SibylResult<RecoverableSignature> {
    let digest = personal_message_digest(message_hash);
    let (signature, recovery_id) = keypair
        .signing_key()
        .sign_prehash_recoverable(digest.as_bytes())
        .map_err(|_| SibylError::InvalidSignature)?;

    let bytes = signature.to_bytes();
    let mut r = [0u8; 32];
    let mut s = [0u8; 32];
    r.copy_from_slice(&bytes[..32]);
    s.copy_from_slice(&bytes[32..]);

    Ok(RecoverableSignature::new(r, s, recovery_id.to_byte() + 27))
}

/// Recover the address that signed `message_hash`
pub fn recover_signer(message_hash: &Hash, signature: &RecoverableSignature) -> SibylResult<Address> {
    let digest = personal_message_digest(message_hash);

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&signature.r);
    bytes[32..].copy_from_slice(&signature.s);
    let sig = Signature::from_slice(&bytes).map_err(|_| SibylError::InvalidSignature)?;

    let recovery_id =
        RecoveryId::from_byte(signature.recovery_byte()).ok_or(SibylError::InvalidSignature)?;

    let key = VerifyingKey::recover_from_prehash(digest.as_bytes(), &sig, recovery_id)
        .map_err(|_| SibylError::InvalidSignature)?;

    Ok(address_from_verifying_key(&key))
}

/// Verify that `signature` over `message_hash` was produced by `address`
pub fn verify(address: &Address, message_hash: &Hash, signature: &RecoverableSignature) -> SibylResult<()> {
    let recovered = recover_signer(message_hash, signature)?;
    if &recovered != address {
        return Err(SibylError::InvalidSignature);
    }
    Ok(())
}

/// Check if a signature is valid (returns bool instead of Result)
pub fn is_valid_signature(address: &Address, message_hash: &Hash, signature: &RecoverableSignature) -> bool {
    verify(address, message_hash, signature).is_ok()
}
