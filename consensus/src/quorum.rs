//! Quorum verification
//!
//! A submission is backed when every signature recovers its claimed signer,
//! signers are strictly ascending (which also rules out duplicates), every
//! signer belongs to the committee and their combined active stake reaches
//! the quorum percentage of the committee's total active stake.

use sibyl_core::{wide_mul, Address, Amount, Hash, SibylError, SibylResult};
use sibyl_crypto::signing::recover_signer;
use sibyl_state::stake::StakeCache;

use crate::message::BlockSubmission;

/// Stake backing an accepted signature set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuorumReport {
    /// Signers in submission order with their active stake
    pub signers: Vec<(Address, Amount)>,
    pub signed: Amount,
    pub total: Amount,
    pub required_pct: u8,
}

impl QuorumReport {
    pub fn first_signer(&self) -> Option<Address> {
        self.signers.first().map(|(a, _)| *a)
    }
}

pub struct QuorumVerifier {
    required_pct: u8,
}

impl QuorumVerifier {
    pub fn new(required_pct: u8) -> Self {
        Self {
            required_pct: required_pct.min(100),
        }
    }

    pub fn required_pct(&self) -> u8 {
        self.required_pct
    }

    /// Check the signature set of `submission` against `stakes`
    pub fn verify_submission(
        &self,
        submission: &BlockSubmission,
        stakes: &StakeCache,
    ) -> SibylResult<QuorumReport> {
        self.verify(
            &submission.message_hash(),
            &submission.signers,
            &submission.r,
            &submission.s,
            &submission.v,
            stakes,
        )
    }

    pub fn verify(
        &self,
        message_hash: &Hash,
        signers: &[Address],
        r: &[[u8; 32]],
        s: &[[u8; 32]],
        v: &[u8],
        stakes: &StakeCache,
    ) -> SibylResult<QuorumReport> {
        let n = signers.len();
        if n == 0 {
            return Err(SibylError::MalformedSignatures("no signers".into()));
        }
        if r.len() != n || s.len() != n || v.len() != n {
            return Err(SibylError::MalformedSignatures(format!(
                "{} signers but {} r, {} s, {} v",
                n,
                r.len(),
                s.len(),
                v.len()
            )));
        }

        let mut backing = Vec::with_capacity(n);
        let mut signed = Amount::ZERO;
        for (index, signer) in signers.iter().enumerate() {
            let signature = sibyl_core::RecoverableSignature::new(r[index], s[index], v[index]);
            // An unrecoverable signature is reported like a wrong signer
            let recovered = recover_signer(message_hash, &signature).unwrap_or(Address::ZERO);
            if &recovered != signer {
                return Err(SibylError::SignatureMismatch {
                    index,
                    expected: *signer,
                    recovered,
                });
            }
            if index > 0 && signers[index - 1] >= *signer {
                return Err(SibylError::SignersNotSorted { index });
            }
            if !stakes.is_diviner(signer) {
                return Err(SibylError::NotADiviner(*signer));
            }

            let stake = stakes.active_stake(signer);
            signed = signed.saturating_add(stake);
            backing.push((*signer, stake));
        }

        let total = stakes.total_active();
        if !meets_quorum(signed, total, self.required_pct) {
            return Err(SibylError::QuorumNotMet {
                signed: signed.0,
                total: total.0,
                required_pct: self.required_pct,
            });
        }

        Ok(QuorumReport {
            signers: backing,
            signed,
            total,
            required_pct: self.required_pct,
        })
    }
}

/// `signed * 100 >= total * pct`, never met for an empty stake set
pub fn meets_quorum(signed: Amount, total: Amount, pct: u8) -> bool {
    if total.is_zero() {
        return false;
    }
    wide_mul(signed.0, 100) >= wide_mul(total.0, pct as u128)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sibyl_core::BlockHeight;
    use sibyl_crypto::derivation::MasterKey;
    use sibyl_crypto::keys::KeyPair;

    fn committee(n: u32, stake: u128) -> (Vec<KeyPair>, StakeCache) {
        let keys = MasterKey::from_phrase("quorum test").unwrap().derive_committee(n).unwrap();
        let mut cache = StakeCache::new(keys.iter().map(|k| k.address()));
        for k in &keys {
            cache.bond_genesis(&k.address(), Amount::new(stake)).unwrap();
        }
        (keys, cache)
    }

    fn submission() -> BlockSubmission {
        BlockSubmission::new(
            Hash::ZERO,
            BlockHeight(100),
            vec![Hash::from_u64(1)],
            Hash::from_u64(2),
            vec![1],
        )
    }

    #[test]
    fn test_quorum_met_and_missed() {
        let (keys, cache) = committee(5, 1000);
        let verifier = QuorumVerifier::new(50);

        let three = submission().signed_by(&keys[..3]).unwrap();
        let report = verifier.verify_submission(&three, &cache).unwrap();
        assert_eq!(report.signed, Amount::new(3000));
        assert_eq!(report.total, Amount::new(5000));

        let two = submission().signed_by(&keys[..2]).unwrap();
        assert!(matches!(
            verifier.verify_submission(&two, &cache),
            Err(SibylError::QuorumNotMet { signed: 2000, total: 5000, required_pct: 50 })
        ));
    }

    #[test]
    fn test_exact_threshold_passes() {
        let (keys, cache) = committee(4, 1000);
        let two = submission().signed_by(&keys[..2]).unwrap();
        assert!(QuorumVerifier::new(50).verify_submission(&two, &cache).is_ok());
        assert!(QuorumVerifier::new(51).verify_submission(&two, &cache).is_err());
    }

    #[test]
    fn test_unsorted_and_duplicate_signers() {
        let (keys, cache) = committee(3, 1000);
        let verifier = QuorumVerifier::new(50);
        let signed = submission().signed_by(&keys).unwrap();

        let mut reversed = submission();
        for i in (0..signed.signers.len()).rev() {
            reversed.push_signature(
                signed.signers[i],
                sibyl_core::RecoverableSignature::new(signed.r[i], signed.s[i], signed.v[i]),
            );
        }
        assert!(matches!(
            verifier.verify_submission(&reversed, &cache),
            Err(SibylError::SignersNotSorted { index: 1 })
        ));

        let mut duplicated = submission();
        for _ in 0..2 {
            duplicated.push_signature(
                signed.signers[0],
                sibyl_core::RecoverableSignature::new(signed.r[0], signed.s[0], signed.v[0]),
            );
        }
        assert!(matches!(
            verifier.verify_submission(&duplicated, &cache),
            Err(SibylError::SignersNotSorted { index: 1 })
        ));
    }

    #[test]
    fn test_signature_must_match_position() {
        let (keys, cache) = committee(3, 1000);
        let mut signed = submission().signed_by(&keys).unwrap();
        signed.r.swap(0, 1);
        signed.s.swap(0, 1);
        signed.v.swap(0, 1);
        assert!(matches!(
            QuorumVerifier::new(50).verify_submission(&signed, &cache),
            Err(SibylError::SignatureMismatch { index: 0, .. })
        ));
    }

    #[test]
    fn test_outsider_rejects_submission() {
        let (keys, cache) = committee(3, 1000);
        let mut signers = keys.clone();
        signers.push(KeyPair::generate());
        let signed = submission().signed_by(&signers).unwrap();
        assert!(matches!(
            QuorumVerifier::new(50).verify_submission(&signed, &cache),
            Err(SibylError::NotADiviner(_))
        ));
    }

    #[test]
    fn test_zero_total_never_meets_quorum() {
        let (keys, cache) = committee(3, 0);
        let signed = submission().signed_by(&keys).unwrap();
        assert!(matches!(
            QuorumVerifier::new(0).verify_submission(&signed, &cache),
            Err(SibylError::QuorumNotMet { .. })
        ));
    }

    #[test]
    fn test_meets_quorum_without_overflow() {
        let huge = Amount::new(u128::MAX / 2);
        assert!(meets_quorum(huge, huge, 100));
        assert!(!meets_quorum(Amount::new(u128::MAX / 4), huge, 51));
    }
}
