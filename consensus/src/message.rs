//! Block submission and the canonical message diviners sign

use serde::{Deserialize, Serialize};
use sibyl_core::{
    Address, BlockHash, BlockHeight, Hash, RecoverableSignature, RequestId, SibylError,
    SibylResult,
};
use sibyl_crypto::keys::KeyPair;
use sibyl_crypto::signing::sign_hash;
use sibyl_state::ledger::block_message_hash;

/// Arguments of a block submission
///
/// `signers`, `r`, `s` and `v` are parallel arrays; signers must be strictly
/// ascending.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockSubmission {
    pub previous: BlockHash,
    pub height: BlockHeight,
    pub request_ids: Vec<RequestId>,
    pub response_data_hash: Hash,
    pub packed_responses: Vec<u8>,
    pub signers: Vec<Address>,
    pub r: Vec<[u8; 32]>,
    pub s: Vec<[u8; 32]>,
    pub v: Vec<u8>,
}

impl BlockSubmission {
    /// Unsigned submission
    pub fn new(
        previous: BlockHash,
        height: BlockHeight,
        request_ids: Vec<RequestId>,
        response_data_hash: Hash,
        packed_responses: Vec<u8>,
    ) -> Self {
        Self {
            previous,
            height,
            request_ids,
            response_data_hash,
            packed_responses,
            signers: Vec::new(),
            r: Vec::new(),
            s: Vec::new(),
            v: Vec::new(),
        }
    }

    /// Hash of the packed message every signer signs
    pub fn message_hash(&self) -> Hash {
        block_message_hash(
            &self.previous,
            self.height,
            &self.request_ids,
            &self.response_data_hash,
            &self.packed_responses,
        )
    }

    /// Append one signer with its signature, keeping the arrays parallel
    pub fn push_signature(&mut self, signer: Address, signature: RecoverableSignature) {
        self.signers.push(signer);
        self.r.push(signature.r);
        self.s.push(signature.s);
        self.v.push(signature.v);
    }

    /// Sign with every key, ordering signers by address
    pub fn signed_by(mut self, keypairs: &[KeyPair]) -> SibylResult<Self> {
        let message = self.message_hash();
        let mut sorted: Vec<&KeyPair> = keypairs.iter().collect();
        sorted.sort_by_key(|k| k.address());

        self.signers.clear();
        self.r.clear();
        self.s.clear();
        self.v.clear();
        for keypair in sorted {
            let signature = sign_hash(keypair, &message)?;
            self.push_signature(keypair.address(), signature);
        }
        Ok(self)
    }

    /// Zip the signature arrays back into signatures
    pub fn signatures(&self) -> SibylResult<Vec<RecoverableSignature>> {
        let n = self.signers.len();
        if n == 0 {
            return Err(SibylError::MalformedSignatures("no signers".into()));
        }
        if self.r.len() != n || self.s.len() != n || self.v.len() != n {
            return Err(SibylError::MalformedSignatures(format!(
                "{} signers but {} r, {} s, {} v",
                n,
                self.r.len(),
                self.s.len(),
                self.v.len()
            )));
        }
        Ok((0..n)
            .map(|i| RecoverableSignature::new(self.r[i], self.s[i], self.v[i]))
            .collect())
    }
}
