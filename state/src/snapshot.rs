//! State snapshot functionality

use serde::{Deserialize, Serialize};
use sibyl_core::{BlockHash, Hash, SibylError, SibylResult, Timestamp};

use crate::store::ConsensusState;

/// A complete consensus state snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Number of blocks in the ledger at snapshot time
    pub height: u64,
    /// Head of the ledger
    pub latest_block: BlockHash,
    /// Digest of the encoded state
    pub digest: Hash,
    pub state: ConsensusState,
    /// Timestamp of snapshot creation
    pub timestamp: Timestamp,
}

impl StateSnapshot {
    pub fn new(state: &ConsensusState) -> SibylResult<Self> {
        Ok(Self {
            height: state.height(),
            latest_block: state.ledger.latest(),
            digest: state.digest()?,
            state: state.clone(),
            timestamp: Timestamp::now(),
        })
    }

    /// Verify snapshot integrity
    pub fn verify(&self) -> bool {
        match self.state.digest() {
            Ok(digest) => digest == self.digest && self.state.ledger.latest() == self.latest_block,
            Err(_) => false,
        }
    }

    /// Restored state, rejected when the digest does not match
    pub fn restore(self) -> SibylResult<ConsensusState> {
        if !self.verify() {
            return Err(SibylError::DeserializationError(
                "snapshot digest mismatch".into(),
            ));
        }
        Ok(self.state)
    }

    pub fn to_bytes(&self) -> SibylResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SibylError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> SibylResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SibylError::DeserializationError(e.to_string()))
    }
}
