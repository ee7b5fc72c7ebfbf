//! Consensus state aggregate
//!
//! Everything a block touches lives in one owned value so the engine can
//! apply a block to a clone and swap it in only when every step succeeded.

use serde::{Deserialize, Serialize};
use sibyl_core::{Address, Amount, Asset, Hash, SibylError, SibylResult};
use sibyl_crypto::hashing::hash;

use crate::balances::{Balances, ESCROW_ACCOUNT};
use crate::ledger::BlockLedger;
use crate::registry::RequestRegistry;
use crate::stake::StakeCache;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusState {
    pub stakes: StakeCache,
    pub requests: RequestRegistry,
    pub ledger: BlockLedger,
    pub balances: Balances,
    /// Counter mixed into withdrawal request ids
    pub withdrawal_nonce: u64,
}

impl ConsensusState {
    /// Empty state for a fixed committee
    pub fn new(committee: impl IntoIterator<Item = Address>) -> Self {
        Self {
            stakes: StakeCache::new(committee),
            ..Default::default()
        }
    }

    /// Committee with pre-bonded stake and funded accounts
    ///
    /// Bonded stake is minted straight into escrow so the token book
    /// always covers what the stake cache owes.
    pub fn genesis(
        committee: impl IntoIterator<Item = Address>,
        stakes: &[(Address, Amount)],
        allocations: &[(Address, Asset, Amount)],
    ) -> SibylResult<Self> {
        let mut state = Self::new(committee);
        for (diviner, amount) in stakes {
            state.stakes.bond_genesis(diviner, *amount)?;
            state.balances.credit(Asset::Token, ESCROW_ACCOUNT, *amount)?;
        }
        for (account, asset, amount) in allocations {
            state.balances.credit(*asset, *account, *amount)?;
        }
        Ok(state)
    }

    /// Height of the ledger (number of accepted blocks)
    pub fn height(&self) -> u64 {
        self.ledger.len() as u64
    }

    pub fn to_bytes(&self) -> SibylResult<Vec<u8>> {
        bincode::serialize(self).map_err(|e| SibylError::SerializationError(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> SibylResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SibylError::DeserializationError(e.to_string()))
    }

    /// Keccak digest of the encoded state
    pub fn digest(&self) -> SibylResult<Hash> {
        Ok(hash(&self.to_bytes()?))
    }
}
