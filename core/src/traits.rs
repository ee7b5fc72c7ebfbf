//! Core traits defining SIBYL interfaces

use crate::config::GovernanceParams;
use crate::types::*;
use parking_lot::RwLock;
use std::sync::Arc;

/// Result type for SIBYL operations
pub type SibylResult<T> = Result<T, crate::error::SibylError>;

/// Trait for hashable types
pub trait Hashable {
    /// Compute the hash of this object
    fn hash(&self) -> Hash;
}

/// Source of governance thresholds
///
/// The engine only ever reads a snapshot; writes belong to the parameter owner.
pub trait ParameterSource: Send + Sync {
    fn snapshot(&self) -> GovernanceParams;
}

impl ParameterSource for GovernanceParams {
    fn snapshot(&self) -> GovernanceParams {
        self.clone()
    }
}

impl ParameterSource for RwLock<GovernanceParams> {
    fn snapshot(&self) -> GovernanceParams {
        self.read().clone()
    }
}

/// Governance store shared between its owner and the engine
pub type SharedGovernance = Arc<RwLock<GovernanceParams>>;

/// Create a shared governance store
pub fn create_governance(params: GovernanceParams) -> SharedGovernance {
    Arc::new(RwLock::new(params))
}

/// Token custody used by the commit-reveal voting module
pub trait TokenCustody {
    /// Lock voting rights for `voter`
    fn request_voting_rights(&mut self, voter: Address, amount: Option<Amount>) -> SibylResult<Amount>;

    /// Release unlocked voting rights back to `voter`
    fn withdraw_voting_rights(&mut self, voter: Address, amount: Amount) -> SibylResult<Amount>;

    /// Release tokens locked in a finished poll
    fn rescue_tokens(&mut self, voter: Address, poll_id: Option<u64>) -> SibylResult<Amount>;

    /// Release tokens locked in several finished polls
    fn rescue_tokens_in_multiple_polls(&mut self, voter: Address, poll_ids: &[u64]) -> SibylResult<Amount>;
}
