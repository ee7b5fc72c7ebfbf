//! Token custody for the commit-reveal voting module
//!
//! Voters deposit voting rights, lock part of them in polls and get them back
//! once a poll is over (or rescue them from a finished poll they never revealed).

use serde::{Deserialize, Serialize};
use sibyl_core::{Address, Amount, SibylError, SibylResult, TokenCustody};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VoteCustody {
    /// Deposited voting rights per voter
    rights: BTreeMap<Address, Amount>,
    /// Tokens locked per (voter, poll)
    locked: BTreeMap<(Address, u64), Amount>,
    ended_polls: BTreeSet<u64>,
}

impl VoteCustody {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn voting_rights(&self, voter: &Address) -> Amount {
        self.rights.get(voter).copied().unwrap_or(Amount::ZERO)
    }

    /// Largest amount the voter has locked in any single poll
    pub fn locked_tokens(&self, voter: &Address) -> Amount {
        self.locked
            .iter()
            .filter(|((v, _), _)| v == voter)
            .map(|(_, a)| *a)
            .max()
            .unwrap_or(Amount::ZERO)
    }

    /// Commit `amount` of the voter's rights to `poll_id`
    pub fn lock_for_poll(&mut self, voter: Address, poll_id: u64, amount: Amount) -> SibylResult<()> {
        if self.ended_polls.contains(&poll_id) {
            return Err(SibylError::CustodyError(format!("poll {} has ended", poll_id)));
        }
        let rights = self.voting_rights(&voter);
        if amount > rights {
            return Err(SibylError::insufficient(amount.0, rights.0));
        }
        self.locked.insert((voter, poll_id), amount);
        Ok(())
    }

    pub fn end_poll(&mut self, poll_id: u64) {
        self.ended_polls.insert(poll_id);
    }

    pub fn to_bytes(&self) -> SibylResult<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn from_bytes(bytes: &[u8]) -> SibylResult<Self> {
        bincode::deserialize(bytes).map_err(|e| SibylError::DeserializationError(e.to_string()))
    }

    fn release(&mut self, voter: Address, poll_id: u64) -> SibylResult<Amount> {
        match self.locked.get(&(voter, poll_id)) {
            None => Ok(Amount::ZERO),
            Some(_) if !self.ended_polls.contains(&poll_id) => Err(SibylError::CustodyError(
                format!("poll {} is still active", poll_id),
            )),
            Some(amount) => {
                let amount = *amount;
                self.locked.remove(&(voter, poll_id));
                Ok(amount)
            }
        }
    }
}

impl TokenCustody for VoteCustody {
    fn request_voting_rights(&mut self, voter: Address, amount: Option<Amount>) -> SibylResult<Amount> {
        let amount = match amount {
            Some(a) if !a.is_zero() => a,
            _ => {
                return Err(SibylError::CustodyError(
                    "voting rights request needs a non-zero amount".into(),
                ))
            }
        };
        let entry = self.rights.entry(voter).or_insert(Amount::ZERO);
        *entry = entry.saturating_add(amount);
        Ok(*entry)
    }

    fn withdraw_voting_rights(&mut self, voter: Address, amount: Amount) -> SibylResult<Amount> {
        let rights = self.voting_rights(&voter);
        let unlocked = rights.saturating_sub(self.locked_tokens(&voter));
        if amount.is_zero() || amount > unlocked {
            return Err(SibylError::insufficient(amount.0, unlocked.0));
        }
        self.rights.insert(voter, rights.saturating_sub(amount));
        Ok(amount)
    }

    fn rescue_tokens(&mut self, voter: Address, poll_id: Option<u64>) -> SibylResult<Amount> {
        let poll_id =
            poll_id.ok_or_else(|| SibylError::CustodyError("rescue needs a poll id".into()))?;
        self.release(voter, poll_id)
    }

    fn rescue_tokens_in_multiple_polls(&mut self, voter: Address, poll_ids: &[u64]) -> SibylResult<Amount> {
        if poll_ids.is_empty() {
            return Err(SibylError::CustodyError("rescue needs at least one poll id".into()));
        }
        // Validate first so a failing poll leaves every lock in place
        for poll_id in poll_ids {
            if self.locked.contains_key(&(voter, *poll_id)) && !self.ended_polls.contains(poll_id) {
                return Err(SibylError::CustodyError(format!(
                    "poll {} is still active",
                    poll_id
                )));
            }
        }
        let mut total = Amount::ZERO;
        for poll_id in poll_ids {
            total = total.saturating_add(self.release(voter, *poll_id)?);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_voting_rights() {
        let mut custody = VoteCustody::new();
        let voter = Address([1; 20]);
        assert!(custody.request_voting_rights(voter, None).is_err());
        assert!(custody.request_voting_rights(voter, Some(Amount::ZERO)).is_err());
        let total = custody
            .request_voting_rights(voter, Some(Amount::new(10_000_000)))
            .unwrap();
        assert_eq!(total, Amount::new(10_000_000));
    }

    #[test]
    fn test_rescue_requires_poll_ids() {
        let mut custody = VoteCustody::new();
        let voter = Address([1; 20]);
        assert_eq!(custody.rescue_tokens(voter, Some(1)).unwrap(), Amount::ZERO);
        assert!(custody.rescue_tokens(voter, None).is_err());
        assert!(custody.rescue_tokens_in_multiple_polls(voter, &[]).is_err());
    }

    #[test]
    fn test_locked_tokens_released_after_poll_ends() {
        let mut custody = VoteCustody::new();
        let voter = Address([1; 20]);
        custody.request_voting_rights(voter, Some(Amount::new(50))).unwrap();
        custody.lock_for_poll(voter, 7, Amount::new(30)).unwrap();

        assert!(custody.rescue_tokens(voter, Some(7)).is_err());
        assert!(custody.withdraw_voting_rights(voter, Amount::new(21)).is_err());
        assert_eq!(custody.withdraw_voting_rights(voter, Amount::new(20)).unwrap(), Amount::new(20));

        custody.end_poll(7);
        assert_eq!(
            custody.rescue_tokens_in_multiple_polls(voter, &[7, 8]).unwrap(),
            Amount::new(30)
        );
        assert_eq!(custody.locked_tokens(&voter), Amount::ZERO);
    }
}
