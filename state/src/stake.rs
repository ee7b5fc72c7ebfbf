//! Stake cache - per-diviner staked, active and reward balances

use serde::{Deserialize, Serialize};
use sibyl_core::{Address, Amount, SibylError, SibylResult, Timestamp};
use std::collections::BTreeMap;

/// Stake record of one committee member
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DivinerStake {
    pub address: Address,
    /// Total bonded tokens, active or not
    pub staked: Amount,
    /// Portion of `staked` counted towards quorum
    pub active: Amount,
    /// Activation is blocked before this time
    pub stake_cooldown_until: Timestamp,
    /// Withdrawal is blocked before this time
    pub unstake_cooldown_until: Timestamp,
    pub reward_accrued: Amount,
    pub reward_withdrawn: Amount,
}

impl DivinerStake {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }

    pub fn unclaimed_reward(&self) -> Amount {
        self.reward_accrued.saturating_sub(self.reward_withdrawn)
    }

    /// Amount a withdrawal may draw: active stake plus unclaimed reward
    pub fn withdrawable(&self) -> Amount {
        self.active.saturating_add(self.unclaimed_reward())
    }

    pub fn inactive(&self) -> Amount {
        self.staked.saturating_sub(self.active)
    }
}

/// Stake cache for a fixed committee
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StakeCache {
    diviners: BTreeMap<Address, DivinerStake>,
}

impl StakeCache {
    /// Create a cache for the given committee, all balances zero
    pub fn new(committee: impl IntoIterator<Item = Address>) -> Self {
        let diviners = committee
            .into_iter()
            .map(|address| (address, DivinerStake::new(address)))
            .collect();
        Self { diviners }
    }

    pub fn is_diviner(&self, address: &Address) -> bool {
        self.diviners.contains_key(address)
    }

    pub fn get(&self, address: &Address) -> Option<&DivinerStake> {
        self.diviners.get(address)
    }

    pub fn committee(&self) -> impl Iterator<Item = &Address> {
        self.diviners.keys()
    }

    pub fn len(&self) -> usize {
        self.diviners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.diviners.is_empty()
    }

    /// Active stake of a diviner, zero for unknown addresses
    pub fn active_stake(&self, address: &Address) -> Amount {
        self.diviners
            .get(address)
            .map(|d| d.active)
            .unwrap_or(Amount::ZERO)
    }

    /// Total active stake of the committee
    pub fn total_active(&self) -> Amount {
        self.diviners
            .values()
            .fold(Amount::ZERO, |acc, d| acc.saturating_add(d.active))
    }

    fn entry_mut(&mut self, address: &Address) -> SibylResult<&mut DivinerStake> {
        self.diviners
            .get_mut(address)
            .ok_or(SibylError::NotADiviner(*address))
    }

    /// Bond `amount` more tokens; restarts the activation cooldown
    pub fn stake(
        &mut self,
        diviner: &Address,
        amount: Amount,
        now: Timestamp,
        cooldown_secs: u64,
    ) -> SibylResult<&DivinerStake> {
        let entry = self.entry_mut(diviner)?;
        entry.staked = entry
            .staked
            .checked_add(amount)
            .ok_or_else(|| SibylError::Internal("stake overflow".into()))?;
        entry.stake_cooldown_until = now.plus_secs(cooldown_secs);
        Ok(entry)
    }

    /// Move `amount` of bonded tokens into the active set
    pub fn activate(
        &mut self,
        diviner: &Address,
        amount: Amount,
        now: Timestamp,
    ) -> SibylResult<&DivinerStake> {
        let entry = self.entry_mut(diviner)?;
        let inactive = entry.inactive();
        if amount > inactive {
            return Err(SibylError::insufficient(amount.0, inactive.0));
        }
        if now < entry.stake_cooldown_until {
            return Err(SibylError::CooldownActive {
                until: entry.stake_cooldown_until,
            });
        }
        entry.active = entry.active.saturating_add(amount);
        Ok(entry)
    }

    /// Take `amount` out of the active set; starts the withdrawal cooldown
    pub fn deactivate(
        &mut self,
        diviner: &Address,
        amount: Amount,
        now: Timestamp,
        cooldown_secs: u64,
    ) -> SibylResult<&DivinerStake> {
        let entry = self.entry_mut(diviner)?;
        if amount > entry.active {
            return Err(SibylError::insufficient(amount.0, entry.active.0));
        }
        entry.active = entry.active.saturating_sub(amount);
        entry.unstake_cooldown_until = now.plus_secs(cooldown_secs);
        Ok(entry)
    }

    /// Withdraw `amount`, drawing unclaimed reward first, then active stake
    pub fn withdraw(
        &mut self,
        diviner: &Address,
        amount: Amount,
        now: Timestamp,
    ) -> SibylResult<&DivinerStake> {
        let entry = self.entry_mut(diviner)?;
        let available = entry.withdrawable();
        if amount > available {
            return Err(SibylError::insufficient(amount.0, available.0));
        }
        if now < entry.unstake_cooldown_until {
            return Err(SibylError::CooldownActive {
                until: entry.unstake_cooldown_until,
            });
        }

        let from_reward = amount.min(entry.unclaimed_reward());
        let from_stake = amount.saturating_sub(from_reward);

        entry.reward_withdrawn = entry.reward_withdrawn.saturating_add(from_reward);
        entry.active = entry.active.saturating_sub(from_stake);
        entry.staked = entry.staked.saturating_sub(from_stake);
        Ok(entry)
    }

    pub fn accrue_reward(&mut self, diviner: &Address, amount: Amount) -> SibylResult<()> {
        let entry = self.entry_mut(diviner)?;
        entry.reward_accrued = entry.reward_accrued.saturating_add(amount);
        Ok(())
    }

    /// Bond and activate in one step, skipping cooldowns (genesis only)
    pub fn bond_genesis(&mut self, diviner: &Address, amount: Amount) -> SibylResult<()> {
        let entry = self.entry_mut(diviner)?;
        entry.staked = entry.staked.saturating_add(amount);
        entry.active = entry.active.saturating_add(amount);
        Ok(())
    }
}
