//! Two-asset balance book
//!
//! Holds token and native balances of every account the engine touches,
//! including its own escrow account.

use serde::{Deserialize, Serialize};
use sibyl_core::{Address, Amount, Asset, SibylError, SibylResult};
use std::collections::BTreeMap;

/// Account holding escrowed bounties, stake and unpaid rewards
pub const ESCROW_ACCOUNT: Address = Address([0xee; 20]);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Balances {
    token: BTreeMap<Address, Amount>,
    native: BTreeMap<Address, Amount>,
}

impl Balances {
    pub fn new() -> Self {
        Self::default()
    }

    fn book(&self, asset: Asset) -> &BTreeMap<Address, Amount> {
        match asset {
            Asset::Token => &self.token,
            Asset::Native => &self.native,
        }
    }

    fn book_mut(&mut self, asset: Asset) -> &mut BTreeMap<Address, Amount> {
        match asset {
            Asset::Token => &mut self.token,
            Asset::Native => &mut self.native,
        }
    }

    pub fn balance_of(&self, asset: Asset, account: &Address) -> Amount {
        self.book(asset).get(account).copied().unwrap_or(Amount::ZERO)
    }

    /// Mint into an account (genesis allocations)
    pub fn credit(&mut self, asset: Asset, account: Address, amount: Amount) -> SibylResult<()> {
        let entry = self.book_mut(asset).entry(account).or_insert(Amount::ZERO);
        *entry = entry
            .checked_add(amount)
            .ok_or_else(|| SibylError::Internal("balance overflow".into()))?;
        Ok(())
    }

    pub fn debit(&mut self, asset: Asset, account: Address, amount: Amount) -> SibylResult<()> {
        let available = self.balance_of(asset, &account);
        let remaining = available
            .checked_sub(amount)
            .ok_or_else(|| SibylError::insufficient(amount.0, available.0))?;
        if remaining.is_zero() {
            self.book_mut(asset).remove(&account);
        } else {
            self.book_mut(asset).insert(account, remaining);
        }
        Ok(())
    }

    pub fn transfer(
        &mut self,
        asset: Asset,
        from: Address,
        to: Address,
        amount: Amount,
    ) -> SibylResult<()> {
        if amount.is_zero() {
            return Ok(());
        }
        self.debit(asset, from, amount)?;
        self.credit(asset, to, amount)
    }

    /// Sum of all balances of one asset
    pub fn total(&self, asset: Asset) -> Amount {
        self.book(asset)
            .values()
            .fold(Amount::ZERO, |acc, a| acc.saturating_add(*a))
    }
}
