//! Block reward distribution

use sibyl_core::{Address, Amount, RewardPolicy};

use crate::quorum::QuorumReport;

/// Bounties released by the requests a block resolved
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockReward {
    pub native: Amount,
    pub token: Amount,
}

impl BlockReward {
    pub fn add(&mut self, native: Amount, token: Amount) {
        self.native = self.native.saturating_add(native);
        self.token = self.token.saturating_add(token);
    }
}

/// Who receives what out of a [`BlockReward`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RewardDistribution {
    /// Native payouts from escrow
    pub native: Vec<(Address, Amount)>,
    /// Token rewards accrued in the stake cache
    pub token: Vec<(Address, Amount)>,
}

impl RewardDistribution {
    pub fn native_total(&self) -> Amount {
        sum(&self.native)
    }

    pub fn token_total(&self) -> Amount {
        sum(&self.token)
    }
}

fn sum(entries: &[(Address, Amount)]) -> Amount {
    entries
        .iter()
        .fold(Amount::ZERO, |acc, (_, a)| acc.saturating_add(*a))
}

/// Split `reward` between the submitter and the signers of `report`
///
/// Shares are floored; rounding dust goes to the submitter (native) or the
/// first signer (token), so both totals are paid out exactly.
pub fn distribute(
    reward: BlockReward,
    submitter: Address,
    report: &QuorumReport,
    policy: RewardPolicy,
    producer_pct: u128,
) -> RewardDistribution {
    let mut out = RewardDistribution::default();

    match policy {
        RewardPolicy::Submitter => push(&mut out.native, submitter, reward.native),
        RewardPolicy::StakeWeighted => {
            let producer = reward.native.mul_div(producer_pct.min(100), 100);
            let pool = reward.native.saturating_sub(producer);
            let shares = stake_shares(pool, report);
            let paid = sum(&shares);
            push(&mut out.native, submitter, producer.saturating_add(pool.saturating_sub(paid)));
            for (signer, share) in shares {
                push(&mut out.native, signer, share);
            }
        }
    }

    let shares = stake_shares(reward.token, report);
    let paid = sum(&shares);
    let dust = reward.token.saturating_sub(paid);
    for (index, (signer, share)) in shares.into_iter().enumerate() {
        let share = if index == 0 { share.saturating_add(dust) } else { share };
        push(&mut out.token, signer, share);
    }
    if out.token.is_empty() {
        if let Some(first) = report.first_signer() {
            push(&mut out.token, first, dust);
        }
    }

    out
}

/// Floored stake-proportional shares; empty when no stake signed
fn stake_shares(pool: Amount, report: &QuorumReport) -> Vec<(Address, Amount)> {
    if report.signed.is_zero() {
        return Vec::new();
    }
    report
        .signers
        .iter()
        .map(|(signer, stake)| (*signer, pool.mul_div(stake.0, report.signed.0)))
        .collect()
}

fn push(entries: &mut Vec<(Address, Amount)>, account: Address, amount: Amount) {
    if !amount.is_zero() {
        entries.push((account, amount));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(stakes: &[u128]) -> QuorumReport {
        let signers: Vec<(Address, Amount)> = stakes
            .iter()
            .enumerate()
            .map(|(i, s)| (Address([i as u8 + 1; 20]), Amount::new(*s)))
            .collect();
        let signed = signers.iter().fold(Amount::ZERO, |acc, (_, s)| acc.saturating_add(*s));
        QuorumReport {
            signers,
            signed,
            total: signed,
            required_pct: 50,
        }
    }

    #[test]
    fn test_submitter_takes_native_reward() {
        let submitter = Address([0xaa; 20]);
        let reward = BlockReward { native: Amount::new(100), token: Amount::ZERO };
        let out = distribute(reward, submitter, &report(&[1, 1, 1]), RewardPolicy::Submitter, 10);
        assert_eq!(out.native, vec![(submitter, Amount::new(100))]);
        assert!(out.token.is_empty());
    }

    #[test]
    fn test_stake_weighted_conserves_reward() {
        let submitter = Address([0xaa; 20]);
        let reward = BlockReward { native: Amount::new(1_001), token: Amount::new(100) };
        let out = distribute(reward, submitter, &report(&[1, 1, 1]), RewardPolicy::StakeWeighted, 10);

        assert_eq!(out.native_total(), Amount::new(1_001));
        assert_eq!(out.token_total(), Amount::new(100));
        // 100 producer share + 1 rounding unit
        assert_eq!(out.native[0], (submitter, Amount::new(101)));
        // First signer keeps the token dust
        assert_eq!(out.token[0].1, Amount::new(34));
        assert_eq!(out.token[1].1, Amount::new(33));
    }

    #[test]
    fn test_eighteen_decimal_amounts_split_exactly() {
        let e18 = 1_000_000_000_000_000_000u128;
        let submitter = Address([0xaa; 20]);
        let stakes = report(&[100 * e18, 100 * e18, 100 * e18 + 1]);
        let reward = BlockReward {
            native: Amount::new(7 * e18 + 5),
            token: Amount::new(100 * e18),
        };

        for policy in [RewardPolicy::Submitter, RewardPolicy::StakeWeighted] {
            let out = distribute(reward, submitter, &stakes, policy, 10);
            assert_eq!(out.native_total(), reward.native);
            assert_eq!(out.token_total(), reward.token);
            assert_eq!(out.token.len(), 3);
            for (_, share) in &out.token {
                let diff = share.0.abs_diff(100 * e18 / 3);
                assert!(diff <= 2, "share {} too far from a third", share);
            }
        }

        let weighted = distribute(reward, submitter, &stakes, RewardPolicy::StakeWeighted, 10);
        assert!(weighted.native[0].1 >= Amount::new(7 * e18 / 10));
    }

    #[test]
    fn test_tokens_to_first_signer_without_stake() {
        let reward = BlockReward { native: Amount::ZERO, token: Amount::new(7) };
        let out = distribute(reward, Address([0xaa; 20]), &report(&[0, 0]), RewardPolicy::Submitter, 10);
        assert_eq!(out.token, vec![(Address([1; 20]), Amount::new(7))]);
    }
}
