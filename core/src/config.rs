//! Configuration types for SIBYL

use crate::error::SibylError;
use crate::traits::SibylResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

/// Main node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name for logging
    pub name: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Persist the consensus state after every accepted block
    pub persist: bool,

    /// Consensus configuration
    pub consensus: ConsensusConfig,

    /// API configuration
    pub api: ApiConfig,

    /// Logging level
    pub log_level: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "sibyl-node".to_string(),
            data_dir: PathBuf::from("./data"),
            persist: true,
            consensus: ConsensusConfig::default(),
            api: ApiConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl NodeConfig {
    pub fn from_json(json: &str) -> SibylResult<Self> {
        serde_json::from_str(json).map_err(|e| SibylError::ConfigError(e.to_string()))
    }
}

/// How the native mining reward of a block is paid out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RewardPolicy {
    /// Whole reward to the account that submitted the block
    #[default]
    Submitter,
    /// Producer share to the submitter, remainder split by signer stake
    StakeWeighted,
}

/// Consensus configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusConfig {
    /// Native reward distribution
    pub reward_policy: RewardPolicy,

    /// Upper bound on requests resolved by one block
    pub max_requests_per_block: usize,

    /// Capacity of the consensus event channel
    pub event_buffer: usize,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            reward_policy: RewardPolicy::Submitter,
            max_requests_per_block: 256,
            event_buffer: 100,
        }
    }
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    pub enabled: bool,

    /// API listen address
    pub listen_addr: String,

    /// Enable CORS
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "127.0.0.1:8080".to_string(),
            enable_cors: true,
        }
    }
}

/// Named governance thresholds read by the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceParams {
    /// Minimum deposit a request must declare (0 disables the check)
    pub p_min_deposit: u128,
    pub p_apply_stage_sec: u128,
    pub p_commit_stage_sec: u128,
    pub p_reveal_stage_sec: u128,
    pub p_dispensation_pct: u128,
    pub p_vote_success_rate: u128,
    pub p_vote_quorum: u128,
    /// Quorum percentage of total active stake a block must carry
    pub xy_stake_success_pct: u128,
    /// Minimum native mining bounty per request (0 disables the check)
    pub xy_wei_mining_min: u128,
    /// Minimum token bounty per request (0 disables the check)
    pub xy_xyo_request_bounty_min: u128,
    /// Seconds between staking and activation
    pub xy_stake_cooldown: u128,
    /// Seconds between deactivation and withdrawal
    pub xy_unstake_cooldown: u128,
    pub xy_proposals_enabled: u128,
    /// Producer share of the native reward under the stake-weighted policy
    pub xy_block_producer_reward_pct: u128,
}

impl Default for GovernanceParams {
    fn default() -> Self {
        Self {
            p_min_deposit: 0,
            p_apply_stage_sec: 600,
            p_commit_stage_sec: 600,
            p_reveal_stage_sec: 600,
            p_dispensation_pct: 50,
            p_vote_success_rate: 66,
            p_vote_quorum: 50,
            xy_stake_success_pct: 50,
            xy_wei_mining_min: 0,
            xy_xyo_request_bounty_min: 0,
            xy_stake_cooldown: 0,
            xy_unstake_cooldown: 0,
            xy_proposals_enabled: 1,
            xy_block_producer_reward_pct: 10,
        }
    }
}

/// Parameter names accepted by [`GovernanceParams::owner_set`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GovernanceParam {
    MinDeposit,
    ApplyStageSec,
    CommitStageSec,
    RevealStageSec,
    DispensationPct,
    VoteSuccessRate,
    VoteQuorum,
    StakeSuccessPct,
    WeiMiningMin,
    XyoRequestBountyMin,
    StakeCooldown,
    UnstakeCooldown,
    ProposalsEnabled,
    BlockProducerRewardPct,
}

impl GovernanceParam {
    fn is_percentage(&self) -> bool {
        matches!(
            self,
            GovernanceParam::DispensationPct
                | GovernanceParam::VoteSuccessRate
                | GovernanceParam::VoteQuorum
                | GovernanceParam::StakeSuccessPct
                | GovernanceParam::BlockProducerRewardPct
        )
    }
}

impl FromStr for GovernanceParam {
    type Err = SibylError;

    /// Accepts both the snake_case field name and the camelCase registry name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let param = match s {
            "p_min_deposit" | "pMinDeposit" => GovernanceParam::MinDeposit,
            "p_apply_stage_sec" | "pApplyStageSec" => GovernanceParam::ApplyStageSec,
            "p_commit_stage_sec" | "pCommitStageSec" => GovernanceParam::CommitStageSec,
            "p_reveal_stage_sec" | "pRevealStageSec" => GovernanceParam::RevealStageSec,
            "p_dispensation_pct" | "pDispensationPct" => GovernanceParam::DispensationPct,
            "p_vote_success_rate" | "pVoteSuccessRate" => GovernanceParam::VoteSuccessRate,
            "p_vote_quorum" | "pVoteQuorum" => GovernanceParam::VoteQuorum,
            "xy_stake_success_pct" | "xyStakeSuccessPct" => GovernanceParam::StakeSuccessPct,
            "xy_wei_mining_min" | "xyWeiMiningMin" => GovernanceParam::WeiMiningMin,
            "xy_xyo_request_bounty_min" | "xyXYORequestBountyMin" => {
                GovernanceParam::XyoRequestBountyMin
            }
            "xy_stake_cooldown" | "xyStakeCooldown" => GovernanceParam::StakeCooldown,
            "xy_unstake_cooldown" | "xyUnstakeCooldown" => GovernanceParam::UnstakeCooldown,
            "xy_proposals_enabled" | "xyProposalsEnabled" => GovernanceParam::ProposalsEnabled,
            "xy_block_producer_reward_pct" | "xyBlockProducerRewardPct" => {
                GovernanceParam::BlockProducerRewardPct
            }
            other => {
                return Err(SibylError::InvalidParameter(format!(
                    "unknown parameter {}",
                    other
                )))
            }
        };
        Ok(param)
    }
}

impl GovernanceParams {
    /// Owner override of a single named parameter
    pub fn owner_set(&mut self, name: &str, value: u128) -> SibylResult<()> {
        let param: GovernanceParam = name.parse()?;
        if param.is_percentage() && value > 100 {
            return Err(SibylError::InvalidParameter(format!(
                "{} must be a percentage, got {}",
                name, value
            )));
        }
        *self.slot_mut(param) = value;
        Ok(())
    }

    pub fn get(&self, param: GovernanceParam) -> u128 {
        match param {
            GovernanceParam::MinDeposit => self.p_min_deposit,
            GovernanceParam::ApplyStageSec => self.p_apply_stage_sec,
            GovernanceParam::CommitStageSec => self.p_commit_stage_sec,
            GovernanceParam::RevealStageSec => self.p_reveal_stage_sec,
            GovernanceParam::DispensationPct => self.p_dispensation_pct,
            GovernanceParam::VoteSuccessRate => self.p_vote_success_rate,
            GovernanceParam::VoteQuorum => self.p_vote_quorum,
            GovernanceParam::StakeSuccessPct => self.xy_stake_success_pct,
            GovernanceParam::WeiMiningMin => self.xy_wei_mining_min,
            GovernanceParam::XyoRequestBountyMin => self.xy_xyo_request_bounty_min,
            GovernanceParam::StakeCooldown => self.xy_stake_cooldown,
            GovernanceParam::UnstakeCooldown => self.xy_unstake_cooldown,
            GovernanceParam::ProposalsEnabled => self.xy_proposals_enabled,
            GovernanceParam::BlockProducerRewardPct => self.xy_block_producer_reward_pct,
        }
    }

    fn slot_mut(&mut self, param: GovernanceParam) -> &mut u128 {
        match param {
            GovernanceParam::MinDeposit => &mut self.p_min_deposit,
            GovernanceParam::ApplyStageSec => &mut self.p_apply_stage_sec,
            GovernanceParam::CommitStageSec => &mut self.p_commit_stage_sec,
            GovernanceParam::RevealStageSec => &mut self.p_reveal_stage_sec,
            GovernanceParam::DispensationPct => &mut self.p_dispensation_pct,
            GovernanceParam::VoteSuccessRate => &mut self.p_vote_success_rate,
            GovernanceParam::VoteQuorum => &mut self.p_vote_quorum,
            GovernanceParam::StakeSuccessPct => &mut self.xy_stake_success_pct,
            GovernanceParam::WeiMiningMin => &mut self.xy_wei_mining_min,
            GovernanceParam::XyoRequestBountyMin => &mut self.xy_xyo_request_bounty_min,
            GovernanceParam::StakeCooldown => &mut self.xy_stake_cooldown,
            GovernanceParam::UnstakeCooldown => &mut self.xy_unstake_cooldown,
            GovernanceParam::ProposalsEnabled => &mut self.xy_proposals_enabled,
            GovernanceParam::BlockProducerRewardPct => &mut self.xy_block_producer_reward_pct,
        }
    }

    /// Quorum percentage clamped into `u8`
    pub fn quorum_pct(&self) -> u8 {
        self.xy_stake_success_pct.min(100) as u8
    }

    pub fn stake_cooldown_secs(&self) -> u64 {
        self.xy_stake_cooldown.min(u64::MAX as u128) as u64
    }

    pub fn unstake_cooldown_secs(&self) -> u64 {
        self.xy_unstake_cooldown.min(u64::MAX as u128) as u64
    }
}
