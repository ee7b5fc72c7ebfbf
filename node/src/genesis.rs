//! Genesis configuration for a SIBYL chain

use serde::{Deserialize, Serialize};
use sibyl_core::{Address, Amount, Asset, GovernanceParams, Hash, SibylError, SibylResult};
use sibyl_crypto::derivation::MasterKey;
use sibyl_state::store::ConsensusState;
use tracing::info;

/// Genesis balance entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAllocation {
    pub address: String,
    pub asset: Asset,
    pub amount: String,
}

/// Stake bonded and activated at genesis
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisStake {
    pub diviner: String,
    pub amount: String,
}

/// Genesis configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisConfig {
    pub chain_name: String,
    pub chain_id: u64,
    /// Committee addresses, fixed for the life of the chain
    pub diviners: Vec<String>,
    pub allocations: Vec<GenesisAllocation>,
    pub stakes: Vec<GenesisStake>,
    #[serde(default)]
    pub governance: GovernanceParams,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            chain_name: "SIBYL Mainnet".to_string(),
            chain_id: 1,
            diviners: vec![],
            allocations: vec![],
            stakes: vec![],
            governance: GovernanceParams::default(),
        }
    }
}

impl GenesisConfig {
    pub fn testnet() -> Self {
        Self {
            chain_name: "SIBYL Testnet".to_string(),
            chain_id: 2,
            ..Default::default()
        }
    }

    /// Development chain without bounty minimums
    pub fn devnet() -> Self {
        Self {
            chain_name: "SIBYL Devnet".to_string(),
            chain_id: 3,
            governance: GovernanceParams {
                xy_wei_mining_min: 0,
                xy_xyo_request_bounty_min: 0,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Devnet whose committee is derived from `phrase`, each member staked with `stake`
    pub fn devnet_committee(phrase: &str, members: u32, stake: u128) -> SibylResult<Self> {
        let committee = MasterKey::from_phrase(phrase)?.derive_committee(members)?;
        let mut config = Self::devnet();
        for keypair in &committee {
            let address = keypair.address().to_hex();
            config = config.add_diviner(&address).add_stake(&address, stake);
        }
        Ok(config)
    }

    pub fn add_diviner(mut self, address: &str) -> Self {
        self.diviners.push(address.to_string());
        self
    }

    pub fn add_allocation(mut self, address: &str, asset: Asset, amount: u128) -> Self {
        self.allocations.push(GenesisAllocation {
            address: address.to_string(),
            asset,
            amount: amount.to_string(),
        });
        self
    }

    pub fn add_stake(mut self, diviner: &str, amount: u128) -> Self {
        self.stakes.push(GenesisStake {
            diviner: diviner.to_string(),
            amount: amount.to_string(),
        });
        self
    }

    pub fn parse_diviners(&self) -> SibylResult<Vec<Address>> {
        self.diviners.iter().map(|d| parse_address(d)).collect()
    }

    pub fn parse_allocations(&self) -> SibylResult<Vec<(Address, Asset, Amount)>> {
        self.allocations
            .iter()
            .map(|a| Ok((parse_address(&a.address)?, a.asset, parse_amount(&a.amount)?)))
            .collect()
    }

    pub fn parse_stakes(&self) -> SibylResult<Vec<(Address, Amount)>> {
        self.stakes
            .iter()
            .map(|s| Ok((parse_address(&s.diviner)?, parse_amount(&s.amount)?)))
            .collect()
    }

    /// Total supply of `asset`, counting bonded stake as tokens
    pub fn total_supply(&self, asset: Asset) -> SibylResult<Amount> {
        let mut total = Amount::ZERO;
        for (_, a, amount) in self.parse_allocations()? {
            if a == asset {
                total = total.saturating_add(amount);
            }
        }
        if asset == Asset::Token {
            for (_, amount) in self.parse_stakes()? {
                total = total.saturating_add(amount);
            }
        }
        Ok(total)
    }

    /// Initial consensus state described by this config
    pub fn build_state(&self) -> SibylResult<ConsensusState> {
        info!("Initializing genesis for chain: {}", self.chain_name);
        info!("Chain ID: {}", self.chain_id);

        let diviners = self.parse_diviners()?;
        if diviners.is_empty() {
            return Err(SibylError::ConfigError("genesis has no diviners".into()));
        }
        let stakes = self.parse_stakes()?;
        let allocations = self.parse_allocations()?;
        let state = ConsensusState::genesis(diviners.iter().copied(), &stakes, &allocations)?;

        info!(
            "Genesis committee of {} diviners, {} active stake",
            diviners.len(),
            state.stakes.total_active()
        );
        Ok(state)
    }

    pub fn to_json(&self) -> SibylResult<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| SibylError::SerializationError(e.to_string()))
    }

    pub fn from_json(json: &str) -> SibylResult<Self> {
        serde_json::from_str(json).map_err(|e| SibylError::DeserializationError(e.to_string()))
    }
}

/// Genesis hash: keccak of the JSON config
pub fn compute_genesis_hash(config: &GenesisConfig) -> SibylResult<Hash> {
    let json = config.to_json()?;
    Ok(sibyl_crypto::hashing::hash(json.as_bytes()))
}

fn parse_address(s: &str) -> SibylResult<Address> {
    Address::from_hex(s).map_err(|e| SibylError::InvalidAddress(format!("{}: {}", s, e)))
}

fn parse_amount(s: &str) -> SibylResult<Amount> {
    s.parse::<u128>()
        .map(Amount::new)
        .map_err(|e| SibylError::ConfigError(format!("invalid amount {}: {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_devnet_committee() {
        let config = GenesisConfig::devnet_committee("genesis test", 4, 500).unwrap();
        assert_eq!(config.diviners.len(), 4);
        assert_eq!(config.stakes.len(), 4);
        assert_eq!(config.total_supply(Asset::Token).unwrap(), Amount::new(2_000));
    }

    #[test]
    fn test_genesis_json() {
        let config = GenesisConfig::testnet().add_allocation(
            &Address([7; 20]).to_hex(),
            Asset::Native,
            42,
        );
        let json = config.to_json().unwrap();
        let restored = GenesisConfig::from_json(&json).unwrap();

        assert_eq!(config.chain_name, restored.chain_name);
        assert_eq!(config.chain_id, restored.chain_id);
        assert_eq!(restored.total_supply(Asset::Native).unwrap(), Amount::new(42));
    }

    #[test]
    fn test_build_state() {
        let user = Address([9; 20]);
        let config = GenesisConfig::devnet_committee("genesis test", 3, 100)
            .unwrap()
            .add_allocation(&user.to_hex(), Asset::Token, 1_000);
        let state = config.build_state().unwrap();

        assert_eq!(state.stakes.len(), 3);
        assert_eq!(state.stakes.total_active(), Amount::new(300));
        assert_eq!(state.balances.balance_of(Asset::Token, &user), Amount::new(1_000));
        assert_eq!(state.height(), 0);
    }

    #[test]
    fn test_build_state_rejects_bad_input() {
        assert!(GenesisConfig::devnet().build_state().is_err());

        let mut bad_amount = GenesisConfig::devnet()
            .add_diviner(&Address([1; 20]).to_hex())
            .add_stake(&Address([1; 20]).to_hex(), 1);
        bad_amount.stakes[0].amount = "lots".into();
        assert!(bad_amount.build_state().is_err());

        let bad_address = GenesisConfig::devnet().add_diviner("0xnothex");
        assert!(bad_address.build_state().is_err());
    }

    #[test]
    fn test_genesis_hash_is_stable() {
        let config = GenesisConfig::devnet_committee("genesis test", 2, 1).unwrap();
        assert_eq!(
            compute_genesis_hash(&config).unwrap(),
            compute_genesis_hash(&config.clone()).unwrap()
        );
    }
}
