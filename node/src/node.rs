//! Full node implementation

use crate::api::start_api_server;
use crate::genesis::GenesisConfig;
use crate::runtime::NodeRuntime;
use sibyl_consensus::ConsensusEvent;
use sibyl_core::{NodeConfig, RewardPolicy};
use sibyl_crypto::keys::KeyPair;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{debug, error, info};

/// Full SIBYL node
pub struct SibylNode {
    runtime: Arc<NodeRuntime>,
}

impl SibylNode {
    pub fn new(config: NodeConfig, keypair: KeyPair, genesis: &GenesisConfig) -> anyhow::Result<Self> {
        let runtime = Arc::new(NodeRuntime::new(config, keypair, genesis)?);
        Ok(Self { runtime })
    }

    /// Serve the API until ctrl-c
    pub async fn start(&self) -> anyhow::Result<()> {
        info!("Starting SIBYL node...");

        let event_handle = self.runtime.take_events().map(|mut events| {
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    log_event(&event);
                }
            })
        });

        let api_handle = if self.runtime.config().api.enabled {
            let api_runtime = self.runtime.clone();
            let api_addr = self.runtime.config().api.listen_addr.clone();
            Some(tokio::spawn(async move {
                if let Err(e) = start_api_server(api_runtime, &api_addr).await {
                    error!("API server error: {}", e);
                }
            }))
        } else {
            None
        };

        info!("Node started successfully");
        info!("Node address: {}", self.runtime.address());
        info!(
            "Chain height {}, committee of {}",
            self.runtime.chain_height(),
            self.runtime.committee_size()
        );

        match signal::ctrl_c().await {
            Ok(()) => {
                info!("Shutdown signal received, stopping node...");
            }
            Err(e) => {
                error!("Error waiting for shutdown signal: {}", e);
            }
        }

        if let Some(handle) = api_handle {
            handle.abort();
        }
        if let Some(handle) = event_handle {
            handle.abort();
        }

        info!("Node stopped");

        Ok(())
    }

    pub fn runtime(&self) -> &Arc<NodeRuntime> {
        &self.runtime
    }
}

fn log_event(event: &ConsensusEvent) {
    match event {
        ConsensusEvent::RequestSubmitted(id) => debug!("Event: request {} submitted", id),
        ConsensusEvent::WithdrawalRequested(id, diviner) => {
            debug!("Event: withdrawal {} requested by {}", id, diviner)
        }
        ConsensusEvent::BlockCreated(hash) => debug!("Event: block {} created", hash),
        ConsensusEvent::RewardWithdrawn(diviner, amount) => {
            info!("Event: {} withdrew {}", diviner, amount)
        }
        ConsensusEvent::StakeChanged(diviner) => debug!("Event: stake of {} changed", diviner),
    }
}

/// Node builder for easier configuration
pub struct NodeBuilder {
    config: NodeConfig,
    keypair: Option<KeyPair>,
    genesis: GenesisConfig,
}

impl NodeBuilder {
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            keypair: None,
            genesis: GenesisConfig::devnet(),
        }
    }

    pub fn config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn keypair(mut self, keypair: KeyPair) -> Self {
        self.keypair = Some(keypair);
        self
    }

    pub fn genesis(mut self, genesis: GenesisConfig) -> Self {
        self.genesis = genesis;
        self
    }

    pub fn api_addr(mut self, addr: &str) -> Self {
        self.config.api.listen_addr = addr.to_string();
        self
    }

    pub fn data_dir(mut self, dir: PathBuf) -> Self {
        self.config.data_dir = dir;
        self
    }

    /// Keep state in memory only
    pub fn ephemeral(mut self) -> Self {
        self.config.persist = false;
        self
    }

    pub fn reward_policy(mut self, policy: RewardPolicy) -> Self {
        self.config.consensus.reward_policy = policy;
        self
    }

    pub fn build(self) -> anyhow::Result<SibylNode> {
        let keypair = self.keypair.unwrap_or_else(KeyPair::generate);
        SibylNode::new(self.config, keypair, &self.genesis)
    }
}

impl Default for NodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
