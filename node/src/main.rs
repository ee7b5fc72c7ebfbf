//! SIBYL Node Binary

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use sibyl_core::{Address, NodeConfig};
use sibyl_crypto::derivation::MasterKey;
use sibyl_crypto::keys::{KeyPair, PublicKeyInfo};
use sibyl_node::{
    GenesisConfig, NodeBuilder, SignedBody, SubmitBlockBody, SubmitRequestBody, WithdrawBody,
};
use std::path::{Path, PathBuf};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "sibyl-node")]
#[command(about = "SIBYL Node - stake-weighted oracle consensus")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the node
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Genesis file path
        #[arg(short, long)]
        genesis: Option<PathBuf>,

        /// API listen address
        #[arg(long)]
        api_addr: Option<String>,

        /// Data directory
        #[arg(long)]
        data_dir: Option<PathBuf>,

        /// Keep state in memory only
        #[arg(long)]
        ephemeral: bool,
    },

    /// Generate a new keypair
    Keygen {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Generate genesis configuration
    Genesis {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Chain name
        #[arg(long, default_value = "SIBYL Devnet")]
        chain_name: String,

        /// Chain ID
        #[arg(long, default_value = "3")]
        chain_id: u64,

        /// Phrase the devnet committee keys are derived from
        #[arg(long, default_value = "sibyl devnet")]
        phrase: String,

        /// Committee size
        #[arg(long, default_value = "4")]
        diviners: u32,

        /// Stake bonded for each diviner
        #[arg(long, default_value = "1000")]
        stake: u128,
    },

    /// Sign a block submission with committee keys
    ///
    /// The body is also signed as its sender: the key whose address matches
    /// `sender`, or the first key.
    SignBlock {
        /// Submission JSON, as accepted by POST /block
        #[arg(short, long)]
        input: PathBuf,

        /// Key files written by `keygen`
        #[arg(short, long)]
        key: Vec<PathBuf>,

        /// Sign with the first N keys of a devnet committee phrase instead
        #[arg(long)]
        phrase: Option<String>,

        #[arg(long, default_value = "4")]
        signers: u32,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sign a request or withdrawal body as its sender
    SignBody {
        /// Route the body is posted to
        #[arg(value_enum)]
        route: BodyRoute,

        /// Body JSON; `sender` and `signature` are overwritten
        #[arg(short, long)]
        input: PathBuf,

        /// Key file written by `keygen`
        #[arg(short, long)]
        key: PathBuf,

        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum BodyRoute {
    Request,
    Withdraw,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run {
            config,
            genesis,
            api_addr,
            data_dir,
            ephemeral,
        } => {
            let mut node_config = match config {
                Some(path) => NodeConfig::from_json(&std::fs::read_to_string(&path)?)?,
                None => NodeConfig::default(),
            };
            if let Some(dir) = data_dir {
                node_config.data_dir = dir;
            }
            if let Some(addr) = api_addr {
                node_config.api.listen_addr = addr;
            }
            if ephemeral {
                node_config.persist = false;
            }
            init_logging(&node_config.log_level);

            info!("Starting SIBYL node {}...", node_config.name);

            let keypair = load_or_create_keypair(&node_config.data_dir)?;

            let genesis_config = match genesis {
                Some(path) => {
                    let content = std::fs::read_to_string(&path)?;
                    GenesisConfig::from_json(&content)?
                }
                None => GenesisConfig::devnet_committee("sibyl devnet", 4, 1_000)?,
            };

            let node = NodeBuilder::new()
                .config(node_config)
                .keypair(keypair)
                .genesis(genesis_config)
                .build()?;

            node.start().await?;
        }

        Commands::Keygen { output } => {
            let keypair = KeyPair::generate();
            let json = serde_json::to_string_pretty(&KeyFile::new(&keypair))?;

            match output {
                Some(path) => {
                    std::fs::write(&path, &json)?;
                    println!("Keypair saved to: {}", path.display());
                }
                None => {
                    println!("{}", json);
                }
            }
        }

        Commands::Genesis {
            output,
            chain_name,
            chain_id,
            phrase,
            diviners,
            stake,
        } => {
            let genesis = GenesisConfig {
                chain_name,
                chain_id,
                ..GenesisConfig::devnet_committee(&phrase, diviners, stake)?
            };

            let json = genesis.to_json()?;
            std::fs::write(&output, &json)?;

            println!("Genesis configuration saved to: {}", output.display());
        }

        Commands::SignBlock {
            input,
            key,
            phrase,
            signers,
            output,
        } => {
            let body: SubmitBlockBody = serde_json::from_str(&std::fs::read_to_string(&input)?)?;
            let submission = body.to_submission().map_err(anyhow::Error::msg)?;

            let keys = match phrase {
                Some(phrase) => MasterKey::from_phrase(&phrase)?.derive_committee(signers)?,
                None => key
                    .iter()
                    .map(|path| read_keypair(path))
                    .collect::<anyhow::Result<Vec<_>>>()?,
            };
            anyhow::ensure!(!keys.is_empty(), "no signing keys given");

            let signed = submission.signed_by(&keys)?;
            let sender_key = Address::from_hex(&body.sender)
                .ok()
                .and_then(|sender| keys.iter().find(|k| k.address() == sender))
                .unwrap_or(&keys[0]);
            let body = SubmitBlockBody::from_submission(&sender_key.address(), &signed).signed(sender_key)?;

            write_output(output, &serde_json::to_string_pretty(&body)?, "Signed submission")?;
        }

        Commands::SignBody {
            route,
            input,
            key,
            output,
        } => {
            let content = std::fs::read_to_string(&input)?;
            let keypair = read_keypair(&key)?;
            let json = match route {
                BodyRoute::Request => {
                    let body: SubmitRequestBody = serde_json::from_str(&content)?;
                    serde_json::to_string_pretty(&body.signed(&keypair)?)?
                }
                BodyRoute::Withdraw => {
                    let body: WithdrawBody = serde_json::from_str(&content)?;
                    serde_json::to_string_pretty(&body.signed(&keypair)?)?
                }
            };

            write_output(output, &json, "Signed body")?;
        }
    }

    Ok(())
}

fn write_output(output: Option<PathBuf>, json: &str, what: &str) -> anyhow::Result<()> {
    match output {
        Some(path) => {
            std::fs::write(&path, json)?;
            println!("{} saved to: {}", what, path.display());
        }
        None => println!("{}", json),
    }
    Ok(())
}

fn init_logging(level: &str) {
    let level = level.parse::<Level>().unwrap_or(Level::INFO);
    FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();
}

/// Key file written by `keygen` and read by `run` and `sign-block`
#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(flatten)]
    info: PublicKeyInfo,
    secret_key: String,
}

impl KeyFile {
    fn new(keypair: &KeyPair) -> Self {
        Self {
            info: PublicKeyInfo::from(keypair),
            secret_key: hex::encode(keypair.secret_bytes()),
        }
    }
}

fn read_keypair(path: &Path) -> anyhow::Result<KeyPair> {
    let content = std::fs::read_to_string(path)?;
    let file: KeyFile = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a key file", path.display()))?;
    let secret_bytes = hex::decode(&file.secret_key)?;
    let keypair = KeyPair::from_secret_bytes(&secret_bytes)?;
    anyhow::ensure!(
        Address::from_hex(&file.info.address)? == keypair.address(),
        "{} address does not match its secret key",
        path.display()
    );
    Ok(keypair)
}

fn load_or_create_keypair(data_dir: &Path) -> anyhow::Result<KeyPair> {
    let key_path = data_dir.join("node_key.json");

    if key_path.exists() {
        let keypair = read_keypair(&key_path)?;
        info!("Loaded keypair from {}", key_path.display());
        return Ok(keypair);
    }

    std::fs::create_dir_all(data_dir)?;

    let keypair = KeyPair::generate();
    std::fs::write(&key_path, serde_json::to_string_pretty(&KeyFile::new(&keypair))?)?;
    info!("Generated new keypair, saved to {}", key_path.display());

    Ok(keypair)
}
