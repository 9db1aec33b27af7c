//! SBA full node binary.
//!
//! # Usage
//!
//! ```bash
//! # Start with a configuration file
//! sba-node --config node.toml
//!
//! # Provide the provisioner key seed explicitly
//! sba-node --config node.toml --key /etc/sba/provisioner.key
//! ```
//!
//! The binary wires the in-process subsystems against the in-memory loader
//! and mock executor; production deployments replace both through the node
//! library. Configuration is TOML; see `NodeConfig` for every option.

use anyhow::{bail, Context, Result};
use clap::Parser;
use sba_chain::{genesis_block, MemoryLoader};
use sba_consensus::MockBlindBid;
use sba_executor::MockExecutor;
use sba_node::{init_telemetry, Node, NodeConfig};
use sba_types::{KeyPair, KeyType, Provisioners, Stake};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// SBA full node.
#[derive(Parser, Debug)]
#[command(name = "sba-node")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Path to the provisioner key seed (32 bytes, hex).
    #[arg(long)]
    key: Option<PathBuf>,

    /// Log level when RUST_LOG is unset.
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn load_keys(path: Option<&PathBuf>) -> Result<KeyPair> {
    match path {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("cannot read key file {}", path.display()))?;
            let bytes = hex::decode(raw.trim()).context("key file is not valid hex")?;
            let seed: [u8; 32] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| anyhow::anyhow!("key seed must be exactly 32 bytes"))?;
            Ok(KeyPair::from_seed(KeyType::Bls12381, &seed))
        }
        None => {
            info!("no key file given, generating an ephemeral provisioner key");
            Ok(KeyPair::generate_bls())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_telemetry(&cli.log_level);

    let config = match &cli.config {
        Some(path) => NodeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => NodeConfig::default(),
    };

    let keys = load_keys(cli.key.as_ref())?;

    // Single-provisioner devnet wiring: this node holds all the stake.
    let mut provisioners = Provisioners::new();
    provisioners.add_stake(
        keys.public_key(),
        Stake {
            amount: 1_000_000,
            start_height: 0,
            end_height: u64::MAX,
        },
    );

    let loader = Arc::new(MemoryLoader::new(genesis_block()));
    let executor = Arc::new(MockExecutor::new(provisioners));

    let mut node = Node::new(&config, keys, loader, executor, Arc::new(MockBlindBid))
        .await
        .context("node wiring failed")?;

    // No transport is attached here; sync requests have nowhere to go.
    let Some(_sync_requests) = node.take_sync_requests() else {
        bail!("sync request stream already taken");
    };

    info!(height = node.chain().tip().header.height, "node starting");

    let cancel = CancellationToken::new();
    let node_task = tokio::spawn(node.run(cancel.clone()));

    signal::ctrl_c().await.context("signal handler failed")?;
    info!("shutdown signal received");

    cancel.cancel();
    let _ = node_task.await;
    Ok(())
}
