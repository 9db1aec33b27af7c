//! Node configuration (TOML).
//!
//! Every option the subsystems consume is enumerated here with its default.
//! A configuration that fails to load or validate is fatal before start;
//! nothing else is.

use sba_chain::ChainConfig;
use sba_consensus::ConsensusConfig;
use sba_mempool::{MempoolConfig, PoolType};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Errors loading or validating the configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// The TOML did not parse.
    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is outside the supported range.
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level node configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfig {
    /// Consensus loop options.
    pub consensus: ConsensusSection,
    /// Mempool options.
    pub mempool: MempoolSection,
    /// Kadcast transport options.
    pub kadcast: KadcastSection,
    /// External executor options.
    pub executor: ExecutorSection,
    /// Connection bounds handed to the transport layer.
    pub network: NetworkSection,
    /// Timeouts.
    pub timeout: TimeoutSection,
}

/// `[consensus]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConsensusSection {
    /// Base step timeout in milliseconds.
    pub step_timeout_ms: u64,
    /// Ceiling for the doubled step timeout, in milliseconds.
    pub max_step_timeout_ms: u64,
    /// Seats per step committee.
    pub committee_size: usize,
    /// Quorum fraction. Only the protocol constant 2/3 is supported.
    pub quorum_fraction: f64,
    /// Byte budget for candidate blocks.
    pub max_block_size: usize,
    /// Per-block gas budget.
    pub block_gas_limit: u64,
}

impl Default for ConsensusSection {
    fn default() -> Self {
        Self {
            step_timeout_ms: 5_000,
            max_step_timeout_ms: 60_000,
            committee_size: 64,
            quorum_fraction: 2.0 / 3.0,
            max_block_size: 250_000,
            block_gas_limit: 5_000_000_000,
        }
    }
}

/// `[mempool]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MempoolSection {
    /// Pool ceiling in megabytes.
    pub max_size_mb: usize,
    /// Backend: "hashmap" or "diskpool".
    pub pool_type: String,
    /// Directory for the disk backend.
    pub disk_pool_dir: PathBuf,
    /// Propagation token interval in milliseconds (0 disables limiting).
    pub propagate_every_ms: u64,
    /// Propagation burst size.
    pub propagate_burst: u32,
    /// Idle stats tick in seconds.
    pub idle_interval_secs: u64,
}

impl Default for MempoolSection {
    fn default() -> Self {
        Self {
            max_size_mb: 100,
            pool_type: "hashmap".to_string(),
            disk_pool_dir: PathBuf::from("./mempool"),
            propagate_every_ms: 100,
            propagate_burst: 1,
            idle_interval_secs: 20,
        }
    }
}

/// `[kadcast]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KadcastSection {
    /// Whether frames travel over kadcast instead of gossip.
    pub enabled: bool,
    /// Initial TTL byte for kadcast frames.
    pub initial_height: u8,
}

impl Default for KadcastSection {
    fn default() -> Self {
        Self {
            enabled: false,
            initial_height: 128,
        }
    }
}

/// `[executor]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExecutorSection {
    /// Per-call deadline for executor RPCs, in milliseconds.
    pub contract_timeout_ms: u64,
}

impl Default for ExecutorSection {
    fn default() -> Self {
        Self {
            contract_timeout_ms: 5_000,
        }
    }
}

/// `[network]` section, consumed by the external transport.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetworkSection {
    /// Upper connection bound.
    pub max_connections: usize,
    /// Connections below which the transport redials.
    pub minimum_connections: usize,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            max_connections: 50,
            minimum_connections: 5,
        }
    }
}

/// `[timeout]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimeoutSection {
    /// Dial timeout handed to the transport, in seconds.
    pub dial_seconds: u64,
    /// Sync watchdog, in seconds.
    pub sync_watchdog_seconds: u64,
}

impl Default for TimeoutSection {
    fn default() -> Self {
        Self {
            dial_seconds: 5,
            sync_watchdog_seconds: 30,
        }
    }
}

impl NodeConfig {
    /// Load and validate a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if (self.consensus.quorum_fraction - 2.0 / 3.0).abs() > f64::EPSILON {
            return Err(ConfigError::Invalid(
                "consensus.quorum_fraction: only 2/3 is supported".into(),
            ));
        }
        if self.consensus.committee_size == 0 {
            return Err(ConfigError::Invalid(
                "consensus.committee_size must be positive".into(),
            ));
        }
        match self.mempool.pool_type.as_str() {
            "hashmap" | "diskpool" => {}
            other => {
                return Err(ConfigError::Invalid(format!(
                    "mempool.pool_type: unknown backend {other:?}"
                )));
            }
        }
        if self.network.minimum_connections > self.network.max_connections {
            return Err(ConfigError::Invalid(
                "network.minimum_connections exceeds max_connections".into(),
            ));
        }
        Ok(())
    }

    /// Consensus loop configuration.
    pub fn consensus_config(&self) -> ConsensusConfig {
        ConsensusConfig {
            step_timeout: Duration::from_millis(self.consensus.step_timeout_ms),
            max_step_timeout: Duration::from_millis(self.consensus.max_step_timeout_ms),
            committee_size: self.consensus.committee_size,
            block_gas_limit: self.consensus.block_gas_limit,
            max_block_size: self.consensus.max_block_size,
            rpc_timeout: Duration::from_millis(self.executor.contract_timeout_ms),
        }
    }

    /// Chain configuration.
    pub fn chain_config(&self) -> ChainConfig {
        ChainConfig {
            committee_size: self.consensus.committee_size,
            block_gas_limit: self.consensus.block_gas_limit,
            kadcast_enabled: self.kadcast.enabled,
            sync_watchdog: Duration::from_secs(self.timeout.sync_watchdog_seconds),
        }
    }

    /// Mempool configuration.
    pub fn mempool_config(&self) -> MempoolConfig {
        MempoolConfig {
            max_size_mb: self.mempool.max_size_mb,
            pool_type: if self.mempool.pool_type == "diskpool" {
                PoolType::Diskpool
            } else {
                PoolType::Hashmap
            },
            disk_pool_dir: self.mempool.disk_pool_dir.clone(),
            propagate_every: (self.mempool.propagate_every_ms > 0)
                .then(|| Duration::from_millis(self.mempool.propagate_every_ms)),
            propagate_burst: self.mempool.propagate_burst,
            kadcast_enabled: self.kadcast.enabled,
            kadcast_initial_height: self.kadcast.initial_height,
            idle_interval: Duration::from_secs(self.mempool.idle_interval_secs),
        }
    }

    /// Executor call deadline.
    pub fn executor_deadline(&self) -> Duration {
        Duration::from_millis(self.executor.contract_timeout_ms)
    }
}
