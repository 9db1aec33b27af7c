//! Consensus configuration.

use std::time::Duration;

/// Tunables for the consensus loop.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Base timeout of one phase. Doubles on every failed iteration.
    pub step_timeout: Duration,
    /// Hard ceiling for the doubled step timeout.
    pub max_step_timeout: Duration,
    /// Seats per step committee.
    pub committee_size: usize,
    /// Gas budget handed to the executor per block.
    pub block_gas_limit: u64,
    /// Byte budget for candidate block transactions.
    pub max_block_size: usize,
    /// Deadline for RPC-bus calls made from the loop.
    pub rpc_timeout: Duration,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(5),
            max_step_timeout: Duration::from_secs(60),
            committee_size: 64,
            block_gas_limit: 5_000_000_000,
            max_block_size: 250_000,
            rpc_timeout: Duration::from_secs(5),
        }
    }
}

impl ConsensusConfig {
    /// Timeout for the given iteration: base doubled per failed iteration,
    /// capped.
    pub fn timeout_for(&self, iteration: u8) -> Duration {
        let doublings = iteration.saturating_sub(1).min(16) as u32;
        let timeout = self.step_timeout.saturating_mul(1u32 << doublings);
        timeout.min(self.max_step_timeout)
    }
}
