//! State-transition executor interface.
//!
//! The executor is an external prover/executor process reached over RPC;
//! this crate only specifies the calls the node makes to it. Every call is
//! bounded by a deadline from configuration; the [`DeadlineExecutor`]
//! wrapper applies it uniformly so callers never forget one.
//!
//! [`MockExecutor`] is the in-process stand-in used by tests and by the
//! default node wiring when no external executor is configured.

mod mock;

pub use mock::MockExecutor;

use async_trait::async_trait;
use sba_types::{ContractCall, Hash, Provisioners};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by executor calls.
#[derive(Debug, Clone, Error)]
pub enum ExecutorError {
    /// The executor process is unreachable.
    #[error("executor unavailable: {0}")]
    Unavailable(String),

    /// The call's deadline elapsed.
    #[error("executor call deadline exceeded")]
    DeadlineExceeded,

    /// A transaction failed verification.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The requested state transition was rejected.
    #[error("state transition rejected: {0}")]
    TransitionRejected(String),
}

/// The calls the node makes against the external executor.
///
/// Implementations perform the actual RPC; the trait mirrors the remote
/// surface one-to-one so the chain and mempool stay transport-agnostic.
#[async_trait]
pub trait Executor: Send + Sync {
    /// Dry-run a candidate's transactions against the current state.
    async fn verify_state_transition(
        &self,
        txs: &[ContractCall],
        gas_limit: u64,
        height: u64,
    ) -> Result<(Vec<ContractCall>, Hash), ExecutorError>;

    /// Execute a transaction set while building a candidate block.
    async fn execute_state_transition(
        &self,
        txs: &[ContractCall],
        gas_limit: u64,
        height: u64,
    ) -> Result<(Vec<ContractCall>, Hash), ExecutorError>;

    /// Apply a tentatively-agreed block to state.
    async fn accept(
        &self,
        txs: &[ContractCall],
        prev_state_hash: Hash,
        height: u64,
        gas_limit: u64,
    ) -> Result<(Provisioners, Hash), ExecutorError>;

    /// Apply a finalized (first-iteration) block to state.
    async fn finalize(
        &self,
        txs: &[ContractCall],
        prev_state_hash: Hash,
        height: u64,
        gas_limit: u64,
    ) -> Result<(Provisioners, Hash), ExecutorError>;

    /// Roll state back to `state_hash` (fallback path).
    async fn revert(&self, state_hash: Hash) -> Result<Hash, ExecutorError>;

    /// Current provisioner set as the executor sees it.
    async fn get_provisioners(&self) -> Result<Provisioners, ExecutorError>;

    /// Current state root.
    async fn get_state_root(&self) -> Result<Hash, ExecutorError>;

    /// Verify a single unconfirmed transaction (mempool admission).
    async fn verify_transaction(&self, tx: &ContractCall) -> Result<(), ExecutorError>;

    /// Balance locked up in unconfirmed transactions for a view key.
    async fn calculate_balance(
        &self,
        view_key: &[u8],
        txs: &[ContractCall],
    ) -> Result<u64, ExecutorError>;
}

/// Applies the configured per-call deadline to every executor call.
pub struct DeadlineExecutor {
    inner: Arc<dyn Executor>,
    deadline: Duration,
}

impl DeadlineExecutor {
    /// Wrap `inner`, bounding each call by `deadline`.
    pub fn new(inner: Arc<dyn Executor>, deadline: Duration) -> Self {
        Self { inner, deadline }
    }

    async fn bounded<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, ExecutorError>> + Send,
    ) -> Result<T, ExecutorError> {
        tokio::time::timeout(self.deadline, fut)
            .await
            .map_err(|_| ExecutorError::DeadlineExceeded)?
    }
}

#[async_trait]
impl Executor for DeadlineExecutor {
    async fn verify_state_transition(
        &self,
        txs: &[ContractCall],
        gas_limit: u64,
        height: u64,
    ) -> Result<(Vec<ContractCall>, Hash), ExecutorError> {
        self.bounded(self.inner.verify_state_transition(txs, gas_limit, height))
            .await
    }

    async fn execute_state_transition(
        &self,
        txs: &[ContractCall],
        gas_limit: u64,
        height: u64,
    ) -> Result<(Vec<ContractCall>, Hash), ExecutorError> {
        self.bounded(self.inner.execute_state_transition(txs, gas_limit, height))
            .await
    }

    async fn accept(
        &self,
        txs: &[ContractCall],
        prev_state_hash: Hash,
        height: u64,
        gas_limit: u64,
    ) -> Result<(Provisioners, Hash), ExecutorError> {
        self.bounded(self.inner.accept(txs, prev_state_hash, height, gas_limit))
            .await
    }

    async fn finalize(
        &self,
        txs: &[ContractCall],
        prev_state_hash: Hash,
        height: u64,
        gas_limit: u64,
    ) -> Result<(Provisioners, Hash), ExecutorError> {
        self.bounded(self.inner.finalize(txs, prev_state_hash, height, gas_limit))
            .await
    }

    async fn revert(&self, state_hash: Hash) -> Result<Hash, ExecutorError> {
        self.bounded(self.inner.revert(state_hash)).await
    }

    async fn get_provisioners(&self) -> Result<Provisioners, ExecutorError> {
        self.bounded(self.inner.get_provisioners()).await
    }

    async fn get_state_root(&self) -> Result<Hash, ExecutorError> {
        self.bounded(self.inner.get_state_root()).await
    }

    async fn verify_transaction(&self, tx: &ContractCall) -> Result<(), ExecutorError> {
        self.bounded(self.inner.verify_transaction(tx)).await
    }

    async fn calculate_balance(
        &self,
        view_key: &[u8],
        txs: &[ContractCall],
    ) -> Result<u64, ExecutorError> {
        self.bounded(self.inner.calculate_balance(view_key, txs))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StalledExecutor;

    #[async_trait]
    impl Executor for StalledExecutor {
        async fn verify_state_transition(
            &self,
            _txs: &[ContractCall],
            _gas_limit: u64,
            _height: u64,
        ) -> Result<(Vec<ContractCall>, Hash), ExecutorError> {
            std::future::pending().await
        }

        async fn execute_state_transition(
            &self,
            _txs: &[ContractCall],
            _gas_limit: u64,
            _height: u64,
        ) -> Result<(Vec<ContractCall>, Hash), ExecutorError> {
            std::future::pending().await
        }

        async fn accept(
            &self,
            _txs: &[ContractCall],
            _prev_state_hash: Hash,
            _height: u64,
            _gas_limit: u64,
        ) -> Result<(Provisioners, Hash), ExecutorError> {
            std::future::pending().await
        }

        async fn finalize(
            &self,
            _txs: &[ContractCall],
            _prev_state_hash: Hash,
            _height: u64,
            _gas_limit: u64,
        ) -> Result<(Provisioners, Hash), ExecutorError> {
            std::future::pending().await
        }

        async fn revert(&self, _state_hash: Hash) -> Result<Hash, ExecutorError> {
            std::future::pending().await
        }

        async fn get_provisioners(&self) -> Result<Provisioners, ExecutorError> {
            std::future::pending().await
        }

        async fn get_state_root(&self) -> Result<Hash, ExecutorError> {
            std::future::pending().await
        }

        async fn verify_transaction(&self, _tx: &ContractCall) -> Result<(), ExecutorError> {
            std::future::pending().await
        }

        async fn calculate_balance(
            &self,
            _view_key: &[u8],
            _txs: &[ContractCall],
        ) -> Result<u64, ExecutorError> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_deadline_is_enforced() {
        let exec = DeadlineExecutor::new(Arc::new(StalledExecutor), Duration::from_millis(20));
        let err = exec.get_state_root().await.unwrap_err();
        assert!(matches!(err, ExecutorError::DeadlineExceeded));
    }
}
