//! In-process executor used by tests and the default wiring.

use crate::{Executor, ExecutorError};
use async_trait::async_trait;
use parking_lot::RwLock;
use sba_types::{ContractCall, Hash, Provisioners};
use tracing::debug;

/// A deterministic executor stand-in.
///
/// The state root after a block is `blake3(prev_root ‖ height)`, so any two
/// nodes driving the mock with the same blocks agree on every root. A fixed
/// root can be injected to exercise the chain's state-hash mismatch path.
pub struct MockExecutor {
    provisioners: RwLock<Provisioners>,
    state_root: RwLock<Hash>,
    forced_root: RwLock<Option<Hash>>,
    reject_transactions: RwLock<bool>,
}

impl MockExecutor {
    /// Create a mock starting from `provisioners` and the zero state root.
    pub fn new(provisioners: Provisioners) -> Self {
        Self {
            provisioners: RwLock::new(provisioners),
            state_root: RwLock::new(Hash::ZERO),
            forced_root: RwLock::new(None),
            reject_transactions: RwLock::new(false),
        }
    }

    /// Deterministic root transition.
    pub fn next_root(prev: Hash, height: u64) -> Hash {
        Hash::from_parts(&[prev.as_bytes(), &height.to_le_bytes()])
    }

    /// Force every transition to report `root`, regardless of inputs.
    pub fn force_state_root(&self, root: Hash) {
        *self.forced_root.write() = Some(root);
    }

    /// Make `verify_transaction` fail from now on.
    pub fn reject_transactions(&self, reject: bool) {
        *self.reject_transactions.write() = reject;
    }

    /// Replace the provisioner set returned by state transitions.
    pub fn set_provisioners(&self, provisioners: Provisioners) {
        *self.provisioners.write() = provisioners;
    }

    fn transition(&self, prev_state_hash: Hash, height: u64) -> (Provisioners, Hash) {
        let root = self
            .forced_root
            .read()
            .unwrap_or_else(|| Self::next_root(prev_state_hash, height));
        *self.state_root.write() = root;
        (self.provisioners.read().clone(), root)
    }
}

#[async_trait]
impl Executor for MockExecutor {
    async fn verify_state_transition(
        &self,
        txs: &[ContractCall],
        _gas_limit: u64,
        height: u64,
    ) -> Result<(Vec<ContractCall>, Hash), ExecutorError> {
        let prev = *self.state_root.read();
        Ok((txs.to_vec(), Self::next_root(prev, height)))
    }

    async fn execute_state_transition(
        &self,
        txs: &[ContractCall],
        _gas_limit: u64,
        height: u64,
    ) -> Result<(Vec<ContractCall>, Hash), ExecutorError> {
        let prev = *self.state_root.read();
        let root = self
            .forced_root
            .read()
            .unwrap_or_else(|| Self::next_root(prev, height));
        Ok((txs.to_vec(), root))
    }

    async fn accept(
        &self,
        _txs: &[ContractCall],
        prev_state_hash: Hash,
        height: u64,
        _gas_limit: u64,
    ) -> Result<(Provisioners, Hash), ExecutorError> {
        debug!(height, "mock accept");
        Ok(self.transition(prev_state_hash, height))
    }

    async fn finalize(
        &self,
        _txs: &[ContractCall],
        prev_state_hash: Hash,
        height: u64,
        _gas_limit: u64,
    ) -> Result<(Provisioners, Hash), ExecutorError> {
        debug!(height, "mock finalize");
        Ok(self.transition(prev_state_hash, height))
    }

    async fn revert(&self, state_hash: Hash) -> Result<Hash, ExecutorError> {
        *self.state_root.write() = state_hash;
        Ok(state_hash)
    }

    async fn get_provisioners(&self) -> Result<Provisioners, ExecutorError> {
        Ok(self.provisioners.read().clone())
    }

    async fn get_state_root(&self) -> Result<Hash, ExecutorError> {
        Ok(*self.state_root.read())
    }

    async fn verify_transaction(&self, tx: &ContractCall) -> Result<(), ExecutorError> {
        if *self.reject_transactions.read() {
            return Err(ExecutorError::InvalidTransaction(format!(
                "rejected {}",
                tx.hash()
            )));
        }
        Ok(())
    }

    async fn calculate_balance(
        &self,
        _view_key: &[u8],
        txs: &[ContractCall],
    ) -> Result<u64, ExecutorError> {
        Ok(txs.iter().map(|tx| tx.fee).sum())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::test_utils::{test_provisioners, test_transfer};

    #[tokio::test]
    async fn test_transitions_are_deterministic() {
        let (provisioners, _) = test_provisioners(1, 100);
        let a = MockExecutor::new(provisioners.clone());
        let b = MockExecutor::new(provisioners);

        let (_, root_a) = a.accept(&[], Hash::ZERO, 1, 0).await.unwrap();
        let (_, root_b) = b.accept(&[], Hash::ZERO, 1, 0).await.unwrap();
        assert_eq!(root_a, root_b);
        assert_eq!(a.get_state_root().await.unwrap(), root_a);
    }

    #[tokio::test]
    async fn test_forced_root_overrides_transition() {
        let (provisioners, _) = test_provisioners(1, 100);
        let exec = MockExecutor::new(provisioners);

        let forced = Hash::from_bytes(b"forced");
        exec.force_state_root(forced);

        let (_, root) = exec.accept(&[], Hash::ZERO, 1, 0).await.unwrap();
        assert_eq!(root, forced);
    }

    #[tokio::test]
    async fn test_revert_restores_root() {
        let (provisioners, _) = test_provisioners(1, 100);
        let exec = MockExecutor::new(provisioners);

        let (_, root1) = exec.accept(&[], Hash::ZERO, 1, 0).await.unwrap();
        let _ = exec.accept(&[], root1, 2, 0).await.unwrap();

        exec.revert(root1).await.unwrap();
        assert_eq!(exec.get_state_root().await.unwrap(), root1);
    }

    #[tokio::test]
    async fn test_rejection_toggle() {
        let (provisioners, _) = test_provisioners(1, 100);
        let exec = MockExecutor::new(provisioners);
        let tx = test_transfer(1, 10);

        assert!(exec.verify_transaction(&tx).await.is_ok());
        exec.reject_transactions(true);
        assert!(exec.verify_transaction(&tx).await.is_err());
    }
}
