//! Block persistence seam.
//!
//! Schema and encoding are owned by the Loader implementation; the chain
//! only sees this transactional view. The in-memory implementation backs
//! tests and single-process runs.

use parking_lot::RwLock;
use sba_types::{Block, ContractCall, Hash};
use std::collections::HashMap;
use thiserror::Error;

/// Loader failures.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// No block at the requested height.
    #[error("no block at height {0}")]
    NotFound(u64),

    /// Appended block does not extend the stored chain.
    #[error("append out of order: expected height {expected}, got {actual}")]
    OutOfOrder {
        /// Height the store expected.
        expected: u64,
        /// Height that was offered.
        actual: u64,
    },

    /// Backend failure.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage abstraction for the chain.
pub trait Loader: Send + Sync {
    /// The current tip.
    fn load_tip(&self) -> Result<Block, LoaderError>;

    /// Append a block; must extend the tip by exactly one height.
    fn append(&self, block: &Block) -> Result<(), LoaderError>;

    /// Current stored height.
    fn height(&self) -> Result<u64, LoaderError>;

    /// Block at a given height.
    fn block_at(&self, height: u64) -> Result<Block, LoaderError>;

    /// Look up a transaction in any persisted block; returns the call and
    /// the height of the containing block.
    fn fetch_block_tx_by_hash(&self, txid: &Hash)
        -> Result<Option<(ContractCall, u64)>, LoaderError>;

    /// Drop every block strictly above `height` (fallback support).
    fn rollback_to(&self, height: u64) -> Result<(), LoaderError>;

    /// Store a candidate block seen during consensus.
    fn store_candidate(&self, block: &Block) -> Result<(), LoaderError>;

    /// Drop all stored candidate blocks.
    fn clear_candidate_messages(&self) -> Result<(), LoaderError>;
}

/// In-memory loader seeded with a genesis block.
pub struct MemoryLoader {
    blocks: RwLock<Vec<Block>>,
    tx_index: RwLock<HashMap<Hash, u64>>,
    candidates: RwLock<HashMap<Hash, Block>>,
}

impl MemoryLoader {
    /// Create a loader holding only `genesis` (height 0).
    pub fn new(genesis: Block) -> Self {
        let mut tx_index = HashMap::new();
        for tx in &genesis.txs {
            tx_index.insert(tx.hash(), 0);
        }
        Self {
            blocks: RwLock::new(vec![genesis]),
            tx_index: RwLock::new(tx_index),
            candidates: RwLock::new(HashMap::new()),
        }
    }

    /// Number of stored candidates (test support).
    pub fn candidate_count(&self) -> usize {
        self.candidates.read().len()
    }
}

impl Loader for MemoryLoader {
    fn load_tip(&self) -> Result<Block, LoaderError> {
        self.blocks
            .read()
            .last()
            .cloned()
            .ok_or(LoaderError::NotFound(0))
    }

    fn append(&self, block: &Block) -> Result<(), LoaderError> {
        let mut blocks = self.blocks.write();
        let expected = blocks.len() as u64;
        if block.header.height != expected {
            return Err(LoaderError::OutOfOrder {
                expected,
                actual: block.header.height,
            });
        }

        let mut tx_index = self.tx_index.write();
        for tx in &block.txs {
            tx_index.insert(tx.hash(), block.header.height);
        }
        blocks.push(block.clone());
        Ok(())
    }

    fn height(&self) -> Result<u64, LoaderError> {
        let blocks = self.blocks.read();
        Ok(blocks.len().saturating_sub(1) as u64)
    }

    fn block_at(&self, height: u64) -> Result<Block, LoaderError> {
        self.blocks
            .read()
            .get(height as usize)
            .cloned()
            .ok_or(LoaderError::NotFound(height))
    }

    fn fetch_block_tx_by_hash(
        &self,
        txid: &Hash,
    ) -> Result<Option<(ContractCall, u64)>, LoaderError> {
        let Some(&height) = self.tx_index.read().get(txid) else {
            return Ok(None);
        };
        let block = self.block_at(height)?;
        Ok(block
            .txs
            .iter()
            .find(|tx| tx.hash() == *txid)
            .map(|tx| (tx.clone(), height)))
    }

    fn rollback_to(&self, height: u64) -> Result<(), LoaderError> {
        let mut blocks = self.blocks.write();
        if (height as usize) >= blocks.len() {
            return Ok(());
        }

        let mut tx_index = self.tx_index.write();
        for dropped in blocks.drain((height as usize + 1)..) {
            for tx in &dropped.txs {
                tx_index.remove(&tx.hash());
            }
        }
        Ok(())
    }

    fn store_candidate(&self, block: &Block) -> Result<(), LoaderError> {
        self.candidates.write().insert(block.hash(), block.clone());
        Ok(())
    }

    fn clear_candidate_messages(&self) -> Result<(), LoaderError> {
        self.candidates.write().clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::genesis_block;
    use sba_types::test_utils::test_transfer;
    use sba_types::{Certificate, Header, BLOCK_VERSION};

    fn block_on(prev: &Block, txs: Vec<ContractCall>) -> Block {
        Block::new(
            Header {
                version: BLOCK_VERSION,
                height: prev.header.height + 1,
                timestamp: prev.header.timestamp + 1,
                prev_block_hash: prev.hash(),
                seed: Hash::from_bytes(b"seed"),
                tx_root: Hash::ZERO,
                state_hash: Hash::from_bytes(b"state"),
                certificate: Certificate::genesis(),
            },
            txs,
        )
    }

    #[test]
    fn test_append_and_tip() {
        let genesis = genesis_block();
        let loader = MemoryLoader::new(genesis.clone());

        let b1 = block_on(&genesis, vec![]);
        loader.append(&b1).unwrap();

        assert_eq!(loader.height().unwrap(), 1);
        assert_eq!(loader.load_tip().unwrap().hash(), b1.hash());
    }

    #[test]
    fn test_out_of_order_append_rejected() {
        let genesis = genesis_block();
        let loader = MemoryLoader::new(genesis.clone());

        let mut b2 = block_on(&genesis, vec![]);
        b2.header.height = 2;
        assert!(matches!(
            loader.append(&b2),
            Err(LoaderError::OutOfOrder { expected: 1, actual: 2 })
        ));
    }

    #[test]
    fn test_tx_lookup_and_rollback() {
        let genesis = genesis_block();
        let loader = MemoryLoader::new(genesis.clone());

        let tx = test_transfer(1, 10);
        let txid = tx.hash();
        let b1 = block_on(&genesis, vec![tx]);
        loader.append(&b1).unwrap();

        let (found, height) = loader.fetch_block_tx_by_hash(&txid).unwrap().unwrap();
        assert_eq!(found.hash(), txid);
        assert_eq!(height, 1);

        loader.rollback_to(0).unwrap();
        assert_eq!(loader.height().unwrap(), 0);
        assert!(loader.fetch_block_tx_by_hash(&txid).unwrap().is_none());
    }

    #[test]
    fn test_candidate_lifecycle() {
        let genesis = genesis_block();
        let loader = MemoryLoader::new(genesis.clone());

        loader.store_candidate(&block_on(&genesis, vec![])).unwrap();
        assert_eq!(loader.candidate_count(), 1);

        loader.clear_candidate_messages().unwrap();
        assert_eq!(loader.candidate_count(), 0);
    }
}
