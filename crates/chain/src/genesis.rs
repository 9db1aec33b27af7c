//! The preset genesis block.

use sba_types::{Block, Certificate, Hash, Header, BLOCK_VERSION};

/// Mainnet launch timestamp (fixed; every node derives the same genesis
/// hash).
const GENESIS_TIMESTAMP: i64 = 1_600_000_000;

/// Build the genesis block at height 0.
pub fn genesis_block() -> Block {
    Block::new(
        Header {
            version: BLOCK_VERSION,
            height: 0,
            timestamp: GENESIS_TIMESTAMP,
            prev_block_hash: Hash::ZERO,
            seed: Hash::from_bytes(b"sba-genesis-seed"),
            tx_root: Hash::ZERO,
            state_hash: Hash::ZERO,
            certificate: Certificate::genesis(),
        },
        vec![],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genesis_is_stable() {
        assert_eq!(genesis_block().hash(), genesis_block().hash());
        assert_eq!(genesis_block().header.height, 0);
        assert!(genesis_block().tx_root_matches());
    }
}
