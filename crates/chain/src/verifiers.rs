//! Block and certificate verification.

use crate::ChainError;
use sba_types::{reduction_message, Block, Committee, Hash, Provisioners, BLOCK_VERSION};
use std::time::{SystemTime, UNIX_EPOCH};

/// Maximum tolerated clock drift for a block timestamp, in seconds.
const MAX_TIMESTAMP_DRIFT: i64 = 60;

/// Maximum serialized block size, in bytes.
const MAX_BLOCK_SIZE: usize = 1_000_000;

/// Stateless sanity checks against the previous block: lineage, version,
/// timestamp bounds, size and transaction root.
pub fn sanity_check_block(prev: &Block, block: &Block) -> Result<(), ChainError> {
    if block.header.version != BLOCK_VERSION {
        return Err(ChainError::InvalidBlock("unsupported version".into()));
    }

    if block.header.height != prev.header.height + 1 {
        return Err(ChainError::InvalidBlock(format!(
            "height {} does not extend tip {}",
            block.header.height, prev.header.height
        )));
    }

    if block.header.prev_block_hash != prev.hash() {
        return Err(ChainError::InvalidBlock("previous hash mismatch".into()));
    }

    if block.header.timestamp < prev.header.timestamp {
        return Err(ChainError::InvalidBlock("timestamp before parent".into()));
    }

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(i64::MAX);
    if block.header.timestamp > now + MAX_TIMESTAMP_DRIFT {
        return Err(ChainError::InvalidBlock("timestamp in the future".into()));
    }

    let size: usize = block.txs.iter().map(|tx| tx.size_estimate()).sum();
    if size > MAX_BLOCK_SIZE {
        return Err(ChainError::InvalidBlock(format!("block too large: {size}")));
    }

    if !block.tx_root_matches() {
        return Err(ChainError::InvalidBlock("tx root mismatch".into()));
    }

    Ok(())
}

/// Verify a block's certificate against the provisioner set known at its
/// height.
///
/// The committees are re-derived from the previous seed exactly as the
/// voters derived them; both step bitmaps must carry a seat quorum and both
/// aggregates must verify against the referenced keys.
pub fn check_block_certificate(
    provisioners: &Provisioners,
    block: &Block,
    prev_seed: &Hash,
    committee_size: usize,
) -> Result<(), ChainError> {
    let certificate = &block.header.certificate;
    // Three steps per iteration; anything past u8::MAX / 3 never ran.
    if certificate.step == 0 || certificate.step > 84 {
        return Err(ChainError::InvalidCertificate(format!(
            "certificate step {} out of range",
            certificate.step
        )));
    }

    let round = block.header.height;
    let hash = block.hash();

    // Iteration i ran its reductions at steps 3i-1 and 3i.
    let second_step = certificate.step * 3;
    let first_step = second_step - 1;

    for (step, votes) in [
        (first_step, &certificate.first_reduction),
        (second_step, &certificate.second_reduction),
    ] {
        let committee = Committee::extract(prev_seed, round, step, committee_size, provisioners);

        if committee.seats_in(&votes.signers) < committee.quorum() {
            return Err(ChainError::InvalidCertificate(format!(
                "step {step} bitmap below quorum"
            )));
        }

        let keys = committee.keys_in(&votes.signers);
        let msg = reduction_message(round, step, &hash);
        if !votes.aggregate_sig.aggregate_verify(&msg, &keys) {
            return Err(ChainError::InvalidCertificate(format!(
                "step {step} aggregate signature invalid"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genesis::genesis_block;
    use sba_types::{Certificate, Header};

    fn successor(prev: &Block) -> Block {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        Block::new(
            Header {
                version: BLOCK_VERSION,
                height: prev.header.height + 1,
                timestamp: now,
                prev_block_hash: prev.hash(),
                seed: Hash::from_bytes(b"seed"),
                tx_root: Hash::ZERO,
                state_hash: Hash::from_bytes(b"state"),
                certificate: Certificate::genesis(),
            },
            vec![],
        )
    }

    #[test]
    fn test_valid_successor_passes() {
        let genesis = genesis_block();
        assert!(sanity_check_block(&genesis, &successor(&genesis)).is_ok());
    }

    #[test]
    fn test_wrong_height_rejected() {
        let genesis = genesis_block();
        let mut block = successor(&genesis);
        block.header.height = 5;
        assert!(matches!(
            sanity_check_block(&genesis, &block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_wrong_prev_hash_rejected() {
        let genesis = genesis_block();
        let mut block = successor(&genesis);
        block.header.prev_block_hash = Hash::from_bytes(b"fork");
        assert!(matches!(
            sanity_check_block(&genesis, &block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_tampered_tx_root_rejected() {
        let genesis = genesis_block();
        let mut block = successor(&genesis);
        block.header.tx_root = Hash::from_bytes(b"bogus");
        assert!(matches!(
            sanity_check_block(&genesis, &block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_future_timestamp_rejected() {
        let genesis = genesis_block();
        let mut block = successor(&genesis);
        block.header.timestamp += 3_600;
        assert!(matches!(
            sanity_check_block(&genesis, &block),
            Err(ChainError::InvalidBlock(_))
        ));
    }

    #[test]
    fn test_missing_certificate_rejected() {
        let genesis = genesis_block();
        let block = successor(&genesis);
        let provisioners = Provisioners::new();
        assert!(matches!(
            check_block_certificate(&provisioners, &block, &Hash::ZERO, 64),
            Err(ChainError::InvalidCertificate(_))
        ));
    }
}
