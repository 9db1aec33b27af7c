//! Block, header and certificate types.

use crate::{merkle_root, Bitset, ContractCall, Hash, Signature};
use sbor::prelude::*;

/// Current block format version.
pub const BLOCK_VERSION: u8 = 1;

/// Aggregated votes of one reduction step.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct StepVotes {
    /// Aggregated BLS signature of every recorded committee member.
    pub aggregate_sig: Signature,
    /// Which committee seats signed, in committee order.
    pub signers: Bitset,
}

impl StepVotes {
    /// Placeholder votes for blocks that never went through consensus
    /// (genesis).
    pub fn empty() -> Self {
        Self {
            aggregate_sig: Signature::Bls12381(Vec::new()),
            signers: Bitset::empty(),
        }
    }
}

/// Succinct proof that a block reached quorum.
///
/// Carries the aggregated votes of both reduction steps plus the iteration
/// at which agreement was reached: 1 means the first iteration (the block is
/// final), anything above marks a tentative block accepted after restarts.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Certificate {
    /// Votes collected during the first reduction.
    pub first_reduction: StepVotes,
    /// Votes collected during the second reduction.
    pub second_reduction: StepVotes,
    /// Consensus iteration that produced the agreement.
    pub step: u8,
}

impl Certificate {
    /// Certificate for blocks that predate consensus (genesis).
    pub fn genesis() -> Self {
        Self {
            first_reduction: StepVotes::empty(),
            second_reduction: StepVotes::empty(),
            step: 0,
        }
    }
}

/// Block header.
///
/// The block hash covers every field except the certificate: a candidate is
/// hashed and voted on before any certificate exists, and the certificate a
/// block finally ships with must not change its identity.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Header {
    /// Block format version.
    pub version: u8,
    /// Height in the chain; the tip height plus one.
    pub height: u64,
    /// Unix timestamp (seconds) at proposal time.
    pub timestamp: i64,
    /// Hash of the previous block.
    pub prev_block_hash: Hash,
    /// Seed for this round's sortition, derived by the proposer from the
    /// previous seed.
    pub seed: Hash,
    /// Merkle root over the transaction list.
    pub tx_root: Hash,
    /// Post-execution state commitment from the executor.
    pub state_hash: Hash,
    /// Quorum proof. `Certificate::genesis()` until agreement completes.
    pub certificate: Certificate,
}

impl Header {
    /// Compute the block hash over the identity fields.
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.version]);
        hasher.update(&self.height.to_le_bytes());
        hasher.update(&self.timestamp.to_le_bytes());
        hasher.update(self.prev_block_hash.as_bytes());
        hasher.update(self.seed.as_bytes());
        hasher.update(self.tx_root.as_bytes());
        hasher.update(self.state_hash.as_bytes());
        Hash::from_hash_bytes(hasher.finalize().as_bytes())
    }
}

/// A block: header plus ordered transaction list.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Block {
    /// Block header.
    pub header: Header,
    /// Ordered transactions.
    pub txs: Vec<ContractCall>,
}

impl Block {
    /// Build a block, computing the transaction root from `txs`.
    pub fn new(mut header: Header, txs: Vec<ContractCall>) -> Self {
        header.tx_root = Self::tx_root_of(&txs);
        Self { header, txs }
    }

    /// Block hash (the header hash).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Merkle root over a transaction list.
    pub fn tx_root_of(txs: &[ContractCall]) -> Hash {
        let leaves: Vec<Hash> = txs.iter().map(|tx| tx.hash()).collect();
        merkle_root(&leaves)
    }

    /// Recompute the transaction root and compare against the header.
    pub fn tx_root_matches(&self) -> bool {
        self.header.tx_root == Self::tx_root_of(&self.txs)
    }
}
