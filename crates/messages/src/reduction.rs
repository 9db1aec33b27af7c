//! Reduction vote: a signed step vote narrowing the candidate set.

use crate::ConsensusHeader;
use sba_types::{reduction_message, Hash, KeyPair, Signature};
use sbor::prelude::*;

/// A reduction-phase vote on a block hash.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Reduction {
    /// Common consensus header.
    pub header: ConsensusHeader,
    /// The hash being voted for. `Hash::ZERO` votes for "no candidate".
    pub block_hash: Hash,
    /// BLS signature over (round, step, block hash).
    pub signed_hash: Signature,
}

impl Reduction {
    /// Build and sign a reduction vote.
    pub fn new(keys: &KeyPair, round: u64, step: u8, block_hash: Hash) -> Self {
        let signed_hash = keys.sign(&reduction_message(round, step, &block_hash));
        Self {
            header: ConsensusHeader::new(keys.public_key(), round, step),
            block_hash,
            signed_hash,
        }
    }

    /// Verify the vote signature against the header's key.
    pub fn verify_signature(&self) -> bool {
        let msg = reduction_message(self.header.round, self.header.step, &self.block_hash);
        self.header.pubkey_bls.verify(&msg, &self.signed_hash)
    }
}
