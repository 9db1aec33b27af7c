//! Score event: a blind-bid lottery entry with its candidate block.

use crate::ConsensusHeader;
use sba_types::{score_message, Block, Hash, KeyPair, Signature};
use sbor::prelude::*;
use std::cmp::Ordering;

/// Step number of the selection phase.
pub const SELECTION_STEP: u8 = 1;

/// A selection-phase event.
///
/// Carries the zero-knowledge blind-bid proof, the lottery score it opens
/// to, and the candidate block the bidder proposes. Listeners keep the
/// highest-scoring valid event seen within the phase timeout.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Score {
    /// Common consensus header.
    pub header: ConsensusHeader,
    /// Lottery score derived from the blind-bid proof.
    pub score: Hash,
    /// Opaque blind-bid proof; opened by the proof system, not by us.
    pub proof: Vec<u8>,
    /// Hash of the previous block this candidate extends.
    pub prev_hash: Hash,
    /// The proposed candidate block.
    pub candidate: Block,
    /// BLS signature binding the candidate to (round, score).
    pub signature: Signature,
}

impl Score {
    /// Build and sign a score event for `candidate` at `round`.
    pub fn new(
        keys: &KeyPair,
        round: u64,
        score: Hash,
        proof: Vec<u8>,
        prev_hash: Hash,
        candidate: Block,
    ) -> Self {
        let candidate_hash = candidate.hash();
        let signature = keys.sign(&score_message(round, &candidate_hash));
        Self {
            header: ConsensusHeader::new(keys.public_key(), round, SELECTION_STEP),
            score,
            proof,
            prev_hash,
            candidate,
            signature,
        }
    }

    /// Hash of the proposed candidate.
    pub fn candidate_hash(&self) -> Hash {
        self.candidate.hash()
    }

    /// Verify the producer's signature over (round, candidate hash).
    pub fn verify_signature(&self) -> bool {
        let msg = score_message(self.header.round, &self.candidate_hash());
        self.header.pubkey_bls.verify(&msg, &self.signature)
    }

    /// Compare two scores for the lottery: higher score wins, ties broken
    /// by the lower candidate hash.
    pub fn outranks(&self, other: &Score) -> bool {
        match self.score.as_bytes().cmp(other.score.as_bytes()) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => self.candidate_hash() < other.candidate_hash(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::test_utils::test_keypair;
    use sba_types::{Certificate, Header, BLOCK_VERSION};

    fn candidate(seed: u8) -> Block {
        Block::new(
            Header {
                version: BLOCK_VERSION,
                height: 1,
                timestamp: 1_000,
                prev_block_hash: Hash::from_bytes(b"prev"),
                seed: Hash::from_bytes(&[seed]),
                tx_root: Hash::ZERO,
                state_hash: Hash::from_bytes(b"state"),
                certificate: Certificate::genesis(),
            },
            vec![],
        )
    }

    fn score(seed: u8, score_byte: u8) -> Score {
        Score::new(
            &test_keypair(seed),
            1,
            Hash::from_hash_bytes(&[score_byte; 32]),
            vec![seed],
            Hash::from_bytes(b"prev"),
            candidate(seed),
        )
    }

    #[test]
    fn test_signature_roundtrip() {
        let s = score(1, 10);
        assert!(s.verify_signature());
    }

    #[test]
    fn test_tampered_candidate_fails_verification() {
        let mut s = score(1, 10);
        s.candidate.header.height += 1;
        assert!(!s.verify_signature());
    }

    #[test]
    fn test_higher_score_outranks() {
        let low = score(1, 10);
        let high = score(2, 20);
        assert!(high.outranks(&low));
        assert!(!low.outranks(&high));
    }

    #[test]
    fn test_equal_scores_break_ties_by_hash() {
        let a = score(1, 10);
        let b = score(2, 10);
        let a_wins = a.candidate_hash() < b.candidate_hash();
        assert_eq!(a.outranks(&b), a_wins);
        assert_eq!(b.outranks(&a), !a_wins);
    }
}
