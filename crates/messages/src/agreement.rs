//! Agreement event: the aggregated outcome of both reduction steps.

use crate::ConsensusHeader;
use sba_types::{agreement_message, Certificate, Hash, KeyPair, Signature, StepVotes};
use sbor::prelude::*;

/// Final consensus event for a round.
///
/// A node that saw both reductions reach quorum on the same hash aggregates
/// the collected votes per step and signs the result. Agreement events
/// circulate independently of the step clock; whoever accumulates a quorum
/// of them holds a certificate.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Agreement {
    /// Common consensus header; `step` is the second reduction's step.
    pub header: ConsensusHeader,
    /// The hash both reductions converged on.
    pub block_hash: Hash,
    /// Aggregated votes of the first reduction step.
    pub first_reduction: StepVotes,
    /// Aggregated votes of the second reduction step.
    pub second_reduction: StepVotes,
    /// Producer's BLS signature over (round, step, block hash).
    pub signature: Signature,
}

impl Agreement {
    /// Build and sign an agreement event.
    pub fn new(
        keys: &KeyPair,
        round: u64,
        step: u8,
        block_hash: Hash,
        first_reduction: StepVotes,
        second_reduction: StepVotes,
    ) -> Self {
        let signature = keys.sign(&agreement_message(round, step, &block_hash));
        Self {
            header: ConsensusHeader::new(keys.public_key(), round, step),
            block_hash,
            first_reduction,
            second_reduction,
            signature,
        }
    }

    /// Verify the producer's signature.
    pub fn verify_signature(&self) -> bool {
        let msg = agreement_message(self.header.round, self.header.step, &self.block_hash);
        self.header.pubkey_bls.verify(&msg, &self.signature)
    }

    /// Steps the two reduction vote sets belong to: `(step - 1, step)`.
    pub fn reduction_steps(&self) -> (u8, u8) {
        (self.header.step.saturating_sub(1), self.header.step)
    }

    /// Consensus iteration this agreement concludes.
    ///
    /// Steps run 1..=3 per iteration (selection, two reductions), so the
    /// second reduction of iteration `i` is step `3i`.
    pub fn iteration(&self) -> u8 {
        self.header.step.div_ceil(3)
    }

    /// Turn the aggregated votes into the block certificate.
    pub fn to_certificate(&self) -> Certificate {
        Certificate {
            first_reduction: self.first_reduction.clone(),
            second_reduction: self.second_reduction.clone(),
            step: self.iteration(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::test_utils::test_keypair;
    use sba_types::Bitset;

    fn votes(count: usize) -> StepVotes {
        let mut signers = Bitset::new(count.max(1));
        for i in 0..count {
            signers.set(i);
        }
        StepVotes {
            aggregate_sig: Signature::Bls12381(vec![0u8; 96]),
            signers,
        }
    }

    fn agreement(step: u8) -> Agreement {
        Agreement::new(
            &test_keypair(1),
            7,
            step,
            Hash::from_bytes(b"winner"),
            votes(3),
            votes(4),
        )
    }

    #[test]
    fn test_signature_verifies() {
        assert!(agreement(3).verify_signature());
    }

    #[test]
    fn test_signature_binds_hash() {
        let mut a = agreement(3);
        a.block_hash = Hash::from_bytes(b"other");
        assert!(!a.verify_signature());
    }

    #[test]
    fn test_iteration_from_step() {
        assert_eq!(agreement(3).iteration(), 1);
        assert_eq!(agreement(6).iteration(), 2);
        assert_eq!(agreement(9).iteration(), 3);
    }

    #[test]
    fn test_certificate_carries_both_step_votes() {
        let a = agreement(3);
        let cert = a.to_certificate();
        assert_eq!(cert.step, 1);
        assert_eq!(cert.first_reduction.signers.count(), 3);
        assert_eq!(cert.second_reduction.signers.count(), 4);
    }
}
