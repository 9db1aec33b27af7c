//! Reduction vote accumulator.
//!
//! Collects votes for one (round, step), deduplicates by sender, checks
//! committee membership and signatures, and reports quorum the moment the
//! seat-weighted tally on a single hash crosses the threshold.

use sba_messages::Reduction;
use sba_types::{Bitset, Committee, Hash, Signature, StepVotes};
use std::collections::{HashMap, HashSet};
use tracing::{trace, warn};

/// Why a vote was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoteDiscard {
    /// Wrong round or step for this accumulator.
    WrongCoordinates,
    /// Second vote from the same sender within the step.
    Duplicate,
    /// Sender holds no seat on the step committee.
    NotAMember,
    /// The BLS signature did not verify.
    BadSignature,
}

/// Per-hash vote bookkeeping.
#[derive(Default)]
struct Tally {
    weight: usize,
    signatures: Vec<Signature>,
    signers: Vec<usize>,
}

/// Accumulates reduction votes for one step.
pub struct Accumulator {
    round: u64,
    step: u8,
    committee: Committee,
    voters: HashSet<Vec<u8>>,
    tallies: HashMap<Hash, Tally>,
    /// Discarded-event counter; signature failures never crash the loop.
    discarded: u64,
}

impl Accumulator {
    /// New accumulator over `committee` for `(round, step)`.
    pub fn new(round: u64, step: u8, committee: Committee) -> Self {
        Self {
            round,
            step,
            committee,
            voters: HashSet::new(),
            tallies: HashMap::new(),
            discarded: 0,
        }
    }

    /// The committee this accumulator counts against.
    pub fn committee(&self) -> &Committee {
        &self.committee
    }

    /// Number of discarded votes so far.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    /// Feed one vote. Returns the winning hash and aggregated step votes
    /// once quorum is reached, `None` while pending.
    pub fn collect(&mut self, vote: &Reduction) -> Option<(Hash, StepVotes)> {
        if let Err(reason) = self.admit(vote) {
            self.discarded += 1;
            trace!(?reason, round = self.round, step = self.step, "vote discarded");
            return None;
        }

        let sender = &vote.header.pubkey_bls;
        self.voters.insert(sender.to_bytes());

        let weight = self.committee.votes_for(sender);
        let bit = self.committee.bit_index(sender)?;

        let tally = self.tallies.entry(vote.block_hash).or_default();
        tally.weight += weight;
        tally.signatures.push(vote.signed_hash.clone());
        tally.signers.push(bit);

        if tally.weight < self.committee.quorum() {
            return None;
        }

        let aggregate_sig = match Signature::aggregate_bls(&tally.signatures) {
            Ok(sig) => sig,
            Err(e) => {
                warn!(error = %e, "vote aggregation failed");
                self.discarded += 1;
                return None;
            }
        };

        let mut signers = Bitset::new(self.committee.distinct_len());
        for &bit in &tally.signers {
            signers.set(bit);
        }

        Some((
            vote.block_hash,
            StepVotes {
                aggregate_sig,
                signers,
            },
        ))
    }

    fn admit(&self, vote: &Reduction) -> Result<(), VoteDiscard> {
        if vote.header.round != self.round || vote.header.step != self.step {
            return Err(VoteDiscard::WrongCoordinates);
        }
        let sender = &vote.header.pubkey_bls;
        if self.voters.contains(&sender.to_bytes()) {
            return Err(VoteDiscard::Duplicate);
        }
        if !self.committee.is_member(sender) {
            return Err(VoteDiscard::NotAMember);
        }
        if !vote.verify_signature() {
            return Err(VoteDiscard::BadSignature);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::test_utils::test_provisioners;
    use sba_types::{reduction_message, KeyPair};

    const ROUND: u64 = 5;
    const STEP: u8 = 2;

    fn setup(n: u8, size: usize) -> (Accumulator, Vec<KeyPair>) {
        let (provisioners, keys) = test_provisioners(n, 100);
        let seed = Hash::from_bytes(b"seed");
        let committee = Committee::extract(&seed, ROUND, STEP, size, &provisioners);
        (Accumulator::new(ROUND, STEP, committee), keys)
    }

    /// Keypairs that actually hold seats, in key order.
    fn members(acc: &Accumulator, keys: &[KeyPair]) -> Vec<KeyPair> {
        keys.iter()
            .filter(|kp| acc.committee().is_member(&kp.public_key()))
            .cloned()
            .collect()
    }

    fn vote(keys: &KeyPair, hash: Hash) -> Reduction {
        Reduction::new(keys, ROUND, STEP, hash)
    }

    #[test]
    fn test_quorum_on_single_hash() {
        let (mut acc, keys) = setup(4, 8);
        let hash = Hash::from_bytes(b"candidate");

        let mut result = None;
        for kp in members(&acc, &keys) {
            result = acc.collect(&vote(&kp, hash));
            if result.is_some() {
                break;
            }
        }

        let (winner, step_votes) = result.expect("quorum should be reached");
        assert_eq!(winner, hash);
        assert!(acc.committee().seats_in(&step_votes.signers) >= acc.committee().quorum());

        // The aggregate must verify against the recorded signers.
        let keys_in = acc.committee().keys_in(&step_votes.signers);
        let msg = reduction_message(ROUND, STEP, &hash);
        assert!(step_votes.aggregate_sig.aggregate_verify(&msg, &keys_in));
    }

    #[test]
    fn test_duplicate_votes_are_dropped() {
        let (mut acc, keys) = setup(4, 8);
        let member = members(&acc, &keys).remove(0);
        let hash = Hash::from_bytes(b"candidate");

        let first = acc.collect(&vote(&member, hash));
        let second = acc.collect(&vote(&member, hash));
        // The second vote never adds weight, whatever the first did.
        assert!(second.is_none() || first.is_some());
        assert_eq!(acc.discarded(), 1);
    }

    #[test]
    fn test_non_member_votes_are_dropped() {
        let (mut acc, _) = setup(4, 8);
        let outsider = sba_types::test_utils::test_keypair(99);
        let hash = Hash::from_bytes(b"candidate");

        assert!(acc.collect(&vote(&outsider, hash)).is_none());
        assert_eq!(acc.discarded(), 1);
    }

    #[test]
    fn test_tampered_signature_is_dropped() {
        let (mut acc, keys) = setup(4, 8);
        let member = members(&acc, &keys).remove(0);
        let mut v = vote(&member, Hash::from_bytes(b"candidate"));
        v.block_hash = Hash::from_bytes(b"other");

        assert!(acc.collect(&v).is_none());
        assert_eq!(acc.discarded(), 1);
    }

    #[test]
    fn test_split_votes_reach_no_quorum() {
        let (mut acc, keys) = setup(4, 8);
        let members = members(&acc, &keys);

        // Only meaningful when no single member already owns a quorum of
        // seats; sortition is deterministic, so this is a fixed property
        // of the fixture.
        let quorum = acc.committee().quorum();
        if members
            .iter()
            .any(|kp| acc.committee().votes_for(&kp.public_key()) >= quorum)
        {
            return;
        }

        for (i, kp) in members.iter().enumerate() {
            let hash = Hash::from_bytes(&[i as u8]);
            assert!(acc.collect(&vote(kp, hash)).is_none());
        }
    }

    #[test]
    fn test_wrong_round_is_dropped() {
        let (mut acc, keys) = setup(4, 8);
        let member = members(&acc, &keys).remove(0);
        let v = Reduction::new(&member, ROUND + 1, STEP, Hash::from_bytes(b"candidate"));
        assert!(acc.collect(&v).is_none());
        assert_eq!(acc.discarded(), 1);
    }
}
