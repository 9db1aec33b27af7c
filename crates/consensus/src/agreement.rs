//! Agreement accumulator: turns circulating agreement events into a
//! certificate.

use sba_messages::Agreement;
use sba_types::{reduction_message, Certificate, Committee, Hash, RoundUpdate};
use std::collections::HashMap;
use tracing::{trace, warn};

/// Why an agreement was not counted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgreementDiscard {
    /// Wrong round.
    WrongRound,
    /// Producer is not an active provisioner.
    InactiveProvisioner,
    /// Producer holds no seat on the agreement committee.
    NotAMember,
    /// Producer's own signature failed.
    BadSignature,
    /// A step bitmap misses quorum.
    BitmapBelowQuorum,
    /// An aggregated reduction signature failed.
    BadAggregate,
    /// Producer already sent an agreement this round.
    Duplicate,
}

/// A producer sending two agreements for different hashes in one round.
#[derive(Debug, Clone)]
pub struct Equivocation {
    /// The offending provisioner.
    pub pubkey: sba_types::PublicKey,
    /// Hash of the first agreement seen.
    pub first: Hash,
    /// Hash of the conflicting agreement.
    pub second: Hash,
}

/// Collects agreement events for one round.
///
/// Committees are re-derived per step on demand; validation follows the
/// protocol contract: active producer, per-step bitmap quorum, aggregate
/// verification against the referenced keys.
pub struct AgreementAccumulator {
    ru: RoundUpdate,
    committee_size: usize,
    /// Step committees derived so far.
    committees: HashMap<u8, Committee>,
    /// Which hash each producer vouched for.
    seen: HashMap<Vec<u8>, Hash>,
    /// Seat-weighted tally per hash, on the agreement committee.
    weights: HashMap<Hash, usize>,
    /// First valid agreement per hash; source of the certificate.
    exemplars: HashMap<Hash, Agreement>,
    /// Detected equivocations, drained by the caller.
    equivocations: Vec<Equivocation>,
    discarded: u64,
}

impl AgreementAccumulator {
    /// New accumulator for the round described by `ru`.
    pub fn new(ru: RoundUpdate, committee_size: usize) -> Self {
        Self {
            ru,
            committee_size,
            committees: HashMap::new(),
            seen: HashMap::new(),
            weights: HashMap::new(),
            exemplars: HashMap::new(),
            equivocations: Vec::new(),
            discarded: 0,
        }
    }

    fn committee(&mut self, step: u8) -> &Committee {
        let ru = &self.ru;
        let size = self.committee_size;
        self.committees.entry(step).or_insert_with(|| {
            Committee::extract(&ru.seed, ru.round, step, size, &ru.provisioners)
        })
    }

    /// Feed one agreement. Returns the certified hash and certificate once
    /// the seat-weighted agreement tally reaches quorum.
    pub fn collect(&mut self, agreement: Agreement) -> Option<(Hash, Certificate)> {
        match self.admit(&agreement) {
            Ok(()) => {}
            Err(reason) => {
                self.discarded += 1;
                trace!(?reason, round = self.ru.round, "agreement discarded");
                return None;
            }
        }

        let sender = agreement.header.pubkey_bls.to_bytes();
        let hash = agreement.block_hash;
        let step = agreement.header.step;

        // Equivocation: same producer, different hash. Both hashes are
        // remembered so the chain can arbitrate via fallback.
        if let Some(prior) = self.seen.get(&sender) {
            if *prior != hash {
                warn!(round = self.ru.round, "equivocating agreement producer");
                self.equivocations.push(Equivocation {
                    pubkey: agreement.header.pubkey_bls.clone(),
                    first: *prior,
                    second: hash,
                });
            }
            self.discarded += 1;
            return None;
        }
        self.seen.insert(sender, hash);

        let committee = self.committee(step);
        let weight = committee.votes_for(&agreement.header.pubkey_bls);
        let quorum = committee.quorum();

        let tally = self.weights.entry(hash).or_insert(0);
        *tally += weight;

        self.exemplars.entry(hash).or_insert(agreement);

        if *tally >= quorum {
            let certificate = self.exemplars.get(&hash)?.to_certificate();
            return Some((hash, certificate));
        }
        None
    }

    fn admit(&mut self, agreement: &Agreement) -> Result<(), AgreementDiscard> {
        if agreement.header.round != self.ru.round {
            return Err(AgreementDiscard::WrongRound);
        }

        let producer = &agreement.header.pubkey_bls;
        let height = self.ru.round.saturating_sub(1);
        if !self.ru.provisioners.is_active_at(producer, height) {
            return Err(AgreementDiscard::InactiveProvisioner);
        }

        if !agreement.verify_signature() {
            return Err(AgreementDiscard::BadSignature);
        }

        let (first_step, second_step) = agreement.reduction_steps();
        let round = agreement.header.round;
        let hash = agreement.block_hash;

        for (step, votes) in [
            (first_step, &agreement.first_reduction),
            (second_step, &agreement.second_reduction),
        ] {
            let committee = self.committee(step);
            if committee.seats_in(&votes.signers) < committee.quorum() {
                return Err(AgreementDiscard::BitmapBelowQuorum);
            }

            let keys = committee.keys_in(&votes.signers);
            let msg = reduction_message(round, step, &hash);
            if !votes.aggregate_sig.aggregate_verify(&msg, &keys) {
                return Err(AgreementDiscard::BadAggregate);
            }
        }

        let committee = self.committee(agreement.header.step);
        if !committee.is_member(producer) {
            return Err(AgreementDiscard::NotAMember);
        }

        Ok(())
    }

    /// Detected equivocations, draining the internal list.
    pub fn take_equivocations(&mut self) -> Vec<Equivocation> {
        std::mem::take(&mut self.equivocations)
    }

    /// Number of discarded events.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
