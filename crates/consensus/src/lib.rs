//! The Segregated Byzantine Agreement consensus loop.
//!
//! One call to [`Consensus::spin`] runs one round: selection, two
//! reductions and the agreement phase, with step timeouts doubling on every
//! failed iteration. Agreement events circulate independently of the step
//! clock, so every phase also drains the agreement channel; a quorum of
//! agreements ends the round no matter which phase the loop is in.
//!
//! The loop multiplexes over its inbound bus channels and a timer and never
//! blocks on locks. Cancellation (tip advance, sync) exits within one bus
//! message.

mod accumulator;
mod agreement;
mod config;
mod selection;

pub use accumulator::{Accumulator, VoteDiscard};
pub use agreement::{AgreementAccumulator, AgreementDiscard, Equivocation};
pub use config::ConsensusConfig;
pub use selection::{BestScore, BlindBid, Generator, GeneratorError, MockBlindBid};

use sba_bus::{EventBus, Message, RpcBus, RpcParams, RpcTopic, Topic};
use sba_executor::Executor;
use sba_messages::{encode_gossip, Agreement, Payload, Reduction};
use sba_types::{Block, Certificate, Committee, Hash, KeyPair, RoundUpdate, StepVotes};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Iterations per round before the loop gives up (keeps the step counter
/// inside a u8: 3 steps per iteration).
const MAX_ITERATIONS: u8 = 84;

/// Errors ending a round without a winner.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// The chain cancelled the loop (tip advance or sync).
    #[error("consensus cancelled")]
    Cancelled,

    /// The step counter ran out without agreement.
    #[error("max iterations reached without agreement")]
    MaxIterationsReached,
}

/// The certified outcome of a round.
#[derive(Debug, Clone)]
pub struct Winner {
    /// The round that was decided.
    pub round: u64,
    /// Hash of the certified block.
    pub hash: Hash,
    /// The certificate proving quorum.
    pub certificate: Certificate,
    /// The block itself, when this node saw the candidate. A node that
    /// re-entered late may certify a hash it never held; the synchronizer
    /// then fetches the body.
    pub block: Option<Block>,
}

/// Detected double-certification, forwarded to the chain as a fallback
/// trigger.
pub type EquivocationReport = Vec<Equivocation>;

/// The consensus loop.
///
/// Subscribes to its inbound topics at construction time, before any
/// publisher starts, and keeps the receivers across rounds; events from
/// stale rounds are discarded by the per-round filters.
pub struct Consensus {
    config: ConsensusConfig,
    keys: KeyPair,
    bus: EventBus,
    rpc_bus: RpcBus,
    blind_bid: Arc<dyn BlindBid>,
    generator: Generator,
    score_rx: mpsc::Receiver<Message>,
    reduction_rx: mpsc::Receiver<Message>,
    agreement_rx: mpsc::Receiver<Message>,
}

impl Consensus {
    /// Wire the loop to the buses. Must run before publishers start.
    pub fn new(
        config: ConsensusConfig,
        keys: KeyPair,
        bus: EventBus,
        rpc_bus: RpcBus,
        executor: Arc<dyn Executor>,
        blind_bid: Arc<dyn BlindBid>,
    ) -> Self {
        let score_rx = bus.subscribe(Topic::Score);
        let reduction_rx = bus.subscribe(Topic::Reduction);
        let agreement_rx = bus.subscribe(Topic::Agreement);

        let generator = Generator::new(config.clone(), keys.clone(), Arc::clone(&blind_bid), executor);

        Self {
            config,
            keys,
            bus,
            rpc_bus,
            blind_bid,
            generator,
            score_rx,
            reduction_rx,
            agreement_rx,
        }
    }

    /// Run one round to termination: agreement quorum, cancellation, or
    /// iteration exhaustion.
    pub async fn spin(
        &mut self,
        ru: RoundUpdate,
        cancel: CancellationToken,
    ) -> Result<(Winner, EquivocationReport), ConsensusError> {
        info!(round = ru.round, provisioners = ru.provisioners.len(), "consensus spin");

        let mut agreement_acc =
            AgreementAccumulator::new(ru.clone(), self.config.committee_size);
        let mut candidates: HashMap<Hash, Block> = HashMap::new();

        for iteration in 1..=MAX_ITERATIONS {
            let timeout = self.config.timeout_for(iteration);
            let base_step = (iteration - 1) * 3;

            // Phase 1: selection.
            let selected = match self
                .selection_phase(&ru, base_step + 1, timeout, &cancel, &mut agreement_acc, &mut candidates)
                .await?
            {
                PhaseExit::Decided(winner) => {
                    return Ok(self.finish(winner, &mut agreement_acc, &candidates));
                }
                PhaseExit::Output(hash) => hash,
            };

            // Phase 2: first reduction.
            let (hash1, votes1) = match self
                .reduction_phase(&ru, base_step + 2, selected, timeout, &cancel, &mut agreement_acc)
                .await?
            {
                PhaseExit::Decided(winner) => {
                    return Ok(self.finish(winner, &mut agreement_acc, &candidates));
                }
                PhaseExit::Output(out) => out,
            };

            // Phase 3: second reduction, over the phase-2 result.
            let second_step = base_step + 3;
            let (hash2, votes2) = match self
                .reduction_phase(&ru, second_step, hash1, timeout, &cancel, &mut agreement_acc)
                .await?
            {
                PhaseExit::Decided(winner) => {
                    return Ok(self.finish(winner, &mut agreement_acc, &candidates));
                }
                PhaseExit::Output(out) => out,
            };

            // Quorum on a real hash in both reductions forms an agreement.
            // Quorum on the empty hash and a timeout restart identically.
            match (votes1, votes2) {
                (Some(first), Some(second)) if !hash2.is_zero() => {
                    let agreement = Agreement::new(
                        &self.keys,
                        ru.round,
                        second_step,
                        hash2,
                        first,
                        second,
                    );
                    self.publish(Payload::Agreement(Box::new(agreement.clone())));

                    // Our own agreement counts; with a single provisioner it
                    // certifies the round on the spot.
                    if let Some((hash, certificate)) = agreement_acc.collect(agreement) {
                        let winner = Winner {
                            round: ru.round,
                            hash,
                            certificate,
                            block: None,
                        };
                        return Ok(self.finish(winner, &mut agreement_acc, &candidates));
                    }
                }
                _ => {
                    debug!(
                        round = ru.round,
                        iteration,
                        "iteration failed, restarting selection with doubled timeout"
                    );
                }
            }

            if cancel.is_cancelled() {
                return Err(ConsensusError::Cancelled);
            }
        }

        Err(ConsensusError::MaxIterationsReached)
    }

    fn finish(
        &self,
        mut winner: Winner,
        agreement_acc: &mut AgreementAccumulator,
        candidates: &HashMap<Hash, Block>,
    ) -> (Winner, EquivocationReport) {
        if winner.block.is_none() {
            winner.block = candidates.get(&winner.hash).cloned();
        }
        if let Some(block) = winner.block.as_mut() {
            block.header.certificate = winner.certificate.clone();
        }
        info!(round = winner.round, hash = %winner.hash, "round decided");
        (winner, agreement_acc.take_equivocations())
    }

    /// Selection: pick the best score within the timeout, then validate the
    /// winning candidate against the chain.
    async fn selection_phase(
        &mut self,
        ru: &RoundUpdate,
        step: u8,
        timeout: std::time::Duration,
        cancel: &CancellationToken,
        agreement_acc: &mut AgreementAccumulator,
        candidates: &mut HashMap<Hash, Block>,
    ) -> Result<PhaseExit<Hash>, ConsensusError> {
        let mut selector = BestScore::new(ru, Arc::clone(&self.blind_bid));

        // Our own entry, when we hold an eligible bid and active stake.
        let our_key = self.keys.public_key();
        if ru.provisioners.is_active_at(&our_key, ru.round) {
            match self.generator.generate(ru, &self.rpc_bus).await {
                Ok(Some(score)) => {
                    candidates.insert(score.candidate_hash(), score.candidate.clone());
                    self.publish(Payload::Score(Box::new(score.clone())));
                    selector.offer(score);
                }
                Ok(None) => {}
                Err(e) => warn!(round = ru.round, error = %e, "candidate generation failed"),
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(ConsensusError::Cancelled),

                _ = tokio::time::sleep_until(deadline) => break,

                Some(msg) = self.agreement_rx.recv() => {
                    if let Message::Agreement(agreement) = msg {
                        if let Some((hash, certificate)) = agreement_acc.collect(*agreement) {
                            return Ok(PhaseExit::Decided(Winner {
                                round: ru.round,
                                hash,
                                certificate,
                                block: None,
                            }));
                        }
                    }
                }

                Some(msg) = self.score_rx.recv() => {
                    if let Message::Score(score) = msg {
                        let candidate = score.candidate.clone();
                        if selector.offer(*score) {
                            candidates.insert(candidate.hash(), candidate);
                        }
                    }
                }
            }
        }

        debug!(round = ru.round, step, discarded = selector.discarded(), "selection over");

        let Some(best) = selector.into_best() else {
            return Ok(PhaseExit::Output(Hash::ZERO));
        };

        // Admit the proposed block before voting on it.
        let hash = best.candidate_hash();
        let verdict = self
            .rpc_bus
            .call(
                RpcTopic::VerifyCandidateBlock,
                RpcParams::Candidate(Box::new(best.candidate.clone())),
                self.config.rpc_timeout,
            )
            .await;

        match verdict {
            Ok(_) => Ok(PhaseExit::Output(hash)),
            Err(e) => {
                warn!(round = ru.round, candidate = %hash, error = %e, "candidate rejected");
                Ok(PhaseExit::Output(Hash::ZERO))
            }
        }
    }

    /// One reduction step: cast our vote if we hold a seat, then accumulate
    /// to quorum or timeout.
    async fn reduction_phase(
        &mut self,
        ru: &RoundUpdate,
        step: u8,
        vote_hash: Hash,
        timeout: std::time::Duration,
        cancel: &CancellationToken,
        agreement_acc: &mut AgreementAccumulator,
    ) -> Result<PhaseExit<(Hash, Option<StepVotes>)>, ConsensusError> {
        let committee = Committee::extract(
            &ru.seed,
            ru.round,
            step,
            self.config.committee_size,
            &ru.provisioners,
        );
        let mut acc = Accumulator::new(ru.round, step, committee);

        if acc.committee().is_member(&self.keys.public_key()) {
            let vote = Reduction::new(&self.keys, ru.round, step, vote_hash);
            self.publish(Payload::Reduction(vote.clone()));

            if let Some((hash, votes)) = acc.collect(&vote) {
                return Ok(PhaseExit::Output((hash, Some(votes))));
            }
        }

        let deadline = Instant::now() + timeout;
        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(ConsensusError::Cancelled),

                _ = tokio::time::sleep_until(deadline) => {
                    debug!(round = ru.round, step, "reduction timeout");
                    return Ok(PhaseExit::Output((Hash::ZERO, None)));
                }

                Some(msg) = self.agreement_rx.recv() => {
                    if let Message::Agreement(agreement) = msg {
                        if let Some((hash, certificate)) = agreement_acc.collect(*agreement) {
                            return Ok(PhaseExit::Decided(Winner {
                                round: ru.round,
                                hash,
                                certificate,
                                block: None,
                            }));
                        }
                    }
                }

                Some(msg) = self.reduction_rx.recv() => {
                    if let Message::Reduction(vote) = msg {
                        if let Some((hash, votes)) = acc.collect(&vote) {
                            return Ok(PhaseExit::Output((hash, Some(votes))));
                        }
                    }
                }
            }
        }
    }

    fn publish(&self, payload: Payload) {
        match encode_gossip(&payload) {
            Ok(frame) => {
                self.bus.publish(Topic::Gossip, Message::Frame(frame));
            }
            Err(e) => warn!(error = %e, "failed to encode outbound event"),
        }
    }
}

enum PhaseExit<T> {
    /// The phase produced its output.
    Output(T),
    /// Agreement quorum decided the round mid-phase.
    Decided(Winner),
}
