//! Selection phase: blind-bid lottery and candidate generation.

use crate::ConsensusConfig;
use sba_bus::{RpcBus, RpcParams, RpcResponse, RpcTopic};
use sba_executor::Executor;
use sba_messages::Score;
use sba_types::{
    seed_message, Block, Certificate, ContractCall, Hash, KeyPair, RoundUpdate, TxOutput, TxType,
    BLOCK_VERSION,
};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;
use tracing::{debug, trace};

/// The blind-bid proof system seam.
///
/// `prove` corresponds to `Prove(d, k, seed, bidListSubset)`; the proof blob
/// and the score it opens to are opaque to consensus. Verification is pure.
pub trait BlindBid: Send + Sync {
    /// Produce a proof and its score for this round, or `None` when the
    /// prover holds no eligible bid.
    fn prove(&self, seed: &Hash, round: u64, keys: &KeyPair) -> Option<(Vec<u8>, Hash)>;

    /// Check a proof against the score it claims.
    fn verify(&self, proof: &[u8], score: &Hash, seed: &Hash, round: u64) -> bool;
}

/// Deterministic stand-in for the external proof system.
///
/// The score is a hash of (seed, round, proof tail), so every node derives
/// the same verdict for the same event.
pub struct MockBlindBid;

impl MockBlindBid {
    fn score_of(proof: &[u8], seed: &Hash, round: u64) -> Hash {
        Hash::from_parts(&[seed.as_bytes(), &round.to_le_bytes(), proof])
    }
}

impl BlindBid for MockBlindBid {
    fn prove(&self, seed: &Hash, round: u64, keys: &KeyPair) -> Option<(Vec<u8>, Hash)> {
        let proof = keys.public_key().to_bytes();
        let score = Self::score_of(&proof, seed, round);
        Some((proof, score))
    }

    fn verify(&self, proof: &[u8], score: &Hash, seed: &Hash, round: u64) -> bool {
        Self::score_of(proof, seed, round) == *score
    }
}

/// Errors from candidate generation.
#[derive(Debug, Error)]
pub enum GeneratorError {
    /// Mempool selection failed.
    #[error("mempool selection failed: {0}")]
    Mempool(String),

    /// The executor refused the transaction set.
    #[error("state execution failed: {0}")]
    Execution(String),
}

/// Builds this node's score event for one round, if it holds a bid.
pub struct Generator {
    config: ConsensusConfig,
    keys: KeyPair,
    blind_bid: Arc<dyn BlindBid>,
    executor: Arc<dyn Executor>,
}

impl Generator {
    /// New generator for this node's keys.
    pub fn new(
        config: ConsensusConfig,
        keys: KeyPair,
        blind_bid: Arc<dyn BlindBid>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        Self {
            config,
            keys,
            blind_bid,
            executor,
        }
    }

    /// Generate a score event with a freshly built candidate block.
    pub async fn generate(
        &self,
        ru: &RoundUpdate,
        rpc_bus: &RpcBus,
    ) -> Result<Option<Score>, GeneratorError> {
        let Some((proof, score)) = self.blind_bid.prove(&ru.seed, ru.round, &self.keys) else {
            trace!(round = ru.round, "no eligible bid, skipping generation");
            return Ok(None);
        };

        let candidate = self.build_candidate(ru, rpc_bus).await?;
        debug!(
            round = ru.round,
            candidate = %candidate.hash(),
            txs = candidate.txs.len(),
            "candidate generated"
        );

        Ok(Some(Score::new(
            &self.keys,
            ru.round,
            score,
            proof,
            ru.hash,
            candidate,
        )))
    }

    /// Assemble the candidate: coinbase first, then the mempool's best
    /// transactions, state hash from a dry-run execution.
    async fn build_candidate(
        &self,
        ru: &RoundUpdate,
        rpc_bus: &RpcBus,
    ) -> Result<Block, GeneratorError> {
        let response = rpc_bus
            .call(
                RpcTopic::GetMempoolTxsBySize,
                RpcParams::MaxSize(self.config.max_block_size),
                self.config.rpc_timeout,
            )
            .await
            .map_err(|e| GeneratorError::Mempool(e.to_string()))?;

        let mut txs = vec![self.coinbase(ru.round)];
        if let RpcResponse::Transactions(selected) = response {
            txs.extend(selected);
        }

        let (accepted, state_hash) = self
            .executor
            .execute_state_transition(&txs, self.config.block_gas_limit, ru.round)
            .await
            .map_err(|e| GeneratorError::Execution(e.to_string()))?;

        let timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);

        // Seed chain: sign the previous seed, hash the signature.
        let seed_sig = self.keys.sign(&seed_message(ru.round, &ru.seed));
        let seed = Hash::from_bytes(&seed_sig.to_bytes());

        let header = sba_types::Header {
            version: BLOCK_VERSION,
            height: ru.round,
            timestamp,
            prev_block_hash: ru.hash,
            seed,
            tx_root: Hash::ZERO,
            state_hash,
            certificate: Certificate::genesis(),
        };

        Ok(Block::new(header, accepted))
    }

    /// The round's coinbase reward call.
    fn coinbase(&self, round: u64) -> ContractCall {
        ContractCall {
            call_type: TxType::Distribute,
            inputs: vec![],
            outputs: vec![TxOutput {
                commitment: Hash::from_parts(&[
                    &self.keys.public_key().to_bytes(),
                    &round.to_le_bytes(),
                ]),
                note: vec![],
            }],
            fee: 0,
            proof: vec![],
        }
    }
}

/// Keeps the best valid score seen during the selection window.
pub struct BestScore {
    round: u64,
    seed: Hash,
    prev_hash: Hash,
    blind_bid: Arc<dyn BlindBid>,
    best: Option<Score>,
    discarded: u64,
}

impl BestScore {
    /// New selector for one round.
    pub fn new(ru: &RoundUpdate, blind_bid: Arc<dyn BlindBid>) -> Self {
        Self {
            round: ru.round,
            seed: ru.seed,
            prev_hash: ru.hash,
            blind_bid,
            best: None,
            discarded: 0,
        }
    }

    /// Offer a score event; it is kept only if valid and outranking.
    /// Returns whether the event was valid at all.
    pub fn offer(&mut self, score: Score) -> bool {
        if score.header.round != self.round
            || score.prev_hash != self.prev_hash
            || score.candidate.header.height != self.round
            || !score.verify_signature()
            || !self
                .blind_bid
                .verify(&score.proof, &score.score, &self.seed, self.round)
        {
            self.discarded += 1;
            trace!(round = self.round, "score event discarded");
            return false;
        }

        match &self.best {
            Some(current) if !score.outranks(current) => {}
            _ => self.best = Some(score),
        }
        true
    }

    /// The winner so far, if any.
    pub fn best(&self) -> Option<&Score> {
        self.best.as_ref()
    }

    /// Consume the selector, yielding the winner.
    pub fn into_best(self) -> Option<Score> {
        self.best
    }

    /// Number of discarded events.
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::test_utils::{test_keypair, test_provisioners};
    use std::sync::Arc;

    fn round_update() -> RoundUpdate {
        let (provisioners, _) = test_provisioners(3, 100);
        RoundUpdate {
            round: 1,
            provisioners: Arc::new(provisioners),
            seed: Hash::from_bytes(b"seed"),
            hash: Hash::from_bytes(b"prev"),
            last_certificate: Certificate::genesis(),
        }
    }

    fn score_for(seed: u8, ru: &RoundUpdate) -> Score {
        let keys = test_keypair(seed);
        let bid = MockBlindBid;
        let (proof, score) = bid.prove(&ru.seed, ru.round, &keys).unwrap();

        let candidate = Block::new(
            sba_types::Header {
                version: BLOCK_VERSION,
                height: ru.round,
                timestamp: 0,
                prev_block_hash: ru.hash,
                seed: Hash::from_bytes(&[seed]),
                tx_root: Hash::ZERO,
                state_hash: Hash::ZERO,
                certificate: Certificate::genesis(),
            },
            vec![],
        );

        Score::new(&keys, ru.round, score, proof, ru.hash, candidate)
    }

    #[test]
    fn test_keeps_highest_score() {
        let ru = round_update();
        let mut selector = BestScore::new(&ru, Arc::new(MockBlindBid));

        let a = score_for(1, &ru);
        let b = score_for(2, &ru);
        let winner = if a.outranks(&b) { &a } else { &b };
        let winner_hash = winner.candidate_hash();

        selector.offer(a.clone());
        selector.offer(b.clone());

        assert_eq!(selector.best().unwrap().candidate_hash(), winner_hash);
        assert_eq!(selector.discarded(), 0);
    }

    #[test]
    fn test_rejects_wrong_prev_hash() {
        let ru = round_update();
        let mut selector = BestScore::new(&ru, Arc::new(MockBlindBid));

        let mut s = score_for(1, &ru);
        s.prev_hash = Hash::from_bytes(b"fork");
        selector.offer(s);

        assert!(selector.best().is_none());
        assert_eq!(selector.discarded(), 1);
    }

    #[test]
    fn test_rejects_forged_proof() {
        let ru = round_update();
        let mut selector = BestScore::new(&ru, Arc::new(MockBlindBid));

        let mut s = score_for(1, &ru);
        // Claim a better score than the proof opens to.
        s.score = Hash::from_hash_bytes(&[0xFF; 32]);
        selector.offer(s);

        assert!(selector.best().is_none());
        assert_eq!(selector.discarded(), 1);
    }
}
