//! Signable message construction with domain separation.
//!
//! Every BLS signature in the protocol covers a domain tag followed by the
//! consensus coordinates, so a reduction vote can never be replayed as an
//! agreement vote (or vice versa).

use crate::Hash;

/// Domain tag for reduction votes.
pub const DOMAIN_REDUCTION: &[u8] = b"SBA_REDUCTION_V1";

/// Domain tag for agreement events.
pub const DOMAIN_AGREEMENT: &[u8] = b"SBA_AGREEMENT_V1";

/// Domain tag for score (selection) events.
pub const DOMAIN_SCORE: &[u8] = b"SBA_SCORE_V1";

/// Domain tag for the per-block seed signature.
pub const DOMAIN_SEED: &[u8] = b"SBA_SEED_V1";

fn consensus_message(domain: &[u8], round: u64, step: u8, hash: &Hash) -> Vec<u8> {
    let mut msg = Vec::with_capacity(domain.len() + 8 + 1 + Hash::BYTES);
    msg.extend_from_slice(domain);
    msg.extend_from_slice(&round.to_le_bytes());
    msg.push(step);
    msg.extend_from_slice(hash.as_bytes());
    msg
}

/// Signing message for a reduction vote on `hash` at (round, step).
pub fn reduction_message(round: u64, step: u8, hash: &Hash) -> Vec<u8> {
    consensus_message(DOMAIN_REDUCTION, round, step, hash)
}

/// Signing message for an agreement event on `hash` at (round, step).
pub fn agreement_message(round: u64, step: u8, hash: &Hash) -> Vec<u8> {
    consensus_message(DOMAIN_AGREEMENT, round, step, hash)
}

/// Signing message for a score event binding a candidate to a round.
pub fn score_message(round: u64, candidate: &Hash) -> Vec<u8> {
    consensus_message(DOMAIN_SCORE, round, 1, candidate)
}

/// Signing message for the next block seed: the proposer signs the previous
/// seed so the seed chain stays unforgeable.
pub fn seed_message(round: u64, prev_seed: &Hash) -> Vec<u8> {
    consensus_message(DOMAIN_SEED, round, 0, prev_seed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domains_do_not_collide() {
        let hash = Hash::from_bytes(b"candidate");
        let red = reduction_message(5, 2, &hash);
        let agg = agreement_message(5, 2, &hash);
        assert_ne!(red, agg);
    }

    #[test]
    fn test_message_binds_coordinates() {
        let hash = Hash::from_bytes(b"candidate");
        assert_ne!(reduction_message(5, 2, &hash), reduction_message(5, 3, &hash));
        assert_ne!(reduction_message(5, 2, &hash), reduction_message(6, 2, &hash));
    }
}
