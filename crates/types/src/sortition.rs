//! Deterministic, stake-weighted committee extraction.
//!
//! Every node derives the committee for a (round, step) from the same four
//! inputs: previous seed, round, step and the provisioner snapshot. The
//! extraction is a pure function, so committees never need to travel over
//! the wire.

use crate::{Hash, Provisioners, PublicKey};
use std::collections::BTreeMap;

/// Fold the sortition inputs for seat `i` into a score in `[0, weight)`.
fn seat_score(seed: &Hash, round: u64, step: u8, seat: u32, total_weight: u64) -> u64 {
    let hash = Hash::from_parts(&[
        seed.as_bytes(),
        &round.to_le_bytes(),
        &[step],
        &seat.to_le_bytes(),
    ]);
    hash.as_u64() % total_weight
}

/// The ordered multiset of provisioners extracted for one (round, step).
///
/// A provisioner may hold several seats in proportion to stake. Distinct
/// members keep the provisioner-set order; their position doubles as the
/// bit index used in vote bitsets.
#[derive(Debug, Clone)]
pub struct Committee {
    /// Distinct members in provisioner-set order, with their seat counts.
    members: Vec<(PublicKey, usize)>,
    /// Member position by key bytes.
    index: BTreeMap<Vec<u8>, usize>,
    /// Total number of seats handed out.
    seats: usize,
}

impl Committee {
    /// Extract the committee for `(round, step)`.
    ///
    /// `size` seats are assigned by walking the provisioner set in order and
    /// picking, per seat, the first member whose cumulative active stake
    /// crosses a seeded pseudorandom score. Stake activity is snapshotted at
    /// the height equal to `round`.
    pub fn extract(
        seed: &Hash,
        round: u64,
        step: u8,
        size: usize,
        provisioners: &Provisioners,
    ) -> Self {
        let total_weight = provisioners.total_weight_at(round);

        let mut counts: BTreeMap<Vec<u8>, (PublicKey, usize)> = BTreeMap::new();
        let mut seats = 0usize;

        if total_weight > 0 {
            for seat in 0..size {
                let score = seat_score(seed, round, step, seat as u32, total_weight);

                let mut cumulative = 0u64;
                for member in provisioners.active_at(round) {
                    cumulative += member.weight_at(round);
                    if cumulative > score {
                        counts
                            .entry(member.public_key.to_bytes())
                            .or_insert_with(|| (member.public_key.clone(), 0))
                            .1 += 1;
                        seats += 1;
                        break;
                    }
                }
            }
        }

        // BTreeMap iteration keeps members in provisioner-set order.
        let members: Vec<(PublicKey, usize)> = counts.into_values().collect();
        let index = members
            .iter()
            .enumerate()
            .map(|(i, (pk, _))| (pk.to_bytes(), i))
            .collect();

        Self {
            members,
            index,
            seats,
        }
    }

    /// Number of seats `public_key` holds; zero for non-members.
    pub fn votes_for(&self, public_key: &PublicKey) -> usize {
        self.index
            .get(&public_key.to_bytes())
            .map(|&i| self.members[i].1)
            .unwrap_or(0)
    }

    /// Whether `public_key` holds at least one seat.
    pub fn is_member(&self, public_key: &PublicKey) -> bool {
        self.index.contains_key(&public_key.to_bytes())
    }

    /// Bit index of a member in vote bitsets.
    pub fn bit_index(&self, public_key: &PublicKey) -> Option<usize> {
        self.index.get(&public_key.to_bytes()).copied()
    }

    /// Member at a given bit index.
    pub fn member_at(&self, bit: usize) -> Option<&PublicKey> {
        self.members.get(bit).map(|(pk, _)| pk)
    }

    /// Distinct members with seat counts, in bitset order.
    pub fn members(&self) -> impl Iterator<Item = (&PublicKey, usize)> {
        self.members.iter().map(|(pk, n)| (pk, *n))
    }

    /// Number of distinct members.
    pub fn distinct_len(&self) -> usize {
        self.members.len()
    }

    /// Total seats handed out.
    pub fn seats(&self) -> usize {
        self.seats
    }

    /// Seat quorum: ceil(2/3 * seats).
    pub fn quorum(&self) -> usize {
        (self.seats * 2).div_ceil(3)
    }

    /// Committee weight of a signer bitset: the seats held by every member
    /// whose bit is set.
    pub fn seats_in(&self, signers: &crate::Bitset) -> usize {
        signers
            .set_indices()
            .filter_map(|bit| self.members.get(bit))
            .map(|(_, n)| n)
            .sum()
    }

    /// Public keys referenced by a signer bitset, in bit order.
    pub fn keys_in(&self, signers: &crate::Bitset) -> Vec<PublicKey> {
        signers
            .set_indices()
            .filter_map(|bit| self.members.get(bit))
            .map(|(pk, _)| pk.clone())
            .collect()
    }
}
