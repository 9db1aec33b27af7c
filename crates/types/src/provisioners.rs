//! The provisioner registry: active stakers eligible to sign consensus
//! messages.
//!
//! The set is keyed by BLS public key bytes in a `BTreeMap`, giving every
//! node the same lexicographic iteration order. Sortition walks the set in
//! that order, so ordering is consensus-critical.

use crate::PublicKey;
use sbor::prelude::*;
use std::collections::BTreeMap;

/// One stake window of a provisioner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, BasicSbor)]
pub struct Stake {
    /// Locked amount.
    pub amount: u64,
    /// First height at which the stake counts.
    pub start_height: u64,
    /// First height at which the stake no longer counts.
    pub end_height: u64,
}

impl Stake {
    /// Whether this window covers `height`.
    pub fn active_at(&self, height: u64) -> bool {
        self.start_height <= height && height < self.end_height
    }
}

/// A provisioner: a BLS key with its stake windows.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct Member {
    /// The provisioner's BLS public key.
    pub public_key: PublicKey,
    /// Stake windows, in insertion order.
    pub stakes: Vec<Stake>,
}

impl Member {
    /// Total stake counting toward committees at `height`.
    pub fn weight_at(&self, height: u64) -> u64 {
        self.stakes
            .iter()
            .filter(|s| s.active_at(height))
            .map(|s| s.amount)
            .sum()
    }

    /// Whether any window covers `height`.
    pub fn active_at(&self, height: u64) -> bool {
        self.stakes.iter().any(|s| s.active_at(height))
    }
}

/// Ordered set of provisioners.
#[derive(Debug, Clone, Default, PartialEq, Eq, BasicSbor)]
pub struct Provisioners {
    members: BTreeMap<Vec<u8>, Member>,
}

impl Provisioners {
    /// Create an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a stake window for `public_key`, creating the member if needed.
    pub fn add_stake(&mut self, public_key: PublicKey, stake: Stake) {
        self.members
            .entry(public_key.to_bytes())
            .or_insert_with(|| Member {
                public_key,
                stakes: Vec::new(),
            })
            .stakes
            .push(stake);
    }

    /// Remove a member entirely.
    pub fn remove(&mut self, public_key: &PublicKey) {
        self.members.remove(&public_key.to_bytes());
    }

    /// Look up a member.
    pub fn member(&self, public_key: &PublicKey) -> Option<&Member> {
        self.members.get(&public_key.to_bytes())
    }

    /// Whether `public_key` has any stake window covering `height`.
    pub fn is_active_at(&self, public_key: &PublicKey, height: u64) -> bool {
        self.member(public_key)
            .is_some_and(|m| m.active_at(height))
    }

    /// Members in lexicographic key order.
    pub fn iter(&self) -> impl Iterator<Item = &Member> {
        self.members.values()
    }

    /// Members with at least one active window at `height`, in set order.
    pub fn active_at(&self, height: u64) -> impl Iterator<Item = &Member> {
        self.members.values().filter(move |m| m.active_at(height))
    }

    /// Total active stake at `height`.
    pub fn total_weight_at(&self, height: u64) -> u64 {
        self.active_at(height).map(|m| m.weight_at(height)).sum()
    }

    /// Number of members (active or not).
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Whether the set has no members.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KeyPair, KeyType};

    fn key(seed: u8) -> PublicKey {
        KeyPair::from_seed(KeyType::Bls12381, &[seed; 32]).public_key()
    }

    fn stake(amount: u64, start: u64, end: u64) -> Stake {
        Stake {
            amount,
            start_height: start,
            end_height: end,
        }
    }

    #[test]
    fn test_stake_window_bounds() {
        let s = stake(100, 10, 20);
        assert!(!s.active_at(9));
        assert!(s.active_at(10));
        assert!(s.active_at(19));
        assert!(!s.active_at(20));
    }

    #[test]
    fn test_weight_sums_active_windows_only() {
        let mut p = Provisioners::new();
        let pk = key(1);
        p.add_stake(pk.clone(), stake(100, 0, 50));
        p.add_stake(pk.clone(), stake(200, 25, 75));

        let m = p.member(&pk).unwrap();
        assert_eq!(m.weight_at(10), 100);
        assert_eq!(m.weight_at(30), 300);
        assert_eq!(m.weight_at(60), 200);
        assert_eq!(m.weight_at(80), 0);
    }

    #[test]
    fn test_iteration_order_is_stable() {
        let mut a = Provisioners::new();
        let mut b = Provisioners::new();

        // Insert in opposite orders; iteration must agree.
        for seed in [3u8, 1, 2] {
            a.add_stake(key(seed), stake(100, 0, 100));
        }
        for seed in [2u8, 1, 3] {
            b.add_stake(key(seed), stake(100, 0, 100));
        }

        let order_a: Vec<_> = a.iter().map(|m| m.public_key.clone()).collect();
        let order_b: Vec<_> = b.iter().map(|m| m.public_key.clone()).collect();
        assert_eq!(order_a, order_b);
    }

    #[test]
    fn test_total_weight_at() {
        let mut p = Provisioners::new();
        p.add_stake(key(1), stake(100, 0, 100));
        p.add_stake(key(2), stake(50, 10, 20));

        assert_eq!(p.total_weight_at(5), 100);
        assert_eq!(p.total_weight_at(15), 150);
    }
}
