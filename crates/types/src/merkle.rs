//! Merkle root over transaction hashes.

use crate::Hash;

/// Compute the Merkle root of an ordered list of leaf hashes.
///
/// Odd levels duplicate their last node. An empty list yields the zero hash,
/// which is what an empty block's transaction root must be.
pub fn merkle_root(leaves: &[Hash]) -> Hash {
    if leaves.is_empty() {
        return Hash::ZERO;
    }

    let mut level: Vec<Hash> = leaves.to_vec();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let right = pair.get(1).unwrap_or(&pair[0]);
            next.push(Hash::from_parts(&[pair[0].as_bytes(), right.as_bytes()]));
        }
        level = next;
    }

    level[0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_root_is_zero() {
        assert_eq!(merkle_root(&[]), Hash::ZERO);
    }

    #[test]
    fn test_single_leaf_root() {
        let leaf = Hash::from_bytes(b"tx");
        assert_eq!(merkle_root(&[leaf]), leaf);
    }

    #[test]
    fn test_root_depends_on_order() {
        let a = Hash::from_bytes(b"a");
        let b = Hash::from_bytes(b"b");
        assert_ne!(merkle_root(&[a, b]), merkle_root(&[b, a]));
    }

    #[test]
    fn test_odd_leaf_count() {
        let leaves: Vec<_> = (0u8..5).map(|i| Hash::from_bytes(&[i])).collect();
        let root = merkle_root(&leaves);
        assert!(!root.is_zero());
        // Deterministic across invocations
        assert_eq!(root, merkle_root(&leaves));
    }
}
