//! Core types for the SBA consensus node.
//!
//! This crate provides the foundational types used throughout the node:
//!
//! - **Primitives**: Hash, cryptographic keys and signatures, signer bitsets
//! - **Chain data**: Block, Header, Certificate, ContractCall
//! - **Consensus inputs**: Provisioners, sortition committees, RoundUpdate
//!
//! # Design Philosophy
//!
//! This crate is self-contained and does not depend on any other workspace
//! crate, making it the foundation layer. Sortition lives here because it is
//! a pure function of types every subsystem agrees on.

mod bitset;
mod block;
mod crypto;
mod hash;
mod merkle;
mod provisioners;
mod round;
mod signing;
mod sortition;
mod transaction;

pub use bitset::Bitset;
pub use block::{Block, Certificate, Header, StepVotes, BLOCK_VERSION};
pub use crypto::{AggregateError, KeyPair, KeyType, PublicKey, Signature};
pub use hash::{Hash, HexError};
pub use merkle::merkle_root;
pub use provisioners::{Member, Provisioners, Stake};
pub use round::RoundUpdate;
pub use signing::{
    agreement_message, reduction_message, score_message, seed_message, DOMAIN_AGREEMENT,
    DOMAIN_REDUCTION, DOMAIN_SCORE, DOMAIN_SEED,
};
pub use sortition::Committee;
pub use transaction::{ContractCall, TxInput, TxOutput, TxType};

/// Test utilities.
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils {
    use super::*;

    /// Deterministic BLS keypair from a seed byte.
    pub fn test_keypair(seed: u8) -> KeyPair {
        KeyPair::from_seed(KeyType::Bls12381, &[seed; 32])
    }

    /// A provisioner set of `n` members with equal stake, keyed by seed
    /// bytes `1..=n`, plus the matching keypairs.
    pub fn test_provisioners(n: u8, stake: u64) -> (Provisioners, Vec<KeyPair>) {
        let mut provisioners = Provisioners::new();
        let mut keys = Vec::new();

        for seed in 1..=n {
            let kp = test_keypair(seed);
            provisioners.add_stake(
                kp.public_key(),
                Stake {
                    amount: stake,
                    start_height: 0,
                    end_height: u64::MAX,
                },
            );
            keys.push(kp);
        }

        (provisioners, keys)
    }

    /// A minimal transfer with the given fee; the nullifier varies with
    /// `seed` so hashes stay distinct.
    pub fn test_transfer(seed: u8, fee: u64) -> ContractCall {
        ContractCall {
            call_type: TxType::Transfer,
            inputs: vec![TxInput {
                nullifier: Hash::from_bytes(&[seed, 0xA5]),
            }],
            outputs: vec![TxOutput {
                commitment: Hash::from_bytes(&[seed, 0x5A]),
                note: vec![seed],
            }],
            fee,
            proof: vec![seed; 16],
        }
    }

    /// A coinbase (Distribute) call.
    pub fn test_distribute(seed: u8) -> ContractCall {
        ContractCall {
            call_type: TxType::Distribute,
            inputs: vec![],
            outputs: vec![TxOutput {
                commitment: Hash::from_bytes(&[seed, 0xC0]),
                note: vec![],
            }],
            fee: 0,
            proof: vec![],
        }
    }
}
