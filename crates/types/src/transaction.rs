//! Contract call (transaction) types.

use crate::Hash;
use sbor::prelude::*;

/// The kind of contract call a transaction performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, BasicSbor)]
pub enum TxType {
    /// Phoenix value transfer.
    Transfer,
    /// Coinbase reward distribution. Only the round's elected proposer may
    /// place one inside a candidate block.
    Distribute,
    /// Blind bid for the selection lottery.
    Bid,
    /// Provisioner stake.
    Stake,
    /// Withdraw accumulated generator fees.
    WithdrawFees,
    /// Withdraw an expired stake.
    WithdrawStake,
    /// Withdraw an expired bid.
    WithdrawBid,
    /// Slash a misbehaving provisioner.
    Slash,
}

impl TxType {
    /// Coinbase transactions are block-generator-only.
    pub fn is_coinbase(&self) -> bool {
        matches!(self, TxType::Distribute)
    }

    /// Numeric tag used in hashing and display.
    pub fn tag(&self) -> u8 {
        match self {
            TxType::Transfer => 0,
            TxType::Distribute => 1,
            TxType::Bid => 2,
            TxType::Stake => 3,
            TxType::WithdrawFees => 4,
            TxType::WithdrawStake => 5,
            TxType::WithdrawBid => 6,
            TxType::Slash => 7,
        }
    }
}

/// A spent-note input. The nullifier uniquely consumes the note without
/// revealing it.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TxInput {
    /// Nullifier of the consumed note.
    pub nullifier: Hash,
}

/// A created-note output.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct TxOutput {
    /// Pedersen commitment to the note value.
    pub commitment: Hash,
    /// Encrypted note payload, opaque to consensus.
    pub note: Vec<u8>,
}

/// A transaction: one call into the transfer/stake contract set.
///
/// Consensus treats the proof blob as opaque; only the external executor can
/// open it. The content hash is a pure function of the serialized body, so
/// two nodes always derive the same txid for the same wire bytes.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ContractCall {
    /// Which contract operation this call performs.
    pub call_type: TxType,
    /// Consumed inputs.
    pub inputs: Vec<TxInput>,
    /// Created outputs.
    pub outputs: Vec<TxOutput>,
    /// Fee offered to the block generator.
    pub fee: u64,
    /// Commitment/proof blob (zero-knowledge proof of balance).
    pub proof: Vec<u8>,
}

impl ContractCall {
    /// Content hash of the call.
    ///
    /// Hashes a fixed field layout: type tag, inputs, outputs, fee, proof.
    pub fn hash(&self) -> Hash {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&[self.call_type.tag()]);
        hasher.update(&(self.inputs.len() as u32).to_le_bytes());
        for input in &self.inputs {
            hasher.update(input.nullifier.as_bytes());
        }
        hasher.update(&(self.outputs.len() as u32).to_le_bytes());
        for output in &self.outputs {
            hasher.update(output.commitment.as_bytes());
            hasher.update(&(output.note.len() as u32).to_le_bytes());
            hasher.update(&output.note);
        }
        hasher.update(&self.fee.to_le_bytes());
        hasher.update(&self.proof);
        Hash::from_hash_bytes(hasher.finalize().as_bytes())
    }

    /// Rough serialized size in bytes, used for pool accounting and
    /// block-size budgeting.
    pub fn size_estimate(&self) -> usize {
        1 + self.inputs.len() * Hash::BYTES
            + self
                .outputs
                .iter()
                .map(|o| Hash::BYTES + o.note.len())
                .sum::<usize>()
            + 8
            + self.proof.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(fee: u64, proof: &[u8]) -> ContractCall {
        ContractCall {
            call_type: TxType::Transfer,
            inputs: vec![TxInput {
                nullifier: Hash::from_bytes(b"nullifier"),
            }],
            outputs: vec![TxOutput {
                commitment: Hash::from_bytes(b"commitment"),
                note: vec![1, 2, 3],
            }],
            fee,
            proof: proof.to_vec(),
        }
    }

    #[test]
    fn test_hash_is_deterministic() {
        assert_eq!(call(10, b"proof").hash(), call(10, b"proof").hash());
    }

    #[test]
    fn test_hash_covers_every_field() {
        let base = call(10, b"proof");
        assert_ne!(base.hash(), call(11, b"proof").hash());
        assert_ne!(base.hash(), call(10, b"other").hash());

        let mut other_type = base.clone();
        other_type.call_type = TxType::Stake;
        assert_ne!(base.hash(), other_type.hash());
    }

    #[test]
    fn test_coinbase_detection() {
        assert!(TxType::Distribute.is_coinbase());
        assert!(!TxType::Transfer.is_coinbase());
    }
}
