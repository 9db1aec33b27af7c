//! Common header carried by every consensus event.

use sba_types::PublicKey;
use sbor::prelude::*;

/// Consensus coordinates plus the signer's identity.
///
/// Field order on the wire is BLS public key, round, step. Sender identity
/// always comes from this key, never from the transport.
#[derive(Debug, Clone, PartialEq, Eq, BasicSbor)]
pub struct ConsensusHeader {
    /// BLS public key of the event producer.
    pub pubkey_bls: PublicKey,
    /// Consensus round (tip height + 1).
    pub round: u64,
    /// Step within the round.
    pub step: u8,
}

impl ConsensusHeader {
    /// Create a header for `(round, step)` signed-by `pubkey_bls`.
    pub fn new(pubkey_bls: PublicKey, round: u64, step: u8) -> Self {
        Self {
            pubkey_bls,
            round,
            step,
        }
    }
}
