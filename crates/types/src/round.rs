//! Round update: the chain's hand-off to the consensus loop.

use crate::{Certificate, Hash, Provisioners};
use std::sync::Arc;

/// Everything one consensus round needs from the chain.
///
/// Built when a block is accepted and consumed exactly once by the next
/// loop invocation. The provisioner snapshot is shared read-only; every
/// phase reads the same immutable copy.
#[derive(Debug, Clone)]
pub struct RoundUpdate {
    /// The round to run: tip height + 1.
    pub round: u64,
    /// Provisioner snapshot for this round.
    pub provisioners: Arc<Provisioners>,
    /// Seed of the previous block, feeding sortition.
    pub seed: Hash,
    /// Hash of the previous block.
    pub hash: Hash,
    /// Certificate the previous block was accepted with.
    pub last_certificate: Certificate,
}
