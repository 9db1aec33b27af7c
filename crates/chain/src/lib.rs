//! Chain management: block acceptance, verification, fallback and sync.
//!
//! The [`Chain`] owns the tip and the provisioner registry, drives the
//! executor through state transitions, and feeds the consensus loop one
//! [`sba_types::RoundUpdate`] per accepted block. The [`Synchronizer`]
//! decides whether incoming blocks extend the tip directly or open a
//! catch-up session.

mod chain;
mod genesis;
mod loader;
mod synchronizer;
mod verifiers;

pub use chain::{BlockOutcome, Chain, ChainConfig};
pub use genesis::genesis_block;
pub use loader::{Loader, LoaderError, MemoryLoader};
pub use synchronizer::{SyncRequest, Synchronizer};
pub use verifiers::{check_block_certificate, sanity_check_block};

use sba_executor::ExecutorError;
use thiserror::Error;

/// Chain-level failures.
#[derive(Debug, Error)]
pub enum ChainError {
    /// Structural, hash or transaction-root failure.
    #[error("invalid block: {0}")]
    InvalidBlock(String),

    /// The certificate does not prove quorum for this block.
    #[error("invalid certificate: {0}")]
    InvalidCertificate(String),

    /// Executor and header disagree on the post-execution state.
    /// Protocol-level divergence: logged, refused, never fatal.
    #[error("invalid state hash")]
    InvalidStateHash,

    /// The executor call failed or timed out.
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    /// The loader failed.
    #[error(transparent)]
    Loader(#[from] LoaderError),
}
