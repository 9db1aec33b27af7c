//! The pool capability set shared by every backend.

use sba_types::{ContractCall, Hash, TxType};
use std::time::SystemTime;
use thiserror::Error;

/// A pool entry: the transaction plus its admission bookkeeping.
#[derive(Debug, Clone)]
pub struct TxDesc {
    /// The verified transaction.
    pub call: ContractCall,
    /// When the transaction arrived.
    pub received: SystemTime,
    /// When verification completed; `None` until admission stamps it.
    pub verified: Option<SystemTime>,
    /// Serialized size in bytes.
    pub size: usize,
    /// Kadcast TTL the transaction arrived with (0 on gossip networks).
    pub kad_height: u8,
}

impl TxDesc {
    /// Wrap a call received now, sizing it from its encoding estimate.
    pub fn new(call: ContractCall, kad_height: u8) -> Self {
        let size = call.size_estimate();
        Self {
            call,
            received: SystemTime::now(),
            verified: None,
            size,
            kad_height,
        }
    }

    /// Transaction id.
    pub fn hash(&self) -> Hash {
        self.call.hash()
    }
}

/// Errors from pool backends.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Key already present.
    #[error("already exists")]
    AlreadyExists,

    /// Backend storage failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Storage capability set for verified transactions.
///
/// Two backends implement this: a hash-indexed in-memory pool and a
/// disk-backed ordered store. The mempool core is agnostic.
pub trait Pool: Send + Sync {
    /// Insert a verified transaction.
    fn put(&self, td: TxDesc) -> Result<(), PoolError>;

    /// Fetch a transaction by id.
    fn get(&self, txid: &Hash) -> Option<ContractCall>;

    /// Remove a transaction. Removing an absent id is not an error.
    fn delete(&self, txid: &Hash) -> Result<(), PoolError>;

    /// Whether the pool holds `txid`.
    fn contains(&self, txid: &Hash) -> bool;

    /// Visit every entry in unspecified order. Return `true` to stop.
    fn range(&self, visit: &mut dyn FnMut(&Hash, &TxDesc) -> bool);

    /// Visit entries in descending fee order (ties by ascending id).
    /// Return `true` to stop.
    fn range_sorted_by_fee(&self, visit: &mut dyn FnMut(&Hash, &TxDesc) -> bool);

    /// All transactions of a given type.
    fn filter_by_type(&self, tx_type: TxType) -> Vec<ContractCall>;

    /// Total serialized size of all entries, in bytes.
    fn size_bytes(&self) -> usize;

    /// Number of entries.
    fn len(&self) -> usize;

    /// Whether the pool is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot every transaction.
    fn clone_calls(&self) -> Vec<ContractCall>;

    /// Flush and release backend resources.
    fn close(&self);
}
