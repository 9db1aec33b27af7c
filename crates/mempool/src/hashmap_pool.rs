//! In-memory hash-indexed pool backend (the default).

use crate::{Pool, PoolError, TxDesc};
use parking_lot::RwLock;
use sba_types::{ContractCall, Hash, TxType};
use std::collections::HashMap;

/// Hash-indexed in-memory pool.
///
/// Writes go through the admission loop only; readers iterate under the
/// read lock. Fee-ordered traversal materializes a sorted key snapshot, so
/// it costs O(n log n) but never holds the write lock.
pub struct HashMapPool {
    entries: RwLock<HashMap<Hash, TxDesc>>,
}

impl HashMapPool {
    /// Create an empty pool.
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for HashMapPool {
    fn default() -> Self {
        Self::new()
    }
}

impl Pool for HashMapPool {
    fn put(&self, td: TxDesc) -> Result<(), PoolError> {
        let mut entries = self.entries.write();
        let txid = td.hash();
        if entries.contains_key(&txid) {
            return Err(PoolError::AlreadyExists);
        }
        entries.insert(txid, td);
        Ok(())
    }

    fn get(&self, txid: &Hash) -> Option<ContractCall> {
        self.entries.read().get(txid).map(|td| td.call.clone())
    }

    fn delete(&self, txid: &Hash) -> Result<(), PoolError> {
        self.entries.write().remove(txid);
        Ok(())
    }

    fn contains(&self, txid: &Hash) -> bool {
        self.entries.read().contains_key(txid)
    }

    fn range(&self, visit: &mut dyn FnMut(&Hash, &TxDesc) -> bool) {
        let entries = self.entries.read();
        for (txid, td) in entries.iter() {
            if visit(txid, td) {
                break;
            }
        }
    }

    fn range_sorted_by_fee(&self, visit: &mut dyn FnMut(&Hash, &TxDesc) -> bool) {
        let entries = self.entries.read();
        let mut keys: Vec<(u64, Hash)> = entries
            .iter()
            .map(|(txid, td)| (td.call.fee, *txid))
            .collect();
        // Descending fee; ties broken by ascending id for determinism.
        keys.sort_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        for (_, txid) in keys {
            if let Some(td) = entries.get(&txid) {
                if visit(&txid, td) {
                    break;
                }
            }
        }
    }

    fn filter_by_type(&self, tx_type: TxType) -> Vec<ContractCall> {
        self.entries
            .read()
            .values()
            .filter(|td| td.call.call_type == tx_type)
            .map(|td| td.call.clone())
            .collect()
    }

    fn size_bytes(&self) -> usize {
        self.entries.read().values().map(|td| td.size).sum()
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn clone_calls(&self) -> Vec<ContractCall> {
        self.entries
            .read()
            .values()
            .map(|td| td.call.clone())
            .collect()
    }

    fn close(&self) {}
}
