//! Disk-backed ordered pool backend (RocksDB).
//!
//! Entries live under a fee-ordered key space so a forward iteration walks
//! transactions fee-descending without sorting:
//!
//! ```text
//! fees  CF: key = (u64::MAX - fee) BE ‖ txid  → record
//! index CF: key = txid                        → fee key
//! ```
//!
//! All operations are synchronous blocking I/O; the admission loop is the
//! single writer.

use crate::{Pool, PoolError, TxDesc};
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, DB};
use sba_types::{ContractCall, Hash, TxType};
use sbor::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

const CF_FEES: &str = "fees";
const CF_INDEX: &str = "index";

/// On-disk record for one pool entry.
#[derive(Debug, Clone, BasicSbor)]
struct DiskRecord {
    call: ContractCall,
    received_ms: u64,
    verified_ms: u64,
    size: u32,
    kad_height: u8,
}

fn unix_ms(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn from_unix_ms(ms: u64) -> SystemTime {
    UNIX_EPOCH + Duration::from_millis(ms)
}

impl DiskRecord {
    fn from_desc(td: &TxDesc) -> Self {
        Self {
            call: td.call.clone(),
            received_ms: unix_ms(td.received),
            verified_ms: td.verified.map(unix_ms).unwrap_or(0),
            size: td.size as u32,
            kad_height: td.kad_height,
        }
    }

    fn into_desc(self) -> TxDesc {
        TxDesc {
            call: self.call,
            received: from_unix_ms(self.received_ms),
            verified: (self.verified_ms > 0).then(|| from_unix_ms(self.verified_ms)),
            size: self.size as usize,
            kad_height: self.kad_height,
        }
    }
}

fn fee_key(fee: u64, txid: &Hash) -> Vec<u8> {
    let mut key = Vec::with_capacity(8 + Hash::BYTES);
    key.extend_from_slice(&(u64::MAX - fee).to_be_bytes());
    key.extend_from_slice(txid.as_bytes());
    key
}

/// RocksDB-backed pool surviving restarts.
pub struct DiskPool {
    db: DB,
    len: AtomicUsize,
    size_bytes: AtomicUsize,
}

impl DiskPool {
    /// Open or create the pool at `path`, rebuilding counters by scanning.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PoolError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);

        let cfs = vec![
            ColumnFamilyDescriptor::new(CF_FEES, Options::default()),
            ColumnFamilyDescriptor::new(CF_INDEX, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&opts, path, cfs)
            .map_err(|e| PoolError::Storage(e.to_string()))?;

        let pool = Self {
            db,
            len: AtomicUsize::new(0),
            size_bytes: AtomicUsize::new(0),
        };
        pool.rebuild_counters();
        Ok(pool)
    }

    fn cf(&self, name: &str) -> Result<&ColumnFamily, PoolError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| PoolError::Storage(format!("column family {name} not found")))
    }

    fn rebuild_counters(&self) {
        let Ok(fees) = self.cf(CF_FEES) else { return };
        let mut len = 0usize;
        let mut size = 0usize;
        for item in self.db.iterator_cf(fees, IteratorMode::Start) {
            let Ok((_, value)) = item else { continue };
            if let Ok(record) = sbor::basic_decode::<DiskRecord>(&value) {
                len += 1;
                size += record.size as usize;
            }
        }
        self.len.store(len, Ordering::Relaxed);
        self.size_bytes.store(size, Ordering::Relaxed);
    }

    fn record_for(&self, txid: &Hash) -> Option<(Vec<u8>, DiskRecord)> {
        let index = self.cf(CF_INDEX).ok()?;
        let fees = self.cf(CF_FEES).ok()?;
        let key = self.db.get_cf(index, txid.as_bytes()).ok().flatten()?;
        let value = self.db.get_cf(fees, &key).ok().flatten()?;
        let record = sbor::basic_decode::<DiskRecord>(&value).ok()?;
        Some((key, record))
    }

    fn iterate(&self, visit: &mut dyn FnMut(&Hash, &TxDesc) -> bool) {
        let Ok(fees) = self.cf(CF_FEES) else { return };
        for item in self.db.iterator_cf(fees, IteratorMode::Start) {
            let Ok((key, value)) = item else { continue };
            let Ok(record) = sbor::basic_decode::<DiskRecord>(&value) else {
                warn!("undecodable mempool record, skipping");
                continue;
            };
            if key.len() != 8 + Hash::BYTES {
                continue;
            }
            let txid = Hash::from_hash_bytes(&key[8..]);
            let td = record.into_desc();
            if visit(&txid, &td) {
                break;
            }
        }
    }
}

impl Pool for DiskPool {
    fn put(&self, td: TxDesc) -> Result<(), PoolError> {
        let txid = td.hash();
        if self.contains(&txid) {
            return Err(PoolError::AlreadyExists);
        }

        let key = fee_key(td.call.fee, &txid);
        let record = DiskRecord::from_desc(&td);
        let value =
            sbor::basic_encode(&record).map_err(|e| PoolError::Storage(format!("{e:?}")))?;

        self.db
            .put_cf(self.cf(CF_FEES)?, &key, value)
            .map_err(|e| PoolError::Storage(e.to_string()))?;
        self.db
            .put_cf(self.cf(CF_INDEX)?, txid.as_bytes(), &key)
            .map_err(|e| PoolError::Storage(e.to_string()))?;

        self.len.fetch_add(1, Ordering::Relaxed);
        self.size_bytes.fetch_add(td.size, Ordering::Relaxed);
        Ok(())
    }

    fn get(&self, txid: &Hash) -> Option<ContractCall> {
        self.record_for(txid).map(|(_, record)| record.call)
    }

    fn delete(&self, txid: &Hash) -> Result<(), PoolError> {
        let Some((key, record)) = self.record_for(txid) else {
            return Ok(());
        };

        self.db
            .delete_cf(self.cf(CF_FEES)?, &key)
            .map_err(|e| PoolError::Storage(e.to_string()))?;
        self.db
            .delete_cf(self.cf(CF_INDEX)?, txid.as_bytes())
            .map_err(|e| PoolError::Storage(e.to_string()))?;

        self.len.fetch_sub(1, Ordering::Relaxed);
        self.size_bytes
            .fetch_sub(record.size as usize, Ordering::Relaxed);
        Ok(())
    }

    fn contains(&self, txid: &Hash) -> bool {
        let Ok(index) = self.cf(CF_INDEX) else {
            return false;
        };
        self.db
            .get_cf(index, txid.as_bytes())
            .ok()
            .flatten()
            .is_some()
    }

    fn range(&self, visit: &mut dyn FnMut(&Hash, &TxDesc) -> bool) {
        self.iterate(visit);
    }

    fn range_sorted_by_fee(&self, visit: &mut dyn FnMut(&Hash, &TxDesc) -> bool) {
        // Key layout already orders by descending fee.
        self.iterate(visit);
    }

    fn filter_by_type(&self, tx_type: TxType) -> Vec<ContractCall> {
        let mut out = Vec::new();
        self.iterate(&mut |_, td| {
            if td.call.call_type == tx_type {
                out.push(td.call.clone());
            }
            false
        });
        out
    }

    fn size_bytes(&self) -> usize {
        self.size_bytes.load(Ordering::Relaxed)
    }

    fn len(&self) -> usize {
        self.len.load(Ordering::Relaxed)
    }

    fn clone_calls(&self) -> Vec<ContractCall> {
        let mut out = Vec::new();
        self.iterate(&mut |_, td| {
            out.push(td.call.clone());
            false
        });
        out
    }

    fn close(&self) {
        if let Err(e) = self.db.flush() {
            warn!(error = %e, "diskpool flush failed on close");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::test_utils::test_transfer;
    use tempfile::TempDir;

    #[test]
    fn test_put_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("pool");

        let txid = {
            let pool = DiskPool::open(&path).unwrap();
            let td = TxDesc::new(test_transfer(1, 42), 0);
            let txid = td.hash();
            pool.put(td).unwrap();
            pool.close();
            txid
        };

        let pool = DiskPool::open(&path).unwrap();
        assert!(pool.contains(&txid));
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.get(&txid).unwrap().fee, 42);
    }

    #[test]
    fn test_fee_descending_order() {
        let dir = TempDir::new().unwrap();
        let pool = DiskPool::open(dir.path().join("pool")).unwrap();

        for (seed, fee) in [(1u8, 7u64), (2, 100), (3, 55)] {
            pool.put(TxDesc::new(test_transfer(seed, fee), 0)).unwrap();
        }

        let mut fees = Vec::new();
        pool.range_sorted_by_fee(&mut |_, td| {
            fees.push(td.call.fee);
            false
        });
        assert_eq!(fees, vec![100, 55, 7]);
    }

    #[test]
    fn test_delete_updates_counters() {
        let dir = TempDir::new().unwrap();
        let pool = DiskPool::open(dir.path().join("pool")).unwrap();

        let td = TxDesc::new(test_transfer(1, 10), 0);
        let txid = td.hash();
        let size = td.size;
        pool.put(td).unwrap();
        assert_eq!(pool.size_bytes(), size);

        pool.delete(&txid).unwrap();
        assert_eq!(pool.len(), 0);
        assert_eq!(pool.size_bytes(), 0);
        assert!(pool.get(&txid).is_none());
    }

    #[test]
    fn test_duplicate_put_rejected() {
        let dir = TempDir::new().unwrap();
        let pool = DiskPool::open(dir.path().join("pool")).unwrap();

        pool.put(TxDesc::new(test_transfer(1, 10), 0)).unwrap();
        assert!(matches!(
            pool.put(TxDesc::new(test_transfer(1, 10), 0)),
            Err(PoolError::AlreadyExists)
        ));
        assert_eq!(pool.len(), 1);
    }
}
