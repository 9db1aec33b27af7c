//! The mempool: admission, propagation and selection of verified
//! transactions.
//!
//! Storage is pluggable: a hash-indexed in-memory pool by default, or a
//! disk-backed ordered store. The service owns the single admission path;
//! readers reach the pool through `Range`/`RangeSort` under a read lock.

mod disk_pool;
mod hashmap_pool;
mod limiter;
mod pool;

pub use disk_pool::DiskPool;
pub use hashmap_pool::HashMapPool;
pub use limiter::RateLimiter;
pub use pool::{Pool, PoolError, TxDesc};

use sba_bus::{EventBus, Message, RpcBus, RpcError, RpcParams, RpcRequest, RpcResponse, RpcTopic, Topic};
use sba_executor::{Executor, ExecutorError};
use sba_messages::{encode_gossip, encode_kadcast, Inv, InvType, Payload};
use sba_types::{Block, ContractCall, Hash};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Capacity of the propagation queue. When full, transactions are dropped
/// from propagation (never from the pool); fairness over throughput.
const PROPAGATION_QUEUE_CAPACITY: usize = 1000;

/// Pool backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolType {
    /// Hash-indexed in-memory pool.
    Hashmap,
    /// Disk-backed ordered store.
    Diskpool,
}

/// Mempool configuration.
#[derive(Debug, Clone)]
pub struct MempoolConfig {
    /// Pool size ceiling in megabytes.
    pub max_size_mb: usize,
    /// Which backend stores verified transactions.
    pub pool_type: PoolType,
    /// Directory for the disk backend.
    pub disk_pool_dir: PathBuf,
    /// Propagation token interval; `None` disables rate limiting.
    pub propagate_every: Option<Duration>,
    /// Propagation burst size.
    pub propagate_burst: u32,
    /// Whether the node runs on a kadcast network.
    pub kadcast_enabled: bool,
    /// Initial TTL for kadcast frames; higher inbound TTLs are rejected.
    pub kadcast_initial_height: u8,
    /// Idle tick period for stats logging.
    pub idle_interval: Duration,
}

impl Default for MempoolConfig {
    fn default() -> Self {
        Self {
            max_size_mb: 100,
            pool_type: PoolType::Hashmap,
            disk_pool_dir: PathBuf::from("./mempool"),
            propagate_every: Some(Duration::from_millis(100)),
            propagate_burst: 1,
            kadcast_enabled: false,
            kadcast_initial_height: 128,
            idle_interval: Duration::from_secs(20),
        }
    }
}

/// Admission and service errors.
#[derive(Debug, Error)]
pub enum MempoolError {
    /// Coinbase transactions are block-generator-only.
    #[error("coinbase tx not allowed")]
    CoinbaseNotAllowed,

    /// The transaction is already in the pool.
    #[error("already exists")]
    AlreadyExists,

    /// The pool hit its size ceiling.
    #[error("mempool is full, dropping transaction")]
    MempoolFull,

    /// Kadcast TTL exceeded the configured initial height.
    #[error("invalid kadcast height")]
    InvalidKadcastHeight,

    /// The executor rejected the transaction.
    #[error("verification err - {0}")]
    Verification(#[from] ExecutorError),

    /// Backend storage failed.
    #[error("store err - {0}")]
    Pool(#[from] PoolError),

    /// RPC bus wiring failed.
    #[error("rpc err - {0}")]
    Rpc(#[from] RpcError),
}

/// Lookup into persisted blocks, used by the startup cleanup to discard
/// transactions accepted while the node was offline.
pub trait AcceptedTxIndex: Send + Sync {
    /// Whether any persisted block contains `txid`.
    fn contains_tx(&self, txid: &Hash) -> bool;
}

struct Inner {
    config: MempoolConfig,
    pool: Arc<dyn Pool>,
    bus: EventBus,
    executor: Arc<dyn Executor>,
    propagation_tx: mpsc::Sender<TxDesc>,
}

/// The mempool service.
pub struct Mempool {
    inner: Arc<Inner>,
    accepted_rx: mpsc::Receiver<Message>,
    tx_rx: mpsc::Receiver<Message>,
    get_txs_rx: mpsc::Receiver<RpcRequest>,
    get_txs_by_size_rx: mpsc::Receiver<RpcRequest>,
    send_tx_rx: mpsc::Receiver<RpcRequest>,
    propagation_rx: mpsc::Receiver<TxDesc>,
}

impl Mempool {
    /// Create the mempool: build the backend, register the RPC topics and
    /// subscribe to bus events. Must run before any publisher starts.
    pub fn new(
        config: MempoolConfig,
        bus: EventBus,
        rpc_bus: &RpcBus,
        executor: Arc<dyn Executor>,
    ) -> Result<Self, MempoolError> {
        let pool: Arc<dyn Pool> = match config.pool_type {
            PoolType::Hashmap => Arc::new(HashMapPool::new()),
            PoolType::Diskpool => Arc::new(DiskPool::open(&config.disk_pool_dir)?),
        };

        info!(
            backend = ?config.pool_type,
            max_size_mb = config.max_size_mb,
            "create instance"
        );

        let get_txs_rx = rpc_bus.register(RpcTopic::GetMempoolTxs)?;
        let get_txs_by_size_rx = rpc_bus.register(RpcTopic::GetMempoolTxsBySize)?;
        let send_tx_rx = rpc_bus.register(RpcTopic::SendMempoolTx)?;

        let accepted_rx = bus.subscribe(Topic::AcceptedBlock);
        let tx_rx = bus.subscribe(Topic::Tx);

        let (propagation_tx, propagation_rx) = mpsc::channel(PROPAGATION_QUEUE_CAPACITY);

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                pool,
                bus,
                executor,
                propagation_tx,
            }),
            accepted_rx,
            tx_rx,
            get_txs_rx,
            get_txs_by_size_rx,
            send_tx_rx,
            propagation_rx,
        })
    }

    /// Discard pool entries that were accepted into the chain while the
    /// node was offline.
    pub fn cleanup_accepted(&self, index: &dyn AcceptedTxIndex) {
        let mut delete_list = Vec::new();
        self.inner.pool.range(&mut |txid, _| {
            if index.contains_tx(txid) {
                delete_list.push(*txid);
            }
            false
        });

        for txid in &delete_list {
            if let Err(e) = self.inner.pool.delete(txid) {
                warn!(%txid, error = %e, "could not delete tx");
            }
        }

        if !delete_list.is_empty() {
            info!(len = delete_list.len(), "clean up redundant transactions");
        }
    }

    /// Shared pool handle, mainly for tests and RPC queries.
    pub fn pool(&self) -> Arc<dyn Pool> {
        Arc::clone(&self.inner.pool)
    }

    /// Admit a transaction directly (bypassing the bus), returning its id.
    pub async fn process_tx(&self, td: TxDesc) -> Result<Hash, MempoolError> {
        self.inner.process_tx(td).await
    }

    /// Funds locked up in pooled transactions for a view key, as computed
    /// by the executor over a pool snapshot.
    pub async fn unconfirmed_balance(&self, view_key: &[u8]) -> Result<u64, MempoolError> {
        let snapshot = self.inner.pool.clone_calls();
        let balance = self
            .inner
            .executor
            .calculate_balance(view_key, &snapshot)
            .await?;
        Ok(balance)
    }

    /// Run the mempool lifecycle until cancellation.
    ///
    /// Spawns the propagation drain as a sibling task and services bus
    /// events, RPC requests and the idle tick on the main loop.
    pub async fn run(mut self, cancel: CancellationToken) {
        let inner = Arc::clone(&self.inner);
        let propagation_cancel = cancel.clone();
        let propagation_rx = self.propagation_rx;
        tokio::spawn(async move {
            propagate_loop(inner, propagation_rx, propagation_cancel).await;
        });

        let mut ticker = tokio::time::interval(self.inner.config.idle_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.inner.pool.close();
                    info!("main_loop terminated");
                    return;
                }

                Some(msg) = self.accepted_rx.recv() => {
                    if let Message::AcceptedBlock(block) = msg {
                        self.inner.on_block(&block);
                    }
                }

                Some(msg) = self.tx_rx.recv() => {
                    if let Message::Transaction { call, kad_height } = msg {
                        let td = TxDesc::new(call, kad_height);
                        let txid = td.hash();
                        if let Err(e) = self.inner.process_tx(td).await {
                            debug!(%txid, error = %e, "failed to accept transaction");
                        }
                    }
                }

                Some(req) = self.send_tx_rx.recv() => {
                    self.inner.handle_send_tx(req).await;
                }

                Some(req) = self.get_txs_rx.recv() => {
                    self.inner.handle_get_txs(req);
                }

                Some(req) = self.get_txs_by_size_rx.recv() => {
                    self.inner.handle_get_txs_by_size(req);
                }

                _ = ticker.tick() => {
                    self.inner.on_idle();
                }
            }
        }
    }
}

impl Inner {
    /// Admission pipeline: size cap, coinbase filter, duplicate check,
    /// executor verification, stamp and store, queue for propagation.
    async fn process_tx(&self, mut td: TxDesc) -> Result<Hash, MempoolError> {
        let txid = td.hash();

        let max_size_bytes = self.config.max_size_mb * 1_000_000;
        if self.pool.size_bytes() >= max_size_bytes {
            warn!(
                max_size_mb = self.config.max_size_mb,
                alloc_size = self.pool.size_bytes() / 1000,
                "mempool is full, dropping transaction"
            );
            return Err(MempoolError::MempoolFull);
        }

        if td.call.call_type.is_coinbase() {
            return Err(MempoolError::CoinbaseNotAllowed);
        }

        if self.config.kadcast_enabled && td.kad_height > self.config.kadcast_initial_height {
            return Err(MempoolError::InvalidKadcastHeight);
        }

        if self.pool.contains(&txid) {
            return Err(MempoolError::AlreadyExists);
        }

        // External verification, bounded by the executor's call deadline.
        self.executor.verify_transaction(&td.call).await?;

        td.verified = Some(SystemTime::now());
        self.pool.put(td.clone())?;

        trace!(%txid, size = td.size, "accepted transaction");

        // Queue for (re)propagation. A full queue drops the advertisement,
        // not the transaction.
        if self.propagation_tx.try_send(td).is_err() {
            debug!(%txid, "propagation queue full, advertisement dropped");
        }

        Ok(txid)
    }

    /// Evict every transaction included in the accepted block.
    fn on_block(&self, block: &Block) {
        if self.pool.len() == 0 {
            return;
        }

        for tx in &block.txs {
            let _ = self.pool.delete(&tx.hash());
        }

        info!(
            blk_height = block.header.height,
            blk_txs_count = block.txs.len(),
            txs_count = self.pool.len(),
            "processing_block_completed"
        );
    }

    /// Designated hook for future expiry of stuck transactions.
    fn on_idle(&self) {
        info!(
            alloc_size = self.pool.size_bytes() / 1000,
            txs_count = self.pool.len(),
            "process_on_idle"
        );
    }

    /// Greedy fee-descending selection bounded by total byte size.
    fn get_by_max_size(&self, max_bytes: usize) -> Vec<ContractCall> {
        let mut txs = Vec::new();
        let mut total = 0usize;

        self.pool.range_sorted_by_fee(&mut |_, td| {
            total += td.size;
            if total <= max_bytes {
                txs.push(td.call.clone());
                false
            } else {
                true
            }
        });

        txs
    }

    async fn handle_send_tx(&self, req: RpcRequest) {
        let result = match req.params {
            RpcParams::Transaction(call) => {
                let td = TxDesc::new(call, self.config.kadcast_initial_height);
                self.process_tx(td)
                    .await
                    .map(RpcResponse::TxHash)
                    .map_err(|e| RpcError::Handler(e.to_string()))
            }
            other => Err(RpcError::Handler(format!("unexpected params: {other:?}"))),
        };
        let _ = req.response.send(result);
    }

    fn handle_get_txs(&self, req: RpcRequest) {
        let result = match req.params {
            RpcParams::TxFilter(Some(txid)) => {
                let txs = self.pool.get(&txid).into_iter().collect();
                Ok(RpcResponse::Transactions(txs))
            }
            RpcParams::TxFilter(None) => {
                let mut txs = Vec::new();
                self.pool.range_sorted_by_fee(&mut |_, td| {
                    txs.push(td.call.clone());
                    false
                });
                Ok(RpcResponse::Transactions(txs))
            }
            other => Err(RpcError::Handler(format!("unexpected params: {other:?}"))),
        };
        let _ = req.response.send(result);
    }

    fn handle_get_txs_by_size(&self, req: RpcRequest) {
        let result = match req.params {
            RpcParams::MaxSize(max_bytes) => {
                Ok(RpcResponse::Transactions(self.get_by_max_size(max_bytes)))
            }
            other => Err(RpcError::Handler(format!("unexpected params: {other:?}"))),
        };
        let _ = req.response.send(result);
    }

    /// Advertise one admitted transaction to the network.
    fn propagate(&self, td: &TxDesc) {
        let txid = td.hash();

        let result = if self.config.kadcast_enabled {
            // Kadcast repropagates the full payload with the original TTL.
            encode_kadcast(&Payload::Tx(td.call.clone()), td.kad_height)
                .map(|frame| self.bus.publish(Topic::Kadcast, Message::Frame(frame)))
        } else {
            // Gossip advertises the hash; peers fetch the body on demand.
            let mut inv = Inv::default();
            inv.add(InvType::MempoolTx, txid);
            encode_gossip(&Payload::Inv(inv))
                .map(|frame| self.bus.publish(Topic::Gossip, Message::Frame(frame)))
        };

        if let Err(e) = result {
            error!(%txid, error = %e, "failed to propagate");
        }
    }
}

async fn propagate_loop(
    inner: Arc<Inner>,
    mut rx: mpsc::Receiver<TxDesc>,
    cancel: CancellationToken,
) {
    let mut limiter = inner
        .config
        .propagate_every
        .map(|every| RateLimiter::new(every, inner.config.propagate_burst));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("propagate_loop terminated");
                return;
            }
            td = rx.recv() => {
                let Some(td) = td else { return };
                if let Some(limiter) = limiter.as_mut() {
                    limiter.acquire().await;
                }
                inner.propagate(&td);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_executor::MockExecutor;
    use sba_types::test_utils::{test_distribute, test_provisioners, test_transfer};
    use sba_types::{Block, Certificate, Header, BLOCK_VERSION};

    fn mempool(config: MempoolConfig) -> Mempool {
        let (provisioners, _) = test_provisioners(1, 100);
        let bus = EventBus::new();
        let rpc_bus = RpcBus::new();
        let executor = Arc::new(MockExecutor::new(provisioners));
        Mempool::new(config, bus, &rpc_bus, executor).unwrap()
    }

    #[tokio::test]
    async fn test_admission_is_idempotent() {
        let pool = mempool(MempoolConfig::default());

        let tx = test_transfer(1, 10);
        let txid = pool.process_tx(TxDesc::new(tx.clone(), 0)).await.unwrap();
        assert!(pool.pool().contains(&txid));

        let second = pool.process_tx(TxDesc::new(tx, 0)).await;
        assert!(matches!(second, Err(MempoolError::AlreadyExists)));
        assert_eq!(pool.pool().len(), 1);
    }

    #[tokio::test]
    async fn test_coinbase_rejected() {
        let pool = mempool(MempoolConfig::default());
        let err = pool
            .process_tx(TxDesc::new(test_distribute(1), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, MempoolError::CoinbaseNotAllowed));
    }

    #[tokio::test]
    async fn test_full_pool_rejects() {
        let pool = mempool(MempoolConfig {
            max_size_mb: 0,
            ..MempoolConfig::default()
        });
        let err = pool
            .process_tx(TxDesc::new(test_transfer(1, 10), 0))
            .await
            .unwrap_err();
        assert!(matches!(err, MempoolError::MempoolFull));
    }

    #[tokio::test]
    async fn test_kadcast_ttl_rejected() {
        let pool = mempool(MempoolConfig {
            kadcast_enabled: true,
            kadcast_initial_height: 10,
            ..MempoolConfig::default()
        });
        let err = pool
            .process_tx(TxDesc::new(test_transfer(1, 10), 11))
            .await
            .unwrap_err();
        assert!(matches!(err, MempoolError::InvalidKadcastHeight));
    }

    #[tokio::test]
    async fn test_selection_is_greedy_and_bounded() {
        let pool = mempool(MempoolConfig::default());

        let mut sizes = std::collections::HashMap::new();
        for (seed, fee) in [(1u8, 5u64), (2, 50), (3, 20), (4, 35)] {
            let td = TxDesc::new(test_transfer(seed, fee), 0);
            sizes.insert(fee, td.size);
            pool.process_tx(td).await.unwrap();
        }

        // Budget for the two highest-fee transactions only.
        let budget = sizes[&50] + sizes[&35];
        let selected = pool.inner.get_by_max_size(budget);

        let fees: Vec<u64> = selected.iter().map(|tx| tx.fee).collect();
        assert_eq!(fees, vec![50, 35]);

        let total: usize = selected.iter().map(|tx| tx.size_estimate()).sum();
        assert!(total <= budget);
    }

    #[tokio::test]
    async fn test_eviction_on_accepted_block() {
        let pool = mempool(MempoolConfig::default());

        let tx = test_transfer(1, 10);
        let txid = pool.process_tx(TxDesc::new(tx.clone(), 0)).await.unwrap();

        let block = Block::new(
            Header {
                version: BLOCK_VERSION,
                height: 1,
                timestamp: 0,
                prev_block_hash: Hash::ZERO,
                seed: Hash::ZERO,
                tx_root: Hash::ZERO,
                state_hash: Hash::ZERO,
                certificate: Certificate::genesis(),
            },
            vec![tx],
        );

        pool.inner.on_block(&block);
        assert!(!pool.pool().contains(&txid));
    }

    #[tokio::test]
    async fn test_unconfirmed_balance_over_snapshot() {
        let pool = mempool(MempoolConfig::default());

        pool.process_tx(TxDesc::new(test_transfer(1, 30), 0))
            .await
            .unwrap();
        pool.process_tx(TxDesc::new(test_transfer(2, 12), 0))
            .await
            .unwrap();

        // The mock executor sums fees over the snapshot.
        let balance = pool.unconfirmed_balance(b"view-key").await.unwrap();
        assert_eq!(balance, 42);
    }

    #[tokio::test]
    async fn test_startup_cleanup_uses_index() {
        let pool = mempool(MempoolConfig::default());

        let keep = pool
            .process_tx(TxDesc::new(test_transfer(1, 10), 0))
            .await
            .unwrap();
        let drop = pool
            .process_tx(TxDesc::new(test_transfer(2, 20), 0))
            .await
            .unwrap();

        struct OneTx(Hash);
        impl AcceptedTxIndex for OneTx {
            fn contains_tx(&self, txid: &Hash) -> bool {
                *txid == self.0
            }
        }

        pool.cleanup_accepted(&OneTx(drop));
        assert!(pool.pool().contains(&keep));
        assert!(!pool.pool().contains(&drop));
    }
}
