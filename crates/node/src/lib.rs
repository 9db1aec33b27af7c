//! Node wiring: buses, chain, mempool and the consensus driver.
//!
//! Construction order matters: every subscriber registers on the buses
//! before any publisher starts. [`Node::new`] wires everything;
//! [`Node::run`] spawns the subsystem tasks and drives the
//! round/acceptance loop until the root cancellation fires.

mod config;
mod metrics;
mod telemetry;

pub use config::{ConfigError, NodeConfig};
pub use metrics::{metrics, Metrics};
pub use telemetry::init_telemetry;

use sba_bus::{
    EventBus, Message, RpcBus, RpcError, RpcParams, RpcRequest, RpcResponse, RpcTopic, Topic,
};
use sba_chain::{BlockOutcome, Chain, ChainError, Loader, SyncRequest};
use sba_consensus::{BlindBid, Consensus, ConsensusError, EquivocationReport, Winner};
use sba_executor::{DeadlineExecutor, Executor};
use sba_mempool::{AcceptedTxIndex, Mempool, MempoolError, Pool};
use sba_messages::{decode_gossip, decode_kadcast, CodecError, Payload};
use sba_types::{Hash, KeyPair};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Node construction failures. All of these are fatal before start.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Chain initialization failed.
    #[error(transparent)]
    Chain(#[from] ChainError),

    /// Mempool initialization failed.
    #[error(transparent)]
    Mempool(#[from] MempoolError),

    /// Bus wiring failed.
    #[error(transparent)]
    Rpc(#[from] RpcError),
}

/// Adapts the Loader into the mempool's accepted-transaction lookup.
struct LoaderTxIndex(Arc<dyn Loader>);

impl AcceptedTxIndex for LoaderTxIndex {
    fn contains_tx(&self, txid: &Hash) -> bool {
        matches!(self.0.fetch_block_tx_by_hash(txid), Ok(Some(_)))
    }
}

/// A fully wired node.
pub struct Node {
    bus: EventBus,
    rpc_bus: RpcBus,
    chain: Arc<Chain>,
    mempool: Mempool,
    consensus: Consensus,
    block_rx: mpsc::Receiver<Message>,
    verify_candidate_rx: mpsc::Receiver<RpcRequest>,
    sync_rx: Option<mpsc::Receiver<SyncRequest>>,
}

impl Node {
    /// Wire a node from its collaborators.
    ///
    /// `executor` is the raw external executor; the per-call deadline from
    /// the configuration is applied here, once, for every subsystem.
    pub async fn new(
        config: &NodeConfig,
        keys: KeyPair,
        loader: Arc<dyn Loader>,
        executor: Arc<dyn Executor>,
        blind_bid: Arc<dyn BlindBid>,
    ) -> Result<Self, NodeError> {
        config.validate()?;

        let bus = EventBus::new();
        let rpc_bus = RpcBus::new();

        let executor: Arc<dyn Executor> = Arc::new(DeadlineExecutor::new(
            executor,
            config.executor_deadline(),
        ));

        // Subscribers first; publishers only start in run().
        let mempool = Mempool::new(
            config.mempool_config(),
            bus.clone(),
            &rpc_bus,
            Arc::clone(&executor),
        )?;
        mempool.cleanup_accepted(&LoaderTxIndex(Arc::clone(&loader)));

        let consensus = Consensus::new(
            config.consensus_config(),
            keys,
            bus.clone(),
            rpc_bus.clone(),
            Arc::clone(&executor),
            blind_bid,
        );

        let verify_candidate_rx = rpc_bus.register(RpcTopic::VerifyCandidateBlock)?;
        let block_rx = bus.subscribe(Topic::Block);

        let (sync_tx, sync_rx) = mpsc::channel(16);
        let chain = Arc::new(
            Chain::new(
                config.chain_config(),
                bus.clone(),
                loader,
                executor,
                sync_tx,
            )
            .await?,
        );

        Ok(Self {
            bus,
            rpc_bus,
            chain,
            mempool,
            consensus,
            block_rx,
            verify_candidate_rx,
            sync_rx: Some(sync_rx),
        })
    }

    /// The node's event bus.
    pub fn bus(&self) -> EventBus {
        self.bus.clone()
    }

    /// The node's RPC bus.
    pub fn rpc_bus(&self) -> RpcBus {
        self.rpc_bus.clone()
    }

    /// The chain manager.
    pub fn chain(&self) -> Arc<Chain> {
        Arc::clone(&self.chain)
    }

    /// Shared mempool pool handle.
    pub fn mempool_pool(&self) -> Arc<dyn Pool> {
        self.mempool.pool()
    }

    /// Take the sync-request stream. The transport layer (or a test
    /// harness) serves these by delivering the missing blocks.
    pub fn take_sync_requests(&mut self) -> Option<mpsc::Receiver<SyncRequest>> {
        self.sync_rx.take()
    }

    /// Run the node until the root cancellation fires.
    pub async fn run(self, cancel: CancellationToken) {
        let Node {
            bus,
            rpc_bus: _,
            chain,
            mempool,
            consensus,
            mut block_rx,
            verify_candidate_rx,
            sync_rx: _,
        } = self;

        let pool = mempool.pool();

        // Mempool lifecycle.
        tokio::spawn(mempool.run(cancel.clone()));

        // Candidate verification server for the consensus loop.
        tokio::spawn(candidate_server(
            Arc::clone(&chain),
            verify_candidate_rx,
            cancel.clone(),
        ));

        // Consensus runner: one spin per round update.
        let (round_tx, round_rx) = mpsc::channel(8);
        let (winner_tx, mut winner_rx) = mpsc::channel(8);
        tokio::spawn(consensus_runner(consensus, round_rx, winner_tx));

        let mut round_cancel = cancel.child_token();
        if chain.is_in_sync() {
            let ru = chain.round_update();
            bus.publish(Topic::RoundUpdate, Message::RoundUpdate(ru.clone()));
            let _ = round_tx.send((ru, round_cancel.clone())).await;
        }

        let mut watchdog = tokio::time::interval(Duration::from_secs(1));
        watchdog.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    round_cancel.cancel();
                    info!("node loop terminated");
                    return;
                }

                Some((winner, equivocations)) = winner_rx.recv() => {
                    on_winner(&chain, winner, equivocations).await;
                    restart_round(&bus, &chain, &cancel, &mut round_cancel, &round_tx).await;
                }

                Some(msg) = block_rx.recv() => {
                    if let Message::Block { block, kad_height, source } = msg {
                        match chain.process_block(&source, *block, kad_height).await {
                            Ok(outcome @ (BlockOutcome::Accepted
                                | BlockOutcome::SyncCompleted
                                | BlockOutcome::Fallback)) => {
                                if outcome == BlockOutcome::Fallback {
                                    metrics().fallbacks.inc();
                                } else {
                                    metrics().blocks_accepted.inc();
                                }
                                restart_round(&bus, &chain, &cancel, &mut round_cancel, &round_tx)
                                    .await;
                            }
                            Ok(BlockOutcome::Syncing) => {
                                // Consensus stays cancelled while catching up.
                                round_cancel.cancel();
                            }
                            Ok(BlockOutcome::Stale) => {}
                            Err(e) => {
                                metrics().blocks_rejected.inc();
                                warn!(error = %e, source, "block rejected");
                            }
                        }
                    }
                }

                _ = watchdog.tick() => {
                    if chain.check_sync_watchdog() {
                        restart_round(&bus, &chain, &cancel, &mut round_cancel, &round_tx).await;
                    }
                    metrics().chain_height.set(chain.tip().header.height as f64);
                    metrics().mempool_len.set(pool.len() as f64);
                    metrics().bus_dropped.set(bus.dropped_count() as f64);
                }
            }
        }
    }
}

async fn on_winner(chain: &Arc<Chain>, winner: Winner, equivocations: EquivocationReport) {
    for eq in equivocations {
        warn!(
            round = winner.round,
            provisioner = %eq.pubkey,
            first = %eq.first,
            second = %eq.second,
            "agreement equivocation detected"
        );
    }

    match winner.block {
        Some(block) => match chain.accept_winner(block).await {
            Ok(()) => {
                metrics().blocks_accepted.inc();
            }
            Err(e) => warn!(round = winner.round, error = %e, "winner rejected by chain"),
        },
        None => {
            // Certified a hash we never held the body for (late re-entry).
            // The synchronizer fetches it from peers.
            warn!(round = winner.round, hash = %winner.hash, "winner body unknown, awaiting sync");
        }
    }
}

/// Cancel the running round and, when in sync, hand the next one to the
/// consensus runner. The round update is also published on the bus for any
/// other subscriber.
async fn restart_round(
    bus: &EventBus,
    chain: &Arc<Chain>,
    root: &CancellationToken,
    round_cancel: &mut CancellationToken,
    round_tx: &mpsc::Sender<(sba_types::RoundUpdate, CancellationToken)>,
) {
    round_cancel.cancel();
    if !chain.is_in_sync() {
        return;
    }
    *round_cancel = root.child_token();
    let ru = chain.round_update();
    bus.publish(Topic::RoundUpdate, Message::RoundUpdate(ru.clone()));
    let _ = round_tx.send((ru, round_cancel.clone())).await;
}

async fn consensus_runner(
    mut consensus: Consensus,
    mut round_rx: mpsc::Receiver<(sba_types::RoundUpdate, CancellationToken)>,
    winner_tx: mpsc::Sender<(Winner, EquivocationReport)>,
) {
    while let Some((ru, round_cancel)) = round_rx.recv().await {
        // A newer round may already be queued; skip stale hand-offs.
        if round_cancel.is_cancelled() {
            continue;
        }
        match consensus.spin(ru, round_cancel).await {
            Ok(outcome) => {
                if winner_tx.send(outcome).await.is_err() {
                    return;
                }
            }
            Err(ConsensusError::Cancelled) => continue,
            Err(e) => warn!(error = %e, "consensus round failed"),
        }
    }
}

async fn candidate_server(
    chain: Arc<Chain>,
    mut rx: mpsc::Receiver<RpcRequest>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            req = rx.recv() => {
                let Some(req) = req else { return };
                let result = match req.params {
                    RpcParams::Candidate(block) => chain
                        .verify_candidate(&block)
                        .await
                        .map(|()| RpcResponse::Empty)
                        .map_err(|e| RpcError::Handler(e.to_string())),
                    other => Err(RpcError::Handler(format!("unexpected params: {other:?}"))),
                };
                let _ = req.response.send(result);
            }
        }
    }
}

/// Publish a decoded wire payload on the matching inbound topic.
///
/// The external transport calls this (directly or through
/// [`dispatch_frame`]) for every frame it receives.
pub fn route_payload(bus: &EventBus, payload: Payload, kad_height: u8, source: &str) {
    match payload {
        Payload::Tx(call) => {
            bus.publish(Topic::Tx, Message::Transaction { call, kad_height });
        }
        Payload::Score(score) => {
            bus.publish(Topic::Score, Message::Score(score));
        }
        Payload::Reduction(vote) => {
            bus.publish(Topic::Reduction, Message::Reduction(vote));
        }
        Payload::Agreement(agreement) => {
            bus.publish(Topic::Agreement, Message::Agreement(agreement));
        }
        Payload::Block(block) => {
            bus.publish(
                Topic::Block,
                Message::Block {
                    block,
                    kad_height,
                    source: source.to_string(),
                },
            );
        }
        Payload::Inv(inv) => {
            // Inventory advertisements are resolved by the transport layer
            // (fetch-on-demand); nothing to route in-process.
            debug!(items = inv.items.len(), "inventory advertisement ignored");
        }
    }
}

/// Decode a raw frame and route its payload.
pub fn dispatch_frame(
    bus: &EventBus,
    frame: &[u8],
    kadcast: bool,
    source: &str,
) -> Result<(), CodecError> {
    if kadcast {
        let (ttl, payload) = decode_kadcast(frame)?;
        route_payload(bus, payload, ttl, source);
    } else {
        let payload = decode_gossip(frame)?;
        route_payload(bus, payload, 0, source);
    }
    Ok(())
}
