//! The chain manager: block acceptance, fallback and round hand-off.

use crate::{
    check_block_certificate, sanity_check_block, ChainError, Loader, SyncRequest, Synchronizer,
};
use sba_bus::{EventBus, Message, Topic};
use sba_executor::Executor;
use sba_messages::{encode_gossip, encode_kadcast, Inv, InvType, Payload};
use sba_types::{Block, Provisioners, RoundUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Chain configuration.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// Seats per step committee, for certificate verification.
    pub committee_size: usize,
    /// Gas budget per block.
    pub block_gas_limit: u64,
    /// Whether the node runs on a kadcast network.
    pub kadcast_enabled: bool,
    /// Watchdog for out-of-sync sessions.
    pub sync_watchdog: Duration,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            committee_size: 64,
            block_gas_limit: 5_000_000_000,
            kadcast_enabled: false,
            sync_watchdog: Duration::from_secs(30),
        }
    }
}

/// Outcome of processing a network block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockOutcome {
    /// The block advanced the tip while in sync; consensus should restart.
    Accepted,
    /// Already known or below the tip.
    Stale,
    /// The tip was replaced by a competing certified block.
    Fallback,
    /// The node is catching up; consensus stays cancelled.
    Syncing,
    /// The accepted block completed a sync session; consensus should
    /// restart.
    SyncCompleted,
}

struct ChainState {
    tip: Block,
    provisioners: Arc<Provisioners>,
    synchronizer: Synchronizer,
    highest_seen: u64,
    /// Height at which a fallback already ran; a second fallback at the
    /// same height is refused.
    last_fallback: Option<u64>,
}

/// The chain manager.
///
/// Acceptance is serialized by an async mutex so the tip advances
/// monotonically; readers take a short read lock on the state.
pub struct Chain {
    config: ChainConfig,
    bus: EventBus,
    loader: Arc<dyn Loader>,
    executor: Arc<dyn Executor>,
    accept_lock: tokio::sync::Mutex<()>,
    state: parking_lot::RwLock<ChainState>,
}

impl Chain {
    /// Build the chain: tip from the loader, provisioners primed from the
    /// executor.
    pub async fn new(
        config: ChainConfig,
        bus: EventBus,
        loader: Arc<dyn Loader>,
        executor: Arc<dyn Executor>,
        sync_requests: mpsc::Sender<SyncRequest>,
    ) -> Result<Self, ChainError> {
        let tip = loader.load_tip()?;
        let provisioners = executor.get_provisioners().await?;

        info!(height = tip.header.height, "chain initialized");

        let synchronizer = Synchronizer::new(config.sync_watchdog, sync_requests);

        Ok(Self {
            config,
            bus,
            loader,
            executor,
            accept_lock: tokio::sync::Mutex::new(()),
            state: parking_lot::RwLock::new(ChainState {
                tip,
                provisioners: Arc::new(provisioners),
                synchronizer,
                highest_seen: 0,
                last_fallback: None,
            }),
        })
    }

    /// Current tip (cloned under a short read lock).
    pub fn tip(&self) -> Block {
        self.state.read().tip.clone()
    }

    /// Whether the synchronizer is in the `InSync` state.
    pub fn is_in_sync(&self) -> bool {
        self.state.read().synchronizer.is_in_sync()
    }

    /// The round update consumed by the next consensus loop invocation.
    pub fn round_update(&self) -> RoundUpdate {
        let state = self.state.read();
        RoundUpdate {
            round: state.tip.header.height + 1,
            provisioners: Arc::clone(&state.provisioners),
            seed: state.tip.header.seed,
            hash: state.tip.hash(),
            last_certificate: state.tip.header.certificate.clone(),
        }
    }

    /// How close the node is to the highest block seen, as a percentage.
    pub fn sync_progress(&self) -> f64 {
        let state = self.state.read();
        if state.highest_seen == 0 {
            return 0.0;
        }
        let progress = (state.tip.header.height as f64 / state.highest_seen as f64) * 100.0;
        progress.min(100.0)
    }

    /// Fire the sync watchdog if due. Returns true when the machine fell
    /// back to `InSync` and consensus should restart from the current tip.
    pub fn check_sync_watchdog(&self) -> bool {
        self.state.write().synchronizer.check_watchdog()
    }

    /// Handle a block incoming from the network.
    ///
    /// Drives the sync state machine and the fallback rule; acceptance is
    /// serialized with every other acceptance path.
    pub async fn process_block(
        &self,
        source: &str,
        block: Block,
        kad_height: u8,
    ) -> Result<BlockOutcome, ChainError> {
        let _guard = self.accept_lock.lock().await;

        let (tip_height, tip_hash) = {
            let state = self.state.read();
            (state.tip.header.height, state.tip.hash())
        };
        let height = block.header.height;

        debug!(recv_blk_h = height, curr_h = tip_height, source, "block received");

        if height == tip_height {
            if block.hash() == tip_hash {
                return Ok(BlockOutcome::Stale);
            }
            return match self.try_fallback(block).await {
                Ok(()) => Ok(BlockOutcome::Fallback),
                Err(e) => {
                    warn!(error = %e, "failed fallback procedure");
                    Err(e)
                }
            };
        }

        if height < tip_height {
            return Ok(BlockOutcome::Stale);
        }

        {
            let mut state = self.state.write();
            if height > state.highest_seen {
                state.highest_seen = height;
            }
        }

        if self.is_in_sync() {
            if height == tip_height + 1 {
                self.accept_block(&block).await?;
                self.propagate_block(&block, kad_height);
                return Ok(BlockOutcome::Accepted);
            }

            // A gap: go out of sync and ask the source for the missing range.
            let mut state = self.state.write();
            state.synchronizer.start_sync(tip_height, height, source);
            state.synchronizer.buffer(block);
            return Ok(BlockOutcome::Syncing);
        }

        // Out of sync: accept consecutive blocks, buffer the rest.
        if height == tip_height + 1 {
            self.accept_block(&block).await?;

            // Drain any buffered successors that now fit.
            loop {
                let next = {
                    let mut state = self.state.write();
                    let tip = state.tip.header.height;
                    state.synchronizer.take_successor(tip)
                };
                match next {
                    Some(successor) => {
                        if let Err(e) = self.accept_block(&successor).await {
                            warn!(error = %e, "buffered block rejected");
                            break;
                        }
                    }
                    None => break,
                }
            }

            let tip = self.state.read().tip.header.height;
            let completed = self.state.write().synchronizer.complete_if_caught_up(tip);
            return Ok(if completed {
                BlockOutcome::SyncCompleted
            } else {
                BlockOutcome::Syncing
            });
        }

        self.state.write().synchronizer.buffer(block);
        Ok(BlockOutcome::Syncing)
    }

    /// Accept the block consensus certified locally.
    pub async fn accept_winner(&self, block: Block) -> Result<(), ChainError> {
        let _guard = self.accept_lock.lock().await;
        self.accept_block(&block).await
    }

    /// Validate a candidate without touching state: lineage, stateless
    /// sanity, then a dry-run state transition.
    pub async fn verify_candidate(&self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip();
        sanity_check_block(&tip, block)?;

        self.executor
            .verify_state_transition(
                &block.txs,
                self.config.block_gas_limit,
                block.header.height,
            )
            .await?;

        // Remember the candidate so an agreement-only round can recover it.
        self.loader.store_candidate(block)?;
        Ok(())
    }

    /// The accept path. Caller must hold `accept_lock`.
    async fn accept_block(&self, block: &Block) -> Result<(), ChainError> {
        let (tip, provisioners) = {
            let state = self.state.read();
            (state.tip.clone(), Arc::clone(&state.provisioners))
        };

        // 1-2. Lineage and stateless sanity.
        sanity_check_block(&tip, block)?;

        // 3. Certificate against the provisioners known at this height.
        check_block_certificate(
            &provisioners,
            block,
            &tip.header.seed,
            self.config.committee_size,
        )?;

        // Local and executor state must agree before transitioning.
        let executor_root = self.executor.get_state_root().await?;
        if executor_root != tip.header.state_hash {
            error!(
                node = %tip.header.state_hash,
                executor = %executor_root,
                "check state_hash failed"
            );
            return Err(ChainError::InvalidStateHash);
        }

        // 4. State transition: finalized blocks (first iteration) call
        // Finalize, tentative ones Accept.
        let (updated_provisioners, new_root) = if block.header.certificate.step == 1 {
            self.executor
                .finalize(
                    &block.txs,
                    tip.header.state_hash,
                    block.header.height,
                    self.config.block_gas_limit,
                )
                .await?
        } else {
            self.executor
                .accept(
                    &block.txs,
                    tip.header.state_hash,
                    block.header.height,
                    self.config.block_gas_limit,
                )
                .await?
        };

        if new_root != block.header.state_hash {
            error!(
                node = %block.header.state_hash,
                executor = %new_root,
                "inconsistency with state_hash"
            );
            return Err(ChainError::InvalidStateHash);
        }

        // 5. Persist, then swap the tip under the write lock.
        self.loader.append(block)?;
        {
            let mut state = self.state.write();
            state.tip = block.clone();
            state.provisioners = Arc::new(updated_provisioners);
        }

        info!(
            height = block.header.height,
            hash = %block.hash(),
            txs_count = block.txs.len(),
            "block accepted"
        );

        // 6. Post-acceptance: notify subscribers, drop stale candidates.
        self.bus
            .publish(Topic::AcceptedBlock, Message::AcceptedBlock(block.clone()));
        if let Err(e) = self.loader.clear_candidate_messages() {
            warn!(error = %e, "candidate deletion failed");
        }

        Ok(())
    }

    /// Replace the tip with a competing certified block at the same height.
    ///
    /// Permitted only for the current tip, and only once per height.
    async fn try_fallback(&self, block: Block) -> Result<(), ChainError> {
        let height = block.header.height;

        {
            let state = self.state.read();
            if state.last_fallback == Some(height) {
                return Err(ChainError::InvalidBlock(
                    "fallback already performed at this height".into(),
                ));
            }
        }

        let prev = self.loader.block_at(height.saturating_sub(1))?;

        // The replacement must be fully valid before any state is undone.
        sanity_check_block(&prev, &block)?;
        {
            let state = self.state.read();
            check_block_certificate(
                &state.provisioners,
                &block,
                &prev.header.seed,
                self.config.committee_size,
            )?;
        }

        warn!(height, new_hash = %block.hash(), "falling back to competing block");

        // Undo: executor state first, then storage, then the tip pointer.
        self.executor.revert(prev.header.state_hash).await?;
        self.loader.rollback_to(prev.header.height)?;
        {
            let mut state = self.state.write();
            state.tip = prev;
            state.last_fallback = Some(height);
        }

        self.accept_block(&block).await
    }

    /// Re-advertise an accepted block.
    fn propagate_block(&self, block: &Block, kad_height: u8) {
        let result = if self.config.kadcast_enabled {
            encode_kadcast(&Payload::Block(Box::new(block.clone())), kad_height)
                .map(|frame| self.bus.publish(Topic::Kadcast, Message::Frame(frame)))
        } else {
            let mut inv = Inv::default();
            inv.add(InvType::Block, block.hash());
            encode_gossip(&Payload::Inv(inv))
                .map(|frame| self.bus.publish(Topic::Gossip, Message::Frame(frame)))
        };

        if let Err(e) = result {
            error!(error = %e, "block propagation failed");
        }
    }
}
