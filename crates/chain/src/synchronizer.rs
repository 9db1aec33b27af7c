//! The two-state sync machine: `InSync` and `OutOfSync`.
//!
//! Transitioning out happens when a block arrives beyond tip+1; the
//! synchronizer requests the gap from the source peer, arms a watchdog and
//! buffers successors. It re-enters `InSync` when caught up or when the
//! watchdog fires, whichever comes first.

use sba_types::Block;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Upper bound on buffered out-of-order blocks.
const MAX_BUFFERED: usize = 500;

/// A request for missing blocks, consumed by the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncRequest {
    /// First missing height.
    pub from: u64,
    /// Last requested height.
    pub to: u64,
    /// Peer expected to serve the gap.
    pub peer: String,
}

#[derive(Debug)]
enum SyncStatus {
    InSync,
    OutOfSync {
        target: u64,
        peer: String,
        deadline: Instant,
    },
}

/// The sync state machine. All methods are called under the chain's write
/// lock, so the state needs no lock of its own.
pub struct Synchronizer {
    status: SyncStatus,
    buffered: BTreeMap<u64, Block>,
    watchdog: Duration,
    request_tx: mpsc::Sender<SyncRequest>,
}

impl Synchronizer {
    /// New synchronizer; `request_tx` receives block-gap requests.
    pub fn new(watchdog: Duration, request_tx: mpsc::Sender<SyncRequest>) -> Self {
        Self {
            status: SyncStatus::InSync,
            buffered: BTreeMap::new(),
            watchdog,
            request_tx,
        }
    }

    /// Whether the machine is in the `InSync` state.
    pub fn is_in_sync(&self) -> bool {
        matches!(self.status, SyncStatus::InSync)
    }

    /// Current sync target, if out of sync.
    pub fn target(&self) -> Option<u64> {
        match &self.status {
            SyncStatus::InSync => None,
            SyncStatus::OutOfSync { target, .. } => Some(*target),
        }
    }

    /// Enter `OutOfSync` toward `target`, requesting the gap from `peer`.
    ///
    /// A higher target while already syncing extends the existing session;
    /// lower ones are ignored.
    pub fn start_sync(&mut self, tip: u64, target: u64, peer: &str) {
        if let SyncStatus::OutOfSync {
            target: current, ..
        } = &self.status
        {
            if *current >= target {
                return;
            }
        }

        info!(tip, target, peer, "out of sync, requesting missing blocks");
        let _ = self.request_tx.try_send(SyncRequest {
            from: tip + 1,
            to: target,
            peer: peer.to_string(),
        });

        self.status = SyncStatus::OutOfSync {
            target,
            peer: peer.to_string(),
            deadline: Instant::now() + self.watchdog,
        };
    }

    /// Buffer a block that cannot be accepted yet.
    pub fn buffer(&mut self, block: Block) {
        if self.buffered.len() >= MAX_BUFFERED {
            debug!("sync buffer full, dropping block");
            return;
        }
        self.buffered.insert(block.header.height, block);
    }

    /// Pop the buffered successor of `tip`, if any.
    pub fn take_successor(&mut self, tip: u64) -> Option<Block> {
        self.buffered.remove(&(tip + 1))
    }

    /// Re-enter `InSync` if the tip caught up with the target. Returns true
    /// when the transition happened.
    pub fn complete_if_caught_up(&mut self, tip: u64) -> bool {
        let caught_up = match &self.status {
            SyncStatus::OutOfSync { target, .. } => tip >= *target,
            SyncStatus::InSync => false,
        };
        if caught_up {
            info!(tip, "sync complete");
            self.status = SyncStatus::InSync;
            self.buffered.retain(|height, _| *height > tip);
        }
        caught_up
    }

    /// Fire the watchdog if its deadline passed. The machine then returns
    /// to `InSync` from the current tip even if a gap remains; the next
    /// out-of-range block starts a fresh session. Returns true on expiry.
    pub fn check_watchdog(&mut self) -> bool {
        let expired = match &self.status {
            SyncStatus::OutOfSync { deadline, peer, .. } => {
                if Instant::now() >= *deadline {
                    warn!(peer, "sync timer expired");
                    true
                } else {
                    false
                }
            }
            SyncStatus::InSync => false,
        };
        if expired {
            self.status = SyncStatus::InSync;
            self.buffered.clear();
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sba_types::{Certificate, Hash, Header, BLOCK_VERSION};

    fn block_at(height: u64) -> Block {
        Block::new(
            Header {
                version: BLOCK_VERSION,
                height,
                timestamp: 0,
                prev_block_hash: Hash::ZERO,
                seed: Hash::ZERO,
                tx_root: Hash::ZERO,
                state_hash: Hash::ZERO,
                certificate: Certificate::genesis(),
            },
            vec![],
        )
    }

    fn synchronizer(watchdog: Duration) -> (Synchronizer, mpsc::Receiver<SyncRequest>) {
        let (tx, rx) = mpsc::channel(8);
        (Synchronizer::new(watchdog, tx), rx)
    }

    #[tokio::test]
    async fn test_start_sync_requests_gap() {
        let (mut sync, mut rx) = synchronizer(Duration::from_secs(5));

        sync.start_sync(3, 10, "peer-a");
        assert!(!sync.is_in_sync());
        assert_eq!(sync.target(), Some(10));

        let req = rx.recv().await.unwrap();
        assert_eq!(req, SyncRequest { from: 4, to: 10, peer: "peer-a".into() });
    }

    #[tokio::test]
    async fn test_lower_target_does_not_shrink_session() {
        let (mut sync, _rx) = synchronizer(Duration::from_secs(5));

        sync.start_sync(3, 10, "peer-a");
        sync.start_sync(3, 7, "peer-b");
        assert_eq!(sync.target(), Some(10));
    }

    #[tokio::test]
    async fn test_buffer_and_drain_in_order() {
        let (mut sync, _rx) = synchronizer(Duration::from_secs(5));

        sync.buffer(block_at(6));
        sync.buffer(block_at(5));

        assert_eq!(sync.take_successor(4).unwrap().header.height, 5);
        assert_eq!(sync.take_successor(5).unwrap().header.height, 6);
        assert!(sync.take_successor(6).is_none());
    }

    #[tokio::test]
    async fn test_caught_up_returns_in_sync() {
        let (mut sync, _rx) = synchronizer(Duration::from_secs(5));

        sync.start_sync(3, 5, "peer-a");
        assert!(!sync.complete_if_caught_up(4));
        assert!(sync.complete_if_caught_up(5));
        assert!(sync.is_in_sync());
    }

    #[tokio::test(start_paused = true)]
    async fn test_watchdog_expiry_restores_in_sync() {
        let (mut sync, _rx) = synchronizer(Duration::from_millis(100));

        sync.start_sync(3, 10, "peer-a");
        assert!(!sync.check_watchdog());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(sync.check_watchdog());
        assert!(sync.is_in_sync());
    }
}
