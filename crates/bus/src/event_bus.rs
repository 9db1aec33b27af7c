//! Topic-based publish-subscribe within one process.
//!
//! Delivery is best-effort and never blocks the publisher: a subscriber
//! whose channel is full is skipped with a warning and a counter bump.
//! Subscribers must be registered before the publisher starts (spawn order
//! is part of the integration contract).

use crate::{Message, Topic};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Default channel capacity handed to subscribers.
pub const DEFAULT_SUBSCRIBER_CAPACITY: usize = 100;

struct Subscriber {
    id: u64,
    tx: mpsc::Sender<Message>,
}

/// The process-wide event bus.
///
/// Cloning is cheap; all clones share the same subscriber registry. The bus
/// is threaded through constructors explicitly, there is no global instance.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<EventBusInner>,
}

struct EventBusInner {
    listeners: RwLock<HashMap<Topic, Vec<Subscriber>>>,
    next_id: AtomicU64,
    dropped: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(EventBusInner {
                listeners: RwLock::new(HashMap::new()),
                next_id: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Subscribe to a topic with the default channel capacity.
    pub fn subscribe(&self, topic: Topic) -> mpsc::Receiver<Message> {
        self.subscribe_with_capacity(topic, DEFAULT_SUBSCRIBER_CAPACITY)
    }

    /// Subscribe to a topic with an explicit channel capacity.
    pub fn subscribe_with_capacity(
        &self,
        topic: Topic,
        capacity: usize,
    ) -> mpsc::Receiver<Message> {
        let (tx, rx) = mpsc::channel(capacity);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .entry(topic)
            .or_default()
            .push(Subscriber { id, tx });
        rx
    }

    /// Publish a message to every subscriber of `topic`.
    ///
    /// Returns the number of subscribers that received the message. Closed
    /// subscriber channels are pruned; full ones are skipped.
    pub fn publish(&self, topic: Topic, msg: Message) -> usize {
        let mut delivered = 0;
        let mut closed: Vec<u64> = Vec::new();

        {
            let listeners = self.inner.listeners.read();
            let Some(subscribers) = listeners.get(&topic) else {
                return 0;
            };

            for sub in subscribers {
                match sub.tx.try_send(msg.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        self.inner.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(?topic, subscriber = sub.id, "slow subscriber, message dropped");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        closed.push(sub.id);
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut listeners = self.inner.listeners.write();
            if let Some(subscribers) = listeners.get_mut(&topic) {
                subscribers.retain(|s| !closed.contains(&s.id));
            }
        }

        delivered
    }

    /// Messages dropped because a subscriber was slow.
    pub fn dropped_count(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    /// Number of live subscribers on a topic.
    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .listeners
            .read()
            .get(&topic)
            .map(|s| s.len())
            .unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
