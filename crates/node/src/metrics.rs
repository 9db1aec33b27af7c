//! Node metrics using the native Prometheus client.
//!
//! Domain-specific counters backing the error policy: dropped events and
//! rejected votes bump a counter instead of surfacing, so operators can
//! still see them.

use prometheus::{register_counter, register_gauge, Counter, Gauge};
use std::sync::OnceLock;

static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Domain-specific node metrics.
pub struct Metrics {
    /// Blocks accepted onto the chain.
    pub blocks_accepted: Counter,
    /// Fallbacks performed (tip replaced at the same height).
    pub fallbacks: Counter,
    /// Blocks rejected as invalid.
    pub blocks_rejected: Counter,
    /// Bus messages dropped on slow subscribers.
    pub bus_dropped: Gauge,
    /// Current chain height.
    pub chain_height: Gauge,
    /// Transactions currently pooled.
    pub mempool_len: Gauge,
}

/// The process-wide metrics handle, registered on first use.
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| Metrics {
        blocks_accepted: register_counter!(
            "sba_blocks_accepted_total",
            "Blocks accepted onto the chain"
        )
        .unwrap(),
        fallbacks: register_counter!("sba_fallbacks_total", "Tip fallbacks performed").unwrap(),
        blocks_rejected: register_counter!(
            "sba_blocks_rejected_total",
            "Blocks rejected as invalid"
        )
        .unwrap(),
        bus_dropped: register_gauge!(
            "sba_bus_dropped_messages",
            "Bus messages dropped on slow subscribers"
        )
        .unwrap(),
        chain_height: register_gauge!("sba_chain_height", "Current chain height").unwrap(),
        mempool_len: register_gauge!("sba_mempool_len", "Pooled transaction count").unwrap(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_once() {
        let a = metrics() as *const Metrics;
        let b = metrics() as *const Metrics;
        assert_eq!(a, b);
    }

    #[test]
    fn test_counters_count() {
        let m = metrics();
        let before = m.blocks_accepted.get();
        m.blocks_accepted.inc();
        assert!(m.blocks_accepted.get() >= before + 1.0);
    }
}
