//! Tracing initialization for the binary.

use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber.
///
/// The filter honors `RUST_LOG`; `default_level` applies when the variable
/// is unset. Library crates never call this; only the binary (and tests,
/// via `with_test_writer`) install a subscriber.
pub fn init_telemetry(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
