//! Structured logging setup.
//!
//! The library itself only emits `tracing` events; binaries and tests pick
//! a subscriber with one of these helpers.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize console logging, filtered by `RUST_LOG` or `default_filter`.
///
/// # Panics
///
/// Panics if a global subscriber has already been installed.
pub fn init_tracing(default_filter: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .init();

    tracing::info!(filter = default_filter, "tracing initialized");
}

/// Initialize tracing for tests (only logs errors). Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("error")
        .with_test_writer()
        .try_init();
}
