//! Logging setup.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber. Reads `RUST_LOG`, defaulting
/// to `info`. Safe to call once per process.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
