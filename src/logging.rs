//! Development-time tracing for debugging the harness.
//!
//! Diagnostics only: output goes to stderr and is controlled by `RUST_LOG`.
//! Persisted run artifacts (logs, results, scorecards) are written
//! unconditionally and are unaffected by this module.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn` when unset. Compact format on
/// stderr.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
