//! Diagnostic tracing for the CLI host.
//!
//! Committed transitions log at `info`, rejected calls at `debug`. The
//! election and account event logs inside the state file are the audit
//! record; tracing output is not persisted.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize the tracing subscriber.
///
/// Reads `RUST_LOG`, defaulting to `warn`. Output goes to stderr so JSON
/// query results on stdout stay machine readable.
///
/// # Example
/// ```bash
/// RUST_LOG=elections_ledger=debug elections vote --campaign GD2021 --candidate 1
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
