//! Diagnostics setup.
//!
//! Logs go to stderr so stdout stays clean for command output. `RUST_LOG`
//! wins when set; otherwise the level comes from `--log-level` (or the
//! per-command default).

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(default_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(default_level)));

    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr);

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}

/// Apply `level` to this application's crates, keep dependencies at `warn`.
fn filter_directive(level: &str) -> String {
    format!("warn,folio={level},folio_core={level}", level = level)
}
