//! Structured logging initialization.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber once at process start.
///
/// `default_level` seeds the env-filter when `RUST_LOG` is unset, so the
/// configured `log_level` from [`crate::config::RuntimeConfig`] still takes
/// effect without forcing the operator to set `RUST_LOG` explicitly.
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level.to_string()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
