//! Opt-in JSON-line logging bootstrap.
//!
//! The router logs through the [`tracing`] facade and works with whatever
//! subscriber the embedding application installs. Applications without their
//! own subscriber can call [`init`] once at start-up to get structured
//! JSON-line events on stderr, filtered through the standard `RUST_LOG`
//! environment variable.

use std::sync::Once;
use tracing_subscriber::EnvFilter;

static INSTALLED: Once = Once::new();

/// The filter applied when `RUST_LOG` is absent.
const DEFAULT_FILTER: &str = "info";

/// Installs a JSON-line `tracing` subscriber writing to stderr.
///
/// Idempotent, and quietly yields if another subscriber is already
/// installed. Never a precondition for any router operation.
pub fn init() {
    INSTALLED.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

        let _ = tracing_subscriber::fmt()
            .json()
            .flatten_event(true)
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
