//! Logging setup
//!
//! Installs a `tracing-subscriber` fmt subscriber. `RUST_LOG` wins over the
//! filter passed in, so a host can turn on `tether_core=trace` without a
//! config change.

use tracing_subscriber::EnvFilter;

/// Default filter when neither the config nor `RUST_LOG` sets one
pub const DEFAULT_FILTER: &str = "info";

/// Install the global subscriber
///
/// Returns `false` if a subscriber was already installed (by an earlier call
/// or by the host); the existing one is left in place.
pub fn init_logging(filter: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(filter))
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init()
        .is_ok()
}
