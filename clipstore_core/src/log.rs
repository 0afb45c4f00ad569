//! Logging setup
//!
//! Console logging via `tracing_subscriber`, initialized at most once per
//! process.

use std::sync::Once;

use tracing::Level;

static INIT: Once = Once::new();

/// Initialize the global subscriber. Safe to call more than once; only the
/// first call takes effect.
pub fn init_logging(level: Level) {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_target(true)
            .with_max_level(level)
            .init();
    });
}
