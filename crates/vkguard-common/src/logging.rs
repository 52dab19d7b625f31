use std::sync::Once;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize structured logging with environment filter.
/// Set VKGUARD_LOG=debug (or trace, info, warn, error) for verbosity control.
///
/// The layer lives inside somebody else's process, so an already installed
/// global subscriber wins and this becomes a no-op. Safe to call repeatedly.
pub fn init_logging() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("VKGUARD_LOG")
            .unwrap_or_else(|_| EnvFilter::new("warn"));

        let _ = fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .try_init();
    });
}
