//! Async and tracing helpers.

use std::sync::Once;

use tracing_subscriber::EnvFilter;

/// Number of scheduler yields [`settle`] performs.
pub const SETTLE_ROUNDS: usize = 32;

/// Let spawned tasks on a current-thread runtime run to quiescence.
///
/// Service start is deferred by one tick and then awaits the service's own
/// hook, so a handful of yields is enough for anything that does not sleep.
pub async fn settle() {
    for _ in 0..SETTLE_ROUNDS {
        tokio::task::yield_now().await;
    }
}

static TRACING: Once = Once::new();

/// Install a test-writer subscriber once per process.
///
/// Honors `RUST_LOG`, defaulting to `debug` for sprig crates.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("sprig_runtime=debug,sprig_loader=debug"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}
