//! Tracing configuration for test output.

use std::sync::Once;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

static INIT: Once = Once::new();

/// Initialize tracing for tests.
///
/// Safe to call from every test; only the first call installs the
/// subscriber. Uses `RUST_LOG` if set, otherwise
/// `info,layout_engine=debug`.
pub fn init_test_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("info,layout_engine=debug"));
        install(filter);
    });
}

/// Initialize tracing with a specific filter.
pub fn init_test_tracing_with_filter(filter: &str) {
    INIT.call_once(|| install(EnvFilter::new(filter)));
}

/// Initialize silent tracing, for tests that trigger errors on purpose.
pub fn init_test_tracing_silent() {
    INIT.call_once(|| install(EnvFilter::new("off")));
}

fn install(filter: EnvFilter) {
    // Another harness may already own the global subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_test_writer()
                .compact(),
        )
        .try_init();
}
