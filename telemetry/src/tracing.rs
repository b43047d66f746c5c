//! Tracing subscriber setup shared by the oracle's binary and tests.

use std::sync::Once;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Environment variable that turns on log output in tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Filter used when `RUST_LOG` is not set.
const DEFAULT_LOG_FILTER: &str = "info";

static INIT_TEST_TRACING: Once = Once::new();

/// Installs the global subscriber for a service binary.
///
/// Log levels come from `RUST_LOG`, falling back to `info`. Events emitted inside
/// [`service_span`] carry the `service` name so logs of several oracle runs can be told apart.
pub fn init_tracing(service: &str) -> Result<(), TryInitError> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .try_init()?;

    ::tracing::info!(service, "tracing initialized");

    Ok(())
}

/// Returns the root span of a service binary; the fmt layer prints its `service` field with
/// every event emitted inside it.
pub fn service_span(service: &str) -> ::tracing::Span {
    ::tracing::info_span!("service", service)
}

/// Installs a subscriber writing through the test harness, at most once per process.
///
/// Output is only produced when `ENABLE_TRACING` is set, which keeps test runs quiet by
/// default while still allowing `ENABLE_TRACING=1 cargo test` when debugging a failure.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

        // Another test binary helper may already have installed a subscriber.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
