//! Shared fixtures for the `watchbuild` integration tests.
//!
//! - [`builders`]: workspace and project configs without TOML.
//! - [`fake_backend`]: a [`watchbuild::exec::BuildBackend`] that records
//!   installs, type-checks and bundles and can be told to fail.
//! - [`memory_fs`]: an in-memory workspace tree for the orchestrator.

pub mod builders;
pub mod fake_backend;
pub mod memory_fs;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

/// Upper bound for any single awaited step in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Route orchestrator logs into the per-test capture.
///
/// Only failing tests show them. `RUST_LOG=watchbuild=debug` raises the
/// level.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test after [`TEST_TIMEOUT`].
///
/// Under a paused clock the timer advances once every task is idle, so a
/// stuck session or dispatcher fails fast instead of hanging the run.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("timed out after {TEST_TIMEOUT:?}"),
    }
}
