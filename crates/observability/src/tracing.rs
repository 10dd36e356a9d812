//! Tracing/logging initialization.
//!
//! Filtering comes from `RUST_LOG` (default `info`). Recalculation spans carry
//! `tenant_id`, `item_type` and `location_id`, so JSON output can be filtered
//! per tenant downstream.

use tracing_subscriber::EnvFilter;

/// Output format of the process-wide subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// One JSON object per event (production).
    #[default]
    Json,
    /// Human-readable, captured by the test harness.
    Test,
}

fn filter(default_directive: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive))
}

/// Initialize tracing/logging for the process.
///
/// Safe to call multiple times (subsequent calls are no-ops).
pub fn init(format: LogFormat) {
    match format {
        LogFormat::Json => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter("info"))
                .json()
                .with_timer(tracing_subscriber::fmt::time::SystemTime)
                .with_target(false)
                .try_init();
        }
        LogFormat::Test => {
            let _ = tracing_subscriber::fmt()
                .with_env_filter(filter("debug"))
                .with_test_writer()
                .with_target(false)
                .try_init();
        }
    }
}

/// Test-harness friendly subscriber; output only shows for failing tests.
pub fn init_for_tests() {
    init(LogFormat::Test);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_initialization_is_a_no_op() {
        init_for_tests();
        init_for_tests();
        init(LogFormat::Json);
        ::tracing::info!("still logging after repeated init");
    }
}
