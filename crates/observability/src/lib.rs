//! Process-wide tracing setup shared by binaries and tests.

/// Initialize process-wide JSON logging.
///
/// This is safe to call multiple times; subsequent calls become no-ops.
pub fn init() {
    tracing::init(tracing::LogFormat::Json);
}

/// Tracing configuration (filters, output format).
pub mod tracing;
