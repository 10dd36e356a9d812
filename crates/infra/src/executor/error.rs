use thiserror::Error;

/// Failure of an isolated transaction.
///
/// Callers branch on [`ExecutorError::is_connection_interrupted`] to tell
/// infrastructure flakiness (safe to retry later) apart from data errors.
#[derive(Debug, Error)]
pub enum ExecutorError {
    /// Transient failures persisted through every allowed attempt.
    #[error("connection interrupted during {operation} after {attempts} attempt(s): {source}")]
    ConnectionInterrupted {
        operation: &'static str,
        attempts: u32,
        #[source]
        source: sqlx::Error,
    },

    /// Non-transient failure (constraint, syntax, permission, decode); never retried.
    #[error("database error in {operation}: {source}")]
    Database {
        operation: &'static str,
        #[source]
        source: sqlx::Error,
    },
}

impl ExecutorError {
    pub fn is_connection_interrupted(&self) -> bool {
        matches!(self, ExecutorError::ConnectionInterrupted { .. })
    }

    pub fn operation(&self) -> &'static str {
        match self {
            ExecutorError::ConnectionInterrupted { operation, .. }
            | ExecutorError::Database { operation, .. } => operation,
        }
    }
}
