//! Classification of `sqlx` failures into transient and permanent.
//!
//! | Failure | Class |
//! |---------|-------|
//! | `Io`, `Tls` (reset, broken pipe, refused) | transient |
//! | `PoolTimedOut` (no connection within acquire timeout) | transient |
//! | `WorkerCrashed` | transient |
//! | SQLSTATE `08xxx` (connection exception) | transient |
//! | SQLSTATE `57P01`/`57P02`/`57P03` (server shutting down, cannot connect now) | transient |
//! | SQLSTATE `57014` (query cancelled: statement timeout, abort) | transient |
//! | SQLSTATE `23xxx`, `42xxx`, any other code | permanent |
//! | `PoolClosed`, decode/encode, `RowNotFound`, protocol, configuration | permanent |

/// Whether retrying the whole transaction may succeed.
pub fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_) | sqlx::Error::Tls(_) => true,
        sqlx::Error::PoolTimedOut | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db_err) => db_err
            .code()
            .map(|code| is_transient_sqlstate(code.as_ref()))
            .unwrap_or(false),
        _ => false,
    }
}

/// Whether a Postgres SQLSTATE denotes a connectivity or cancellation failure.
pub fn is_transient_sqlstate(code: &str) -> bool {
    code.starts_with("08") || matches!(code, "57P01" | "57P02" | "57P03" | "57014")
}
