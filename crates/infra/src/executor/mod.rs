//! Isolated transaction executor: the tenant-isolation boundary.
//!
//! Every statement against the shared ledger and state tables runs inside a
//! transaction opened here. The first statement of that transaction pins the
//! timezone, tenant id, and role as transaction-local settings, which the
//! row-level security policies read. Because `set_config(.., true)` only lives
//! until commit/rollback, a pooled connection reused by another tenant never
//! inherits a previous tenant's scope.
//!
//! Transient failures retry the whole transaction, pinning included.

pub mod error;
pub mod retry;
pub mod transient;

use std::future::Future;
use std::pin::Pin;

use sqlx::{PgConnection, PgPool};
use tracing::instrument;

use stockledger_core::TenantContext;

use crate::config::LedgerConfig;

pub use error::ExecutorError;
pub use retry::{retry_transient, RetryPolicy};
pub use transient::{is_transient, is_transient_sqlstate};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Pins transaction-local session settings. Values are bound, never spliced.
pub const PIN_SESSION_SQL: &str = "SELECT set_config('TimeZone', $1, true), \
     set_config('app.tenant_id', $2, true), \
     set_config('app.role', $3, true)";

/// Session settings derived from a tenant context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPin {
    pub timezone: String,
    pub tenant_id: String,
    pub role: String,
}

impl SessionPin {
    pub fn new(ctx: &TenantContext, timezone: &str) -> Self {
        Self {
            timezone: timezone.to_string(),
            tenant_id: ctx.tenant_id().to_string(),
            role: ctx.role().as_str().to_string(),
        }
    }

    async fn apply(&self, conn: &mut PgConnection) -> Result<(), sqlx::Error> {
        sqlx::query(PIN_SESSION_SQL)
            .bind(&self.timezone)
            .bind(&self.tenant_id)
            .bind(&self.role)
            .execute(conn)
            .await?;
        Ok(())
    }
}

/// Runs tenant-pinned transactions with bounded retry.
#[derive(Debug, Clone)]
pub struct IsolatedExecutor {
    pool: PgPool,
    policy: RetryPolicy,
    timezone: String,
}

impl IsolatedExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            policy: RetryPolicy::default(),
            timezone: "UTC".to_string(),
        }
    }

    pub fn from_config(pool: PgPool, config: &LedgerConfig) -> Self {
        Self {
            pool,
            policy: config.retry.policy(),
            timezone: config.session.timezone.clone(),
        }
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_timezone(mut self, timezone: impl Into<String>) -> Self {
        self.timezone = timezone.into();
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `op` inside one tenant-pinned transaction.
    ///
    /// `op` may issue several statements; they commit together or not at all.
    /// It is invoked again from scratch on each retry, so it must not carry
    /// state between invocations.
    #[instrument(
        skip(self, ctx, op),
        fields(tenant_id = %ctx.tenant_id(), role = %ctx.role()),
        err
    )]
    pub async fn run<T, F>(
        &self,
        ctx: &TenantContext,
        operation: &'static str,
        op: F,
    ) -> Result<T, ExecutorError>
    where
        T: Send,
        F: for<'c> Fn(&'c mut PgConnection) -> BoxFuture<'c, Result<T, sqlx::Error>> + Send + Sync,
    {
        let pin = SessionPin::new(ctx, &self.timezone);
        let (pin, op, pool) = (&pin, &op, &self.pool);

        retry_transient(&self.policy, operation, move |_attempt| async move {
            let mut tx = pool.begin().await?;
            pin.apply(&mut *tx).await?;
            let value = op(&mut *tx).await?;
            tx.commit().await?;
            Ok(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockledger_core::{Role, TenantId};

    #[test]
    fn session_pin_carries_context_values() {
        let tenant_id = TenantId::new();
        let ctx = TenantContext::for_caller(tenant_id, Role::new("operator")).unwrap();

        let pin = SessionPin::new(&ctx, "Asia/Kolkata");

        assert_eq!(pin.timezone, "Asia/Kolkata");
        assert_eq!(pin.tenant_id, tenant_id.to_string());
        assert_eq!(pin.role, "operator");
    }

    #[test]
    fn pin_statement_sets_all_three_settings_transaction_locally() {
        let settings = [("TimeZone", "$1"), ("app.tenant_id", "$2"), ("app.role", "$3")];
        for (name, placeholder) in settings {
            let expected = format!("set_config('{name}', {placeholder}, true)");
            assert!(PIN_SESSION_SQL.contains(&expected), "missing {expected}");
        }
    }
}
