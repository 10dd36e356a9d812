//! Tenant-scoped access to the ledger and the derived inventory state.
//!
//! The ledger table is the single source of truth; the state table is a
//! disposable materialized view owned by the recalculation orchestrator.
//! Every operation takes the caller's [`TenantContext`] explicitly.

pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use stockledger_core::{LocationId, TenantContext};
use stockledger_inventory::{Bucket, InventoryState, LedgerEntry};

use crate::executor::ExecutorError;

pub use in_memory::InMemoryLedgerStore;
pub use postgres::PostgresLedgerStore;

/// Ledger store operation error.
#[derive(Debug, Error)]
pub enum LedgerStoreError {
    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    #[error("malformed ledger row: {0}")]
    Decode(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl LedgerStoreError {
    /// Transient failure that outlived the retry budget.
    pub fn is_connection_interrupted(&self) -> bool {
        matches!(self, LedgerStoreError::Executor(e) if e.is_connection_interrupted())
    }
}

/// Read/write access to the two shared tables, scoped to one tenant per call.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Restock/deplete entries of one bucket, ordered by `(occurred_at, id)`.
    async fn fetch_ledger_entries(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError>;

    /// Every location (the pooled `None` included) with ledger entries for the item.
    async fn fetch_distinct_locations(
        &self,
        ctx: &TenantContext,
        item_type: &str,
    ) -> Result<Vec<Option<LocationId>>, LedgerStoreError>;

    /// Unit of the existing state row, or [`stockledger_inventory::DEFAULT_UNIT`].
    async fn fetch_current_unit(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<String, LedgerStoreError>;

    /// Insert or overwrite the state row of one bucket.
    async fn upsert_inventory_state(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
        state: &InventoryState,
    ) -> Result<(), LedgerStoreError>;

    /// Every bucket of the tenant that has ledger entries or a state row.
    async fn list_buckets(&self, ctx: &TenantContext) -> Result<Vec<Bucket>, LedgerStoreError>;
}

#[async_trait]
impl<S> LedgerStore for Arc<S>
where
    S: LedgerStore + ?Sized,
{
    async fn fetch_ledger_entries(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        (**self).fetch_ledger_entries(ctx, bucket).await
    }

    async fn fetch_distinct_locations(
        &self,
        ctx: &TenantContext,
        item_type: &str,
    ) -> Result<Vec<Option<LocationId>>, LedgerStoreError> {
        (**self).fetch_distinct_locations(ctx, item_type).await
    }

    async fn fetch_current_unit(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<String, LedgerStoreError> {
        (**self).fetch_current_unit(ctx, bucket).await
    }

    async fn upsert_inventory_state(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
        state: &InventoryState,
    ) -> Result<(), LedgerStoreError> {
        (**self).upsert_inventory_state(ctx, bucket, state).await
    }

    async fn list_buckets(&self, ctx: &TenantContext) -> Result<Vec<Bucket>, LedgerStoreError> {
        (**self).list_buckets(ctx).await
    }
}
