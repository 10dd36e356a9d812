//! Recalculation orchestrator.
//!
//! Turns "this part of the ledger changed" into freshly derived state rows:
//! resolve the affected buckets, replay each bucket's full ordered history,
//! carry the existing unit over, and upsert. Nothing is patched incrementally,
//! so a stale overwrite from a concurrent recalculation heals on the next one.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, instrument, warn};

use stockledger_core::{DomainError, LocationId, TenantContext};
use stockledger_inventory::{replay, Bucket, InventoryState};

use crate::ledger_store::{LedgerStore, LedgerStoreError};

/// Which buckets of an item to recompute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LocationScope {
    /// Every location with ledger entries for the item (the pooled one included).
    AllTouched,
    /// Only the pooled (`location_id IS NULL`) bucket.
    Pooled,
    /// Only the bucket of one location.
    At(LocationId),
}

impl From<Option<LocationId>> for LocationScope {
    fn from(location_id: Option<LocationId>) -> Self {
        match location_id {
            Some(location_id) => LocationScope::At(location_id),
            None => LocationScope::Pooled,
        }
    }
}

/// A ledger write performed by the CRUD layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerMutation {
    Inserted(Bucket),
    /// An edit may move an entry to another item or location.
    Updated { before: Bucket, after: Bucket },
    Deleted(Bucket),
}

impl LedgerMutation {
    /// Buckets whose history the mutation touched, deduplicated (one or two).
    pub fn affected_buckets(&self) -> Vec<Bucket> {
        match self {
            LedgerMutation::Inserted(bucket) | LedgerMutation::Deleted(bucket) => {
                vec![bucket.clone()]
            }
            LedgerMutation::Updated { before, after } if before == after => vec![before.clone()],
            LedgerMutation::Updated { before, after } => vec![before.clone(), after.clone()],
        }
    }
}

/// Freshly derived state of one bucket, as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecalculatedBucket {
    pub bucket: Bucket,
    pub state: InventoryState,
}

#[derive(Debug, Error)]
pub enum RecalcError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Store(#[from] LedgerStoreError),
}

impl RecalcError {
    /// Transient failure that outlived the retry budget; safe to retry later.
    pub fn is_connection_interrupted(&self) -> bool {
        matches!(self, RecalcError::Store(e) if e.is_connection_interrupted())
    }
}

/// Rebuilds inventory state rows from the ledger.
#[derive(Debug, Clone)]
pub struct Recalculator<S> {
    store: S,
}

impl<S> Recalculator<S>
where
    S: LedgerStore,
{
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Recompute the buckets of `item_type` selected by `scope`.
    ///
    /// With [`LocationScope::AllTouched`] and no ledger history at all, the
    /// pooled bucket is still written, as an explicit zeroed row.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub async fn recalculate(
        &self,
        ctx: &TenantContext,
        item_type: &str,
        scope: LocationScope,
    ) -> Result<Vec<RecalculatedBucket>, RecalcError> {
        if item_type.trim().is_empty() {
            return Err(DomainError::validation("item_type must not be empty").into());
        }

        let buckets = match scope {
            LocationScope::At(location_id) => vec![Bucket::at(item_type, location_id)],
            LocationScope::Pooled => vec![Bucket::pooled(item_type)],
            LocationScope::AllTouched => {
                let locations = self.store.fetch_distinct_locations(ctx, item_type).await?;
                if locations.is_empty() {
                    vec![Bucket::pooled(item_type)]
                } else {
                    locations
                        .into_iter()
                        .map(|location_id| Bucket::new(item_type, location_id))
                        .collect()
                }
            }
        };

        self.recalculate_all(ctx, buckets).await
    }

    /// Recompute exactly one bucket.
    #[instrument(
        skip(self, ctx, bucket),
        fields(
            tenant_id = %ctx.tenant_id(),
            item_type = %bucket.item_type,
            location_id = ?bucket.location_id
        ),
        err
    )]
    pub async fn recalculate_bucket(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<RecalculatedBucket, RecalcError> {
        let entries = self.store.fetch_ledger_entries(ctx, bucket).await?;
        let outcome = replay(&entries);

        for shortfall in &outcome.shortfalls {
            warn!(
                entry_id = %shortfall.entry_id,
                occurred_at = %shortfall.occurred_at,
                requested = %shortfall.requested,
                available = %shortfall.available,
                "deplete exceeds available quantity; clamped at zero"
            );
        }

        let unit = self.store.fetch_current_unit(ctx, bucket).await?;
        let state = InventoryState::from_position(outcome.position, unit);
        self.store.upsert_inventory_state(ctx, bucket, &state).await?;

        debug!(
            applied = outcome.applied,
            quantity = %state.quantity,
            total_cost = %state.total_cost,
            "inventory state recalculated"
        );

        Ok(RecalculatedBucket {
            bucket: bucket.clone(),
            state,
        })
    }

    /// Recompute every bucket a CRUD-side mutation could have affected.
    pub async fn recalculate_affected(
        &self,
        ctx: &TenantContext,
        mutation: &LedgerMutation,
    ) -> Result<Vec<RecalculatedBucket>, RecalcError> {
        self.recalculate_all(ctx, mutation.affected_buckets()).await
    }

    /// Re-derive the whole materialized view of the tenant.
    ///
    /// State rows whose ledger history is gone are rewritten as zero.
    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    pub async fn rebuild_tenant(
        &self,
        ctx: &TenantContext,
    ) -> Result<Vec<RecalculatedBucket>, RecalcError> {
        let buckets = self.store.list_buckets(ctx).await?;
        self.recalculate_all(ctx, buckets).await
    }

    async fn recalculate_all(
        &self,
        ctx: &TenantContext,
        buckets: Vec<Bucket>,
    ) -> Result<Vec<RecalculatedBucket>, RecalcError> {
        let mut results = Vec::with_capacity(buckets.len());
        for bucket in &buckets {
            results.push(self.recalculate_bucket(ctx, bucket).await?);
        }
        Ok(results)
    }
}
