//! Postgres-backed ledger store.
//!
//! ## Tenant Isolation
//!
//! Every statement runs through [`IsolatedExecutor`], so the row-level
//! security policies of both tables see the caller's tenant. Every query also
//! carries `tenant_id = $1` in its WHERE clause or VALUES list, and decoded
//! ledger rows are checked against the context once more.
//!
//! ## Pooled Bucket
//!
//! The pooled bucket is the row with `location_id IS NULL`. Unique indexes do
//! not treat two NULLs as equal, so the state table has two partial unique
//! indexes and the upsert has two explicit statements, one per conflict target.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{FromRow, PgPool, Row};
use tracing::{instrument, Span};
use uuid::Uuid;

use stockledger_core::{LocationId, TenantContext, TenantId};
use stockledger_inventory::{
    Bucket, EntryId, InventoryState, LedgerEntry, TransactionType, DEFAULT_UNIT,
};

use super::{LedgerStore, LedgerStoreError};
use crate::executor::IsolatedExecutor;

const FETCH_ENTRIES_SQL: &str = r#"
    SELECT
        id,
        tenant_id,
        item_type,
        location_id,
        transaction_type,
        quantity,
        total_cost,
        occurred_at
    FROM inventory_ledger
    WHERE tenant_id = $1
        AND item_type = $2
        AND location_id IS NOT DISTINCT FROM $3
        AND transaction_type IN ('restock', 'deplete')
    ORDER BY occurred_at ASC, id ASC
"#;

const DISTINCT_LOCATIONS_SQL: &str = r#"
    SELECT DISTINCT location_id
    FROM inventory_ledger
    WHERE tenant_id = $1 AND item_type = $2
    ORDER BY location_id NULLS FIRST
"#;

const CURRENT_UNIT_SQL: &str = r#"
    SELECT unit
    FROM inventory_state
    WHERE tenant_id = $1
        AND item_type = $2
        AND location_id IS NOT DISTINCT FROM $3
"#;

const UPSERT_LOCATED_SQL: &str = r#"
    INSERT INTO inventory_state (
        tenant_id,
        item_type,
        location_id,
        quantity,
        unit,
        total_cost
    )
    VALUES ($1, $2, $3, $4, $5, $6)
    ON CONFLICT (tenant_id, item_type, location_id) WHERE location_id IS NOT NULL
    DO UPDATE SET
        quantity = EXCLUDED.quantity,
        unit = EXCLUDED.unit,
        total_cost = EXCLUDED.total_cost,
        updated_at = NOW()
"#;

const UPSERT_POOLED_SQL: &str = r#"
    INSERT INTO inventory_state (
        tenant_id,
        item_type,
        location_id,
        quantity,
        unit,
        total_cost
    )
    VALUES ($1, $2, NULL, $3, $4, $5)
    ON CONFLICT (tenant_id, item_type) WHERE location_id IS NULL
    DO UPDATE SET
        quantity = EXCLUDED.quantity,
        unit = EXCLUDED.unit,
        total_cost = EXCLUDED.total_cost,
        updated_at = NOW()
"#;

const LIST_BUCKETS_SQL: &str = r#"
    SELECT item_type, location_id FROM inventory_ledger WHERE tenant_id = $1
    UNION
    SELECT item_type, location_id FROM inventory_state WHERE tenant_id = $1
    ORDER BY item_type ASC, location_id ASC NULLS FIRST
"#;

/// Ledger store over the shared `inventory_ledger` / `inventory_state` tables.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    executor: IsolatedExecutor,
}

impl PostgresLedgerStore {
    pub fn new(executor: IsolatedExecutor) -> Self {
        Self { executor }
    }

    /// Store with the default executor settings over `pool`.
    pub fn from_pool(pool: PgPool) -> Self {
        Self::new(IsolatedExecutor::new(pool))
    }

    pub fn executor(&self) -> &IsolatedExecutor {
        &self.executor
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    #[instrument(
        skip(self, ctx, bucket),
        fields(
            tenant_id = %ctx.tenant_id(),
            item_type = %bucket.item_type,
            location_id = ?bucket.location_id,
            entry_count = tracing::field::Empty
        ),
        err
    )]
    async fn fetch_ledger_entries(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let tenant = *ctx.tenant_id().as_uuid();
        let item_type = bucket.item_type.clone();
        let location = bucket.location_id.map(Uuid::from);

        let rows = self
            .executor
            .run(ctx, "fetch_ledger_entries", move |conn| {
                let item_type = item_type.clone();
                Box::pin(async move {
                    sqlx::query(FETCH_ENTRIES_SQL)
                        .bind(tenant)
                        .bind(item_type)
                        .bind(location)
                        .fetch_all(conn)
                        .await
                })
            })
            .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let decoded = LedgerRow::from_row(&row).map_err(|e| {
                LedgerStoreError::Decode(format!("failed to deserialize ledger row: {e}"))
            })?;
            entries.push(decoded.into_entry(ctx.tenant_id())?);
        }

        Span::current().record("entry_count", entries.len());
        Ok(entries)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    async fn fetch_distinct_locations(
        &self,
        ctx: &TenantContext,
        item_type: &str,
    ) -> Result<Vec<Option<LocationId>>, LedgerStoreError> {
        let tenant = *ctx.tenant_id().as_uuid();
        let item_type = item_type.to_string();

        let rows = self
            .executor
            .run(ctx, "fetch_distinct_locations", move |conn| {
                let item_type = item_type.clone();
                Box::pin(async move {
                    sqlx::query(DISTINCT_LOCATIONS_SQL)
                        .bind(tenant)
                        .bind(item_type)
                        .fetch_all(conn)
                        .await
                })
            })
            .await?;

        rows.iter()
            .map(|row| {
                row.try_get::<Option<Uuid>, _>("location_id")
                    .map(|id| id.map(LocationId::from_uuid))
                    .map_err(|e| {
                        LedgerStoreError::Decode(format!("failed to read location_id: {e}"))
                    })
            })
            .collect()
    }

    #[instrument(
        skip(self, ctx, bucket),
        fields(
            tenant_id = %ctx.tenant_id(),
            item_type = %bucket.item_type,
            location_id = ?bucket.location_id
        ),
        err
    )]
    async fn fetch_current_unit(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<String, LedgerStoreError> {
        let tenant = *ctx.tenant_id().as_uuid();
        let item_type = bucket.item_type.clone();
        let location = bucket.location_id.map(Uuid::from);

        let unit: Option<String> = self
            .executor
            .run(ctx, "fetch_current_unit", move |conn| {
                let item_type = item_type.clone();
                Box::pin(async move {
                    sqlx::query_scalar(CURRENT_UNIT_SQL)
                        .bind(tenant)
                        .bind(item_type)
                        .bind(location)
                        .fetch_optional(conn)
                        .await
                })
            })
            .await?;

        Ok(unit.unwrap_or_else(|| DEFAULT_UNIT.to_string()))
    }

    #[instrument(
        skip(self, ctx, bucket, state),
        fields(
            tenant_id = %ctx.tenant_id(),
            item_type = %bucket.item_type,
            location_id = ?bucket.location_id,
            quantity = %state.quantity,
            total_cost = %state.total_cost
        ),
        err
    )]
    async fn upsert_inventory_state(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
        state: &InventoryState,
    ) -> Result<(), LedgerStoreError> {
        let tenant = *ctx.tenant_id().as_uuid();
        let item_type = bucket.item_type.clone();
        let (quantity, total_cost, unit) = (state.quantity, state.total_cost, state.unit.clone());

        match bucket.location_id {
            Some(location_id) => {
                let location = Uuid::from(location_id);
                self.executor
                    .run(ctx, "upsert_inventory_state_located", move |conn| {
                        let (item_type, unit) = (item_type.clone(), unit.clone());
                        Box::pin(async move {
                            sqlx::query(UPSERT_LOCATED_SQL)
                                .bind(tenant)
                                .bind(item_type)
                                .bind(location)
                                .bind(quantity)
                                .bind(unit)
                                .bind(total_cost)
                                .execute(conn)
                                .await
                                .map(|_| ())
                        })
                    })
                    .await?;
            }
            None => {
                self.executor
                    .run(ctx, "upsert_inventory_state_pooled", move |conn| {
                        let (item_type, unit) = (item_type.clone(), unit.clone());
                        Box::pin(async move {
                            sqlx::query(UPSERT_POOLED_SQL)
                                .bind(tenant)
                                .bind(item_type)
                                .bind(quantity)
                                .bind(unit)
                                .bind(total_cost)
                                .execute(conn)
                                .await
                                .map(|_| ())
                        })
                    })
                    .await?;
            }
        }

        Ok(())
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id()), err)]
    async fn list_buckets(&self, ctx: &TenantContext) -> Result<Vec<Bucket>, LedgerStoreError> {
        let tenant = *ctx.tenant_id().as_uuid();

        let rows = self
            .executor
            .run(ctx, "list_buckets", move |conn| {
                Box::pin(async move {
                    sqlx::query(LIST_BUCKETS_SQL).bind(tenant).fetch_all(conn).await
                })
            })
            .await?;

        rows.iter()
            .map(|row| {
                let item_type: String = row.try_get("item_type").map_err(|e| {
                    LedgerStoreError::Decode(format!("failed to read item_type: {e}"))
                })?;
                let location: Option<Uuid> = row.try_get("location_id").map_err(|e| {
                    LedgerStoreError::Decode(format!("failed to read location_id: {e}"))
                })?;
                Ok(Bucket::new(item_type, location.map(LocationId::from_uuid)))
            })
            .collect()
    }
}

// SQLx row types

#[derive(Debug)]
struct LedgerRow {
    id: i64,
    tenant_id: Uuid,
    item_type: String,
    location_id: Option<Uuid>,
    transaction_type: String,
    quantity: Decimal,
    total_cost: Decimal,
    occurred_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for LedgerRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(LedgerRow {
            id: row.try_get("id")?,
            tenant_id: row.try_get("tenant_id")?,
            item_type: row.try_get("item_type")?,
            location_id: row.try_get("location_id")?,
            transaction_type: row.try_get("transaction_type")?,
            quantity: row.try_get("quantity")?,
            total_cost: row.try_get("total_cost")?,
            occurred_at: row.try_get("occurred_at")?,
        })
    }
}

impl LedgerRow {
    fn into_entry(self, expected_tenant: TenantId) -> Result<LedgerEntry, LedgerStoreError> {
        let tenant_id = TenantId::from_uuid(self.tenant_id);
        if tenant_id != expected_tenant {
            return Err(LedgerStoreError::TenantIsolation(format!(
                "ledger row {} belongs to tenant {}, context is {}",
                self.id, tenant_id, expected_tenant
            )));
        }

        let transaction_type: TransactionType = self
            .transaction_type
            .parse()
            .map_err(|e| LedgerStoreError::Decode(format!("ledger row {}: {e}", self.id)))?;

        Ok(LedgerEntry {
            id: EntryId(self.id),
            tenant_id,
            item_type: self.item_type,
            location_id: self.location_id.map(LocationId::from_uuid),
            transaction_type,
            quantity: self.quantity,
            total_cost: self.total_cost,
            occurred_at: self.occurred_at,
        })
    }
}
