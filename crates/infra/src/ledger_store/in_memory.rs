use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use stockledger_core::{LocationId, TenantContext, TenantId};
use stockledger_inventory::{
    sort_for_replay, Bucket, EntryId, InventoryState, LedgerEntry, DEFAULT_UNIT,
};

use super::{LedgerStore, LedgerStoreError};

type LedgerTable = HashMap<TenantId, BTreeMap<EntryId, LedgerEntry>>;
type StateTable = HashMap<StateKey, InventoryState>;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct StateKey {
    tenant_id: TenantId,
    bucket: Bucket,
}

/// In-memory ledger and state tables.
///
/// Intended for tests/dev. Partitioned by tenant the same way the row-level
/// security policies partition the Postgres tables. The `record`, `amend`,
/// `remove` and `set_unit` helpers stand in for the CRUD layer that owns
/// ledger writes in production.
#[derive(Debug)]
pub struct InMemoryLedgerStore {
    ledger: RwLock<LedgerTable>,
    states: RwLock<StateTable>,
    next_id: AtomicI64,
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self {
            ledger: RwLock::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Next id in insertion order, like the ledger table's identity column.
    pub fn next_entry_id(&self) -> EntryId {
        EntryId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a ledger entry on behalf of `ctx`.
    pub fn record(&self, ctx: &TenantContext, entry: LedgerEntry) -> Result<(), LedgerStoreError> {
        ensure_same_tenant(ctx, &entry)?;

        let mut ledger = self.ledger_write()?;
        let entries = ledger.entry(entry.tenant_id).or_default();
        if entries.contains_key(&entry.id) {
            return Err(LedgerStoreError::Unavailable(format!(
                "ledger entry {} already exists",
                entry.id
            )));
        }
        entries.insert(entry.id, entry);
        Ok(())
    }

    /// Replace an existing entry, returning the previous version.
    pub fn amend(
        &self,
        ctx: &TenantContext,
        entry: LedgerEntry,
    ) -> Result<LedgerEntry, LedgerStoreError> {
        ensure_same_tenant(ctx, &entry)?;

        let mut ledger = self.ledger_write()?;
        let slot = ledger
            .get_mut(&entry.tenant_id)
            .and_then(|entries| entries.get_mut(&entry.id))
            .ok_or_else(|| {
                LedgerStoreError::Unavailable(format!("ledger entry {} not found", entry.id))
            })?;

        Ok(std::mem::replace(slot, entry))
    }

    /// Delete an entry of the context's tenant, returning it if it existed.
    pub fn remove(
        &self,
        ctx: &TenantContext,
        id: EntryId,
    ) -> Result<Option<LedgerEntry>, LedgerStoreError> {
        let mut ledger = self.ledger_write()?;
        Ok(ledger
            .get_mut(&ctx.tenant_id())
            .and_then(|entries| entries.remove(&id)))
    }

    /// Change the unit of a bucket, creating an empty state row if needed.
    pub fn set_unit(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
        unit: impl Into<String>,
    ) -> Result<(), LedgerStoreError> {
        let unit = unit.into();
        let mut states = self.states_write()?;
        states
            .entry(state_key(ctx, bucket))
            .and_modify(|state| state.unit = unit.clone())
            .or_insert_with(|| InventoryState::empty(unit.clone()));
        Ok(())
    }

    /// Current state row of a bucket, if any.
    pub fn state(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<Option<InventoryState>, LedgerStoreError> {
        let states = self.states_read()?;
        Ok(states.get(&state_key(ctx, bucket)).cloned())
    }

    fn ledger_read(&self) -> Result<RwLockReadGuard<'_, LedgerTable>, LedgerStoreError> {
        self.ledger
            .read()
            .map_err(|_| LedgerStoreError::Unavailable("lock poisoned".to_string()))
    }

    fn ledger_write(&self) -> Result<RwLockWriteGuard<'_, LedgerTable>, LedgerStoreError> {
        self.ledger
            .write()
            .map_err(|_| LedgerStoreError::Unavailable("lock poisoned".to_string()))
    }

    fn states_read(&self) -> Result<RwLockReadGuard<'_, StateTable>, LedgerStoreError> {
        self.states
            .read()
            .map_err(|_| LedgerStoreError::Unavailable("lock poisoned".to_string()))
    }

    fn states_write(&self) -> Result<RwLockWriteGuard<'_, StateTable>, LedgerStoreError> {
        self.states
            .write()
            .map_err(|_| LedgerStoreError::Unavailable("lock poisoned".to_string()))
    }
}

fn state_key(ctx: &TenantContext, bucket: &Bucket) -> StateKey {
    StateKey {
        tenant_id: ctx.tenant_id(),
        bucket: bucket.clone(),
    }
}

fn ensure_same_tenant(ctx: &TenantContext, entry: &LedgerEntry) -> Result<(), LedgerStoreError> {
    if entry.tenant_id != ctx.tenant_id() {
        return Err(LedgerStoreError::TenantIsolation(format!(
            "entry {} belongs to tenant {}, context is {}",
            entry.id,
            entry.tenant_id,
            ctx.tenant_id()
        )));
    }
    Ok(())
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn fetch_ledger_entries(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<Vec<LedgerEntry>, LedgerStoreError> {
        let ledger = self.ledger_read()?;
        let mut entries: Vec<LedgerEntry> = ledger
            .get(&ctx.tenant_id())
            .into_iter()
            .flat_map(|entries| entries.values())
            .filter(|e| e.belongs_to(bucket) && e.transaction_type.is_replayable())
            .cloned()
            .collect();

        sort_for_replay(&mut entries);
        Ok(entries)
    }

    async fn fetch_distinct_locations(
        &self,
        ctx: &TenantContext,
        item_type: &str,
    ) -> Result<Vec<Option<LocationId>>, LedgerStoreError> {
        let ledger = self.ledger_read()?;
        let locations: BTreeSet<Option<LocationId>> = ledger
            .get(&ctx.tenant_id())
            .into_iter()
            .flat_map(|entries| entries.values())
            .filter(|e| e.item_type == item_type)
            .map(|e| e.location_id)
            .collect();

        Ok(locations.into_iter().collect())
    }

    async fn fetch_current_unit(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
    ) -> Result<String, LedgerStoreError> {
        Ok(self
            .state(ctx, bucket)?
            .map(|state| state.unit)
            .unwrap_or_else(|| DEFAULT_UNIT.to_string()))
    }

    async fn upsert_inventory_state(
        &self,
        ctx: &TenantContext,
        bucket: &Bucket,
        state: &InventoryState,
    ) -> Result<(), LedgerStoreError> {
        let mut states = self.states_write()?;
        states.insert(state_key(ctx, bucket), state.clone());
        Ok(())
    }

    async fn list_buckets(&self, ctx: &TenantContext) -> Result<Vec<Bucket>, LedgerStoreError> {
        let tenant_id = ctx.tenant_id();
        let mut buckets: BTreeSet<Bucket> = self
            .ledger_read()?
            .get(&tenant_id)
            .into_iter()
            .flat_map(|entries| entries.values())
            .map(LedgerEntry::bucket)
            .collect();

        buckets.extend(
            self.states_read()?
                .keys()
                .filter(|key| key.tenant_id == tenant_id)
                .map(|key| key.bucket.clone()),
        );

        Ok(buckets.into_iter().collect())
    }
}
