//! Ledger entries and the buckets they belong to.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use stockledger_core::{DomainError, LocationId, TenantId};

/// Ledger row identifier.
///
/// Assigned in insertion order by the ledger table; used as the tie-break when
/// two entries share the same `occurred_at`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub i64);

impl core::fmt::Display for EntryId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of ledger movement.
///
/// Only `Restock` and `Deplete` take part in costing. The remaining kinds are
/// written by the CRUD layer for audit purposes and are skipped by replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Restock,
    Deplete,
    ItemDeleted,
    UnitChanged,
}

impl TransactionType {
    pub const REPLAYABLE: [TransactionType; 2] =
        [TransactionType::Restock, TransactionType::Deplete];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Restock => "restock",
            TransactionType::Deplete => "deplete",
            TransactionType::ItemDeleted => "item_deleted",
            TransactionType::UnitChanged => "unit_changed",
        }
    }

    pub fn is_replayable(&self) -> bool {
        matches!(self, TransactionType::Restock | TransactionType::Deplete)
    }
}

impl FromStr for TransactionType {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "restock" => Ok(TransactionType::Restock),
            "deplete" => Ok(TransactionType::Deplete),
            "item_deleted" => Ok(TransactionType::ItemDeleted),
            "unit_changed" => Ok(TransactionType::UnitChanged),
            other => Err(DomainError::validation(format!(
                "unknown transaction type: {other}"
            ))),
        }
    }
}

/// Scope over which replay and derived state are computed, within one tenant.
///
/// `location_id == None` is the pooled bucket (stock not tied to a location).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Bucket {
    pub item_type: String,
    pub location_id: Option<LocationId>,
}

impl Bucket {
    pub fn new(item_type: impl Into<String>, location_id: Option<LocationId>) -> Self {
        Self {
            item_type: item_type.into(),
            location_id,
        }
    }

    pub fn pooled(item_type: impl Into<String>) -> Self {
        Self::new(item_type, None)
    }

    pub fn at(item_type: impl Into<String>, location_id: LocationId) -> Self {
        Self::new(item_type, Some(location_id))
    }

    pub fn is_pooled(&self) -> bool {
        self.location_id.is_none()
    }
}

impl core::fmt::Display for Bucket {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.location_id {
            Some(location_id) => write!(f, "{}@{}", self.item_type, location_id),
            None => write!(f, "{}@pooled", self.item_type),
        }
    }
}

/// One movement in the append-only ledger.
///
/// `quantity` and `total_cost` are unsigned magnitudes; the direction comes
/// from `transaction_type`. `total_cost` is only meaningful for restocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub tenant_id: TenantId,
    pub item_type: String,
    pub location_id: Option<LocationId>,
    pub transaction_type: TransactionType,
    pub quantity: Decimal,
    pub total_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn restock(
        id: EntryId,
        tenant_id: TenantId,
        bucket: &Bucket,
        quantity: Decimal,
        total_cost: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            item_type: bucket.item_type.clone(),
            location_id: bucket.location_id,
            transaction_type: TransactionType::Restock,
            quantity,
            total_cost,
            occurred_at,
        }
    }

    pub fn deplete(
        id: EntryId,
        tenant_id: TenantId,
        bucket: &Bucket,
        quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            item_type: bucket.item_type.clone(),
            location_id: bucket.location_id,
            transaction_type: TransactionType::Deplete,
            quantity,
            total_cost: Decimal::ZERO,
            occurred_at,
        }
    }

    pub fn bucket(&self) -> Bucket {
        Bucket::new(self.item_type.clone(), self.location_id)
    }

    pub fn belongs_to(&self, bucket: &Bucket) -> bool {
        self.item_type == bucket.item_type && self.location_id == bucket.location_id
    }

    /// Total replay order: `occurred_at` first, then insertion order.
    pub fn replay_key(&self) -> (DateTime<Utc>, EntryId) {
        (self.occurred_at, self.id)
    }
}

/// Sort entries into replay order, `(occurred_at ASC, id ASC)`.
///
/// Timestamps collide in practice (same day, same second, backdated to the same
/// instant), so the id tie-break is what makes replay deterministic.
pub fn sort_for_replay(entries: &mut [LedgerEntry]) {
    entries.sort_by_key(LedgerEntry::replay_key);
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn transaction_type_round_trips_through_str() {
        for ty in [
            TransactionType::Restock,
            TransactionType::Deplete,
            TransactionType::ItemDeleted,
            TransactionType::UnitChanged,
        ] {
            assert_eq!(ty.as_str().parse::<TransactionType>().unwrap(), ty);
        }
        assert!("transfer".parse::<TransactionType>().is_err());
    }

    #[test]
    fn only_restock_and_deplete_are_replayable() {
        assert!(TransactionType::Restock.is_replayable());
        assert!(TransactionType::Deplete.is_replayable());
        assert!(!TransactionType::ItemDeleted.is_replayable());
        assert!(!TransactionType::UnitChanged.is_replayable());
    }

    #[test]
    fn serde_names_match_ledger_column_values() {
        let json = serde_json::to_string(&TransactionType::ItemDeleted).unwrap();
        assert_eq!(json, "\"item_deleted\"");
    }

    #[test]
    fn sort_uses_id_to_break_timestamp_ties() {
        let tenant_id = TenantId::new();
        let bucket = Bucket::pooled("Fertilizer-X");
        let mut entries = vec![
            LedgerEntry::deplete(EntryId(7), tenant_id, &bucket, dec!(1), at(10)),
            LedgerEntry::restock(EntryId(3), tenant_id, &bucket, dec!(5), dec!(50), at(10)),
            LedgerEntry::restock(EntryId(9), tenant_id, &bucket, dec!(5), dec!(50), at(0)),
        ];

        sort_for_replay(&mut entries);

        let ids: Vec<i64> = entries.iter().map(|e| e.id.0).collect();
        assert_eq!(ids, vec![9, 3, 7]);
    }

    #[test]
    fn bucket_membership_distinguishes_pooled_from_located() {
        let tenant_id = TenantId::new();
        let location = LocationId::new();
        let pooled = Bucket::pooled("Urea");
        let located = Bucket::at("Urea", location);
        let entry = LedgerEntry::restock(EntryId(1), tenant_id, &located, dec!(1), dec!(1), at(0));

        assert!(entry.belongs_to(&located));
        assert!(!entry.belongs_to(&pooled));
        assert_eq!(entry.bucket(), located);
        assert!(pooled.is_pooled());
        assert_eq!(pooled.to_string(), "Urea@pooled");
    }
}
