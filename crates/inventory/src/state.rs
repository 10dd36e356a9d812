//! Derived inventory state for one bucket.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::ser::SerializeStruct;
use serde::{Deserialize, Serialize, Serializer};

use crate::replay::CostPosition;

/// Unit used when a bucket has no state row to carry a unit over from.
pub const DEFAULT_UNIT: &str = "kg";

/// Decimal places of the persisted state columns (`NUMERIC(20, 6)`).
pub const STATE_SCALE: u32 = 6;

/// Round to [`STATE_SCALE`] the way Postgres rounds `NUMERIC`: half away from zero.
pub fn round_to_state_scale(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(STATE_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Materialized state of one bucket.
///
/// Always rebuilt from the ledger, never patched incrementally. Amounts are
/// held at [`STATE_SCALE`], so the value returned by a recalculation is the
/// value the state table stores. The average unit cost is not a field: it is
/// derived from `total_cost / quantity` each time it is read, so it cannot
/// drift from the two values it depends on. It is still serialized, as a
/// read-only view.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct InventoryState {
    pub quantity: Decimal,
    pub unit: String,
    pub total_cost: Decimal,
}

impl InventoryState {
    pub fn from_position(position: CostPosition, unit: impl Into<String>) -> Self {
        Self {
            quantity: round_to_state_scale(position.quantity),
            unit: unit.into(),
            total_cost: round_to_state_scale(position.total_cost),
        }
    }

    /// Zeroed state for a bucket without any ledger history.
    pub fn empty(unit: impl Into<String>) -> Self {
        Self::from_position(CostPosition::ZERO, unit)
    }

    pub fn position(&self) -> CostPosition {
        CostPosition {
            quantity: self.quantity,
            total_cost: self.total_cost,
        }
    }

    /// `total_cost / quantity` at [`STATE_SCALE`], matching the generated
    /// `avg_unit_cost` column.
    pub fn avg_unit_cost(&self) -> Decimal {
        round_to_state_scale(self.position().avg_unit_cost())
    }

    pub fn is_empty(&self) -> bool {
        self.quantity.is_zero() && self.total_cost.is_zero()
    }
}

impl Serialize for InventoryState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("InventoryState", 4)?;
        state.serialize_field("quantity", &self.quantity)?;
        state.serialize_field("unit", &self.unit)?;
        state.serialize_field("avg_unit_cost", &self.avg_unit_cost())?;
        state.serialize_field("total_cost", &self.total_cost)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn avg_unit_cost_is_derived_from_totals() {
        let state = InventoryState {
            quantity: dec!(120),
            unit: "kg".to_string(),
            total_cost: dec!(6400),
        };
        assert_eq!(state.avg_unit_cost(), dec!(53.333333));
    }

    #[test]
    fn empty_state_has_zero_average() {
        let state = InventoryState::empty(DEFAULT_UNIT);
        assert!(state.is_empty());
        assert_eq!(state.avg_unit_cost(), Decimal::ZERO);
        assert_eq!(state.unit, "kg");
    }

    #[test]
    fn non_terminating_cost_is_held_at_column_scale() {
        // 7 units for 22, then 3 depleted: 22 - 22 * 3 / 7 does not terminate.
        let position = CostPosition {
            quantity: dec!(4),
            total_cost: dec!(22) - dec!(22) * dec!(3) / dec!(7),
        };

        let state = InventoryState::from_position(position, "kg");

        assert_eq!(state.total_cost, dec!(12.571429));
        assert_eq!(state.avg_unit_cost(), dec!(3.142857));
    }

    #[test]
    fn rounding_matches_numeric_half_away_from_zero() {
        assert_eq!(round_to_state_scale(dec!(0.0000005)), dec!(0.000001));
        assert_eq!(round_to_state_scale(dec!(2.0000025)), dec!(2.000003));
        assert_eq!(round_to_state_scale(dec!(2.0000024)), dec!(2.000002));
    }

    #[test]
    fn serialized_state_includes_derived_average() {
        let state = InventoryState {
            quantity: dec!(200),
            unit: "litre".to_string(),
            total_cost: dec!(18000),
        };

        let json = serde_json::to_value(&state).unwrap();
        let avg: Decimal = json["avg_unit_cost"].as_str().unwrap().parse().unwrap();
        assert_eq!(avg, dec!(90));

        let back: InventoryState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
