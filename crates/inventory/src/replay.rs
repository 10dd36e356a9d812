//! Weighted-average costing replay.
//!
//! Folds an ordered slice of one bucket's ledger into a quantity and a cost
//! basis. Pure and deterministic: the same ordered input always yields the
//! same output, regardless of how often or where it is replayed.
//!
//! Depleting more than the running quantity is clamped at zero rather than
//! rejected. Backdated or mis-entered depletes are expected and must not block
//! the derived view; each clamp is reported as a [`DepletionShortfall`] so the
//! caller can surface it without changing the numbers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::entry::{EntryId, LedgerEntry, TransactionType};

/// Running quantity and cost basis of a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CostPosition {
    pub quantity: Decimal,
    pub total_cost: Decimal,
}

impl CostPosition {
    pub const ZERO: CostPosition = CostPosition {
        quantity: Decimal::ZERO,
        total_cost: Decimal::ZERO,
    };

    /// `total_cost / quantity`, or zero for an empty position.
    pub fn avg_unit_cost(&self) -> Decimal {
        if self.quantity > Decimal::ZERO {
            self.total_cost / self.quantity
        } else {
            Decimal::ZERO
        }
    }

    /// Apply one entry in place.
    ///
    /// Returns the shortfall when a deplete asked for more than was on hand.
    pub fn apply(&mut self, entry: &LedgerEntry) -> Option<DepletionShortfall> {
        // Magnitudes are non-negative by contract; a malformed negative row
        // must not be able to push the position below zero.
        let amount = entry.quantity.max(Decimal::ZERO);

        match entry.transaction_type {
            TransactionType::Restock => {
                self.quantity = self.quantity.saturating_add(amount);
                self.total_cost = self
                    .total_cost
                    .saturating_add(entry.total_cost.max(Decimal::ZERO));
                None
            }
            TransactionType::Deplete => {
                let available = self.quantity;
                let cost = self.depletion_cost(amount);
                self.quantity = (self.quantity - amount).max(Decimal::ZERO);
                self.total_cost = (self.total_cost - cost).max(Decimal::ZERO);

                (amount > available).then(|| DepletionShortfall {
                    entry_id: entry.id,
                    occurred_at: entry.occurred_at,
                    requested: amount,
                    available,
                })
            }
            TransactionType::ItemDeleted | TransactionType::UnitChanged => None,
        }
    }

    /// Cost leaving the bucket when `amount` units are depleted at the current
    /// average. Evaluated product-first so that e.g. 8000 × 30 / 150 is exactly
    /// 1600 instead of carrying the rounding of 8000 / 150.
    fn depletion_cost(&self, amount: Decimal) -> Decimal {
        if self.quantity <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        if amount >= self.quantity {
            return self.total_cost;
        }
        self.total_cost
            .checked_mul(amount)
            .and_then(|product| product.checked_div(self.quantity))
            .unwrap_or_else(|| self.avg_unit_cost() * amount)
    }
}

impl Default for CostPosition {
    fn default() -> Self {
        Self::ZERO
    }
}

/// A deplete that exceeded the running quantity and was clamped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepletionShortfall {
    pub entry_id: EntryId,
    pub occurred_at: DateTime<Utc>,
    pub requested: Decimal,
    pub available: Decimal,
}

impl DepletionShortfall {
    pub fn missing(&self) -> Decimal {
        self.requested - self.available
    }
}

/// Result of replaying one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReplayOutcome {
    pub position: CostPosition,
    pub shortfalls: Vec<DepletionShortfall>,
    /// Number of restock/deplete entries folded in.
    pub applied: usize,
}

/// Replay a bucket's ledger, already ordered by `(occurred_at, id)`.
///
/// Audit-only entry types are skipped.
pub fn replay<'a, I>(entries: I) -> ReplayOutcome
where
    I: IntoIterator<Item = &'a LedgerEntry>,
{
    let mut outcome = ReplayOutcome::default();
    for entry in entries {
        if !entry.transaction_type.is_replayable() {
            continue;
        }
        if let Some(shortfall) = outcome.position.apply(entry) {
            outcome.shortfalls.push(shortfall);
        }
        outcome.applied += 1;
    }
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{sort_for_replay, Bucket};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use stockledger_core::TenantId;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn bucket() -> Bucket {
        Bucket::pooled("Fertilizer-X")
    }

    fn restock(id: i64, secs: i64, quantity: Decimal, cost: Decimal) -> LedgerEntry {
        LedgerEntry::restock(EntryId(id), TenantId::system(), &bucket(), quantity, cost, at(secs))
    }

    fn deplete(id: i64, secs: i64, quantity: Decimal) -> LedgerEntry {
        LedgerEntry::deplete(EntryId(id), TenantId::system(), &bucket(), quantity, at(secs))
    }

    #[test]
    fn empty_ledger_replays_to_zero() {
        let outcome = replay(&Vec::<LedgerEntry>::new());
        assert_eq!(outcome.position, CostPosition::ZERO);
        assert_eq!(outcome.applied, 0);
        assert!(outcome.shortfalls.is_empty());
    }

    #[test]
    fn two_restocks_and_a_deplete_use_weighted_average() {
        let entries = vec![
            restock(1, 0, dec!(100), dec!(5000)),
            restock(2, 60, dec!(50), dec!(3000)),
            deplete(3, 120, dec!(30)),
        ];

        let outcome = replay(&entries);

        assert_eq!(outcome.position.quantity, dec!(120));
        assert_eq!(outcome.position.total_cost, dec!(6400));
        assert_eq!(outcome.applied, 3);
        assert!(outcome.shortfalls.is_empty());
    }

    #[test]
    fn full_depletion_resets_cost_basis() {
        let entries = vec![restock(1, 0, dec!(100), dec!(500)), deplete(2, 1, dec!(100))];

        let outcome = replay(&entries);

        assert_eq!(outcome.position, CostPosition::ZERO);
        assert!(outcome.shortfalls.is_empty());
    }

    #[test]
    fn over_depletion_clamps_and_reports_shortfall() {
        let entries = vec![restock(1, 0, dec!(10), dec!(100)), deplete(2, 1, dec!(15))];

        let outcome = replay(&entries);

        assert_eq!(outcome.position, CostPosition::ZERO);
        assert_eq!(outcome.shortfalls.len(), 1);
        let shortfall = &outcome.shortfalls[0];
        assert_eq!(shortfall.entry_id, EntryId(2));
        assert_eq!(shortfall.requested, dec!(15));
        assert_eq!(shortfall.available, dec!(10));
        assert_eq!(shortfall.missing(), dec!(5));
    }

    #[test]
    fn deplete_before_any_restock_is_absorbed() {
        let entries = vec![deplete(1, 0, dec!(4)), restock(2, 1, dec!(10), dec!(20))];

        let outcome = replay(&entries);

        assert_eq!(outcome.position.quantity, dec!(10));
        assert_eq!(outcome.position.total_cost, dec!(20));
        assert_eq!(outcome.shortfalls.len(), 1);
        assert_eq!(outcome.shortfalls[0].available, Decimal::ZERO);
    }

    #[test]
    fn zero_quantity_deplete_leaves_cost_alone() {
        // Cost recorded without quantity keeps its basis; there is no average to deplete at.
        let entries = vec![restock(1, 0, dec!(0), dec!(50)), deplete(2, 1, dec!(3))];

        let outcome = replay(&entries);

        assert_eq!(outcome.position.quantity, Decimal::ZERO);
        assert_eq!(outcome.position.total_cost, dec!(50));
        assert_eq!(outcome.position.avg_unit_cost(), Decimal::ZERO);
    }

    #[test]
    fn audit_entries_are_skipped() {
        let mut unit_changed = restock(2, 1, dec!(999), dec!(999));
        unit_changed.transaction_type = TransactionType::UnitChanged;
        let mut item_deleted = deplete(3, 2, dec!(999));
        item_deleted.transaction_type = TransactionType::ItemDeleted;
        let entries = vec![restock(1, 0, dec!(10), dec!(40)), unit_changed, item_deleted];

        let outcome = replay(&entries);

        assert_eq!(outcome.position.quantity, dec!(10));
        assert_eq!(outcome.position.total_cost, dec!(40));
        assert_eq!(outcome.applied, 1);
    }

    #[test]
    fn equal_timestamps_replay_in_id_order() {
        // Same instant for both; only the ids decide which comes first.
        let mut restock_first = vec![deplete(2, 5, dec!(10)), restock(1, 5, dec!(10), dec!(100))];
        let mut deplete_first = vec![deplete(1, 5, dec!(10)), restock(2, 5, dec!(10), dec!(100))];
        sort_for_replay(&mut restock_first);
        sort_for_replay(&mut deplete_first);

        let a = replay(&restock_first);
        let b = replay(&deplete_first);

        assert_eq!(a.position, CostPosition::ZERO);
        assert!(a.shortfalls.is_empty());
        assert_eq!(b.position.quantity, dec!(10));
        assert_eq!(b.position.total_cost, dec!(100));
        assert_eq!(b.shortfalls.len(), 1);
    }

    #[test]
    fn backdated_restock_changes_average_at_deplete_time() {
        // A restock inserted later but dated before the deplete is replayed first.
        let mut entries = vec![
            restock(1, 0, dec!(10), dec!(100)),
            deplete(2, 100, dec!(10)),
            restock(3, 50, dec!(10), dec!(300)),
        ];
        sort_for_replay(&mut entries);

        let outcome = replay(&entries);

        assert_eq!(outcome.position.quantity, dec!(10));
        assert_eq!(outcome.position.total_cost, dec!(200));
        assert_eq!(outcome.position.avg_unit_cost(), dec!(20));
    }

    #[derive(Debug, Clone)]
    enum Move {
        Restock(Decimal, Decimal),
        Deplete(Decimal),
    }

    fn money() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000i64).prop_map(|cents| Decimal::new(cents, 2))
    }

    fn move_sequences() -> impl Strategy<Value = Vec<Move>> {
        prop::collection::vec(
            prop_oneof![
                (money(), money()).prop_map(|(q, c)| Move::Restock(q, c)),
                money().prop_map(Move::Deplete),
            ],
            0..40,
        )
    }

    fn to_entries(moves: &[Move]) -> Vec<LedgerEntry> {
        moves
            .iter()
            .enumerate()
            .map(|(i, m)| match m {
                Move::Restock(q, c) => restock(i as i64 + 1, i as i64, *q, *c),
                Move::Deplete(q) => deplete(i as i64 + 1, i as i64, *q),
            })
            .collect()
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: no sequence of moves can drive quantity or cost below zero.
        #[test]
        fn position_never_goes_negative(moves in move_sequences()) {
            let entries = to_entries(&moves);
            let mut position = CostPosition::ZERO;
            for entry in &entries {
                position.apply(entry);
                prop_assert!(position.quantity >= Decimal::ZERO);
                prop_assert!(position.total_cost >= Decimal::ZERO);
            }
            prop_assert_eq!(replay(&entries).position, position);
        }

        /// Property: with restocks only, the average is Σcost / Σquantity.
        #[test]
        fn restock_only_average_is_ratio_of_sums(
            lots in prop::collection::vec((money(), money()), 1..20)
        ) {
            let moves: Vec<Move> = lots.iter().map(|(q, c)| Move::Restock(*q, *c)).collect();
            let outcome = replay(&to_entries(&moves));

            let sum_q: Decimal = lots.iter().map(|(q, _)| *q).sum();
            let sum_c: Decimal = lots.iter().map(|(_, c)| *c).sum();
            let expected = if sum_q > Decimal::ZERO { sum_c / sum_q } else { Decimal::ZERO };

            prop_assert_eq!(outcome.position.quantity, sum_q);
            prop_assert_eq!(outcome.position.total_cost, sum_c);
            prop_assert_eq!(outcome.position.avg_unit_cost(), expected);
        }

        /// Property: depleting everything on hand leaves no residual cost.
        #[test]
        fn depleting_everything_zeroes_position(
            lots in prop::collection::vec((money(), money()), 1..20)
        ) {
            let mut moves: Vec<Move> = lots.iter().map(|(q, c)| Move::Restock(*q, *c)).collect();
            let on_hand: Decimal = lots.iter().map(|(q, _)| *q).sum();
            prop_assume!(on_hand > Decimal::ZERO);
            moves.push(Move::Deplete(on_hand));

            let outcome = replay(&to_entries(&moves));

            prop_assert_eq!(outcome.position, CostPosition::ZERO);
            prop_assert!(outcome.shortfalls.is_empty());
        }

        /// Property: replay order is fixed by (occurred_at, id), not by input order.
        #[test]
        fn sorted_replay_ignores_input_order(moves in move_sequences(), seed in any::<u64>()) {
            let mut entries = to_entries(&moves);
            let mut shuffled = entries.clone();
            // Deterministic rotation/reversal driven by the seed.
            if !shuffled.is_empty() {
                let len = shuffled.len();
                shuffled.rotate_left((seed as usize) % len);
                if seed % 2 == 0 {
                    shuffled.reverse();
                }
            }
            sort_for_replay(&mut entries);
            sort_for_replay(&mut shuffled);

            prop_assert_eq!(replay(&entries), replay(&shuffled));
        }
    }
}
