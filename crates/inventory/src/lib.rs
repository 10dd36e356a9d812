//! Inventory ledger domain.
//!
//! This crate contains the ledger data model and the weighted-average costing
//! replay, implemented purely as deterministic logic (no IO, no storage).

pub mod entry;
pub mod replay;
pub mod state;

pub use entry::{sort_for_replay, Bucket, EntryId, LedgerEntry, TransactionType};
pub use replay::{replay, CostPosition, DepletionShortfall, ReplayOutcome};
pub use state::{round_to_state_scale, InventoryState, DEFAULT_UNIT, STATE_SCALE};
