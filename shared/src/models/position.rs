//! Derived stock positions
//!
//! On-hand quantity and weighted-average cost are never stored as running
//! counters; they are folds over the immutable ledger so they can always be
//! re-derived for audit and reconciliation.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{MovementType, StockLedgerEntry};

/// Granularity at which writes are linearized and versions tracked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PositionKey {
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
}

impl PositionKey {
    pub fn new(tenant_id: Uuid, product_id: Uuid, location_id: Uuid) -> Self {
        Self {
            tenant_id,
            product_id,
            location_id,
        }
    }
}

/// Write version of a position key, captured before a guarded read and
/// compared at append time (optimistic concurrency).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionVersion {
    pub key: PositionKey,
    pub version: i64,
}

/// Which slice of a (product, location) the caller is asking about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LotScope {
    /// Every entry for the product/location, lotted or not
    Any,
    /// Only entries with no lot (the unlotted pool)
    Unlotted,
    /// Only entries for one specific lot
    Lot(Uuid),
}

impl LotScope {
    /// Scope for an entry or line: a concrete lot if one is named,
    /// otherwise the unlotted pool.
    pub fn for_lot(lot_id: Option<Uuid>) -> Self {
        match lot_id {
            Some(id) => LotScope::Lot(id),
            None => LotScope::Unlotted,
        }
    }

    pub fn matches(&self, lot_id: Option<Uuid>) -> bool {
        match self {
            LotScope::Any => true,
            LotScope::Unlotted => lot_id.is_none(),
            LotScope::Lot(id) => lot_id == Some(*id),
        }
    }
}

/// Folded state of one stock bucket
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Signed sum of all quantity deltas
    pub on_hand: Decimal,
    /// Total quantity received through costed inflows
    pub inflow_quantity: Decimal,
    /// Total value received through costed inflows
    pub inflow_value: Decimal,
}

impl Position {
    /// Fold one entry into the position.
    ///
    /// Only inflows carrying a cost (receipts, transfers in, positive
    /// adjustments) move the average-cost accumulators; issues and
    /// transfers out never do, even though issues store a derived cost.
    pub fn apply(&mut self, entry: &StockLedgerEntry) {
        self.apply_parts(entry.movement_type, entry.quantity_delta, entry.unit_cost);
    }

    /// Fold a movement that has not been persisted yet.
    pub fn apply_parts(
        &mut self,
        movement_type: MovementType,
        quantity_delta: Decimal,
        unit_cost: Option<Decimal>,
    ) {
        self.on_hand += quantity_delta;

        let costed_inflow = match movement_type {
            MovementType::Receipt | MovementType::TransferIn => true,
            MovementType::Adjustment => quantity_delta > Decimal::ZERO,
            MovementType::Issue | MovementType::TransferOut => false,
        };

        if costed_inflow {
            if let Some(cost) = unit_cost {
                self.inflow_quantity += quantity_delta;
                self.inflow_value += quantity_delta * cost;
            }
        }
    }

    /// Moving weighted-average unit cost over the receipt history.
    pub fn average_cost(&self) -> Decimal {
        if self.inflow_quantity.is_zero() {
            Decimal::ZERO
        } else {
            self.inflow_value / self.inflow_quantity
        }
    }

    pub fn valuation(&self) -> StockValuation {
        let average_unit_cost = self.average_cost();
        StockValuation {
            on_hand: self.on_hand,
            average_unit_cost,
            total_value: self.on_hand * average_unit_cost,
        }
    }
}

/// Fold a sequence of ledger entries (already filtered to one bucket or
/// aggregate) into a position.
pub fn fold_position<'a, I>(entries: I) -> Position
where
    I: IntoIterator<Item = &'a StockLedgerEntry>,
{
    let mut position = Position::default();
    for entry in entries {
        position.apply(entry);
    }
    position
}

/// Point-in-time value of a stock bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StockValuation {
    pub on_hand: Decimal,
    pub average_unit_cost: Decimal,
    pub total_value: Decimal,
}
