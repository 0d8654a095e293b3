//! Lot allocation planning types
//!
//! A plan is advice, not a reservation: it names which lots a picker should
//! draw from and never mutates the ledger.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A lot with stock available for picking
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LotCandidate {
    pub lot_id: Uuid,
    pub lot_number: String,
    pub on_hand: Decimal,
    pub unit_cost: Decimal,
    pub expiry_date: Option<NaiveDate>,
    pub received_date: NaiveDate,
}

/// One pick line of an allocation plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationLine {
    pub lot_id: Uuid,
    pub lot_number: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub expiry_date: Option<NaiveDate>,
}

/// Result of planning a pick across the available lots
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationPlan {
    pub requested: Decimal,
    pub lines: Vec<AllocationLine>,
    pub fully_allocated: bool,
    pub shortfall: Decimal,
}

impl AllocationPlan {
    pub fn allocated_total(&self) -> Decimal {
        self.lines.iter().map(|line| line.quantity).sum()
    }
}

/// Knobs for allocation planning
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocationOptions {
    /// Skip lots whose expiry date has passed
    pub exclude_expired: bool,
    /// Reference instant for expiry checks; now when unset
    pub as_of: Option<DateTime<Utc>>,
}

impl Default for AllocationOptions {
    fn default() -> Self {
        Self {
            exclude_expired: true,
            as_of: None,
        }
    }
}
