//! Stock ledger entry models

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::DocumentReference;

/// Kinds of stock movement recorded in the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementType {
    Receipt,
    Issue,
    TransferOut,
    TransferIn,
    Adjustment,
}

impl MovementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MovementType::Receipt => "receipt",
            MovementType::Issue => "issue",
            MovementType::TransferOut => "transfer_out",
            MovementType::TransferIn => "transfer_in",
            MovementType::Adjustment => "adjustment",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "receipt" => Some(MovementType::Receipt),
            "issue" => Some(MovementType::Issue),
            "transfer_out" => Some(MovementType::TransferOut),
            "transfer_in" => Some(MovementType::TransferIn),
            "adjustment" => Some(MovementType::Adjustment),
            _ => None,
        }
    }

    /// Whether entries of this type add stock. Adjustments may go either
    /// way and are not classified here.
    pub fn is_inflow(&self) -> bool {
        matches!(self, MovementType::Receipt | MovementType::TransferIn)
    }

    /// Whether entries of this type remove stock.
    pub fn is_outflow(&self) -> bool {
        matches!(self, MovementType::Issue | MovementType::TransferOut)
    }
}

impl std::fmt::Display for MovementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One immutable record of a quantity change for a product at a location.
///
/// Entries are append-only: once stored they are never updated or deleted,
/// and corrections are new entries with an offsetting sign cross-referenced
/// through `reference`. `sequence` is assigned by the store at append time
/// and provides the stable tie-break for entries sharing `occurred_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockLedgerEntry {
    pub id: Uuid,
    pub tenant_id: Uuid,
    /// Store-assigned monotonic insertion order
    pub sequence: i64,
    pub product_id: Uuid,
    pub location_id: Uuid,
    /// None for movements that are not lot-tracked
    pub lot_id: Option<Uuid>,
    pub movement_type: MovementType,
    /// Signed quantity in the product's base unit of measure
    pub quantity_delta: Decimal,
    /// Cost per base unit; derived from the consumed bucket for issues
    pub unit_cost: Option<Decimal>,
    pub reference: Option<DocumentReference>,
    /// Logical transaction timestamp used for ordering and reporting
    pub occurred_at: DateTime<Utc>,
    pub created_by: Uuid,
    pub created_at: DateTime<Utc>,
}

impl StockLedgerEntry {
    /// Value moved by this entry, when it carries a cost.
    pub fn extended_cost(&self) -> Option<Decimal> {
        self.unit_cost.map(|c| self.quantity_delta * c)
    }
}

/// Result of an atomic ledger append
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendedBatch {
    pub batch_id: Uuid,
    pub entries: Vec<StockLedgerEntry>,
    pub appended_at: DateTime<Utc>,
}

impl AppendedBatch {
    pub fn entry_ids(&self) -> Vec<Uuid> {
        self.entries.iter().map(|e| e.id).collect()
    }
}
