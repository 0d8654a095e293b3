//! Adjustment and requisition documents
//!
//! Stock corrections go through a draft/approve/post workflow instead of
//! editing ledger history. Posting writes new ledger entries; the document
//! itself is the approval trail.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::MovementType;
use crate::types::DocumentReference;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentStatus {
    Draft,
    Approved,
    Posted,
}

impl AdjustmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdjustmentStatus::Draft => "draft",
            AdjustmentStatus::Approved => "approved",
            AdjustmentStatus::Posted => "posted",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(AdjustmentStatus::Draft),
            "approved" => Some(AdjustmentStatus::Approved),
            "posted" => Some(AdjustmentStatus::Posted),
            _ => None,
        }
    }

    /// Posted documents never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AdjustmentStatus::Posted)
    }
}

impl std::fmt::Display for AdjustmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the document does to stock when posted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentKind {
    /// Signed corrections, posted as adjustment movements
    Adjustment,
    /// Internal consumption, strictly negative lines, posted as issues
    Requisition,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DocumentKind::Adjustment => "adjustment",
            DocumentKind::Requisition => "requisition",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "adjustment" => Some(DocumentKind::Adjustment),
            "requisition" => Some(DocumentKind::Requisition),
            _ => None,
        }
    }

    pub fn movement_type(&self) -> MovementType {
        match self {
            DocumentKind::Adjustment => MovementType::Adjustment,
            DocumentKind::Requisition => MovementType::Issue,
        }
    }
}

impl std::fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One product movement within a document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentLine {
    pub line_no: i32,
    pub product_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub quantity_delta: Decimal,
    /// Required on positive adjustment lines so the inflow joins the
    /// average cost; ignored on outflows, whose cost is derived at posting.
    pub unit_cost: Option<Decimal>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentDocument {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub location_id: Uuid,
    pub kind: DocumentKind,
    pub status: AdjustmentStatus,
    pub lines: Vec<AdjustmentLine>,
    pub reason_code: Option<String>,
    pub created_by: Uuid,
    pub approved_by: Option<Uuid>,
    pub approved_at: Option<DateTime<Utc>>,
    pub posted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl AdjustmentDocument {
    pub fn is_editable(&self) -> bool {
        self.status == AdjustmentStatus::Draft
    }

    /// Reference stamped on every ledger entry this document posts,
    /// and used to detect an already-posted document on retry.
    pub fn reference(&self) -> DocumentReference {
        DocumentReference::new(self.kind.as_str(), self.id)
    }
}
