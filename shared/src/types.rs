//! Common types used across the platform

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Link from a ledger entry or posting batch to its originating document.
///
/// The reference is opaque to the core: `reference_type` is a short label
/// owned by the caller (e.g. "purchase_receipt", "sales_order",
/// "adjustment") and `reference_id` the document id in that system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentReference {
    pub reference_type: String,
    pub reference_id: Uuid,
}

impl DocumentReference {
    pub fn new(reference_type: impl Into<String>, reference_id: Uuid) -> Self {
        Self {
            reference_type: reference_type.into(),
            reference_id,
        }
    }
}
