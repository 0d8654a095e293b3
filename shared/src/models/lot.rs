//! Lot identity and receipt metadata

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A traceable batch of a product received together at a location.
///
/// Lots are created once, on first receipt, and never deleted. Identity is
/// (tenant, product, location, lot_number); stock received without a lot
/// number stays in the unlotted pool and has no `Lot` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lot {
    pub id: Uuid,
    pub tenant_id: Uuid,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub lot_number: String,
    /// None for non-perishable goods
    pub expiry_date: Option<NaiveDate>,
    pub received_date: NaiveDate,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Lot {
    /// A lot is expired once its expiry date lies strictly in the past
    /// relative to `as_of`; it is still pickable on the expiry date itself.
    pub fn is_expired(&self, as_of: DateTime<Utc>) -> bool {
        match self.expiry_date {
            Some(expiry) => expiry < as_of.date_naive(),
            None => false,
        }
    }
}

/// Input for registering a lot on first receipt
#[derive(Debug, Clone, Deserialize)]
pub struct NewLot {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub lot_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub received_date: NaiveDate,
    pub notes: Option<String>,
}
