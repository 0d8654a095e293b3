//! Storage abstraction for the stock ledger core
//!
//! Stores are deliberately dumb: they persist what validated callers hand
//! them and enforce only the append-time version CAS. Business rules (signs,
//! guards, workflow) live in the services.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::models::{
    AdjustmentDocument, AdjustmentStatus, AppendedBatch, Lot, LotScope, MovementType, NewLot,
    PositionKey, PositionVersion, StockLedgerEntry,
};
use shared::types::DocumentReference;

use crate::error::CoreResult;

pub mod memory;
pub mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// One entry of a batch before the store assigns id, sequence and
/// insertion timestamp
#[derive(Debug, Clone)]
pub struct NewLedgerEntry {
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub movement_type: MovementType,
    pub quantity_delta: Decimal,
    pub unit_cost: Option<Decimal>,
    pub reference: Option<DocumentReference>,
    pub occurred_at: DateTime<Utc>,
    pub created_by: Uuid,
}

impl NewLedgerEntry {
    pub fn position_key(&self, tenant_id: Uuid) -> PositionKey {
        PositionKey::new(tenant_id, self.product_id, self.location_id)
    }
}

/// An all-or-nothing unit of ledger writes
#[derive(Debug, Clone)]
pub struct NewLedgerBatch {
    pub entries: Vec<NewLedgerEntry>,
    /// Versions captured before the caller's guard read. Appending fails
    /// with `ConcurrencyConflict` when any listed key has moved since.
    pub expected: Vec<PositionVersion>,
}

impl NewLedgerBatch {
    /// Batch without optimistic expectations (unguarded inflows).
    pub fn unguarded(entries: Vec<NewLedgerEntry>) -> Self {
        Self {
            entries,
            expected: Vec::new(),
        }
    }

    /// Distinct position keys the batch touches, in first-seen order.
    pub fn touched_keys(&self, tenant_id: Uuid) -> Vec<PositionKey> {
        let mut keys: Vec<PositionKey> = Vec::new();
        for entry in &self.entries {
            let key = entry.position_key(tenant_id);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
        keys
    }
}

/// Filter for reading ledger entries; `None` fields match everything
#[derive(Debug, Clone, Default)]
pub struct EntryFilter {
    pub product_id: Option<Uuid>,
    pub location_id: Option<Uuid>,
    pub lot: Option<LotScope>,
    /// Only entries with `occurred_at <= as_of`
    pub as_of: Option<DateTime<Utc>>,
    pub reference: Option<DocumentReference>,
}

impl EntryFilter {
    /// Filter for one (product, location) position.
    pub fn position(product_id: Uuid, location_id: Uuid) -> Self {
        Self {
            product_id: Some(product_id),
            location_id: Some(location_id),
            ..Default::default()
        }
    }

    /// Filter for the entries posted under one document reference.
    pub fn reference(reference: DocumentReference) -> Self {
        Self {
            reference: Some(reference),
            ..Default::default()
        }
    }

    pub fn matches(&self, entry: &StockLedgerEntry) -> bool {
        if let Some(product_id) = self.product_id {
            if entry.product_id != product_id {
                return false;
            }
        }
        if let Some(location_id) = self.location_id {
            if entry.location_id != location_id {
                return false;
            }
        }
        if let Some(scope) = &self.lot {
            if !scope.matches(entry.lot_id) {
                return false;
            }
        }
        if let Some(as_of) = self.as_of {
            if entry.occurred_at > as_of {
                return false;
            }
        }
        if let Some(reference) = &self.reference {
            if entry.reference.as_ref() != Some(reference) {
                return false;
            }
        }
        true
    }
}

/// Append-only journal of stock movements
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Append a batch atomically. Every entry lands with a store-assigned
    /// id and a per-tenant strictly increasing sequence, or nothing lands.
    /// Versions of all touched keys are bumped in the same unit of work.
    async fn append(&self, tenant_id: Uuid, batch: NewLedgerBatch) -> CoreResult<AppendedBatch>;

    /// Entries matching the filter, ordered by `occurred_at` then `sequence`.
    async fn entries(
        &self,
        tenant_id: Uuid,
        filter: &EntryFilter,
    ) -> CoreResult<Vec<StockLedgerEntry>>;

    /// Current write versions for the given keys. Keys never written
    /// report version 0.
    async fn versions(&self, keys: &[PositionKey]) -> CoreResult<Vec<PositionVersion>>;
}

/// Lot identity registry
#[async_trait]
pub trait LotStore: Send + Sync {
    /// Get or create the lot identified by (tenant, product, location,
    /// lot_number). Concurrent callers converge on one row; attributes of
    /// an existing lot are never overwritten.
    async fn get_or_create(&self, tenant_id: Uuid, new_lot: NewLot) -> CoreResult<Lot>;

    async fn find(&self, tenant_id: Uuid, lot_id: Uuid) -> CoreResult<Option<Lot>>;

    /// All lots for a (product, location), ordered by received date then
    /// lot number.
    async fn list(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
    ) -> CoreResult<Vec<Lot>>;
}

/// Adjustment and requisition document persistence
#[async_trait]
pub trait AdjustmentStore: Send + Sync {
    async fn insert(&self, document: &AdjustmentDocument) -> CoreResult<()>;

    async fn fetch(&self, tenant_id: Uuid, document_id: Uuid)
        -> CoreResult<AdjustmentDocument>;

    /// Persist the document if its stored status still equals
    /// `expected_status`. Returns false when another writer got there
    /// first; the stored row is then untouched.
    async fn update(
        &self,
        document: &AdjustmentDocument,
        expected_status: AdjustmentStatus,
    ) -> CoreResult<bool>;

    async fn list(
        &self,
        tenant_id: Uuid,
        location_id: Option<Uuid>,
        status: Option<AdjustmentStatus>,
    ) -> CoreResult<Vec<AdjustmentDocument>>;
}

/// Everything a full backend provides
pub trait Store: LedgerStore + LotStore + AdjustmentStore {}

impl<T: LedgerStore + LotStore + AdjustmentStore> Store for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(product_id: Uuid, location_id: Uuid, lot_id: Option<Uuid>) -> StockLedgerEntry {
        StockLedgerEntry {
            id: Uuid::new_v4(),
            tenant_id: Uuid::new_v4(),
            sequence: 1,
            product_id,
            location_id,
            lot_id,
            movement_type: MovementType::Receipt,
            quantity_delta: Decimal::from(5),
            unit_cost: Some(Decimal::from(10)),
            reference: None,
            occurred_at: Utc::now(),
            created_by: Uuid::new_v4(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn filter_matches_by_scope() {
        let product = Uuid::new_v4();
        let location = Uuid::new_v4();
        let lot = Uuid::new_v4();

        let lotted = entry(product, location, Some(lot));
        let unlotted = entry(product, location, None);

        let mut filter = EntryFilter::position(product, location);
        assert!(filter.matches(&lotted));
        assert!(filter.matches(&unlotted));

        filter.lot = Some(LotScope::Lot(lot));
        assert!(filter.matches(&lotted));
        assert!(!filter.matches(&unlotted));

        filter.lot = Some(LotScope::Unlotted);
        assert!(!filter.matches(&lotted));
        assert!(filter.matches(&unlotted));
    }

    #[test]
    fn filter_bounds_by_occurred_at() {
        let e = entry(Uuid::new_v4(), Uuid::new_v4(), None);
        let mut filter = EntryFilter::default();

        filter.as_of = Some(e.occurred_at);
        assert!(filter.matches(&e));

        filter.as_of = Some(e.occurred_at - chrono::Duration::seconds(1));
        assert!(!filter.matches(&e));
    }

    #[test]
    fn touched_keys_deduplicates() {
        let tenant = Uuid::new_v4();
        let product = Uuid::new_v4();
        let location = Uuid::new_v4();
        let make = |loc| NewLedgerEntry {
            product_id: product,
            location_id: loc,
            lot_id: None,
            movement_type: MovementType::Receipt,
            quantity_delta: Decimal::ONE,
            unit_cost: Some(Decimal::ONE),
            reference: None,
            occurred_at: Utc::now(),
            created_by: Uuid::new_v4(),
        };

        let other_location = Uuid::new_v4();
        let batch =
            NewLedgerBatch::unguarded(vec![make(location), make(location), make(other_location)]);

        let keys = batch.touched_keys(tenant);
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0], PositionKey::new(tenant, product, location));
        assert_eq!(keys[1], PositionKey::new(tenant, product, other_location));
    }
}
