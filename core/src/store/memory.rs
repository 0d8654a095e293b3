//! In-memory backend for embedded and test use
//!
//! A single RwLock guards all state so the version CAS and the append are
//! one atomic step, matching the transactional behavior of the PostgreSQL
//! backend.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use shared::models::{
    AdjustmentDocument, AdjustmentStatus, AppendedBatch, Lot, NewLot, PositionKey,
    PositionVersion, StockLedgerEntry,
};

use crate::error::{CoreError, CoreResult};
use crate::store::{AdjustmentStore, EntryFilter, LedgerStore, LotStore, NewLedgerBatch};

#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    /// Entries per tenant, in append order
    entries: HashMap<Uuid, Vec<StockLedgerEntry>>,
    /// Last assigned sequence per tenant
    sequences: HashMap<Uuid, i64>,
    /// Write versions per position key; absent means 0
    versions: HashMap<PositionKey, i64>,
    lots: HashMap<Uuid, Vec<Lot>>,
    documents: HashMap<Uuid, Vec<AdjustmentDocument>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryStore {
    async fn append(&self, tenant_id: Uuid, batch: NewLedgerBatch) -> CoreResult<AppendedBatch> {
        let mut inner = self.inner.write().await;

        for expected in &batch.expected {
            let current = inner.versions.get(&expected.key).copied().unwrap_or(0);
            if current != expected.version {
                return Err(CoreError::ConcurrencyConflict { attempts: 1 });
            }
        }

        for key in batch.touched_keys(tenant_id) {
            *inner.versions.entry(key).or_insert(0) += 1;
        }

        let batch_id = Uuid::new_v4();
        let appended_at = Utc::now();
        let mut appended = Vec::with_capacity(batch.entries.len());
        for new_entry in batch.entries {
            let sequence = inner.sequences.entry(tenant_id).or_insert(0);
            *sequence += 1;
            let entry = StockLedgerEntry {
                id: Uuid::new_v4(),
                tenant_id,
                sequence: *sequence,
                product_id: new_entry.product_id,
                location_id: new_entry.location_id,
                lot_id: new_entry.lot_id,
                movement_type: new_entry.movement_type,
                quantity_delta: new_entry.quantity_delta,
                unit_cost: new_entry.unit_cost,
                reference: new_entry.reference,
                occurred_at: new_entry.occurred_at,
                created_by: new_entry.created_by,
                created_at: appended_at,
            };
            inner.entries.entry(tenant_id).or_default().push(entry.clone());
            appended.push(entry);
        }

        Ok(AppendedBatch {
            batch_id,
            entries: appended,
            appended_at,
        })
    }

    async fn entries(
        &self,
        tenant_id: Uuid,
        filter: &EntryFilter,
    ) -> CoreResult<Vec<StockLedgerEntry>> {
        let inner = self.inner.read().await;
        let mut matched: Vec<StockLedgerEntry> = inner
            .entries
            .get(&tenant_id)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|e| filter.matches(e))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        matched.sort_by(|a, b| {
            a.occurred_at
                .cmp(&b.occurred_at)
                .then(a.sequence.cmp(&b.sequence))
        });
        Ok(matched)
    }

    async fn versions(&self, keys: &[PositionKey]) -> CoreResult<Vec<PositionVersion>> {
        let inner = self.inner.read().await;
        Ok(keys
            .iter()
            .map(|key| PositionVersion {
                key: *key,
                version: inner.versions.get(key).copied().unwrap_or(0),
            })
            .collect())
    }
}

#[async_trait]
impl LotStore for MemoryStore {
    async fn get_or_create(&self, tenant_id: Uuid, new_lot: NewLot) -> CoreResult<Lot> {
        let mut inner = self.inner.write().await;
        let lots = inner.lots.entry(tenant_id).or_default();

        if let Some(existing) = lots.iter().find(|lot| {
            lot.product_id == new_lot.product_id
                && lot.location_id == new_lot.location_id
                && lot.lot_number == new_lot.lot_number
        }) {
            return Ok(existing.clone());
        }

        let lot = Lot {
            id: Uuid::new_v4(),
            tenant_id,
            product_id: new_lot.product_id,
            location_id: new_lot.location_id,
            lot_number: new_lot.lot_number,
            expiry_date: new_lot.expiry_date,
            received_date: new_lot.received_date,
            notes: new_lot.notes,
            created_at: Utc::now(),
        };
        lots.push(lot.clone());
        Ok(lot)
    }

    async fn find(&self, tenant_id: Uuid, lot_id: Uuid) -> CoreResult<Option<Lot>> {
        let inner = self.inner.read().await;
        Ok(inner
            .lots
            .get(&tenant_id)
            .and_then(|lots| lots.iter().find(|lot| lot.id == lot_id))
            .cloned())
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
    ) -> CoreResult<Vec<Lot>> {
        let inner = self.inner.read().await;
        let mut lots: Vec<Lot> = inner
            .lots
            .get(&tenant_id)
            .map(|lots| {
                lots.iter()
                    .filter(|lot| lot.product_id == product_id && lot.location_id == location_id)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        lots.sort_by(|a, b| {
            a.received_date
                .cmp(&b.received_date)
                .then_with(|| a.lot_number.cmp(&b.lot_number))
        });
        Ok(lots)
    }
}

#[async_trait]
impl AdjustmentStore for MemoryStore {
    async fn insert(&self, document: &AdjustmentDocument) -> CoreResult<()> {
        let mut inner = self.inner.write().await;
        inner
            .documents
            .entry(document.tenant_id)
            .or_default()
            .push(document.clone());
        Ok(())
    }

    async fn fetch(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> CoreResult<AdjustmentDocument> {
        let inner = self.inner.read().await;
        inner
            .documents
            .get(&tenant_id)
            .and_then(|docs| docs.iter().find(|doc| doc.id == document_id))
            .cloned()
            .ok_or_else(|| CoreError::NotFound("Adjustment document".to_string()))
    }

    async fn update(
        &self,
        document: &AdjustmentDocument,
        expected_status: AdjustmentStatus,
    ) -> CoreResult<bool> {
        let mut inner = self.inner.write().await;
        let docs = inner
            .documents
            .get_mut(&document.tenant_id)
            .ok_or_else(|| CoreError::NotFound("Adjustment document".to_string()))?;
        let stored = docs
            .iter_mut()
            .find(|doc| doc.id == document.id)
            .ok_or_else(|| CoreError::NotFound("Adjustment document".to_string()))?;

        if stored.status != expected_status {
            return Ok(false);
        }
        *stored = document.clone();
        Ok(true)
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        location_id: Option<Uuid>,
        status: Option<AdjustmentStatus>,
    ) -> CoreResult<Vec<AdjustmentDocument>> {
        let inner = self.inner.read().await;
        let mut docs: Vec<AdjustmentDocument> = inner
            .documents
            .get(&tenant_id)
            .map(|docs| {
                docs.iter()
                    .filter(|doc| location_id.map_or(true, |loc| doc.location_id == loc))
                    .filter(|doc| status.map_or(true, |s| doc.status == s))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        docs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(docs)
    }
}
