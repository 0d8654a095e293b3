//! Lot registry service
//!
//! Lots are identified by (product, location, lot_number) within a tenant
//! and created idempotently on first receipt. Nothing here mutates stock;
//! quantities live in the ledger and are folded on demand.

use std::collections::HashMap;
use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use shared::models::{Lot, NewLot};
use shared::validation::{validate_lot_dates, validate_lot_number};

use crate::error::{CoreError, CoreResult};
use crate::store::{EntryFilter, LotStore, Store};

/// Lot registry: idempotent creation and stock-aware listing
#[derive(Clone)]
pub struct LotService {
    store: Arc<dyn Store>,
}

impl LotService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Register a lot, or return the existing one under the same
    /// (product, location, lot_number). Attributes of an existing lot are
    /// left untouched: the first write wins, repeat receipts only add
    /// quantity through the ledger.
    pub async fn get_or_create_lot(&self, tenant_id: Uuid, input: NewLot) -> CoreResult<Lot> {
        validate_lot_number(&input.lot_number)
            .map_err(|message| CoreError::validation("lot_number", message))?;
        validate_lot_dates(input.received_date, input.expiry_date)
            .map_err(|message| CoreError::validation("expiry_date", message))?;

        self.store.get_or_create(tenant_id, input).await
    }

    pub async fn find_lot(&self, tenant_id: Uuid, lot_id: Uuid) -> CoreResult<Option<Lot>> {
        self.store.find(tenant_id, lot_id).await
    }

    /// All lots of a product at a location. With `include_empty` false,
    /// lots whose ledger entries sum to zero or less are dropped.
    pub async fn list_lots(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        include_empty: bool,
    ) -> CoreResult<Vec<Lot>> {
        let lots = LotStore::list(self.store.as_ref(), tenant_id, product_id, location_id).await?;
        if include_empty || lots.is_empty() {
            return Ok(lots);
        }

        let entries = self
            .store
            .entries(tenant_id, &EntryFilter::position(product_id, location_id))
            .await?;

        let mut on_hand: HashMap<Uuid, Decimal> = HashMap::new();
        for entry in &entries {
            if let Some(lot_id) = entry.lot_id {
                *on_hand.entry(lot_id).or_insert(Decimal::ZERO) += entry.quantity_delta;
            }
        }

        Ok(lots
            .into_iter()
            .filter(|lot| on_hand.get(&lot.id).copied().unwrap_or(Decimal::ZERO) > Decimal::ZERO)
            .collect())
    }
}
