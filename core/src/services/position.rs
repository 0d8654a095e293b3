//! Position read service
//!
//! Positions are pure folds over the ledger. Nothing is cached or stored;
//! every question is answered by replaying the relevant entries in order.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::models::{fold_position, LotScope, Position, StockValuation};

use crate::error::CoreResult;
use crate::store::{EntryFilter, Store};

/// Read-side service for on-hand, average cost, and valuation
#[derive(Clone)]
pub struct PositionService {
    store: Arc<dyn Store>,
}

impl PositionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Fold the position of one bucket, optionally as the ledger stood at
    /// `as_of` (by `occurred_at`, so backdated entries count).
    pub async fn position(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        scope: LotScope,
        as_of: Option<DateTime<Utc>>,
    ) -> CoreResult<Position> {
        let mut filter = EntryFilter::position(product_id, location_id);
        filter.lot = Some(scope);
        filter.as_of = as_of;
        let entries = self.store.entries(tenant_id, &filter).await?;
        Ok(fold_position(&entries))
    }

    /// Current on-hand for a product at a location. `lot` narrows to one
    /// lot; `None` means the whole location, unlotted pool included.
    pub async fn on_hand(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        lot: Option<Uuid>,
    ) -> CoreResult<Decimal> {
        let scope = lot.map_or(LotScope::Any, LotScope::Lot);
        Ok(self
            .position(tenant_id, product_id, location_id, scope, None)
            .await?
            .on_hand)
    }

    pub async fn on_hand_as_of(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        lot: Option<Uuid>,
        as_of: DateTime<Utc>,
    ) -> CoreResult<Decimal> {
        let scope = lot.map_or(LotScope::Any, LotScope::Lot);
        Ok(self
            .position(tenant_id, product_id, location_id, scope, Some(as_of))
            .await?
            .on_hand)
    }

    /// Weighted-average unit cost of the bucket's costed inflows. Zero when
    /// the bucket has never seen one.
    pub async fn average_cost(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        lot: Option<Uuid>,
    ) -> CoreResult<Decimal> {
        let scope = lot.map_or(LotScope::Any, LotScope::Lot);
        Ok(self
            .position(tenant_id, product_id, location_id, scope, None)
            .await?
            .average_cost())
    }

    /// On-hand, average cost, and extended value in one read.
    pub async fn valuation(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        lot: Option<Uuid>,
    ) -> CoreResult<StockValuation> {
        let scope = lot.map_or(LotScope::Any, LotScope::Lot);
        Ok(self
            .position(tenant_id, product_id, location_id, scope, None)
            .await?
            .valuation())
    }
}
