//! FEFO allocation planning
//!
//! Builds a pick plan over the lots of a product at a location, earliest
//! expiry first. Planning is a pure read: nothing is reserved and nothing
//! is written, so a plan can go stale the moment a concurrent issue lands.
//! Callers turn an accepted plan into ledger movements themselves.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use uuid::Uuid;

use shared::models::{AllocationLine, AllocationOptions, AllocationPlan, LotCandidate, Position};

use crate::error::{CoreError, CoreResult};
use crate::store::{EntryFilter, LotStore, Store};

/// Plans lot picks for issues, earliest expiry first
#[derive(Clone)]
pub struct AllocationService {
    store: Arc<dyn Store>,
}

impl AllocationService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Plan how to cover `quantity_needed` from the lots on hand.
    ///
    /// Only lotted stock is eligible; the unlotted pool is never planned
    /// from. Expired lots are skipped unless the options say otherwise, and
    /// `as_of` rewinds both the stock levels and the expiry horizon.
    pub async fn plan_allocation(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
        quantity_needed: Decimal,
        options: AllocationOptions,
    ) -> CoreResult<AllocationPlan> {
        if quantity_needed <= Decimal::ZERO {
            return Err(CoreError::validation(
                "quantity_needed",
                "Quantity to allocate must be positive",
            ));
        }

        let as_of = options.as_of.unwrap_or_else(Utc::now);
        let lots = LotStore::list(self.store.as_ref(), tenant_id, product_id, location_id).await?;

        let mut filter = EntryFilter::position(product_id, location_id);
        filter.as_of = Some(as_of);
        let entries = self.store.entries(tenant_id, &filter).await?;

        let mut buckets: HashMap<Uuid, Position> = HashMap::new();
        for entry in &entries {
            if let Some(lot_id) = entry.lot_id {
                buckets.entry(lot_id).or_default().apply(entry);
            }
        }

        let candidates: Vec<LotCandidate> = lots
            .into_iter()
            .filter(|lot| !(options.exclude_expired && lot.is_expired(as_of)))
            .filter_map(|lot| {
                let bucket = buckets.get(&lot.id).copied().unwrap_or_default();
                (bucket.on_hand > Decimal::ZERO).then(|| LotCandidate {
                    lot_id: lot.id,
                    lot_number: lot.lot_number,
                    on_hand: bucket.on_hand,
                    unit_cost: bucket.average_cost(),
                    expiry_date: lot.expiry_date,
                    received_date: lot.received_date,
                })
            })
            .collect();

        let plan = plan_fefo(candidates, quantity_needed);
        tracing::debug!(
            %tenant_id,
            %product_id,
            %location_id,
            requested = %plan.requested,
            allocated = %plan.allocated_total(),
            shortfall = %plan.shortfall,
            lines = plan.lines.len(),
            "Planned FEFO allocation"
        );
        Ok(plan)
    }
}

/// Walk the candidates in FEFO order, taking from each until the request
/// is covered or the stock runs out. Whatever cannot be covered is
/// reported as shortfall rather than failing the plan.
pub fn plan_fefo(mut candidates: Vec<LotCandidate>, quantity_needed: Decimal) -> AllocationPlan {
    candidates.sort_by(fefo_order);

    let mut lines = Vec::new();
    let mut remaining = quantity_needed;
    for candidate in candidates {
        if remaining <= Decimal::ZERO {
            break;
        }
        if candidate.on_hand <= Decimal::ZERO {
            continue;
        }
        let take = remaining.min(candidate.on_hand);
        lines.push(AllocationLine {
            lot_id: candidate.lot_id,
            lot_number: candidate.lot_number,
            quantity: take,
            unit_cost: candidate.unit_cost,
            expiry_date: candidate.expiry_date,
        });
        remaining -= take;
    }

    let shortfall = remaining.max(Decimal::ZERO);
    AllocationPlan {
        requested: quantity_needed,
        lines,
        fully_allocated: shortfall.is_zero(),
        shortfall,
    }
}

/// Earliest expiry first; lots without an expiry go last. Ties fall back
/// to received date, then lot number, so the order is deterministic.
fn fefo_order(a: &LotCandidate, b: &LotCandidate) -> Ordering {
    let expiry = match (a.expiry_date, b.expiry_date) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };
    expiry
        .then_with(|| a.received_date.cmp(&b.received_date))
        .then_with(|| a.lot_number.cmp(&b.lot_number))
}
