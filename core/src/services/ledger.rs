//! Ledger service for appending stock movements
//!
//! All writes to the journal pass through here. The posting guard lives in
//! this module: any movement that would drive its bucket below zero is
//! rejected before anything is appended, and the guard read is protected
//! against concurrent writers by the store's version CAS.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;
use uuid::Uuid;

use shared::models::{
    fold_position, AppendedBatch, LotScope, MovementType, NewLot, Position, PositionKey,
    StockLedgerEntry,
};
use shared::types::DocumentReference;
use shared::validation::{validate_movement_cost, validate_movement_quantity};

use crate::error::{CoreError, CoreResult, NegativeStockViolation};
use crate::store::{EntryFilter, NewLedgerBatch, NewLedgerEntry, Store};

/// Ledger service for validated, guarded movement appends
#[derive(Clone)]
pub struct LedgerService {
    store: Arc<dyn Store>,
    max_conflict_retries: u32,
}

/// Input for appending one stock movement
#[derive(Debug, Clone, Deserialize)]
pub struct NewMovement {
    pub product_id: Uuid,
    pub location_id: Uuid,
    /// Existing lot to book against; mutually exclusive with `lot_number`
    pub lot_id: Option<Uuid>,
    /// Lot number to get-or-create, for receipts of new lots
    pub lot_number: Option<String>,
    /// Expiry for a lot created through `lot_number`
    pub expiry_date: Option<NaiveDate>,
    pub movement_type: MovementType,
    /// Signed: positive for receipts/inbound, negative for issues/outbound
    pub quantity_delta: Decimal,
    /// Required on costed inflows; derived from the consumed bucket's
    /// average when omitted on outflows
    pub unit_cost: Option<Decimal>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// Input for moving stock between two locations
#[derive(Debug, Clone, Deserialize)]
pub struct TransferInput {
    pub product_id: Uuid,
    pub from_location_id: Uuid,
    pub to_location_id: Uuid,
    pub lot_id: Option<Uuid>,
    /// Positive quantity to move
    pub quantity: Decimal,
    pub reference: Option<DocumentReference>,
    pub occurred_at: Option<DateTime<Utc>>,
}

/// A resolved movement queued for a guarded append. `line_no` carries the
/// originating document line for violation reporting.
#[derive(Debug, Clone)]
pub(crate) struct PendingMovement {
    pub line_no: Option<i32>,
    pub entry: NewLedgerEntry,
}

impl LedgerService {
    pub fn new(store: Arc<dyn Store>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    /// Append a single validated movement.
    pub async fn append_movement(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        movement: NewMovement,
    ) -> CoreResult<StockLedgerEntry> {
        let batch = self
            .append_movement_batch(tenant_id, user_id, vec![movement], None)
            .await?;
        // One movement in, exactly one entry out.
        Ok(batch.entries.into_iter().next().expect("appended batch is non-empty"))
    }

    /// Append several movements as one atomic batch, all stamped with the
    /// same optional document reference.
    pub async fn append_movement_batch(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        movements: Vec<NewMovement>,
        reference: Option<DocumentReference>,
    ) -> CoreResult<AppendedBatch> {
        if movements.is_empty() {
            return Err(CoreError::validation("movements", "Batch cannot be empty"));
        }

        let mut pending = Vec::with_capacity(movements.len());
        for movement in movements {
            validate_movement_quantity(movement.movement_type, movement.quantity_delta)
                .map_err(|msg| CoreError::validation("quantity_delta", msg))?;
            validate_movement_cost(
                movement.movement_type,
                movement.quantity_delta,
                movement.unit_cost,
            )
            .map_err(|msg| CoreError::validation("unit_cost", msg))?;

            let occurred_at = movement.occurred_at.unwrap_or_else(Utc::now);
            let lot_id = self
                .resolve_lot(tenant_id, &movement, occurred_at.date_naive())
                .await?;

            pending.push(PendingMovement {
                line_no: None,
                entry: NewLedgerEntry {
                    product_id: movement.product_id,
                    location_id: movement.location_id,
                    lot_id,
                    movement_type: movement.movement_type,
                    quantity_delta: movement.quantity_delta,
                    unit_cost: movement.unit_cost,
                    reference: reference.clone(),
                    occurred_at,
                    created_by: user_id,
                },
            });
        }

        self.guarded_append(tenant_id, pending).await
    }

    /// Move stock between locations as one atomic TransferOut/TransferIn
    /// pair. The inbound entry carries the source bucket's average cost,
    /// and a lot-tracked transfer get-or-creates the matching lot at the
    /// destination with the source lot's expiry and received date.
    pub async fn record_transfer(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        input: TransferInput,
    ) -> CoreResult<AppendedBatch> {
        if input.quantity <= Decimal::ZERO {
            return Err(CoreError::validation(
                "quantity",
                "Transfer quantity must be positive",
            ));
        }
        if input.from_location_id == input.to_location_id {
            return Err(CoreError::validation(
                "to_location_id",
                "Transfer source and destination must differ",
            ));
        }

        let occurred_at = input.occurred_at.unwrap_or_else(Utc::now);

        let (source_lot_id, dest_lot_id) = match input.lot_id {
            Some(lot_id) => {
                let lot = self
                    .store
                    .find(tenant_id, lot_id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound("Lot".to_string()))?;
                if lot.product_id != input.product_id || lot.location_id != input.from_location_id
                {
                    return Err(CoreError::validation(
                        "lot_id",
                        "Lot does not belong to the transfer's product and source location",
                    ));
                }
                let dest_lot = self
                    .store
                    .get_or_create(
                        tenant_id,
                        NewLot {
                            product_id: lot.product_id,
                            location_id: input.to_location_id,
                            lot_number: lot.lot_number.clone(),
                            expiry_date: lot.expiry_date,
                            received_date: lot.received_date,
                            notes: lot.notes.clone(),
                        },
                    )
                    .await?;
                (Some(lot_id), Some(dest_lot.id))
            }
            None => (None, None),
        };

        let pending = vec![
            PendingMovement {
                line_no: None,
                entry: NewLedgerEntry {
                    product_id: input.product_id,
                    location_id: input.from_location_id,
                    lot_id: source_lot_id,
                    movement_type: MovementType::TransferOut,
                    quantity_delta: -input.quantity,
                    unit_cost: None, // derived from the source bucket
                    reference: input.reference.clone(),
                    occurred_at,
                    created_by: user_id,
                },
            },
            PendingMovement {
                line_no: None,
                entry: NewLedgerEntry {
                    product_id: input.product_id,
                    location_id: input.to_location_id,
                    lot_id: dest_lot_id,
                    movement_type: MovementType::TransferIn,
                    quantity_delta: input.quantity,
                    unit_cost: None, // takes the paired outbound cost
                    reference: input.reference,
                    occurred_at,
                    created_by: user_id,
                },
            },
        ];

        self.guarded_append(tenant_id, pending).await
    }

    /// Audit/history read, ordered by `occurred_at` then `sequence`.
    pub async fn entries(
        &self,
        tenant_id: Uuid,
        filter: &EntryFilter,
    ) -> CoreResult<Vec<StockLedgerEntry>> {
        self.store.entries(tenant_id, filter).await
    }

    pub(crate) fn retry_bound(&self) -> u32 {
        self.max_conflict_retries
    }

    /// Guarded append loop: capture versions of the guarded keys, fold the
    /// affected buckets, reject on a floor violation, derive outflow costs
    /// and append with the captured expectations. Losing the optimistic
    /// race re-runs the whole read-validate-append step up to the bound.
    pub(crate) async fn guarded_append(
        &self,
        tenant_id: Uuid,
        pending: Vec<PendingMovement>,
    ) -> CoreResult<AppendedBatch> {
        let guarded_keys = guarded_keys(tenant_id, &pending);

        let mut attempts = 0;
        loop {
            attempts += 1;

            let expected = if guarded_keys.is_empty() {
                Vec::new()
            } else {
                self.store.versions(&guarded_keys).await?
            };
            let key_entries = read_key_entries(self.store.as_ref(), tenant_id, &guarded_keys).await?;

            let entries = match resolve_pending(tenant_id, &pending, &key_entries) {
                Ok(entries) => entries,
                Err(violations) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        violations = violations.len(),
                        "append rejected: stock would go negative"
                    );
                    return Err(CoreError::NegativeStock(violations));
                }
            };

            match self
                .store
                .append(tenant_id, NewLedgerBatch { entries, expected })
                .await
            {
                Ok(batch) => {
                    tracing::debug!(
                        tenant_id = %tenant_id,
                        batch_id = %batch.batch_id,
                        entries = batch.entries.len(),
                        "appended movement batch"
                    );
                    return Ok(batch);
                }
                Err(err) if err.is_conflict() && attempts <= self.max_conflict_retries => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        attempt = attempts,
                        "append lost optimistic race, retrying"
                    );
                    continue;
                }
                Err(err) if err.is_conflict() => {
                    return Err(CoreError::ConcurrencyConflict { attempts });
                }
                Err(err) => return Err(err),
            }
        }
    }

    async fn resolve_lot(
        &self,
        tenant_id: Uuid,
        movement: &NewMovement,
        received_date: NaiveDate,
    ) -> CoreResult<Option<Uuid>> {
        match (movement.lot_id, &movement.lot_number) {
            (Some(_), Some(_)) => Err(CoreError::validation(
                "lot_number",
                "Provide either lot_id or lot_number, not both",
            )),
            (Some(lot_id), None) => {
                let lot = self
                    .store
                    .find(tenant_id, lot_id)
                    .await?
                    .ok_or_else(|| CoreError::NotFound("Lot".to_string()))?;
                if lot.product_id != movement.product_id
                    || lot.location_id != movement.location_id
                {
                    return Err(CoreError::validation(
                        "lot_id",
                        "Lot does not belong to the movement's product and location",
                    ));
                }
                Ok(Some(lot_id))
            }
            (None, Some(lot_number)) => {
                let lot = self
                    .store
                    .get_or_create(
                        tenant_id,
                        NewLot {
                            product_id: movement.product_id,
                            location_id: movement.location_id,
                            lot_number: lot_number.clone(),
                            expiry_date: movement.expiry_date,
                            received_date,
                            notes: None,
                        },
                    )
                    .await?;
                Ok(Some(lot.id))
            }
            (None, None) => Ok(None),
        }
    }
}

/// Distinct keys of movements with a negative delta, the ones the floor
/// check protects.
pub(crate) fn guarded_keys(tenant_id: Uuid, pending: &[PendingMovement]) -> Vec<PositionKey> {
    let mut keys = Vec::new();
    for p in pending {
        if p.entry.quantity_delta < Decimal::ZERO {
            let key = p.entry.position_key(tenant_id);
            if !keys.contains(&key) {
                keys.push(key);
            }
        }
    }
    keys
}

/// Fetch the full current entry set for each key (no `as_of` bound: the
/// guard checks against present state, backdated entries included).
pub(crate) async fn read_key_entries(
    store: &dyn Store,
    tenant_id: Uuid,
    keys: &[PositionKey],
) -> CoreResult<HashMap<PositionKey, Vec<StockLedgerEntry>>> {
    let mut key_entries = HashMap::with_capacity(keys.len());
    for key in keys {
        let entries = store
            .entries(
                tenant_id,
                &EntryFilter::position(key.product_id, key.location_id),
            )
            .await?;
        key_entries.insert(*key, entries);
    }
    Ok(key_entries)
}

/// Pure guard pass over a prospective batch.
///
/// Walks the movements in order against running positions seeded from the
/// folded history, so inflows earlier in the batch fund later outflows in
/// both the floor check and the cost derivation. Every line that would take
/// its bucket below zero is collected. On success, outflows missing a cost
/// get the consumed bucket's average (the lot's when lot-tracked, the
/// location aggregate otherwise); a TransferIn without a cost takes the
/// cost derived for the immediately preceding TransferOut.
pub(crate) fn resolve_pending(
    tenant_id: Uuid,
    pending: &[PendingMovement],
    key_entries: &HashMap<PositionKey, Vec<StockLedgerEntry>>,
) -> Result<Vec<NewLedgerEntry>, Vec<NegativeStockViolation>> {
    // Seed every bucket the floor check will touch before the walk, so a
    // line is never folded in after its bucket's baseline was taken.
    let mut buckets: HashMap<(PositionKey, LotScope), Position> = HashMap::new();
    for p in pending {
        if p.entry.quantity_delta < Decimal::ZERO {
            let key = p.entry.position_key(tenant_id);
            let scope = LotScope::for_lot(p.entry.lot_id);
            buckets
                .entry((key, scope))
                .or_insert_with(|| seed_position(key_entries, &key, scope));
        }
    }

    // Location aggregates back the cost derivation for unlotted outflows.
    let mut aggregates: HashMap<PositionKey, Position> = HashMap::new();
    for p in pending {
        if p.entry.quantity_delta < Decimal::ZERO
            && p.entry.lot_id.is_none()
            && p.entry.unit_cost.is_none()
        {
            let key = p.entry.position_key(tenant_id);
            aggregates
                .entry(key)
                .or_insert_with(|| seed_position(key_entries, &key, LotScope::Any));
        }
    }

    let mut violations = Vec::new();
    let mut resolved = Vec::with_capacity(pending.len());
    let mut previous_cost: Option<Decimal> = None;

    for p in pending {
        let key = p.entry.position_key(tenant_id);
        let scope = LotScope::for_lot(p.entry.lot_id);
        let delta = p.entry.quantity_delta;

        if delta < Decimal::ZERO {
            // Seeded above for every negative line.
            let on_hand = buckets
                .get(&(key, scope))
                .map(|b| b.on_hand)
                .unwrap_or(Decimal::ZERO);
            if on_hand + delta < Decimal::ZERO {
                violations.push(NegativeStockViolation {
                    line_no: p.line_no,
                    product_id: p.entry.product_id,
                    location_id: p.entry.location_id,
                    lot_id: p.entry.lot_id,
                    on_hand,
                    requested_delta: delta,
                });
            }
        }

        let unit_cost = match p.entry.unit_cost {
            Some(cost) => Some(cost),
            None if p.entry.movement_type == MovementType::TransferIn => previous_cost,
            None if delta < Decimal::ZERO => {
                let source = match p.entry.lot_id {
                    Some(_) => buckets.get(&(key, scope)),
                    None => aggregates.get(&key),
                };
                Some(source.map(|b| b.average_cost()).unwrap_or(Decimal::ZERO))
            }
            None => None,
        };
        previous_cost = unit_cost;

        if let Some(position) = buckets.get_mut(&(key, scope)) {
            position.apply_parts(p.entry.movement_type, delta, unit_cost);
        }
        if let Some(position) = aggregates.get_mut(&key) {
            position.apply_parts(p.entry.movement_type, delta, unit_cost);
        }

        resolved.push(NewLedgerEntry {
            unit_cost,
            ..p.entry.clone()
        });
    }

    if violations.is_empty() {
        Ok(resolved)
    } else {
        Err(violations)
    }
}

fn seed_position(
    key_entries: &HashMap<PositionKey, Vec<StockLedgerEntry>>,
    key: &PositionKey,
    scope: LotScope,
) -> Position {
    key_entries
        .get(key)
        .map(|entries| fold_position(entries.iter().filter(|e| scope.matches(e.lot_id))))
        .unwrap_or_default()
}
