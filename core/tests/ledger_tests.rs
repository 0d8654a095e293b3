//! Ledger append and guard tests
//!
//! Covers movement validation, the negative stock guard, cost derivation
//! on outflows, transfers, and the append-only nature of the journal.

use rust_decimal::Decimal;
use std::str::FromStr;
use uuid::Uuid;

use stock_ledger_core::models::{LotScope, MovementType};
use stock_ledger_core::{CoreError, EntryFilter, NewMovement, StockCore, TransferInput};

fn dec(s: &str) -> Decimal {
    Decimal::from_str(s).unwrap()
}

fn receipt(product: Uuid, location: Uuid, quantity: &str, cost: &str) -> NewMovement {
    NewMovement {
        product_id: product,
        location_id: location,
        lot_id: None,
        lot_number: None,
        expiry_date: None,
        movement_type: MovementType::Receipt,
        quantity_delta: dec(quantity),
        unit_cost: Some(dec(cost)),
        occurred_at: None,
    }
}

fn issue(product: Uuid, location: Uuid, quantity_delta: &str) -> NewMovement {
    NewMovement {
        product_id: product,
        location_id: location,
        lot_id: None,
        lot_number: None,
        expiry_date: None,
        movement_type: MovementType::Issue,
        quantity_delta: dec(quantity_delta),
        unit_cost: None,
        occurred_at: None,
    }
}

// ============================================================================
// Movement lifecycle
// ============================================================================

#[tokio::test]
async fn receipt_then_issue_updates_on_hand() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    core.ledger
        .append_movement(tenant, user, receipt(product, location, "10", "2.50"))
        .await
        .unwrap();
    let issued = core
        .ledger
        .append_movement(tenant, user, issue(product, location, "-4"))
        .await
        .unwrap();

    assert_eq!(issued.quantity_delta, dec("-4"));
    // Outflow cost is derived from the pool it consumed.
    assert_eq!(issued.unit_cost, Some(dec("2.50")));

    let on_hand = core
        .positions
        .on_hand(tenant, product, location, None)
        .await
        .unwrap();
    assert_eq!(on_hand, dec("6"));
}

#[tokio::test]
async fn overdraw_is_rejected_and_nothing_is_appended() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    core.ledger
        .append_movement(tenant, user, receipt(product, location, "4", "2.00"))
        .await
        .unwrap();

    let err = core
        .ledger
        .append_movement(tenant, user, issue(product, location, "-5"))
        .await
        .unwrap_err();
    match err {
        CoreError::NegativeStock(violations) => {
            assert_eq!(violations.len(), 1);
            assert_eq!(violations[0].on_hand, dec("4"));
            assert_eq!(violations[0].requested_delta, dec("-5"));
            assert_eq!(violations[0].product_id, product);
        }
        other => panic!("expected NegativeStock, got {other:?}"),
    }

    let entries = core
        .ledger
        .entries(tenant, &EntryFilter::position(product, location))
        .await
        .unwrap();
    assert_eq!(entries.len(), 1, "rejected issue must not land");
}

#[tokio::test]
async fn batch_rejection_is_atomic_across_products() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let location = Uuid::new_v4();
    let (product_a, product_b) = (Uuid::new_v4(), Uuid::new_v4());

    // Product B has no stock, so its line fails; the valid receipt for A
    // must not land either.
    let err = core
        .ledger
        .append_movement_batch(
            tenant,
            user,
            vec![
                receipt(product_a, location, "10", "1.00"),
                issue(product_b, location, "-5"),
            ],
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NegativeStock(_)));

    let entries = core
        .ledger
        .entries(tenant, &EntryFilter::position(product_a, location))
        .await
        .unwrap();
    assert!(entries.is_empty());
}

#[tokio::test]
async fn inflow_in_the_same_batch_funds_the_outflow() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    // Nothing on hand beforehand; the receipt earlier in the batch covers
    // the issue later in it.
    let batch = core
        .ledger
        .append_movement_batch(
            tenant,
            user,
            vec![
                receipt(product, location, "8", "3.00"),
                issue(product, location, "-5"),
            ],
            None,
        )
        .await
        .unwrap();
    assert_eq!(batch.entries.len(), 2);
    assert_eq!(batch.entries[1].unit_cost, Some(dec("3.00")));

    let on_hand = core
        .positions
        .on_hand(tenant, product, location, None)
        .await
        .unwrap();
    assert_eq!(on_hand, dec("3"));
}

#[tokio::test]
async fn corrections_append_instead_of_rewriting() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    let original = core
        .ledger
        .append_movement(tenant, user, receipt(product, location, "10", "2.00"))
        .await
        .unwrap();

    let correction = NewMovement {
        movement_type: MovementType::Adjustment,
        quantity_delta: dec("-3"),
        unit_cost: None,
        ..issue(product, location, "-3")
    };
    core.ledger
        .append_movement(tenant, user, correction)
        .await
        .unwrap();

    let entries = core
        .ledger
        .entries(tenant, &EntryFilter::position(product, location))
        .await
        .unwrap();
    assert_eq!(entries.len(), 2);
    // The original entry is untouched.
    assert_eq!(entries[0].id, original.id);
    assert_eq!(entries[0].quantity_delta, dec("10"));
    assert_eq!(
        core.positions
            .on_hand(tenant, product, location, None)
            .await
            .unwrap(),
        dec("7")
    );
}

#[tokio::test]
async fn entries_order_by_occurred_at_with_sequence_tiebreak() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    let earlier = chrono::Utc::now() - chrono::Duration::days(2);
    core.ledger
        .append_movement(tenant, user, receipt(product, location, "5", "1.00"))
        .await
        .unwrap();
    // Backdated receipt appended later must sort first.
    let mut backdated = receipt(product, location, "7", "1.00");
    backdated.occurred_at = Some(earlier);
    core.ledger
        .append_movement(tenant, user, backdated)
        .await
        .unwrap();

    let entries = core
        .ledger
        .entries(tenant, &EntryFilter::position(product, location))
        .await
        .unwrap();
    assert_eq!(entries[0].quantity_delta, dec("7"));
    assert_eq!(entries[1].quantity_delta, dec("5"));
    assert!(entries[0].sequence > entries[1].sequence);
}

#[tokio::test]
async fn tenants_never_see_each_other() {
    let core = StockCore::in_memory();
    let user = Uuid::new_v4();
    let (tenant_a, tenant_b) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    core.ledger
        .append_movement(tenant_a, user, receipt(product, location, "10", "1.00"))
        .await
        .unwrap();

    let other = core
        .ledger
        .entries(tenant_b, &EntryFilter::position(product, location))
        .await
        .unwrap();
    assert!(other.is_empty());

    // And tenant B cannot spend tenant A's stock.
    let err = core
        .ledger
        .append_movement(tenant_b, user, issue(product, location, "-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NegativeStock(_)));
}

// ============================================================================
// Lots through movements
// ============================================================================

#[tokio::test]
async fn receipt_with_lot_number_creates_the_lot_once() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());
    let expiry = chrono::NaiveDate::from_ymd_opt(2027, 3, 1).unwrap();

    let mut first = receipt(product, location, "10", "4.00");
    first.lot_number = Some("RM-2026-001".to_string());
    first.expiry_date = Some(expiry);
    let first = core.ledger.append_movement(tenant, user, first).await.unwrap();
    let lot_id = first.lot_id.expect("lotted receipt carries the lot id");

    // Second receipt under the same number books into the same lot and
    // does not rewrite its attributes.
    let mut second = receipt(product, location, "5", "4.50");
    second.lot_number = Some("RM-2026-001".to_string());
    let second = core.ledger.append_movement(tenant, user, second).await.unwrap();
    assert_eq!(second.lot_id, Some(lot_id));

    let lots = core
        .lots
        .list_lots(tenant, product, location, true)
        .await
        .unwrap();
    assert_eq!(lots.len(), 1);
    assert_eq!(lots[0].expiry_date, Some(expiry));

    let found = core.lots.find_lot(tenant, lot_id).await.unwrap().unwrap();
    assert_eq!(found.lot_number, "RM-2026-001");
    assert!(core.lots.find_lot(tenant, Uuid::new_v4()).await.unwrap().is_none());

    let lot_on_hand = core
        .positions
        .on_hand(tenant, product, location, Some(lot_id))
        .await
        .unwrap();
    assert_eq!(lot_on_hand, dec("15"));
}

#[tokio::test]
async fn drained_lots_drop_out_of_the_stocked_listing() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    let mut keep = receipt(product, location, "5", "1.00");
    keep.lot_number = Some("KEEP".to_string());
    core.ledger.append_movement(tenant, user, keep).await.unwrap();

    let mut drain = receipt(product, location, "3", "1.00");
    drain.lot_number = Some("DRAIN".to_string());
    let drained = core.ledger.append_movement(tenant, user, drain).await.unwrap();
    let mut empty_it = issue(product, location, "-3");
    empty_it.lot_id = drained.lot_id;
    core.ledger.append_movement(tenant, user, empty_it).await.unwrap();

    let stocked = core
        .lots
        .list_lots(tenant, product, location, false)
        .await
        .unwrap();
    assert_eq!(stocked.len(), 1);
    assert_eq!(stocked[0].lot_number, "KEEP");

    // The lot row itself survives for traceability.
    let all = core
        .lots
        .list_lots(tenant, product, location, true)
        .await
        .unwrap();
    assert_eq!(all.len(), 2);
}

#[tokio::test]
async fn lot_id_and_lot_number_together_are_rejected() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());

    let mut movement = receipt(Uuid::new_v4(), Uuid::new_v4(), "5", "1.00");
    movement.lot_id = Some(Uuid::new_v4());
    movement.lot_number = Some("L-1".to_string());
    let err = core
        .ledger
        .append_movement(tenant, user, movement)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

#[tokio::test]
async fn issue_against_unknown_lot_is_rejected() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());

    let mut movement = issue(Uuid::new_v4(), Uuid::new_v4(), "-1");
    movement.lot_id = Some(Uuid::new_v4());
    let err = core
        .ledger
        .append_movement(tenant, user, movement)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NotFound(_)));
}

#[tokio::test]
async fn lot_buckets_guard_independently_of_the_aggregate() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    let mut big = receipt(product, location, "10", "1.00");
    big.lot_number = Some("BIG".to_string());
    core.ledger.append_movement(tenant, user, big).await.unwrap();

    let mut small = receipt(product, location, "1", "1.00");
    small.lot_number = Some("SMALL".to_string());
    let small = core.ledger.append_movement(tenant, user, small).await.unwrap();

    // Aggregate holds 11, but the named lot holds only 1.
    let mut overdraw = issue(product, location, "-3");
    overdraw.lot_id = small.lot_id;
    let err = core
        .ledger
        .append_movement(tenant, user, overdraw)
        .await
        .unwrap_err();
    match err {
        CoreError::NegativeStock(violations) => {
            assert_eq!(violations[0].lot_id, small.lot_id);
            assert_eq!(violations[0].on_hand, dec("1"));
        }
        other => panic!("expected NegativeStock, got {other:?}"),
    }
}

// ============================================================================
// Transfers
// ============================================================================

#[tokio::test]
async fn transfer_moves_quantity_and_carries_cost() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let product = Uuid::new_v4();
    let (kitchen, bar) = (Uuid::new_v4(), Uuid::new_v4());

    core.ledger
        .append_movement(tenant, user, receipt(product, kitchen, "10", "12.50"))
        .await
        .unwrap();

    let batch = core
        .ledger
        .record_transfer(
            tenant,
            user,
            TransferInput {
                product_id: product,
                from_location_id: kitchen,
                to_location_id: bar,
                lot_id: None,
                quantity: dec("4"),
                reference: None,
                occurred_at: None,
            },
        )
        .await
        .unwrap();

    assert_eq!(batch.entries.len(), 2);
    assert_eq!(batch.entries[0].movement_type, MovementType::TransferOut);
    assert_eq!(batch.entries[0].quantity_delta, dec("-4"));
    assert_eq!(batch.entries[1].movement_type, MovementType::TransferIn);
    assert_eq!(batch.entries[1].unit_cost, Some(dec("12.50")));

    let kitchen_on_hand = core.positions.on_hand(tenant, product, kitchen, None).await.unwrap();
    let bar_on_hand = core.positions.on_hand(tenant, product, bar, None).await.unwrap();
    assert_eq!(kitchen_on_hand, dec("6"));
    assert_eq!(bar_on_hand, dec("4"));

    // The destination values incoming stock at the carried cost.
    let bar_cost = core
        .positions
        .average_cost(tenant, product, bar, None)
        .await
        .unwrap();
    assert_eq!(bar_cost, dec("12.50"));
}

#[tokio::test]
async fn lot_transfer_creates_the_destination_lot() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let product = Uuid::new_v4();
    let (central, satellite) = (Uuid::new_v4(), Uuid::new_v4());
    let expiry = chrono::NaiveDate::from_ymd_opt(2027, 1, 15).unwrap();

    let mut lotted = receipt(product, central, "9", "7.00");
    lotted.lot_number = Some("BATCH-7".to_string());
    lotted.expiry_date = Some(expiry);
    let lotted = core.ledger.append_movement(tenant, user, lotted).await.unwrap();

    core.ledger
        .record_transfer(
            tenant,
            user,
            TransferInput {
                product_id: product,
                from_location_id: central,
                to_location_id: satellite,
                lot_id: lotted.lot_id,
                quantity: dec("4"),
                reference: None,
                occurred_at: None,
            },
        )
        .await
        .unwrap();

    let destination_lots = core
        .lots
        .list_lots(tenant, product, satellite, true)
        .await
        .unwrap();
    assert_eq!(destination_lots.len(), 1);
    assert_eq!(destination_lots[0].lot_number, "BATCH-7");
    assert_eq!(destination_lots[0].expiry_date, Some(expiry));
    assert_ne!(destination_lots[0].id, lotted.lot_id.unwrap());

    let moved = core
        .positions
        .on_hand(tenant, product, satellite, Some(destination_lots[0].id))
        .await
        .unwrap();
    assert_eq!(moved, dec("4"));
}

#[tokio::test]
async fn transfer_cannot_overdraw_the_source() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let product = Uuid::new_v4();
    let (from, to) = (Uuid::new_v4(), Uuid::new_v4());

    core.ledger
        .append_movement(tenant, user, receipt(product, from, "3", "1.00"))
        .await
        .unwrap();

    let err = core
        .ledger
        .record_transfer(
            tenant,
            user,
            TransferInput {
                product_id: product,
                from_location_id: from,
                to_location_id: to,
                lot_id: None,
                quantity: dec("5"),
                reference: None,
                occurred_at: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::NegativeStock(_)));

    // Neither side moved.
    assert_eq!(
        core.positions.on_hand(tenant, product, from, None).await.unwrap(),
        dec("3")
    );
    assert_eq!(
        core.positions.on_hand(tenant, product, to, None).await.unwrap(),
        Decimal::ZERO
    );
}

#[tokio::test]
async fn transfer_to_the_same_location_is_rejected() {
    let core = StockCore::in_memory();
    let location = Uuid::new_v4();

    let err = core
        .ledger
        .record_transfer(
            Uuid::new_v4(),
            Uuid::new_v4(),
            TransferInput {
                product_id: Uuid::new_v4(),
                from_location_id: location,
                to_location_id: location,
                lot_id: None,
                quantity: dec("1"),
                reference: None,
                occurred_at: None,
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

// ============================================================================
// Input validation
// ============================================================================

#[tokio::test]
async fn movement_signs_are_enforced_per_type() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    let mut wrong_sign = receipt(product, location, "5", "1.00");
    wrong_sign.quantity_delta = dec("-5");
    assert!(matches!(
        core.ledger.append_movement(tenant, user, wrong_sign).await,
        Err(CoreError::Validation { .. })
    ));

    let mut positive_issue = issue(product, location, "-5");
    positive_issue.quantity_delta = dec("5");
    assert!(matches!(
        core.ledger.append_movement(tenant, user, positive_issue).await,
        Err(CoreError::Validation { .. })
    ));

    let mut zero = receipt(product, location, "5", "1.00");
    zero.quantity_delta = Decimal::ZERO;
    assert!(matches!(
        core.ledger.append_movement(tenant, user, zero).await,
        Err(CoreError::Validation { .. })
    ));
}

#[tokio::test]
async fn receipts_require_a_cost() {
    let core = StockCore::in_memory();
    let mut movement = receipt(Uuid::new_v4(), Uuid::new_v4(), "5", "1.00");
    movement.unit_cost = None;

    let err = core
        .ledger
        .append_movement(Uuid::new_v4(), Uuid::new_v4(), movement)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

#[tokio::test]
async fn empty_batch_is_rejected() {
    let core = StockCore::in_memory();
    let err = core
        .ledger
        .append_movement_batch(Uuid::new_v4(), Uuid::new_v4(), Vec::new(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Validation { .. }));
}

#[tokio::test]
async fn unlotted_pool_guards_separately_from_lots() {
    let core = StockCore::in_memory();
    let (tenant, user) = (Uuid::new_v4(), Uuid::new_v4());
    let (product, location) = (Uuid::new_v4(), Uuid::new_v4());

    let mut lotted = receipt(product, location, "10", "2.00");
    lotted.lot_number = Some("L-9".to_string());
    core.ledger.append_movement(tenant, user, lotted).await.unwrap();

    // No unlotted stock exists, so an unlotted issue must fail even though
    // the location aggregate holds 10.
    let err = core
        .ledger
        .append_movement(tenant, user, issue(product, location, "-2"))
        .await
        .unwrap_err();
    match err {
        CoreError::NegativeStock(violations) => {
            assert_eq!(violations[0].lot_id, None);
            assert_eq!(violations[0].on_hand, Decimal::ZERO);
        }
        other => panic!("expected NegativeStock, got {other:?}"),
    }

    let unlotted = core
        .positions
        .position(tenant, product, location, LotScope::Unlotted, None)
        .await
        .unwrap();
    assert_eq!(unlotted.on_hand, Decimal::ZERO);
}
