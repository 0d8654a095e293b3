//! Validation utilities for the stock ledger platform
//!
//! Movement sign rules and lot identity rules live here so every write path
//! (services, import jobs, tests) enforces the same constraints.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use crate::models::{AdjustmentLine, DocumentKind, MovementType};

/// Longest lot number accepted from suppliers and label scanners
pub const MAX_LOT_NUMBER_LEN: usize = 64;

// ============================================================================
// Movement Validations
// ============================================================================

/// Validate the sign of a quantity delta for its movement type
pub fn validate_movement_quantity(
    movement_type: MovementType,
    quantity_delta: Decimal,
) -> Result<(), &'static str> {
    if quantity_delta.is_zero() {
        return Err("Quantity delta cannot be zero");
    }
    match movement_type {
        MovementType::Receipt | MovementType::TransferIn => {
            if quantity_delta < Decimal::ZERO {
                return Err("Receipts and inbound transfers must be positive");
            }
        }
        MovementType::Issue | MovementType::TransferOut => {
            if quantity_delta > Decimal::ZERO {
                return Err("Issues and outbound transfers must be negative");
            }
        }
        MovementType::Adjustment => {} // either sign
    }
    Ok(())
}

/// Validate the unit cost attached to a movement
pub fn validate_movement_cost(
    movement_type: MovementType,
    quantity_delta: Decimal,
    unit_cost: Option<Decimal>,
) -> Result<(), &'static str> {
    if let Some(cost) = unit_cost {
        if cost < Decimal::ZERO {
            return Err("Unit cost cannot be negative");
        }
    }
    let cost_required = match movement_type {
        MovementType::Receipt | MovementType::TransferIn => true,
        MovementType::Adjustment => quantity_delta > Decimal::ZERO,
        MovementType::Issue | MovementType::TransferOut => false,
    };
    if cost_required && unit_cost.is_none() {
        return Err("Costed inflows require a unit cost");
    }
    Ok(())
}

// ============================================================================
// Lot Validations
// ============================================================================

/// Validate a supplier lot number (non-empty, trimmed, bounded length)
pub fn validate_lot_number(lot_number: &str) -> Result<(), &'static str> {
    if lot_number.is_empty() {
        return Err("Lot number cannot be empty");
    }
    if lot_number.len() > MAX_LOT_NUMBER_LEN {
        return Err("Lot number exceeds maximum length");
    }
    if lot_number.trim() != lot_number {
        return Err("Lot number cannot have leading or trailing whitespace");
    }
    Ok(())
}

/// Validate that a lot does not expire before it was received
pub fn validate_lot_dates(
    received_date: NaiveDate,
    expiry_date: Option<NaiveDate>,
) -> Result<(), &'static str> {
    if let Some(expiry) = expiry_date {
        if expiry < received_date {
            return Err("Expiry date cannot be before received date");
        }
    }
    Ok(())
}

// ============================================================================
// Document Validations
// ============================================================================

/// Validate one document line against its document kind
pub fn validate_document_line(
    kind: DocumentKind,
    line: &AdjustmentLine,
) -> Result<(), &'static str> {
    if line.quantity_delta.is_zero() {
        return Err("Document lines cannot have zero quantity");
    }
    if kind == DocumentKind::Requisition && line.quantity_delta > Decimal::ZERO {
        return Err("Requisition lines must be negative");
    }
    validate_movement_cost(kind.movement_type(), line.quantity_delta, line.unit_cost)
}

/// Validate a full set of document lines (non-empty, unique line numbers)
pub fn validate_document_lines(
    kind: DocumentKind,
    lines: &[AdjustmentLine],
) -> Result<(), &'static str> {
    if lines.is_empty() {
        return Err("Document must have at least one line");
    }
    let mut seen = std::collections::HashSet::new();
    for line in lines {
        if !seen.insert(line.line_no) {
            return Err("Document line numbers must be unique");
        }
        validate_document_line(kind, line)?;
    }
    Ok(())
}
