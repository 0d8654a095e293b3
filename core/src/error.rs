//! Error handling for the stock ledger core
//!
//! Business-rule violations carry enough structure for callers to render
//! actionable messages; storage and internal failures wrap their sources.

use rust_decimal::Decimal;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use shared::models::AdjustmentStatus;

/// One bucket that a proposed posting would drive below zero
#[derive(Debug, Clone, Serialize)]
pub struct NegativeStockViolation {
    /// Document line that produced the violation, when posting a document
    pub line_no: Option<i32>,
    pub product_id: Uuid,
    pub location_id: Uuid,
    pub lot_id: Option<Uuid>,
    pub on_hand: Decimal,
    pub requested_delta: Decimal,
}

/// Core error types
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Posting would drive stock negative on {} bucket(s)", .0.len())]
    NegativeStock(Vec<NegativeStockViolation>),

    #[error("Cannot {action} a document in {from} status")]
    InvalidStatusTransition {
        from: AdjustmentStatus,
        action: &'static str,
    },

    #[error("Concurrent write detected after {attempts} attempt(s)")]
    ConcurrencyConflict { attempts: u32 },

    #[error("Storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl CoreError {
    /// Build a validation error without the call-site boilerplate.
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        CoreError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }

    /// Conflicts are transient; everything else is not worth retrying.
    pub fn is_conflict(&self) -> bool {
        matches!(self, CoreError::ConcurrencyConflict { .. })
    }
}

/// Result type alias for core operations
pub type CoreResult<T> = Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_stock_message_counts_buckets() {
        let err = CoreError::NegativeStock(vec![
            NegativeStockViolation {
                line_no: Some(1),
                product_id: Uuid::new_v4(),
                location_id: Uuid::new_v4(),
                lot_id: None,
                on_hand: Decimal::from(2),
                requested_delta: Decimal::from(-5),
            },
            NegativeStockViolation {
                line_no: Some(3),
                product_id: Uuid::new_v4(),
                location_id: Uuid::new_v4(),
                lot_id: Some(Uuid::new_v4()),
                on_hand: Decimal::ZERO,
                requested_delta: Decimal::from(-1),
            },
        ]);
        assert_eq!(
            err.to_string(),
            "Posting would drive stock negative on 2 bucket(s)"
        );
    }

    #[test]
    fn only_conflicts_are_transient() {
        assert!(CoreError::ConcurrencyConflict { attempts: 3 }.is_conflict());
        assert!(!CoreError::NotFound("Lot".to_string()).is_conflict());
    }
}
