//! Shared types and models for the F&B Stock Ledger Platform
//!
//! This crate contains the pure domain model of the stock ledger core:
//! ledger entries, lots, derived positions, FEFO allocation plans, and the
//! adjustment workflow documents. It performs no IO and is consumed by the
//! engine crate and by surrounding application layers.

pub mod models;
pub mod types;
pub mod validation;

pub use models::*;
pub use types::*;
pub use validation::*;
