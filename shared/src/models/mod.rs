//! Domain models for the F&B Stock Ledger Platform

mod adjustment;
mod allocation;
mod entry;
mod lot;
mod position;

pub use adjustment::*;
pub use allocation::*;
pub use entry::*;
pub use lot::*;
pub use position::*;
