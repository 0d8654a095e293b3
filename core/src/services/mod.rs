//! Business logic services for the stock ledger core

pub mod adjustment;
pub mod allocation;
pub mod ledger;
pub mod lot;
pub mod position;

pub use adjustment::AdjustmentService;
pub use allocation::AllocationService;
pub use ledger::LedgerService;
pub use lot::LotService;
pub use position::PositionService;
