//! Multi-tenant stock ledger and lot allocation core
//!
//! The ledger is the single source of truth: every movement of stock is an
//! immutable, signed entry, and on-hand quantities, average costs and
//! valuations are folds over those entries rather than stored counters.
//! On top of the journal sit FEFO allocation planning, a guarded
//! adjustment/requisition workflow, and a lot registry.
//!
//! Construct a [`StockCore`] for a wired set of services:
//!
//! ```no_run
//! # async fn demo() -> stock_ledger_core::CoreResult<()> {
//! let config = stock_ledger_core::CoreConfig::load()
//!     .map_err(|e| stock_ledger_core::CoreError::Configuration(e.to_string()))?;
//! let core = stock_ledger_core::StockCore::connect(&config).await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use sqlx::postgres::PgPoolOptions;

pub mod config;
pub mod error;
pub mod services;
pub mod store;

pub use config::{CoreConfig, DatabaseConfig, PostingConfig};
pub use error::{CoreError, CoreResult, NegativeStockViolation};
pub use services::adjustment::{AdjustmentService, NewAdjustment};
pub use services::allocation::{plan_fefo, AllocationService};
pub use services::ledger::{LedgerService, NewMovement, TransferInput};
pub use services::lot::LotService;
pub use services::position::PositionService;
pub use store::{EntryFilter, MemoryStore, NewLedgerBatch, NewLedgerEntry, PgStore, Store};

pub use shared::models;
pub use shared::types;
pub use shared::validation;

/// All services wired over one backend. Cheap to clone; clones share the
/// same store.
#[derive(Clone)]
pub struct StockCore {
    pub ledger: LedgerService,
    pub lots: LotService,
    pub positions: PositionService,
    pub allocation: AllocationService,
    pub adjustments: AdjustmentService,
}

impl StockCore {
    /// Connect to PostgreSQL, apply embedded migrations when configured,
    /// and wire the services.
    pub async fn connect(config: &CoreConfig) -> CoreResult<Self> {
        let db = PgPoolOptions::new()
            .max_connections(config.database.max_connections)
            .min_connections(config.database.min_connections)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&config.database.url)
            .await?;
        tracing::info!(
            max_connections = config.database.max_connections,
            "connected to database"
        );

        if config.database.run_migrations {
            sqlx::migrate!("./migrations")
                .run(&db)
                .await
                .map_err(sqlx::Error::from)?;
            tracing::info!("database migrations applied");
        }

        Ok(Self::with_store(
            Arc::new(PgStore::new(db)),
            &config.posting,
        ))
    }

    /// Everything in memory. For tests and embedded tooling; semantics
    /// match the PostgreSQL backend including the append-time version CAS.
    pub fn in_memory() -> Self {
        Self::with_store(Arc::new(MemoryStore::new()), &PostingConfig::default())
    }

    /// Wire the services over any backend.
    pub fn with_store(store: Arc<dyn Store>, posting: &PostingConfig) -> Self {
        Self {
            ledger: LedgerService::new(store.clone(), posting.max_conflict_retries),
            lots: LotService::new(store.clone()),
            positions: PositionService::new(store.clone()),
            allocation: AllocationService::new(store.clone()),
            adjustments: AdjustmentService::new(store, posting.max_conflict_retries),
        }
    }
}
