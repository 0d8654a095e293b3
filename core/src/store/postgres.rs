//! PostgreSQL backend
//!
//! Runtime-checked sqlx queries. The append performs the version CAS and
//! the entry inserts inside one transaction; a failed CAS rolls the whole
//! batch back.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use shared::models::{
    AdjustmentDocument, AdjustmentLine, AdjustmentStatus, AppendedBatch, DocumentKind, Lot,
    LotScope, MovementType, NewLot, PositionKey, PositionVersion, StockLedgerEntry,
};
use shared::types::DocumentReference;

use crate::error::{CoreError, CoreResult};
use crate::store::{AdjustmentStore, EntryFilter, LedgerStore, LotStore, NewLedgerBatch};

#[derive(Clone)]
pub struct PgStore {
    db: PgPool,
}

impl PgStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

/// Database row for a ledger entry
#[derive(Debug, FromRow)]
struct EntryRow {
    id: Uuid,
    tenant_id: Uuid,
    sequence: i64,
    product_id: Uuid,
    location_id: Uuid,
    lot_id: Option<Uuid>,
    movement_type: String,
    quantity_delta: Decimal,
    unit_cost: Option<Decimal>,
    reference_type: Option<String>,
    reference_id: Option<Uuid>,
    occurred_at: DateTime<Utc>,
    created_by: Uuid,
    created_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_entry(self) -> CoreResult<StockLedgerEntry> {
        let movement_type = MovementType::from_str(&self.movement_type).ok_or_else(|| {
            CoreError::Internal(anyhow::anyhow!(
                "unknown movement type in storage: {}",
                self.movement_type
            ))
        })?;
        let reference = match (self.reference_type, self.reference_id) {
            (Some(reference_type), Some(reference_id)) => Some(DocumentReference {
                reference_type,
                reference_id,
            }),
            _ => None,
        };
        Ok(StockLedgerEntry {
            id: self.id,
            tenant_id: self.tenant_id,
            sequence: self.sequence,
            product_id: self.product_id,
            location_id: self.location_id,
            lot_id: self.lot_id,
            movement_type,
            quantity_delta: self.quantity_delta,
            unit_cost: self.unit_cost,
            reference,
            occurred_at: self.occurred_at,
            created_by: self.created_by,
            created_at: self.created_at,
        })
    }
}

const ENTRY_COLUMNS: &str = "id, tenant_id, sequence, product_id, location_id, lot_id, \
     movement_type, quantity_delta, unit_cost, reference_type, reference_id, \
     occurred_at, created_by, created_at";

/// Database row for a lot
#[derive(Debug, FromRow)]
struct LotRow {
    id: Uuid,
    tenant_id: Uuid,
    product_id: Uuid,
    location_id: Uuid,
    lot_number: String,
    expiry_date: Option<NaiveDate>,
    received_date: NaiveDate,
    notes: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<LotRow> for Lot {
    fn from(row: LotRow) -> Self {
        Lot {
            id: row.id,
            tenant_id: row.tenant_id,
            product_id: row.product_id,
            location_id: row.location_id,
            lot_number: row.lot_number,
            expiry_date: row.expiry_date,
            received_date: row.received_date,
            notes: row.notes,
            created_at: row.created_at,
        }
    }
}

const LOT_COLUMNS: &str = "id, tenant_id, product_id, location_id, lot_number, expiry_date, \
     received_date, notes, created_at";

/// Database row for an adjustment document header
#[derive(Debug, FromRow)]
struct DocumentRow {
    id: Uuid,
    tenant_id: Uuid,
    location_id: Uuid,
    kind: String,
    status: String,
    reason_code: Option<String>,
    created_by: Uuid,
    approved_by: Option<Uuid>,
    approved_at: Option<DateTime<Utc>>,
    posted_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DocumentRow {
    fn into_document(self, lines: Vec<AdjustmentLine>) -> CoreResult<AdjustmentDocument> {
        let kind = DocumentKind::from_str(&self.kind).ok_or_else(|| {
            CoreError::Internal(anyhow::anyhow!("unknown document kind in storage: {}", self.kind))
        })?;
        let status = AdjustmentStatus::from_str(&self.status).ok_or_else(|| {
            CoreError::Internal(anyhow::anyhow!(
                "unknown document status in storage: {}",
                self.status
            ))
        })?;
        Ok(AdjustmentDocument {
            id: self.id,
            tenant_id: self.tenant_id,
            location_id: self.location_id,
            kind,
            status,
            lines,
            reason_code: self.reason_code,
            created_by: self.created_by,
            approved_by: self.approved_by,
            approved_at: self.approved_at,
            posted_at: self.posted_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

const DOCUMENT_COLUMNS: &str = "id, tenant_id, location_id, kind, status, reason_code, \
     created_by, approved_by, approved_at, posted_at, created_at, updated_at";

/// Database row for an adjustment line
#[derive(Debug, FromRow)]
struct LineRow {
    line_no: i32,
    product_id: Uuid,
    lot_id: Option<Uuid>,
    quantity_delta: Decimal,
    unit_cost: Option<Decimal>,
}

impl From<LineRow> for AdjustmentLine {
    fn from(row: LineRow) -> Self {
        AdjustmentLine {
            line_no: row.line_no,
            product_id: row.product_id,
            lot_id: row.lot_id,
            quantity_delta: row.quantity_delta,
            unit_cost: row.unit_cost,
        }
    }
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn append(&self, tenant_id: Uuid, batch: NewLedgerBatch) -> CoreResult<AppendedBatch> {
        let mut tx = self.db.begin().await?;

        // Make sure a version row exists for every touched key, then bump
        // them all. Keys named in `expected` bump conditionally; zero rows
        // matched means another writer moved the key and the whole batch
        // rolls back.
        let touched = batch.touched_keys(tenant_id);
        for key in &touched {
            sqlx::query(
                r#"
                INSERT INTO position_versions (tenant_id, product_id, location_id, version)
                VALUES ($1, $2, $3, 0)
                ON CONFLICT (tenant_id, product_id, location_id) DO NOTHING
                "#,
            )
            .bind(key.tenant_id)
            .bind(key.product_id)
            .bind(key.location_id)
            .execute(&mut *tx)
            .await?;
        }

        for key in &touched {
            let expected = batch
                .expected
                .iter()
                .find(|v| v.key == *key)
                .map(|v| v.version);

            let result = match expected {
                Some(version) => {
                    sqlx::query(
                        r#"
                        UPDATE position_versions
                        SET version = version + 1
                        WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3
                          AND version = $4
                        "#,
                    )
                    .bind(key.tenant_id)
                    .bind(key.product_id)
                    .bind(key.location_id)
                    .bind(version)
                    .execute(&mut *tx)
                    .await?
                }
                None => {
                    sqlx::query(
                        r#"
                        UPDATE position_versions
                        SET version = version + 1
                        WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3
                        "#,
                    )
                    .bind(key.tenant_id)
                    .bind(key.product_id)
                    .bind(key.location_id)
                    .execute(&mut *tx)
                    .await?
                }
            };

            if result.rows_affected() == 0 {
                return Err(CoreError::ConcurrencyConflict { attempts: 1 });
            }
        }

        let batch_id = Uuid::new_v4();
        let mut appended = Vec::with_capacity(batch.entries.len());
        for entry in batch.entries {
            let (reference_type, reference_id) = match &entry.reference {
                Some(r) => (Some(r.reference_type.clone()), Some(r.reference_id)),
                None => (None, None),
            };
            let row = sqlx::query_as::<_, EntryRow>(&format!(
                r#"
                INSERT INTO stock_ledger_entries (
                    tenant_id, product_id, location_id, lot_id, movement_type,
                    quantity_delta, unit_cost, reference_type, reference_id,
                    occurred_at, created_by
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                RETURNING {ENTRY_COLUMNS}
                "#
            ))
            .bind(tenant_id)
            .bind(entry.product_id)
            .bind(entry.location_id)
            .bind(entry.lot_id)
            .bind(entry.movement_type.as_str())
            .bind(entry.quantity_delta)
            .bind(entry.unit_cost)
            .bind(reference_type)
            .bind(reference_id)
            .bind(entry.occurred_at)
            .bind(entry.created_by)
            .fetch_one(&mut *tx)
            .await?;
            appended.push(row.into_entry()?);
        }

        tx.commit().await?;

        let appended_at = appended
            .first()
            .map(|e| e.created_at)
            .unwrap_or_else(Utc::now);
        Ok(AppendedBatch {
            batch_id,
            entries: appended,
            appended_at,
        })
    }

    async fn entries(
        &self,
        tenant_id: Uuid,
        filter: &EntryFilter,
    ) -> CoreResult<Vec<StockLedgerEntry>> {
        let (scope_lot_id, unlotted_only) = match filter.lot {
            Some(LotScope::Lot(id)) => (Some(id), false),
            Some(LotScope::Unlotted) => (None, true),
            Some(LotScope::Any) | None => (None, false),
        };
        let (reference_type, reference_id) = match &filter.reference {
            Some(r) => (Some(r.reference_type.clone()), Some(r.reference_id)),
            None => (None, None),
        };

        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM stock_ledger_entries
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR product_id = $2)
              AND ($3::uuid IS NULL OR location_id = $3)
              AND ($4::uuid IS NULL OR lot_id = $4)
              AND (NOT $5::boolean OR lot_id IS NULL)
              AND ($6::timestamptz IS NULL OR occurred_at <= $6)
              AND ($7::text IS NULL OR reference_type = $7)
              AND ($8::uuid IS NULL OR reference_id = $8)
            ORDER BY occurred_at, sequence
            "#
        ))
        .bind(tenant_id)
        .bind(filter.product_id)
        .bind(filter.location_id)
        .bind(scope_lot_id)
        .bind(unlotted_only)
        .bind(filter.as_of)
        .bind(reference_type)
        .bind(reference_id)
        .fetch_all(&self.db)
        .await?;

        rows.into_iter().map(EntryRow::into_entry).collect()
    }

    async fn versions(&self, keys: &[PositionKey]) -> CoreResult<Vec<PositionVersion>> {
        let mut versions = Vec::with_capacity(keys.len());
        for key in keys {
            let version = sqlx::query_scalar::<_, i64>(
                r#"
                SELECT version FROM position_versions
                WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3
                "#,
            )
            .bind(key.tenant_id)
            .bind(key.product_id)
            .bind(key.location_id)
            .fetch_optional(&self.db)
            .await?
            .unwrap_or(0);
            versions.push(PositionVersion { key: *key, version });
        }
        Ok(versions)
    }
}

#[async_trait]
impl LotStore for PgStore {
    async fn get_or_create(&self, tenant_id: Uuid, new_lot: NewLot) -> CoreResult<Lot> {
        // ON CONFLICT DO NOTHING keeps concurrent receipts converging on
        // the first row; attributes of an existing lot are never rewritten.
        let inserted = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            INSERT INTO lots (
                tenant_id, product_id, location_id, lot_number,
                expiry_date, received_date, notes
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (tenant_id, product_id, location_id, lot_number) DO NOTHING
            RETURNING {LOT_COLUMNS}
            "#
        ))
        .bind(tenant_id)
        .bind(new_lot.product_id)
        .bind(new_lot.location_id)
        .bind(&new_lot.lot_number)
        .bind(new_lot.expiry_date)
        .bind(new_lot.received_date)
        .bind(&new_lot.notes)
        .fetch_optional(&self.db)
        .await?;

        if let Some(row) = inserted {
            return Ok(row.into());
        }

        let row = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM lots
            WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3 AND lot_number = $4
            "#
        ))
        .bind(tenant_id)
        .bind(new_lot.product_id)
        .bind(new_lot.location_id)
        .bind(&new_lot.lot_number)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| CoreError::NotFound("Lot".to_string()))?;

        Ok(row.into())
    }

    async fn find(&self, tenant_id: Uuid, lot_id: Uuid) -> CoreResult<Option<Lot>> {
        let row = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM lots
            WHERE id = $1 AND tenant_id = $2
            "#
        ))
        .bind(lot_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?;

        Ok(row.map(Lot::from))
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        product_id: Uuid,
        location_id: Uuid,
    ) -> CoreResult<Vec<Lot>> {
        let rows = sqlx::query_as::<_, LotRow>(&format!(
            r#"
            SELECT {LOT_COLUMNS}
            FROM lots
            WHERE tenant_id = $1 AND product_id = $2 AND location_id = $3
            ORDER BY received_date, lot_number
            "#
        ))
        .bind(tenant_id)
        .bind(product_id)
        .bind(location_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(Lot::from).collect())
    }
}

#[async_trait]
impl AdjustmentStore for PgStore {
    async fn insert(&self, document: &AdjustmentDocument) -> CoreResult<()> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO adjustment_documents (
                id, tenant_id, location_id, kind, status, reason_code,
                created_by, approved_by, approved_at, posted_at,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(document.id)
        .bind(document.tenant_id)
        .bind(document.location_id)
        .bind(document.kind.as_str())
        .bind(document.status.as_str())
        .bind(&document.reason_code)
        .bind(document.created_by)
        .bind(document.approved_by)
        .bind(document.approved_at)
        .bind(document.posted_at)
        .bind(document.created_at)
        .bind(document.updated_at)
        .execute(&mut *tx)
        .await?;

        for line in &document.lines {
            sqlx::query(
                r#"
                INSERT INTO adjustment_lines (
                    document_id, line_no, product_id, lot_id, quantity_delta, unit_cost
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(document.id)
            .bind(line.line_no)
            .bind(line.product_id)
            .bind(line.lot_id)
            .bind(line.quantity_delta)
            .bind(line.unit_cost)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn fetch(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> CoreResult<AdjustmentDocument> {
        let header = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM adjustment_documents
            WHERE id = $1 AND tenant_id = $2
            "#
        ))
        .bind(document_id)
        .bind(tenant_id)
        .fetch_optional(&self.db)
        .await?
        .ok_or_else(|| CoreError::NotFound("Adjustment document".to_string()))?;

        let lines = self.fetch_lines(document_id).await?;
        header.into_document(lines)
    }

    async fn update(
        &self,
        document: &AdjustmentDocument,
        expected_status: AdjustmentStatus,
    ) -> CoreResult<bool> {
        let mut tx = self.db.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE adjustment_documents
            SET status = $1, reason_code = $2, approved_by = $3, approved_at = $4,
                posted_at = $5, updated_at = $6
            WHERE id = $7 AND tenant_id = $8 AND status = $9
            "#,
        )
        .bind(document.status.as_str())
        .bind(&document.reason_code)
        .bind(document.approved_by)
        .bind(document.approved_at)
        .bind(document.posted_at)
        .bind(document.updated_at)
        .bind(document.id)
        .bind(document.tenant_id)
        .bind(expected_status.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query_scalar::<_, bool>(
                "SELECT EXISTS(SELECT 1 FROM adjustment_documents WHERE id = $1 AND tenant_id = $2)",
            )
            .bind(document.id)
            .bind(document.tenant_id)
            .fetch_one(&mut *tx)
            .await?;

            if !exists {
                return Err(CoreError::NotFound("Adjustment document".to_string()));
            }
            return Ok(false);
        }

        sqlx::query("DELETE FROM adjustment_lines WHERE document_id = $1")
            .bind(document.id)
            .execute(&mut *tx)
            .await?;
        for line in &document.lines {
            sqlx::query(
                r#"
                INSERT INTO adjustment_lines (
                    document_id, line_no, product_id, lot_id, quantity_delta, unit_cost
                )
                VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(document.id)
            .bind(line.line_no)
            .bind(line.product_id)
            .bind(line.lot_id)
            .bind(line.quantity_delta)
            .bind(line.unit_cost)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn list(
        &self,
        tenant_id: Uuid,
        location_id: Option<Uuid>,
        status: Option<AdjustmentStatus>,
    ) -> CoreResult<Vec<AdjustmentDocument>> {
        let headers = sqlx::query_as::<_, DocumentRow>(&format!(
            r#"
            SELECT {DOCUMENT_COLUMNS}
            FROM adjustment_documents
            WHERE tenant_id = $1
              AND ($2::uuid IS NULL OR location_id = $2)
              AND ($3::text IS NULL OR status = $3)
            ORDER BY created_at DESC
            "#
        ))
        .bind(tenant_id)
        .bind(location_id)
        .bind(status.map(|s| s.as_str()))
        .fetch_all(&self.db)
        .await?;

        let mut documents = Vec::with_capacity(headers.len());
        for header in headers {
            let lines = self.fetch_lines(header.id).await?;
            documents.push(header.into_document(lines)?);
        }
        Ok(documents)
    }
}

impl PgStore {
    async fn fetch_lines(&self, document_id: Uuid) -> CoreResult<Vec<AdjustmentLine>> {
        let rows = sqlx::query_as::<_, LineRow>(
            r#"
            SELECT line_no, product_id, lot_id, quantity_delta, unit_cost
            FROM adjustment_lines
            WHERE document_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.db)
        .await?;

        Ok(rows.into_iter().map(AdjustmentLine::from).collect())
    }
}
