//! Adjustment and requisition workflow
//!
//! Stock corrections and internal consumption go through a document with a
//! Draft -> Approved -> Posted lifecycle instead of writing to the ledger
//! directly. Posting appends one entry per line as a single guarded batch
//! under the document's reference; Posted is terminal and the entries are
//! never rewritten.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use uuid::Uuid;

use shared::models::{
    AdjustmentDocument, AdjustmentLine, AdjustmentStatus, DocumentKind, PositionKey,
};
use shared::validation::validate_document_lines;

use crate::error::{CoreError, CoreResult};
use crate::store::{AdjustmentStore, EntryFilter, NewLedgerBatch, NewLedgerEntry, Store};

use super::ledger::{guarded_keys, read_key_entries, resolve_pending, PendingMovement};

/// Document workflow over the ledger's posting guard
#[derive(Clone)]
pub struct AdjustmentService {
    store: Arc<dyn Store>,
    max_conflict_retries: u32,
}

/// Input for drafting an adjustment or requisition
#[derive(Debug, Clone, Deserialize)]
pub struct NewAdjustment {
    pub location_id: Uuid,
    pub kind: DocumentKind,
    pub reason_code: Option<String>,
    pub lines: Vec<AdjustmentLine>,
    pub created_by: Uuid,
}

impl AdjustmentService {
    pub fn new(store: Arc<dyn Store>, max_conflict_retries: u32) -> Self {
        Self {
            store,
            max_conflict_retries,
        }
    }

    /// Draft a new document. Lines are validated for sign and uniqueness;
    /// stock is not checked until posting.
    pub async fn create_adjustment(
        &self,
        tenant_id: Uuid,
        input: NewAdjustment,
    ) -> CoreResult<AdjustmentDocument> {
        validate_document_lines(input.kind, &input.lines)
            .map_err(|message| CoreError::validation("lines", message))?;

        let now = Utc::now();
        let document = AdjustmentDocument {
            id: Uuid::new_v4(),
            tenant_id,
            location_id: input.location_id,
            kind: input.kind,
            status: AdjustmentStatus::Draft,
            lines: input.lines,
            reason_code: input.reason_code,
            created_by: input.created_by,
            approved_by: None,
            approved_at: None,
            posted_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert(&document).await?;

        tracing::info!(
            tenant_id = %tenant_id,
            document_id = %document.id,
            kind = %document.kind,
            lines = document.lines.len(),
            "drafted stock document"
        );
        Ok(document)
    }

    pub async fn get_adjustment(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
    ) -> CoreResult<AdjustmentDocument> {
        self.store.fetch(tenant_id, document_id).await
    }

    pub async fn list_adjustments(
        &self,
        tenant_id: Uuid,
        location_id: Option<Uuid>,
        status: Option<AdjustmentStatus>,
    ) -> CoreResult<Vec<AdjustmentDocument>> {
        AdjustmentStore::list(self.store.as_ref(), tenant_id, location_id, status).await
    }

    /// Replace the lines of a draft wholesale.
    pub async fn update_lines(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        lines: Vec<AdjustmentLine>,
    ) -> CoreResult<AdjustmentDocument> {
        let mut document = self.store.fetch(tenant_id, document_id).await?;
        if !document.is_editable() {
            return Err(CoreError::InvalidStatusTransition {
                from: document.status,
                action: "edit",
            });
        }
        validate_document_lines(document.kind, &lines)
            .map_err(|message| CoreError::validation("lines", message))?;

        document.lines = lines;
        document.updated_at = Utc::now();
        if !self
            .store
            .update(&document, AdjustmentStatus::Draft)
            .await?
        {
            let current = self.store.fetch(tenant_id, document_id).await?;
            return Err(CoreError::InvalidStatusTransition {
                from: current.status,
                action: "edit",
            });
        }
        Ok(document)
    }

    pub async fn approve_adjustment(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        approver: Uuid,
    ) -> CoreResult<AdjustmentDocument> {
        let mut document = self.store.fetch(tenant_id, document_id).await?;
        if document.status != AdjustmentStatus::Draft {
            return Err(CoreError::InvalidStatusTransition {
                from: document.status,
                action: "approve",
            });
        }

        let now = Utc::now();
        document.status = AdjustmentStatus::Approved;
        document.approved_by = Some(approver);
        document.approved_at = Some(now);
        document.updated_at = now;
        if !self
            .store
            .update(&document, AdjustmentStatus::Draft)
            .await?
        {
            let current = self.store.fetch(tenant_id, document_id).await?;
            return Err(CoreError::InvalidStatusTransition {
                from: current.status,
                action: "approve",
            });
        }

        tracing::info!(
            tenant_id = %tenant_id,
            document_id = %document.id,
            approver = %approver,
            "stock document approved"
        );
        Ok(document)
    }

    /// Return an approved document to draft, clearing the approval stamp.
    /// Never touches the ledger.
    pub async fn reject_adjustment(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        reviewer: Uuid,
    ) -> CoreResult<AdjustmentDocument> {
        let mut document = self.store.fetch(tenant_id, document_id).await?;
        if document.status != AdjustmentStatus::Approved {
            return Err(CoreError::InvalidStatusTransition {
                from: document.status,
                action: "reject",
            });
        }

        // A posting that crashed between its append and its stamp leaves
        // the status at Approved with entries already in the ledger. Such
        // a document can only move forward to Posted.
        let appended = self
            .store
            .entries(tenant_id, &EntryFilter::reference(document.reference()))
            .await?;
        if !appended.is_empty() {
            return Err(CoreError::InvalidStatusTransition {
                from: AdjustmentStatus::Posted,
                action: "reject",
            });
        }

        document.status = AdjustmentStatus::Draft;
        document.approved_by = None;
        document.approved_at = None;
        document.updated_at = Utc::now();
        if !self
            .store
            .update(&document, AdjustmentStatus::Approved)
            .await?
        {
            let current = self.store.fetch(tenant_id, document_id).await?;
            return Err(CoreError::InvalidStatusTransition {
                from: current.status,
                action: "reject",
            });
        }

        tracing::info!(
            tenant_id = %tenant_id,
            document_id = %document.id,
            reviewer = %reviewer,
            "stock document rejected back to draft"
        );
        Ok(document)
    }

    /// Post an approved document: one ledger entry per line, appended as a
    /// single guarded batch, then the Posted stamp.
    ///
    /// Version expectations cover every key the document touches, not just
    /// the guarded ones, so two posters of the same document conflict at
    /// the store instead of appending twice. If a previous attempt crashed
    /// after its append, the entries are found under the document's
    /// reference and the document is stamped without a second append.
    pub async fn post_adjustment(
        &self,
        tenant_id: Uuid,
        document_id: Uuid,
        actor: Uuid,
    ) -> CoreResult<AdjustmentDocument> {
        let mut attempts = 0;
        loop {
            attempts += 1;
            let document = self.store.fetch(tenant_id, document_id).await?;
            if document.status != AdjustmentStatus::Approved {
                return Err(CoreError::InvalidStatusTransition {
                    from: document.status,
                    action: "post",
                });
            }

            let already_appended = self
                .store
                .entries(tenant_id, &EntryFilter::reference(document.reference()))
                .await?;
            if !already_appended.is_empty() {
                tracing::warn!(
                    tenant_id = %tenant_id,
                    document_id = %document.id,
                    entries = already_appended.len(),
                    "ledger entries already exist for document, stamping without a second append"
                );
                let appended_at = already_appended
                    .iter()
                    .map(|e| e.created_at)
                    .max()
                    .unwrap_or_else(Utc::now);
                return self.stamp_posted(document, appended_at).await;
            }

            let occurred_at = Utc::now();
            let pending: Vec<PendingMovement> = document
                .lines
                .iter()
                .map(|line| PendingMovement {
                    line_no: Some(line.line_no),
                    entry: NewLedgerEntry {
                        product_id: line.product_id,
                        location_id: document.location_id,
                        lot_id: line.lot_id,
                        movement_type: document.kind.movement_type(),
                        quantity_delta: line.quantity_delta,
                        unit_cost: line.unit_cost,
                        reference: Some(document.reference()),
                        occurred_at,
                        created_by: actor,
                    },
                })
                .collect();

            let mut touched: Vec<PositionKey> = Vec::new();
            for p in &pending {
                let key = p.entry.position_key(tenant_id);
                if !touched.contains(&key) {
                    touched.push(key);
                }
            }
            let expected = self.store.versions(&touched).await?;

            let guard_keys = guarded_keys(tenant_id, &pending);
            let key_entries =
                read_key_entries(self.store.as_ref(), tenant_id, &guard_keys).await?;
            let entries = match resolve_pending(tenant_id, &pending, &key_entries) {
                Ok(entries) => entries,
                Err(violations) => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        document_id = %document.id,
                        violations = violations.len(),
                        "posting rejected: stock would go negative"
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
                    tracing::info!(
                        tenant_id = %tenant_id,
                        document_id = %document.id,
                        batch_id = %batch.batch_id,
                        entries = batch.entries.len(),
                        "posted stock document"
                    );
                    return self.stamp_posted(document, batch.appended_at).await;
                }
                Err(err) if err.is_conflict() && attempts <= self.max_conflict_retries => {
                    tracing::warn!(
                        tenant_id = %tenant_id,
                        document_id = %document.id,
                        attempt = attempts,
                        "posting lost optimistic race, retrying"
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

    async fn stamp_posted(
        &self,
        mut document: AdjustmentDocument,
        posted_at: DateTime<Utc>,
    ) -> CoreResult<AdjustmentDocument> {
        document.status = AdjustmentStatus::Posted;
        document.posted_at = Some(posted_at);
        document.updated_at = Utc::now();
        if self
            .store
            .update(&document, AdjustmentStatus::Approved)
            .await?
        {
            return Ok(document);
        }

        // Lost the stamp race to a concurrent poster; the ledger already
        // holds exactly one set of entries either way.
        let current = self.store.fetch(document.tenant_id, document.id).await?;
        if current.status == AdjustmentStatus::Posted {
            return Ok(current);
        }
        Err(CoreError::Internal(anyhow::anyhow!(
            "document {} moved to {} while its ledger entries were being posted",
            document.id,
            current.status
        )))
    }
}
