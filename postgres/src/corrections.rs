//! Manual-correction log.
//!
//! Open records are the operator's work queue; they are listed oldest first
//! and closed with the name of whoever fixed the ledger.

use crate::{db_error, decode_error, limit_param, PostgresStore};
use atelier_core::correction::{CorrectionKind, CorrectionLog, CorrectionRecord};
use atelier_core::error::StoreError;
use atelier_core::types::{CorrectionId, OrderId};
use atelier_core::BoxFuture;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

impl PostgresStore {
    async fn insert_correction(&self, record: CorrectionRecord) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO correction_records (
                id, kind, order_id, reason, recorded_at, resolved_at, resolved_by
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ",
        )
        .bind(*record.id.as_uuid())
        .bind(Json(&record.kind))
        .bind(record.order_id.map(|id| *id.as_uuid()))
        .bind(&record.reason)
        .bind(record.recorded_at)
        .bind(record.resolved_at)
        .bind(record.resolved_by.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        metrics::counter!("correction_records_total", "kind" => record.kind.label()).increment(1);
        Ok(())
    }

    async fn list_open(&self, limit: usize) -> Result<Vec<CorrectionRecord>, StoreError> {
        let rows = sqlx::query(
            r"
            SELECT id, kind, order_id, reason, recorded_at, resolved_at, resolved_by
            FROM correction_records
            WHERE resolved_at IS NULL
            ORDER BY recorded_at ASC
            LIMIT $1
            ",
        )
        .bind(limit_param(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_record).collect()
    }

    async fn close(
        &self,
        id: CorrectionId,
        resolved_by: String,
        resolved_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            UPDATE correction_records
            SET resolved_at = $2, resolved_by = $3
            WHERE id = $1 AND resolved_at IS NULL
            ",
        )
        .bind(*id.as_uuid())
        .bind(resolved_at)
        .bind(&resolved_by)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        let resolved = result.rows_affected() == 1;
        if resolved {
            tracing::info!(correction_id = %id, resolved_by = %resolved_by, "Correction record resolved");
        }
        Ok(resolved)
    }
}

fn row_to_record(row: &PgRow) -> Result<CorrectionRecord, StoreError> {
    let Json(kind): Json<CorrectionKind> = row.try_get("kind").map_err(decode_error)?;
    let order_id: Option<Uuid> = row.try_get("order_id").map_err(decode_error)?;

    Ok(CorrectionRecord {
        id: CorrectionId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode_error)?),
        kind,
        order_id: order_id.map(OrderId::from_uuid),
        reason: row.try_get("reason").map_err(decode_error)?,
        recorded_at: row.try_get("recorded_at").map_err(decode_error)?,
        resolved_at: row.try_get("resolved_at").map_err(decode_error)?,
        resolved_by: row.try_get("resolved_by").map_err(decode_error)?,
    })
}

impl CorrectionLog for PostgresStore {
    fn record(&self, record: CorrectionRecord) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.insert_correction(record))
    }

    fn pending(&self, limit: usize) -> BoxFuture<'_, Result<Vec<CorrectionRecord>, StoreError>> {
        Box::pin(self.list_open(limit))
    }

    fn resolve(
        &self,
        id: CorrectionId,
        resolved_by: String,
        resolved_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(self.close(id, resolved_by, resolved_at))
    }
}
