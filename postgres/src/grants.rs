//! Digital access grants, unique per (buyer, item).

use crate::{db_error, decode_error, PostgresStore};
use atelier_core::error::StoreError;
use atelier_core::grant::{DigitalAccessGrant, GrantStore};
use atelier_core::types::{ItemId, OrderId, UserId};
use atelier_core::BoxFuture;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

impl PostgresStore {
    async fn insert_grant(&self, grant: DigitalAccessGrant) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO access_grants (buyer_id, item_id, order_id, active, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (buyer_id, item_id) DO NOTHING
            ",
        )
        .bind(*grant.buyer_id.as_uuid())
        .bind(*grant.item_id.as_uuid())
        .bind(*grant.order_id.as_uuid())
        .bind(grant.active)
        .bind(grant.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_grant(&self, grant: DigitalAccessGrant) -> Result<bool, StoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO access_grants (buyer_id, item_id, order_id, active, created_at)
            VALUES ($1, $2, $3, TRUE, $4)
            ON CONFLICT (buyer_id, item_id) DO UPDATE
            SET order_id = EXCLUDED.order_id, active = TRUE
            WHERE NOT access_grants.active OR access_grants.order_id = EXCLUDED.order_id
            ",
        )
        .bind(*grant.buyer_id.as_uuid())
        .bind(*grant.item_id.as_uuid())
        .bind(*grant.order_id.as_uuid())
        .bind(grant.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete_grants(&self, order_id: OrderId) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM access_grants WHERE order_id = $1")
            .bind(*order_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(result.rows_affected())
    }

    async fn find_grant(
        &self,
        buyer_id: UserId,
        item_id: ItemId,
    ) -> Result<Option<DigitalAccessGrant>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT buyer_id, item_id, order_id, active, created_at
            FROM access_grants
            WHERE buyer_id = $1 AND item_id = $2
            ",
        )
        .bind(*buyer_id.as_uuid())
        .bind(*item_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;
        row.as_ref().map(row_to_grant).transpose()
    }
}

fn row_to_grant(row: &PgRow) -> Result<DigitalAccessGrant, StoreError> {
    Ok(DigitalAccessGrant {
        buyer_id: UserId::from_uuid(row.try_get::<Uuid, _>("buyer_id").map_err(decode_error)?),
        item_id: ItemId::from_uuid(row.try_get::<Uuid, _>("item_id").map_err(decode_error)?),
        order_id: OrderId::from_uuid(row.try_get::<Uuid, _>("order_id").map_err(decode_error)?),
        active: row.try_get("active").map_err(decode_error)?,
        created_at: row.try_get("created_at").map_err(decode_error)?,
    })
}

impl GrantStore for PostgresStore {
    fn create_if_absent(&self, grant: DigitalAccessGrant) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(self.insert_grant(grant))
    }

    fn activate(&self, grant: DigitalAccessGrant) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(self.claim_grant(grant))
    }

    fn revoke_for_order(&self, order_id: OrderId) -> BoxFuture<'_, Result<u64, StoreError>> {
        Box::pin(self.delete_grants(order_id))
    }

    fn find(
        &self,
        buyer_id: UserId,
        item_id: ItemId,
    ) -> BoxFuture<'_, Result<Option<DigitalAccessGrant>, StoreError>> {
        Box::pin(self.find_grant(buyer_id, item_id))
    }
}
