//! Capacity ledger.
//!
//! Each change locks the resource row, applies the rule from
//! [`CapacityResource`] and writes the member list back before the lock is
//! released.

use crate::{count_column, db_error, decode_error, PostgresStore};
use atelier_core::capacity::{CapacityLedger, CapacityResource, JoinOutcome, Membership};
use atelier_core::error::StoreError;
use atelier_core::types::{ConfirmationToken, ResourceId, UserId};
use atelier_core::BoxFuture;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::{Postgres, Row, Transaction};
use uuid::Uuid;

impl PostgresStore {
    /// Insert a resource or replace its capacity and members.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn upsert_resource(&self, resource: &CapacityResource) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO capacity_resources (id, max_capacity, members)
            VALUES ($1, $2, $3)
            ON CONFLICT (id) DO UPDATE
            SET max_capacity = EXCLUDED.max_capacity,
                members = EXCLUDED.members
            ",
        )
        .bind(*resource.id.as_uuid())
        .bind(i64::from(resource.max_capacity))
        .bind(Json(&resource.members))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn load_resource(
        &self,
        resource_id: ResourceId,
    ) -> Result<Option<CapacityResource>, StoreError> {
        let row = sqlx::query("SELECT id, max_capacity, members FROM capacity_resources WHERE id = $1")
            .bind(*resource_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_resource).transpose()
    }

    /// Apply `change` to the resource while holding its row lock.
    async fn with_resource<T, F>(&self, resource_id: ResourceId, change: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut CapacityResource) -> T + Send,
        T: Send,
    {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let row = sqlx::query(
            r"
            SELECT id, max_capacity, members
            FROM capacity_resources
            WHERE id = $1
            FOR UPDATE
            ",
        )
        .bind(*resource_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;

        let Some(row) = row else {
            let _ = tx.rollback().await;
            return Err(StoreError::not_found("resource", resource_id));
        };

        let mut resource = row_to_resource(&row)?;
        let before = resource.members.clone();
        let result = change(&mut resource);
        if resource.members != before {
            write_members(&mut tx, &resource).await?;
        }

        tx.commit().await.map_err(db_error)?;
        Ok(result)
    }

    async fn expire_members(
        &self,
        joined_before: DateTime<Utc>,
    ) -> Result<Vec<(ResourceId, UserId)>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let rows = sqlx::query(
            r#"
            SELECT id, max_capacity, members
            FROM capacity_resources
            WHERE members @> '[{"status": "not_confirmed"}]'::jsonb
            FOR UPDATE
            "#,
        )
        .fetch_all(&mut *tx)
        .await
        .map_err(db_error)?;

        let mut expired = Vec::new();
        for row in &rows {
            let mut resource = row_to_resource(row)?;
            let members = resource.expire_unconfirmed(joined_before);
            if !members.is_empty() {
                write_members(&mut tx, &resource).await?;
                expired.extend(members.into_iter().map(|member| (resource.id, member)));
            }
        }

        tx.commit().await.map_err(db_error)?;
        Ok(expired)
    }
}

async fn write_members(
    tx: &mut Transaction<'_, Postgres>,
    resource: &CapacityResource,
) -> Result<(), StoreError> {
    sqlx::query("UPDATE capacity_resources SET members = $2 WHERE id = $1")
        .bind(*resource.id.as_uuid())
        .bind(Json(&resource.members))
        .execute(&mut **tx)
        .await
        .map_err(db_error)?;
    Ok(())
}

fn row_to_resource(row: &PgRow) -> Result<CapacityResource, StoreError> {
    let Json(members): Json<Vec<Membership>> = row.try_get("members").map_err(decode_error)?;
    Ok(CapacityResource {
        id: ResourceId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode_error)?),
        max_capacity: count_column(
            row.try_get("max_capacity").map_err(decode_error)?,
            "max_capacity",
        )?,
        members,
    })
}

impl CapacityLedger for PostgresStore {
    fn resource(
        &self,
        resource_id: ResourceId,
    ) -> BoxFuture<'_, Result<Option<CapacityResource>, StoreError>> {
        Box::pin(self.load_resource(resource_id))
    }

    fn try_join(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
        token: ConfirmationToken,
        joined_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<JoinOutcome, StoreError>> {
        Box::pin(self.with_resource(resource_id, move |resource| {
            resource.try_admit(member_id, token, joined_at)
        }))
    }

    fn leave(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(self.with_resource(resource_id, move |resource| resource.remove(member_id)))
    }

    fn confirm(
        &self,
        resource_id: ResourceId,
        token: ConfirmationToken,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        Box::pin(self.with_resource(resource_id, move |resource| resource.confirm(token)))
    }

    fn expire_unconfirmed(
        &self,
        joined_before: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<(ResourceId, UserId)>, StoreError>> {
        Box::pin(self.expire_members(joined_before))
    }
}
