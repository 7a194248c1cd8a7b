//! Catalog reads and the stock ledger.

use crate::{count_column, db_error, decode_error, money_column, money_param, PostgresStore};
use atelier_core::catalog::{Catalog, ItemKind, ReserveOutcome, StockItem, StockLedger};
use atelier_core::error::StoreError;
use atelier_core::types::{ItemId, UserId};
use atelier_core::BoxFuture;
use sqlx::postgres::PgRow;
use sqlx::Row;
use uuid::Uuid;

impl PostgresStore {
    /// Insert an item or replace its listing and stock.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn upsert_item(&self, item: &StockItem) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO stock_items (
                id, seller_id, title, kind, unit_price_cents, is_for_sale, available_quantity
            ) VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO UPDATE
            SET seller_id = EXCLUDED.seller_id,
                title = EXCLUDED.title,
                kind = EXCLUDED.kind,
                unit_price_cents = EXCLUDED.unit_price_cents,
                is_for_sale = EXCLUDED.is_for_sale,
                available_quantity = EXCLUDED.available_quantity
            ",
        )
        .bind(*item.id.as_uuid())
        .bind(*item.seller_id.as_uuid())
        .bind(&item.title)
        .bind(item.kind.as_str())
        .bind(money_param(item.unit_price)?)
        .bind(item.is_for_sale)
        .bind(i64::from(item.available_quantity))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn load_item(&self, item_id: ItemId) -> Result<Option<StockItem>, StoreError> {
        let row = sqlx::query(
            r"
            SELECT id, seller_id, title, kind, unit_price_cents, is_for_sale, available_quantity
            FROM stock_items
            WHERE id = $1
            ",
        )
        .bind(*item_id.as_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.as_ref().map(row_to_item).transpose()
    }

    async fn reserve(&self, item_id: ItemId, quantity: u32) -> Result<ReserveOutcome, StoreError> {
        let remaining: Option<(i64,)> = sqlx::query_as(
            r"
            UPDATE stock_items
            SET available_quantity = available_quantity - $2
            WHERE id = $1 AND available_quantity >= $2
            RETURNING available_quantity
            ",
        )
        .bind(*item_id.as_uuid())
        .bind(i64::from(quantity))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some((remaining,)) = remaining {
            return Ok(ReserveOutcome::Reserved {
                remaining: count_column(remaining, "available_quantity")?,
            });
        }

        // Nothing updated: either too few units or no such item.
        let available: Option<(i64,)> =
            sqlx::query_as("SELECT available_quantity FROM stock_items WHERE id = $1")
                .bind(*item_id.as_uuid())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;

        match available {
            Some((available,)) => Ok(ReserveOutcome::Insufficient {
                available: count_column(available, "available_quantity")?,
            }),
            None => Err(StoreError::not_found("item", item_id)),
        }
    }

    async fn give_back(&self, item_id: ItemId, quantity: u32) -> Result<(), StoreError> {
        let result = sqlx::query(
            r"
            UPDATE stock_items
            SET available_quantity = available_quantity + $2
            WHERE id = $1
            ",
        )
        .bind(*item_id.as_uuid())
        .bind(i64::from(quantity))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::not_found("item", item_id));
        }
        Ok(())
    }
}

fn row_to_item(row: &PgRow) -> Result<StockItem, StoreError> {
    let kind: String = row.try_get("kind").map_err(decode_error)?;
    let kind = ItemKind::parse(&kind)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid item kind: {kind}")))?;

    Ok(StockItem {
        id: ItemId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode_error)?),
        seller_id: UserId::from_uuid(row.try_get::<Uuid, _>("seller_id").map_err(decode_error)?),
        title: row.try_get("title").map_err(decode_error)?,
        kind,
        unit_price: money_column(
            row.try_get("unit_price_cents").map_err(decode_error)?,
            "unit_price_cents",
        )?,
        is_for_sale: row.try_get("is_for_sale").map_err(decode_error)?,
        available_quantity: count_column(
            row.try_get("available_quantity").map_err(decode_error)?,
            "available_quantity",
        )?,
    })
}

impl Catalog for PostgresStore {
    fn item(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<StockItem>, StoreError>> {
        Box::pin(self.load_item(item_id))
    }
}

impl StockLedger for PostgresStore {
    fn try_reserve(
        &self,
        item_id: ItemId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<ReserveOutcome, StoreError>> {
        Box::pin(self.reserve(item_id, quantity))
    }

    fn release(&self, item_id: ItemId, quantity: u32) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.give_back(item_id, quantity))
    }
}
