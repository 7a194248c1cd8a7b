//! Orders and carts.

use crate::{count_column, db_error, decode_error, limit_param, money_column, money_param, PostgresStore};
use atelier_core::commission::CommissionRate;
use atelier_core::error::StoreError;
use atelier_core::order::{
    CartLine, CartStore, Order, OrderLine, OrderStatus, OrderStore, ShippingAddress, StatusUpdate,
    TransitionOutcome,
};
use atelier_core::types::{ItemId, OrderId, PaymentReference, UserId};
use atelier_core::BoxFuture;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

const ORDER_COLUMNS: &str = "id, buyer_id, status, lines, subtotal_cents, platform_fee_total_cents, \
     total_amount_cents, platform_fee_rate_bp, payment_reference, shipping, created_at, updated_at, \
     paid_at, shipped_at, delivered_at, refunded_at, refund_reason";

impl PostgresStore {
    async fn insert_order(&self, order: Order) -> Result<(), StoreError> {
        let rate = i32::try_from(order.platform_fee_rate.basis_points())
            .map_err(|e| StoreError::Serialization(e.to_string()))?;

        sqlx::query(
            r"
            INSERT INTO orders (
                id, buyer_id, status, lines, subtotal_cents, platform_fee_total_cents,
                total_amount_cents, platform_fee_rate_bp, payment_reference, shipping,
                created_at, updated_at, paid_at, shipped_at, delivered_at, refunded_at,
                refund_reason
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            ",
        )
        .bind(*order.id.as_uuid())
        .bind(*order.buyer_id.as_uuid())
        .bind(order.status.as_str())
        .bind(Json(&order.lines))
        .bind(money_param(order.subtotal)?)
        .bind(money_param(order.platform_fee_total)?)
        .bind(money_param(order.total_amount)?)
        .bind(rate)
        .bind(order.payment_reference.as_ref().map(PaymentReference::as_str))
        .bind(order.shipping.as_ref().map(Json))
        .bind(order.created_at)
        .bind(order.updated_at)
        .bind(order.paid_at)
        .bind(order.shipped_at)
        .bind(order.delivered_at)
        .bind(order.refunded_at)
        .bind(order.refund_reason.as_deref())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn load_order(&self, order_id: OrderId) -> Result<Option<Order>, StoreError> {
        let query = format!("SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1");
        let row = sqlx::query(&query)
            .bind(*order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(row_to_order).transpose()
    }

    async fn transition_order(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        update: StatusUpdate,
    ) -> Result<TransitionOutcome, StoreError> {
        let query = format!(
            r"
            UPDATE orders
            SET status = $3::text,
                updated_at = $4::timestamptz,
                paid_at = CASE WHEN $3::text = 'paid' THEN $4::timestamptz ELSE paid_at END,
                shipped_at = CASE WHEN $3::text = 'shipped' THEN $4::timestamptz ELSE shipped_at END,
                delivered_at = CASE WHEN $3::text = 'delivered' THEN $4::timestamptz ELSE delivered_at END,
                refunded_at = CASE WHEN $3::text = 'cancelled' THEN $4::timestamptz ELSE refunded_at END,
                refund_reason = CASE WHEN $3::text = 'cancelled' THEN $5::text ELSE refund_reason END
            WHERE id = $1 AND status = $2
            RETURNING {ORDER_COLUMNS}
            "
        );
        let row = sqlx::query(&query)
            .bind(*order_id.as_uuid())
            .bind(expected.as_str())
            .bind(update.to.as_str())
            .bind(update.at)
            .bind(update.refund_reason.as_deref())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        if let Some(row) = row {
            return row_to_order(&row).map(TransitionOutcome::Applied);
        }

        let actual: Option<(String,)> = sqlx::query_as("SELECT status FROM orders WHERE id = $1")
            .bind(*order_id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        match actual {
            Some((status,)) => Ok(TransitionOutcome::StatusMismatch {
                actual: parse_status(&status)?,
            }),
            None => Err(StoreError::not_found("order", order_id)),
        }
    }

    async fn store_payment_reference(
        &self,
        order_id: OrderId,
        reference: PaymentReference,
    ) -> Result<PaymentReference, StoreError> {
        let stored: Option<(String,)> = sqlx::query_as(
            r"
            UPDATE orders
            SET payment_reference = COALESCE(payment_reference, $2)
            WHERE id = $1
            RETURNING payment_reference
            ",
        )
        .bind(*order_id.as_uuid())
        .bind(reference.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        stored
            .map(|(reference,)| PaymentReference::new(reference))
            .ok_or_else(|| StoreError::not_found("order", order_id))
    }

    async fn load_stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Order>, StoreError> {
        let query = format!(
            r"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE status = 'pending' AND created_at < $1
            ORDER BY created_at ASC
            LIMIT $2
            "
        );
        let rows = sqlx::query(&query)
            .bind(created_before)
            .bind(limit_param(limit))
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;

        rows.iter().map(row_to_order).collect()
    }

    /// Append a line to a buyer's cart.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the write fails.
    pub async fn add_to_cart(&self, buyer_id: UserId, line: CartLine) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO cart_lines (buyer_id, item_id, quantity) VALUES ($1, $2, $3)")
            .bind(*buyer_id.as_uuid())
            .bind(*line.item_id.as_uuid())
            .bind(i64::from(line.quantity))
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }

    async fn load_cart(&self, buyer_id: UserId) -> Result<Vec<CartLine>, StoreError> {
        let rows: Vec<(Uuid, i64)> = sqlx::query_as(
            "SELECT item_id, quantity FROM cart_lines WHERE buyer_id = $1 ORDER BY position",
        )
        .bind(*buyer_id.as_uuid())
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.into_iter()
            .map(|(item_id, quantity)| {
                Ok(CartLine::new(
                    ItemId::from_uuid(item_id),
                    count_column(quantity, "quantity")?,
                ))
            })
            .collect()
    }

    async fn clear_cart(&self, buyer_id: UserId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM cart_lines WHERE buyer_id = $1")
            .bind(*buyer_id.as_uuid())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

fn parse_status(status: &str) -> Result<OrderStatus, StoreError> {
    OrderStatus::parse(status)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid order status: {status}")))
}

fn row_to_order(row: &PgRow) -> Result<Order, StoreError> {
    let status: String = row.try_get("status").map_err(decode_error)?;
    let Json(lines): Json<Vec<OrderLine>> = row.try_get("lines").map_err(decode_error)?;
    let shipping: Option<Json<ShippingAddress>> = row.try_get("shipping").map_err(decode_error)?;
    let reference: Option<String> = row.try_get("payment_reference").map_err(decode_error)?;
    let rate: i32 = row.try_get("platform_fee_rate_bp").map_err(decode_error)?;
    let platform_fee_rate = u32::try_from(rate)
        .ok()
        .and_then(CommissionRate::from_basis_points)
        .ok_or_else(|| StoreError::Serialization(format!("Invalid commission rate: {rate}")))?;

    Ok(Order {
        id: OrderId::from_uuid(row.try_get::<Uuid, _>("id").map_err(decode_error)?),
        buyer_id: UserId::from_uuid(row.try_get::<Uuid, _>("buyer_id").map_err(decode_error)?),
        lines,
        status: parse_status(&status)?,
        subtotal: money_column(row.try_get("subtotal_cents").map_err(decode_error)?, "subtotal_cents")?,
        platform_fee_total: money_column(
            row.try_get("platform_fee_total_cents").map_err(decode_error)?,
            "platform_fee_total_cents",
        )?,
        total_amount: money_column(
            row.try_get("total_amount_cents").map_err(decode_error)?,
            "total_amount_cents",
        )?,
        platform_fee_rate,
        payment_reference: reference.map(PaymentReference::new),
        shipping: shipping.map(|Json(address)| address),
        created_at: row.try_get("created_at").map_err(decode_error)?,
        updated_at: row.try_get("updated_at").map_err(decode_error)?,
        paid_at: row.try_get("paid_at").map_err(decode_error)?,
        shipped_at: row.try_get("shipped_at").map_err(decode_error)?,
        delivered_at: row.try_get("delivered_at").map_err(decode_error)?,
        refunded_at: row.try_get("refunded_at").map_err(decode_error)?,
        refund_reason: row.try_get("refund_reason").map_err(decode_error)?,
    })
}

impl OrderStore for PostgresStore {
    fn insert(&self, order: Order) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.insert_order(order))
    }

    fn get(&self, order_id: OrderId) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        Box::pin(self.load_order(order_id))
    }

    fn transition(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'_, Result<TransitionOutcome, StoreError>> {
        Box::pin(self.transition_order(order_id, expected, update))
    }

    fn set_payment_reference(
        &self,
        order_id: OrderId,
        reference: PaymentReference,
    ) -> BoxFuture<'_, Result<PaymentReference, StoreError>> {
        Box::pin(self.store_payment_reference(order_id, reference))
    }

    fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Order>, StoreError>> {
        Box::pin(self.load_stale_pending(created_before, limit))
    }
}

impl CartStore for PostgresStore {
    fn load(&self, buyer_id: UserId) -> BoxFuture<'_, Result<Vec<CartLine>, StoreError>> {
        Box::pin(self.load_cart(buyer_id))
    }

    fn clear(&self, buyer_id: UserId) -> BoxFuture<'_, Result<(), StoreError>> {
        Box::pin(self.clear_cart(buyer_id))
    }
}
