//! `PostgreSQL` backend for the Atelier marketplace engine.
//!
//! [`PostgresStore`] implements every store trait of `atelier-core` over one
//! connection pool:
//!
//! - Stock reservations are a single guarded `UPDATE ... WHERE
//!   available_quantity >= $n`, so the counter can never go negative
//! - Order transitions are a single `UPDATE ... WHERE status = $expected`
//! - Capacity resources keep their member list in one JSONB column and are
//!   changed under a row lock, so the membership and capacity checks see the
//!   same document they write
//! - Access grants are unique per (buyer, item)
//!
//! # Example
//!
//! ```ignore
//! use atelier_postgres::PostgresStore;
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = PostgresStore::connect("postgres://localhost/atelier", 10).await?;
//!     store.migrate().await?;
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use atelier_core::error::StoreError;
use atelier_core::types::Money;
use sqlx::postgres::{PgPool, PgPoolOptions};

mod capacity;
mod catalog;
mod corrections;
mod grants;
mod orders;

/// Every store trait over one `PostgreSQL` pool.
///
/// Cloning is cheap; clones share the pool.
#[derive(Clone, Debug)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connect with a pool of at most `max_connections`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if the connection fails.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Database(format!("Failed to connect: {e}")))?;
        Ok(Self::from_pool(pool))
    }

    /// Wrap an existing pool.
    #[must_use]
    pub const fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create or upgrade the schema.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Database`] if a migration fails.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| StoreError::Database(format!("Migration failed: {e}")))?;
        Ok(())
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_error(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn decode_error(e: sqlx::Error) -> StoreError {
    StoreError::Serialization(e.to_string())
}

fn money_column(value: i64, column: &str) -> Result<Money, StoreError> {
    u64::try_from(value)
        .map(Money::from_cents)
        .map_err(|_| StoreError::Serialization(format!("negative amount in {column}: {value}")))
}

fn money_param(amount: Money) -> Result<i64, StoreError> {
    i64::try_from(amount.cents())
        .map_err(|_| StoreError::Serialization(format!("amount {amount} exceeds BIGINT")))
}

fn count_column(value: i64, column: &str) -> Result<u32, StoreError> {
    u32::try_from(value)
        .map_err(|_| StoreError::Serialization(format!("{column} out of range: {value}")))
}

#[allow(clippy::cast_possible_wrap)] // Batch limits are small
const fn limit_param(limit: usize) -> i64 {
    limit as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn amounts_outside_bigint_are_rejected() {
        assert_eq!(money_param(Money::from_cents(42)), Ok(42));
        assert!(money_param(Money::from_cents(u64::MAX)).is_err());
        assert!(money_column(-1, "subtotal_cents").is_err());
        assert_eq!(count_column(7, "quantity"), Ok(7));
        assert!(count_column(i64::from(u32::MAX) + 1, "quantity").is_err());
    }
}
