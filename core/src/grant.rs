//! Digital access grants for paid video content.
//!
//! At most one grant exists per (buyer, item). A grant is created inactive at
//! checkout and deleted when the order that owns it is cancelled. When an
//! order is paid it takes ownership of the buyer's grant for each of its
//! digital items, unless another paid order already holds it active.

use crate::error::StoreError;
use crate::types::{ItemId, OrderId, UserId};
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Access to one digital item for one buyer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalAccessGrant {
    /// Grantee
    pub buyer_id: UserId,
    /// Digital item
    pub item_id: ItemId,
    /// Order that owns the grant
    pub order_id: OrderId,
    /// Whether the buyer can currently watch
    pub active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl DigitalAccessGrant {
    /// A new, inactive grant.
    #[must_use]
    pub const fn inactive(
        buyer_id: UserId,
        item_id: ItemId,
        order_id: OrderId,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            buyer_id,
            item_id,
            order_id,
            active: false,
            created_at,
        }
    }

    /// The same grant, active.
    #[must_use]
    pub const fn activated(mut self) -> Self {
        self.active = true;
        self
    }
}

/// Grant documents keyed by (buyer, item).
pub trait GrantStore: Send + Sync {
    /// Insert `grant` unless one exists for its (buyer, item). Returns
    /// whether it was inserted.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn create_if_absent(&self, grant: DigitalAccessGrant) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Make `grant.order_id` the owner of an active grant for (buyer, item),
    /// in one atomic step.
    ///
    /// Inserts the grant if none exists, and takes over an inactive grant
    /// owned by any order. An active grant owned by another order is left
    /// alone. Returns whether the buyer's grant now belongs to
    /// `grant.order_id`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn activate(&self, grant: DigitalAccessGrant) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Delete every grant owned by `order_id`. Returns how many were removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn revoke_for_order(&self, order_id: OrderId) -> BoxFuture<'_, Result<u64, StoreError>>;

    /// The grant for (buyer, item), if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn find(
        &self,
        buyer_id: UserId,
        item_id: ItemId,
    ) -> BoxFuture<'_, Result<Option<DigitalAccessGrant>, StoreError>>;
}
