//! In-memory stores.
//!
//! Each trait method takes the lock, applies its whole change and releases
//! the lock before returning a ready future, so every call is one atomic
//! step per document, just like a single conditional update in PostgreSQL.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use atelier_core::capacity::{CapacityLedger, CapacityResource, JoinOutcome};
use atelier_core::catalog::{Catalog, ReserveOutcome, StockItem, StockLedger};
use atelier_core::correction::{CorrectionLog, CorrectionRecord};
use atelier_core::error::StoreError;
use atelier_core::grant::{DigitalAccessGrant, GrantStore};
use atelier_core::order::{
    CartLine, CartStore, Order, OrderStatus, OrderStore, StatusUpdate, TransitionOutcome,
};
use atelier_core::types::{
    ConfirmationToken, CorrectionId, ItemId, OrderId, PaymentReference, ResourceId, UserId,
};
use atelier_core::BoxFuture;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::future::ready;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

fn done<'a, T: Send + 'a>(value: T) -> BoxFuture<'a, T> {
    Box::pin(ready(value))
}

// ============================================================================
// Catalog + stock ledger
// ============================================================================

/// Catalog and stock ledger over one map of items.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCatalog {
    items: Arc<RwLock<HashMap<ItemId, StockItem>>>,
}

impl InMemoryCatalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace an item.
    pub fn upsert(&self, item: StockItem) {
        self.items.write().unwrap().insert(item.id, item);
    }

    /// Current available quantity.
    #[must_use]
    pub fn available(&self, item_id: ItemId) -> Option<u32> {
        self.items
            .read()
            .unwrap()
            .get(&item_id)
            .map(|item| item.available_quantity)
    }

    /// Toggle the for-sale flag.
    pub fn set_for_sale(&self, item_id: ItemId, is_for_sale: bool) {
        if let Some(item) = self.items.write().unwrap().get_mut(&item_id) {
            item.is_for_sale = is_for_sale;
        }
    }
}

impl Catalog for InMemoryCatalog {
    fn item(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<StockItem>, StoreError>> {
        done(Ok(self.items.read().unwrap().get(&item_id).cloned()))
    }
}

impl StockLedger for InMemoryCatalog {
    fn try_reserve(
        &self,
        item_id: ItemId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<ReserveOutcome, StoreError>> {
        let mut items = self.items.write().unwrap();
        let result = match items.get_mut(&item_id) {
            None => Err(StoreError::not_found("item", item_id)),
            Some(item) if item.available_quantity >= quantity => {
                item.available_quantity -= quantity;
                Ok(ReserveOutcome::Reserved {
                    remaining: item.available_quantity,
                })
            }
            Some(item) => Ok(ReserveOutcome::Insufficient {
                available: item.available_quantity,
            }),
        };
        done(result)
    }

    fn release(&self, item_id: ItemId, quantity: u32) -> BoxFuture<'_, Result<(), StoreError>> {
        let mut items = self.items.write().unwrap();
        let result = match items.get_mut(&item_id) {
            None => Err(StoreError::not_found("item", item_id)),
            Some(item) => match item.available_quantity.checked_add(quantity) {
                Some(total) => {
                    item.available_quantity = total;
                    Ok(())
                }
                None => Err(StoreError::Database("available quantity overflow".to_string())),
            },
        };
        done(result)
    }
}

// ============================================================================
// Capacity ledger
// ============================================================================

/// Capacity ledger over a map of resources.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCapacityLedger {
    resources: Arc<RwLock<HashMap<ResourceId, CapacityResource>>>,
}

impl InMemoryCapacityLedger {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a resource.
    pub fn upsert(&self, resource: CapacityResource) {
        self.resources.write().unwrap().insert(resource.id, resource);
    }

    /// Snapshot of a resource.
    #[must_use]
    pub fn snapshot(&self, resource_id: ResourceId) -> Option<CapacityResource> {
        self.resources.read().unwrap().get(&resource_id).cloned()
    }

    fn with_resource<T>(
        &self,
        resource_id: ResourceId,
        f: impl FnOnce(&mut CapacityResource) -> T,
    ) -> Result<T, StoreError> {
        self.resources
            .write()
            .unwrap()
            .get_mut(&resource_id)
            .map(f)
            .ok_or_else(|| StoreError::not_found("resource", resource_id))
    }
}

impl CapacityLedger for InMemoryCapacityLedger {
    fn resource(
        &self,
        resource_id: ResourceId,
    ) -> BoxFuture<'_, Result<Option<CapacityResource>, StoreError>> {
        done(Ok(self.snapshot(resource_id)))
    }

    fn try_join(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
        token: ConfirmationToken,
        joined_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<JoinOutcome, StoreError>> {
        done(self.with_resource(resource_id, |r| r.try_admit(member_id, token, joined_at)))
    }

    fn leave(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        done(self.with_resource(resource_id, |r| r.remove(member_id)))
    }

    fn confirm(
        &self,
        resource_id: ResourceId,
        token: ConfirmationToken,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        done(self.with_resource(resource_id, |r| r.confirm(token)))
    }

    fn expire_unconfirmed(
        &self,
        joined_before: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<(ResourceId, UserId)>, StoreError>> {
        let mut resources = self.resources.write().unwrap();
        let expired = resources
            .values_mut()
            .flat_map(|resource| {
                let id = resource.id;
                resource
                    .expire_unconfirmed(joined_before)
                    .into_iter()
                    .map(move |member| (id, member))
            })
            .collect();
        done(Ok(expired))
    }
}

// ============================================================================
// Orders
// ============================================================================

/// Order store over a map of orders.
#[derive(Clone, Debug, Default)]
pub struct InMemoryOrderStore {
    orders: Arc<RwLock<HashMap<OrderId, Order>>>,
    fail_inserts: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `insert` fail with a database error.
    pub fn fail_inserts(&self, fail: bool) {
        self.fail_inserts.store(fail, Ordering::SeqCst);
    }

    /// Number of stored orders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.orders.read().unwrap().len()
    }

    /// Whether no order is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of an order.
    #[must_use]
    pub fn snapshot(&self, order_id: OrderId) -> Option<Order> {
        self.orders.read().unwrap().get(&order_id).cloned()
    }

    /// Overwrite an order, bypassing the status guard (test setup only).
    pub fn put(&self, order: Order) {
        self.orders.write().unwrap().insert(order.id, order);
    }
}

impl OrderStore for InMemoryOrderStore {
    fn insert(&self, order: Order) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return done(Err(StoreError::Database("insert rejected".to_string())));
        }
        let mut orders = self.orders.write().unwrap();
        let result = if orders.contains_key(&order.id) {
            Err(StoreError::Database(format!("duplicate order id {}", order.id)))
        } else {
            orders.insert(order.id, order);
            Ok(())
        };
        done(result)
    }

    fn get(&self, order_id: OrderId) -> BoxFuture<'_, Result<Option<Order>, StoreError>> {
        done(Ok(self.snapshot(order_id)))
    }

    fn transition(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'_, Result<TransitionOutcome, StoreError>> {
        let mut orders = self.orders.write().unwrap();
        let result = match orders.get_mut(&order_id) {
            None => Err(StoreError::not_found("order", order_id)),
            Some(order) if order.status != expected => Ok(TransitionOutcome::StatusMismatch {
                actual: order.status,
            }),
            Some(order) => {
                order.apply_update(&update);
                Ok(TransitionOutcome::Applied(order.clone()))
            }
        };
        done(result)
    }

    fn set_payment_reference(
        &self,
        order_id: OrderId,
        reference: PaymentReference,
    ) -> BoxFuture<'_, Result<PaymentReference, StoreError>> {
        let mut orders = self.orders.write().unwrap();
        let result = match orders.get_mut(&order_id) {
            None => Err(StoreError::not_found("order", order_id)),
            Some(order) => Ok(order
                .payment_reference
                .get_or_insert(reference)
                .clone()),
        };
        done(result)
    }

    fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Order>, StoreError>> {
        let mut stale: Vec<Order> = self
            .orders
            .read()
            .unwrap()
            .values()
            .filter(|o| o.status == OrderStatus::Pending && o.created_at < created_before)
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.created_at);
        stale.truncate(limit);
        done(Ok(stale))
    }
}

// ============================================================================
// Carts
// ============================================================================

/// Cart store that also counts clears.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCartStore {
    carts: Arc<RwLock<HashMap<UserId, Vec<CartLine>>>>,
    clears: Arc<RwLock<HashMap<UserId, usize>>>,
}

impl InMemoryCartStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a line to the buyer's cart.
    pub fn add(&self, buyer_id: UserId, line: CartLine) {
        self.carts
            .write()
            .unwrap()
            .entry(buyer_id)
            .or_default()
            .push(line);
    }

    /// Current lines of the buyer's cart.
    #[must_use]
    pub fn lines(&self, buyer_id: UserId) -> Vec<CartLine> {
        self.carts
            .read()
            .unwrap()
            .get(&buyer_id)
            .cloned()
            .unwrap_or_default()
    }

    /// How many times the buyer's cart was cleared.
    #[must_use]
    pub fn clear_count(&self, buyer_id: UserId) -> usize {
        self.clears
            .read()
            .unwrap()
            .get(&buyer_id)
            .copied()
            .unwrap_or_default()
    }
}

impl CartStore for InMemoryCartStore {
    fn load(&self, buyer_id: UserId) -> BoxFuture<'_, Result<Vec<CartLine>, StoreError>> {
        done(Ok(self.lines(buyer_id)))
    }

    fn clear(&self, buyer_id: UserId) -> BoxFuture<'_, Result<(), StoreError>> {
        self.carts.write().unwrap().remove(&buyer_id);
        *self.clears.write().unwrap().entry(buyer_id).or_default() += 1;
        done(Ok(()))
    }
}

// ============================================================================
// Grants
// ============================================================================

/// Grant store keyed by (buyer, item).
#[derive(Clone, Debug, Default)]
pub struct InMemoryGrantStore {
    grants: Arc<RwLock<HashMap<(UserId, ItemId), DigitalAccessGrant>>>,
    fail_revocations: Arc<AtomicBool>,
}

impl InMemoryGrantStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `revoke_for_order` fail with a database error.
    pub fn fail_revocations(&self, fail: bool) {
        self.fail_revocations.store(fail, Ordering::SeqCst);
    }

    /// Every stored grant.
    #[must_use]
    pub fn all(&self) -> Vec<DigitalAccessGrant> {
        self.grants.read().unwrap().values().cloned().collect()
    }
}

impl GrantStore for InMemoryGrantStore {
    fn create_if_absent(&self, grant: DigitalAccessGrant) -> BoxFuture<'_, Result<bool, StoreError>> {
        let mut grants = self.grants.write().unwrap();
        let key = (grant.buyer_id, grant.item_id);
        let created = if grants.contains_key(&key) {
            false
        } else {
            grants.insert(key, grant);
            true
        };
        done(Ok(created))
    }

    fn activate(&self, grant: DigitalAccessGrant) -> BoxFuture<'_, Result<bool, StoreError>> {
        let mut grants = self.grants.write().unwrap();
        let owned = match grants.get_mut(&(grant.buyer_id, grant.item_id)) {
            None => {
                grants.insert((grant.buyer_id, grant.item_id), grant.activated());
                true
            }
            Some(held) if held.active && held.order_id != grant.order_id => false,
            Some(held) => {
                held.order_id = grant.order_id;
                held.active = true;
                true
            }
        };
        done(Ok(owned))
    }

    fn revoke_for_order(&self, order_id: OrderId) -> BoxFuture<'_, Result<u64, StoreError>> {
        if self.fail_revocations.load(Ordering::SeqCst) {
            return done(Err(StoreError::Database("grant store unavailable".to_string())));
        }
        let mut grants = self.grants.write().unwrap();
        let before = grants.len();
        grants.retain(|_, grant| grant.order_id != order_id);
        done(Ok((before - grants.len()) as u64))
    }

    fn find(
        &self,
        buyer_id: UserId,
        item_id: ItemId,
    ) -> BoxFuture<'_, Result<Option<DigitalAccessGrant>, StoreError>> {
        done(Ok(self.grants.read().unwrap().get(&(buyer_id, item_id)).cloned()))
    }
}

// ============================================================================
// Correction log
// ============================================================================

/// Correction log kept in insertion order.
#[derive(Clone, Debug, Default)]
pub struct InMemoryCorrectionLog {
    records: Arc<RwLock<Vec<CorrectionRecord>>>,
    fail_writes: Arc<AtomicBool>,
}

impl InMemoryCorrectionLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `record` fail with a database error.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Every record, resolved or not.
    #[must_use]
    pub fn all(&self) -> Vec<CorrectionRecord> {
        self.records.read().unwrap().clone()
    }
}

impl CorrectionLog for InMemoryCorrectionLog {
    fn record(&self, record: CorrectionRecord) -> BoxFuture<'_, Result<(), StoreError>> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return done(Err(StoreError::Database("correction log unavailable".to_string())));
        }
        self.records.write().unwrap().push(record);
        done(Ok(()))
    }

    fn pending(&self, limit: usize) -> BoxFuture<'_, Result<Vec<CorrectionRecord>, StoreError>> {
        let pending = self
            .records
            .read()
            .unwrap()
            .iter()
            .filter(|r| !r.is_resolved())
            .take(limit)
            .cloned()
            .collect();
        done(Ok(pending))
    }

    fn resolve(
        &self,
        id: CorrectionId,
        resolved_by: String,
        resolved_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<bool, StoreError>> {
        let mut records = self.records.write().unwrap();
        let resolved = match records.iter_mut().find(|r| r.id == id && !r.is_resolved()) {
            Some(record) => {
                record.resolved_at = Some(resolved_at);
                record.resolved_by = Some(resolved_by);
                true
            }
            None => false,
        };
        done(Ok(resolved))
    }
}
