//! A fully wired engine over in-memory stores.

use crate::collaborators::{FaultyStockLedger, RecordingNotifier, ScriptedPaymentProvider};
use crate::mocks::{ManualClock, SequentialIds};
use crate::stores::{
    InMemoryCapacityLedger, InMemoryCartStore, InMemoryCatalog, InMemoryCorrectionLog,
    InMemoryGrantStore, InMemoryOrderStore,
};
use atelier_core::capacity::CapacityResource;
use atelier_core::catalog::{ItemKind, StockItem};
use atelier_core::commission::CommissionRate;
use atelier_core::order::{Order, OrderLine, ShippingAddress};
use atelier_core::types::{ItemId, Money, OrderId, ResourceId, UserId};
use atelier_runtime::retry::RetryPolicy;
use atelier_runtime::{EngineSettings, Marketplace, MarketplaceEnvironment};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;

/// Settings with millisecond retries so failure tests stay fast.
#[must_use]
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        compensation_retry: RetryPolicy::builder()
            .max_retries(2)
            .initial_delay(Duration::from_millis(1))
            .max_delay(Duration::from_millis(5))
            .build(),
        ..EngineSettings::default()
    }
}

/// A complete shipping address.
#[must_use]
pub fn address() -> ShippingAddress {
    ShippingAddress {
        recipient: "Berthe Morisot".to_string(),
        line1: "12 Rue de Passy".to_string(),
        line2: None,
        city: "Paris".to_string(),
        postal_code: "75016".to_string(),
        country: "FR".to_string(),
    }
}

/// A `pending` order with one physical line, for store tests.
#[must_use]
pub fn sample_order(buyer_id: UserId, created_at: DateTime<Utc>) -> Order {
    let item = StockItem {
        id: ItemId::new(),
        seller_id: UserId::new(),
        title: "Water lilies".to_string(),
        kind: ItemKind::Physical,
        unit_price: Money::from_cents(25_000),
        is_for_sale: true,
        available_quantity: 1,
    };
    let line = OrderLine {
        item_id: item.id,
        seller_id: item.seller_id,
        kind: item.kind,
        quantity: 1,
        unit_price_at_purchase: item.unit_price,
        platform_fee: Money::from_cents(2_500),
        seller_earnings: Money::from_cents(22_500),
    };
    Order {
        id: OrderId::new(),
        buyer_id,
        lines: vec![line],
        status: atelier_core::order::OrderStatus::Pending,
        subtotal: Money::from_cents(25_000),
        platform_fee_total: Money::from_cents(2_500),
        total_amount: Money::from_cents(25_000),
        platform_fee_rate: CommissionRate::DEFAULT,
        payment_reference: None,
        shipping: Some(address()),
        created_at,
        updated_at: created_at,
        paid_at: None,
        shipped_at: None,
        delivered_at: None,
        refunded_at: None,
        refund_reason: None,
    }
}

/// Engine plus handles on every in-memory collaborator.
#[derive(Debug, Clone)]
pub struct TestMarketplace {
    /// The engine under test
    pub market: Marketplace,
    /// The environment it runs over
    pub env: Arc<MarketplaceEnvironment>,
    /// Catalog and underlying stock counters
    pub catalog: InMemoryCatalog,
    /// Stock ledger as seen by the engine (fault injection)
    pub stock: FaultyStockLedger,
    /// Event memberships
    pub capacity: InMemoryCapacityLedger,
    /// Orders
    pub orders: InMemoryOrderStore,
    /// Carts
    pub carts: InMemoryCartStore,
    /// Access grants
    pub grants: InMemoryGrantStore,
    /// Correction records
    pub corrections: InMemoryCorrectionLog,
    /// Payment provider
    pub payments: ScriptedPaymentProvider,
    /// Notifications sent
    pub notifier: RecordingNotifier,
    /// Time
    pub clock: ManualClock,
}

impl Default for TestMarketplace {
    fn default() -> Self {
        Self::new()
    }
}

impl TestMarketplace {
    /// Engine with [`fast_settings`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(fast_settings())
    }

    /// Engine with custom settings.
    #[must_use]
    pub fn with_settings(settings: EngineSettings) -> Self {
        let catalog = InMemoryCatalog::new();
        let stock = FaultyStockLedger::new(Arc::new(catalog.clone()));
        let capacity = InMemoryCapacityLedger::new();
        let orders = InMemoryOrderStore::new();
        let carts = InMemoryCartStore::new();
        let grants = InMemoryGrantStore::new();
        let corrections = InMemoryCorrectionLog::new();
        let payments = ScriptedPaymentProvider::new();
        let notifier = RecordingNotifier::new();
        let clock = ManualClock::default();

        let env = Arc::new(MarketplaceEnvironment {
            catalog: Arc::new(catalog.clone()),
            stock: Arc::new(stock.clone()),
            capacity: Arc::new(capacity.clone()),
            orders: Arc::new(orders.clone()),
            carts: Arc::new(carts.clone()),
            grants: Arc::new(grants.clone()),
            corrections: Arc::new(corrections.clone()),
            payments: Arc::new(payments.clone()),
            notifier: Arc::new(notifier.clone()),
            clock: Arc::new(clock.clone()),
            ids: Arc::new(SequentialIds::new()),
            settings,
        });

        Self {
            market: Marketplace::new(Arc::clone(&env)),
            env,
            catalog,
            stock,
            capacity,
            orders,
            carts,
            grants,
            corrections,
            payments,
            notifier,
            clock,
        }
    }

    /// A fresh buyer identity.
    #[must_use]
    pub fn buyer(&self) -> UserId {
        UserId::new()
    }

    /// List an item for sale.
    #[must_use]
    pub fn add_item(&self, kind: ItemKind, unit_price_cents: u64, quantity: u32) -> ItemId {
        let id = ItemId::new();
        self.catalog.upsert(StockItem {
            id,
            seller_id: UserId::new(),
            title: format!("Item {id}"),
            kind,
            unit_price: Money::from_cents(unit_price_cents),
            is_for_sale: true,
            available_quantity: quantity,
        });
        id
    }

    /// Create an event with `max_capacity` places (0 for unlimited).
    #[must_use]
    pub fn add_event(&self, max_capacity: u32) -> ResourceId {
        let id = ResourceId::new();
        self.capacity.upsert(CapacityResource::new(id, max_capacity));
        id
    }

    /// Current available quantity of an item.
    #[must_use]
    pub fn available(&self, item_id: ItemId) -> Option<u32> {
        self.catalog.available(item_id)
    }

    /// Current state of an order.
    #[must_use]
    pub fn order(&self, order_id: OrderId) -> Option<Order> {
        self.orders.snapshot(order_id)
    }
}
