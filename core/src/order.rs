//! Orders, order lines, carts and the stores that hold them.

use crate::catalog::{ItemKind, StockItem};
use crate::commission::{self, CommissionRate};
use crate::error::{StoreError, ValidationError};
use crate::types::{ItemId, Money, OrderId, PaymentReference, UserId};
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Status
// ============================================================================

/// Lifecycle status of an order.
///
/// ```text
/// pending ──► paid ──► shipped ──► delivered
///    │          │          │
///    └──────────┴──────────┴──► cancelled
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    /// Stock reserved, waiting for payment
    Pending,
    /// Payment settled
    Paid,
    /// Handed to the carrier
    Shipped,
    /// Received by the buyer (terminal)
    Delivered,
    /// Cancelled or refunded (terminal)
    Cancelled,
}

impl OrderStatus {
    /// Every status, in lifecycle order.
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Paid,
        Self::Shipped,
        Self::Delivered,
        Self::Cancelled,
    ];

    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paid" => Some(Self::Paid),
            "shipped" => Some(Self::Shipped),
            "delivered" => Some(Self::Delivered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether payment has been settled and not reversed.
    #[must_use]
    pub const fn is_settled(&self) -> bool {
        matches!(self, Self::Paid | Self::Shipped | Self::Delivered)
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Delivered | Self::Cancelled)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Shipping
// ============================================================================

/// Delivery address, snapshotted on the order.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    /// Recipient name
    pub recipient: String,
    /// Street and number
    pub line1: String,
    /// Optional second line
    pub line2: Option<String>,
    /// City
    pub city: String,
    /// Postal code
    pub postal_code: String,
    /// ISO country code
    pub country: String,
}

impl ShippingAddress {
    /// Whether every mandatory field is filled in.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        [
            &self.recipient,
            &self.line1,
            &self.city,
            &self.postal_code,
            &self.country,
        ]
        .iter()
        .all(|field| !field.trim().is_empty())
    }
}

// ============================================================================
// Lines and orders
// ============================================================================

/// One cart entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CartLine {
    /// Item to buy
    pub item_id: ItemId,
    /// Units requested
    pub quantity: u32,
}

impl CartLine {
    /// Create a cart line.
    #[must_use]
    pub const fn new(item_id: ItemId, quantity: u32) -> Self {
        Self { item_id, quantity }
    }
}

/// A priced, immutable line of an order.
///
/// `platform_fee + seller_earnings == unit_price_at_purchase * quantity`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    /// Item bought
    pub item_id: ItemId,
    /// Seller paid for this line
    pub seller_id: UserId,
    /// Item kind at purchase time
    pub kind: ItemKind,
    /// Units bought
    pub quantity: u32,
    /// Price snapshot
    pub unit_price_at_purchase: Money,
    /// Platform's share
    pub platform_fee: Money,
    /// Seller's share
    pub seller_earnings: Money,
}

impl OrderLine {
    /// Price a line from the catalog item, snapshotting its current price.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::AmountOverflow`] if the line total overflows.
    pub fn priced(
        item: &StockItem,
        quantity: u32,
        rate: CommissionRate,
    ) -> Result<Self, ValidationError> {
        let split = commission::split(item.unit_price, quantity, rate)
            .ok_or(ValidationError::AmountOverflow { item_id: item.id })?;
        Ok(Self {
            item_id: item.id,
            seller_id: item.seller_id,
            kind: item.kind,
            quantity,
            unit_price_at_purchase: item.unit_price,
            platform_fee: split.platform_fee,
            seller_earnings: split.seller_earnings,
        })
    }

    /// `platform_fee + seller_earnings`
    #[must_use]
    pub fn line_total(&self) -> Option<Money> {
        self.platform_fee.checked_add(self.seller_earnings)
    }
}

/// An order document.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    /// Order identifier
    pub id: OrderId,
    /// Buyer
    pub buyer_id: UserId,
    /// Lines, in cart order
    pub lines: Vec<OrderLine>,
    /// Current status
    pub status: OrderStatus,
    /// Sum of line totals
    pub subtotal: Money,
    /// Sum of line platform fees
    pub platform_fee_total: Money,
    /// What the buyer pays; equal to `subtotal`
    pub total_amount: Money,
    /// Commission rate in force when the order was created
    pub platform_fee_rate: CommissionRate,
    /// Provider payment identifier, once a payment was initiated
    pub payment_reference: Option<PaymentReference>,
    /// Delivery address, present when any line is physical
    pub shipping: Option<ShippingAddress>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
    /// Settlement time
    pub paid_at: Option<DateTime<Utc>>,
    /// Shipping time
    pub shipped_at: Option<DateTime<Utc>>,
    /// Delivery time
    pub delivered_at: Option<DateTime<Utc>>,
    /// Cancellation or refund time
    pub refunded_at: Option<DateTime<Utc>>,
    /// Why the order was cancelled or refunded
    pub refund_reason: Option<String>,
}

impl Order {
    /// Build a new `pending` order from priced lines, summing the totals.
    ///
    /// # Errors
    ///
    /// Returns [`ValidationError::EmptyCart`] for no lines and
    /// [`ValidationError::AmountOverflow`] if a sum overflows.
    pub fn pending(
        id: OrderId,
        buyer_id: UserId,
        lines: Vec<OrderLine>,
        platform_fee_rate: CommissionRate,
        shipping: Option<ShippingAddress>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if lines.is_empty() {
            return Err(ValidationError::EmptyCart);
        }

        let mut subtotal = Money::ZERO;
        let mut platform_fee_total = Money::ZERO;
        for line in &lines {
            let overflow = ValidationError::AmountOverflow {
                item_id: line.item_id,
            };
            let line_total = line.line_total().ok_or_else(|| overflow.clone())?;
            subtotal = subtotal
                .checked_add(line_total)
                .ok_or_else(|| overflow.clone())?;
            platform_fee_total = platform_fee_total
                .checked_add(line.platform_fee)
                .ok_or(overflow)?;
        }

        Ok(Self {
            id,
            buyer_id,
            lines,
            status: OrderStatus::Pending,
            subtotal,
            platform_fee_total,
            total_amount: subtotal,
            platform_fee_rate,
            payment_reference: None,
            shipping,
            created_at,
            updated_at: created_at,
            paid_at: None,
            shipped_at: None,
            delivered_at: None,
            refunded_at: None,
            refund_reason: None,
        })
    }

    /// Lines for digital goods, which carry access grants.
    pub fn digital_lines(&self) -> impl Iterator<Item = &OrderLine> {
        self.lines.iter().filter(|line| line.kind.grants_access())
    }

    /// Apply a status update that already passed the guard.
    pub fn apply_update(&mut self, update: &StatusUpdate) {
        self.status = update.to;
        self.updated_at = update.at;
        match update.to {
            OrderStatus::Pending => {}
            OrderStatus::Paid => self.paid_at = Some(update.at),
            OrderStatus::Shipped => self.shipped_at = Some(update.at),
            OrderStatus::Delivered => self.delivered_at = Some(update.at),
            OrderStatus::Cancelled => {
                self.refunded_at = Some(update.at);
                self.refund_reason.clone_from(&update.refund_reason);
            }
        }
    }
}

/// The write half of a guarded transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StatusUpdate {
    /// Target status
    pub to: OrderStatus,
    /// When the transition happens
    pub at: DateTime<Utc>,
    /// Reason, for cancellations
    pub refund_reason: Option<String>,
}

/// Result of [`OrderStore::transition`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransitionOutcome {
    /// The stored status matched and the update was written.
    Applied(Order),
    /// The stored status differs from the expected one; nothing was written.
    StatusMismatch {
        /// Status found in the store
        actual: OrderStatus,
    },
}

// ============================================================================
// Stores
// ============================================================================

/// Order documents.
///
/// Orders are written once by their creator and afterwards only changed
/// through [`transition`](Self::transition), a compare-and-swap on `status`.
pub trait OrderStore: Send + Sync {
    /// Persist a new order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn insert(&self, order: Order) -> BoxFuture<'_, Result<(), StoreError>>;

    /// Load an order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn get(&self, order_id: OrderId) -> BoxFuture<'_, Result<Option<Order>, StoreError>>;

    /// Apply `update` only if the stored status equals `expected`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the order does not exist.
    fn transition(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        update: StatusUpdate,
    ) -> BoxFuture<'_, Result<TransitionOutcome, StoreError>>;

    /// Store `reference` unless the order already has one; returns whichever
    /// reference is stored afterwards.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the order does not exist.
    fn set_payment_reference(
        &self,
        order_id: OrderId,
        reference: PaymentReference,
    ) -> BoxFuture<'_, Result<PaymentReference, StoreError>>;

    /// `pending` orders created before `created_before`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn stale_pending(
        &self,
        created_before: DateTime<Utc>,
        limit: usize,
    ) -> BoxFuture<'_, Result<Vec<Order>, StoreError>>;
}

/// Buyer carts. The cart is authoritative until an order is settled.
pub trait CartStore: Send + Sync {
    /// Current cart lines, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    fn load(&self, buyer_id: UserId) -> BoxFuture<'_, Result<Vec<CartLine>, StoreError>>;

    /// Empty the buyer's cart.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the write fails.
    fn clear(&self, buyer_id: UserId) -> BoxFuture<'_, Result<(), StoreError>>;
}

#[cfg(test)]
#[allow(clippy::expect_used)] // Panics: test fails if a fixture is invalid
mod tests {
    use super::*;

    fn item(kind: ItemKind, cents: u64) -> StockItem {
        StockItem {
            id: ItemId::new(),
            seller_id: UserId::new(),
            title: "Untitled".to_string(),
            kind,
            unit_price: Money::from_cents(cents),
            is_for_sale: true,
            available_quantity: 10,
        }
    }

    #[test]
    fn pending_order_sums_lines() {
        let rate = CommissionRate::DEFAULT;
        let lines = vec![
            OrderLine::priced(&item(ItemKind::Physical, 1_999), 3, rate).expect("valid line"),
            OrderLine::priced(&item(ItemKind::DigitalVideo, 505), 1, rate).expect("valid line"),
        ];
        let now = Utc::now();
        let order = Order::pending(OrderId::new(), UserId::new(), lines, rate, None, now)
            .expect("valid line");

        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.subtotal, Money::from_cents(5_997 + 505));
        // 599.7 -> 600, 50.5 -> 51
        assert_eq!(order.platform_fee_total, Money::from_cents(651));
        assert_eq!(order.total_amount, order.subtotal);
        assert_eq!(order.digital_lines().count(), 1);
    }

    #[test]
    fn pending_order_rejects_empty_lines() {
        let result = Order::pending(
            OrderId::new(),
            UserId::new(),
            Vec::new(),
            CommissionRate::DEFAULT,
            None,
            Utc::now(),
        );
        assert_eq!(result, Err(ValidationError::EmptyCart));
    }

    #[test]
    fn cancellation_update_records_refund_fields() {
        let rate = CommissionRate::ZERO;
        let line = OrderLine::priced(&item(ItemKind::Physical, 100), 1, rate).expect("valid line");
        let created = Utc::now();
        let mut order = Order::pending(OrderId::new(), UserId::new(), vec![line], rate, None, created)
            .expect("valid line");

        let at = created + chrono::Duration::minutes(5);
        order.apply_update(&StatusUpdate {
            to: OrderStatus::Cancelled,
            at,
            refund_reason: Some("damaged in transit".to_string()),
        });

        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.refunded_at, Some(at));
        assert_eq!(order.refund_reason.as_deref(), Some("damaged in transit"));
        assert_eq!(order.updated_at, at);
    }

    #[test]
    fn shipping_address_requires_mandatory_fields() {
        let mut address = ShippingAddress {
            recipient: "Ada".into(),
            line1: "1 Gallery Row".into(),
            line2: None,
            city: "Lyon".into(),
            postal_code: "69001".into(),
            country: "FR".into(),
        };
        assert!(address.is_complete());
        address.city = "  ".into();
        assert!(!address.is_complete());
    }

    #[test]
    fn status_names_round_trip() {
        for status in OrderStatus::ALL {
            assert_eq!(OrderStatus::parse(status.as_str()), Some(status));
        }
        assert!(OrderStatus::Shipped.is_settled());
        assert!(!OrderStatus::Cancelled.is_settled());
    }
}
