//! Error taxonomy for the engine.
//!
//! - [`StoreError`]: the backing store failed or an entity is missing
//! - [`ValidationError`]: rejected before any side effect
//! - [`CheckoutError`]: reservation failures surfaced to the buyer
//! - [`TransitionError`]: order state machine guard rejections
//! - [`SettlementError`]: payment confirmation failures
//! - [`AttendanceError`]: capacity ledger failures
//! - [`CompensationFailure`]: a rollback step that could not be completed and
//!   now needs manual correction

use crate::correction::CorrectionKind;
use crate::order::OrderStatus;
use crate::payment::PaymentError;
use crate::types::{ItemId, OrderId, ResourceId};
use thiserror::Error;

/// Errors raised by store implementations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Database connection or query error.
    #[error("Database error: {0}")]
    Database(String),

    /// The referenced document does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Kind of document (`"item"`, `"order"`, ...)
        entity: &'static str,
        /// Identifier that was looked up
        id: String,
    },

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Shorthand for [`StoreError::NotFound`].
    #[must_use]
    pub fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Whether retrying the same operation could succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Database(_))
    }
}

/// Input rejected before any side effect was applied.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// Checkout attempted with no lines.
    #[error("Cart is empty")]
    EmptyCart,

    /// A line requested zero units.
    #[error("Quantity for item {item_id} must be at least 1")]
    InvalidQuantity {
        /// Offending item
        item_id: ItemId,
    },

    /// The item is not in the catalog.
    #[error("Item {item_id} does not exist")]
    ItemNotFound {
        /// Offending item
        item_id: ItemId,
    },

    /// The item exists but is not currently offered for sale.
    #[error("Item {item_id} is not for sale")]
    ItemNotForSale {
        /// Offending item
        item_id: ItemId,
    },

    /// Physical goods were ordered without a complete shipping address.
    #[error("Shipping information is required for physical items")]
    MissingShippingInfo,

    /// Line or order totals exceed the representable amount.
    #[error("Order amount for item {item_id} is too large")]
    AmountOverflow {
        /// Line whose total overflowed
        item_id: ItemId,
    },
}

/// Checkout failures returned to the buyer.
///
/// Every variant is returned only after any partial reservations have been
/// released.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckoutError {
    /// Cart failed validation; nothing was reserved.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Another buyer got there first.
    #[error("Insufficient stock for item {item_id}: requested {requested}, only {available} available")]
    InsufficientStock {
        /// Item that could not be reserved
        item_id: ItemId,
        /// Units requested on the cart line
        requested: u32,
        /// Units available when the reservation was attempted
        available: u32,
    },

    /// The store failed mid-checkout.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CheckoutError {
    /// Short label used for metrics and logs.
    #[must_use]
    pub const fn reason(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InsufficientStock { .. } => "insufficient_stock",
            Self::Store(_) => "store",
        }
    }
}

/// Order state machine rejections.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransitionError {
    /// The stored status changed between read and write; usually a benign
    /// race such as a duplicate webhook or a double submit.
    #[error("Order {order_id} already processed: expected {expected}, found {actual}")]
    Conflict {
        /// Order being transitioned
        order_id: OrderId,
        /// Status the caller transitioned from
        expected: OrderStatus,
        /// Status found in the store
        actual: OrderStatus,
    },

    /// The event is not valid from the order's current status.
    #[error("Cannot apply '{event}' to an order that is {status}")]
    InvalidTransition {
        /// Current status
        status: OrderStatus,
        /// Event name
        event: &'static str,
    },

    /// No such order.
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransitionError {
    /// Status observed in the store when the transition was rejected, if known.
    #[must_use]
    pub const fn observed_status(&self) -> Option<OrderStatus> {
        match self {
            Self::Conflict { actual, .. } => Some(*actual),
            Self::InvalidTransition { status, .. } => Some(*status),
            Self::OrderNotFound(_) | Self::Store(_) => None,
        }
    }
}

/// Payment settlement failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SettlementError {
    /// No such order.
    #[error("Order {0} not found")]
    OrderNotFound(OrderId),

    /// The caller is not the buyer on the order.
    #[error("Order {0} does not belong to the caller")]
    NotOrderOwner(OrderId),

    /// The provider has not reported a successful payment yet.
    #[error("Payment for order {0} has not completed")]
    PaymentNotCompleted(OrderId),

    /// The order was cancelled before the payment arrived.
    #[error("Order {0} was cancelled; the payment must be refunded")]
    OrderCancelled(OrderId),

    /// The webhook names a different payment than the one on the order.
    #[error("Payment reference does not match order {0}")]
    ReferenceMismatch(OrderId),

    /// The order has no payment reference to poll.
    #[error("Order {0} has no payment reference")]
    MissingReference(OrderId),

    /// The payment provider failed.
    #[error(transparent)]
    Payment(#[from] PaymentError),

    /// The state machine rejected the transition.
    #[error(transparent)]
    Transition(#[from] TransitionError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Capacity ledger failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttendanceError {
    /// The event has no free places.
    #[error("Event {resource_id} is full ({capacity} places)")]
    CapacityFull {
        /// Event
        resource_id: ResourceId,
        /// Configured maximum
        capacity: u32,
    },

    /// No such event.
    #[error("Event {0} not found")]
    ResourceNotFound(ResourceId),

    /// The store failed.
    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for AttendanceError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

/// A compensating action that failed after bounded retries.
///
/// The discrepancy has been handed to the correction log (when `recorded`
/// is true) and needs an operator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Compensation failed for {kind} (order {order_id:?}); needs manual correction: {error}")]
pub struct CompensationFailure {
    /// What could not be undone
    pub kind: CorrectionKind,
    /// Order the compensation belonged to, if one had been created
    pub order_id: Option<OrderId>,
    /// Last error observed
    pub error: StoreError,
    /// Whether a correction record was written
    pub recorded: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insufficient_stock_message_is_actionable() {
        let item_id = ItemId::new();
        let err = CheckoutError::InsufficientStock {
            item_id,
            requested: 3,
            available: 1,
        };
        assert_eq!(
            err.to_string(),
            format!("Insufficient stock for item {item_id}: requested 3, only 1 available")
        );
        assert_eq!(err.reason(), "insufficient_stock");
    }

    #[test]
    fn only_database_errors_are_transient() {
        assert!(StoreError::Database("timeout".into()).is_transient());
        assert!(!StoreError::not_found("item", ItemId::new()).is_transient());
    }
}
