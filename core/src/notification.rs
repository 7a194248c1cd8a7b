//! Fire-and-forget notifications.
//!
//! Delivery belongs to an external service. A failed delivery is logged and
//! counted by the caller, never used to roll back the operation that emitted it.

use crate::types::{ConfirmationToken, Money, OrderId, ResourceId, UserId};
use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Something a user should be told about.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    /// Payment for an order was settled.
    OrderConfirmed {
        /// Settled order
        order_id: OrderId,
        /// Buyer to notify
        buyer_id: UserId,
        /// Amount charged
        total_amount: Money,
    },
    /// An order was cancelled or refunded.
    OrderCancelled {
        /// Cancelled order
        order_id: OrderId,
        /// Buyer to notify
        buyer_id: UserId,
        /// Reason given
        reason: String,
    },
    /// A member joined an event and must confirm attendance.
    AttendancePendingConfirmation {
        /// Event joined
        resource_id: ResourceId,
        /// New member
        member_id: UserId,
        /// Token to confirm with
        token: ConfirmationToken,
    },
}

impl Notification {
    /// Short name for logs.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::OrderConfirmed { .. } => "order_confirmed",
            Self::OrderCancelled { .. } => "order_cancelled",
            Self::AttendancePendingConfirmation { .. } => "attendance_pending_confirmation",
        }
    }
}

/// Delivery failure reported by a [`Notifier`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification delivery failed: {0}")]
pub struct NotificationError(pub String);

/// Hands notifications to the delivery service.
pub trait Notifier: Send + Sync {
    /// Enqueue `notification` for delivery.
    ///
    /// # Errors
    ///
    /// Returns [`NotificationError`] if the delivery service rejects it.
    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotificationError>>;
}
