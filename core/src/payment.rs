//! Payment provider port.
//!
//! The provider creates payments keyed by order id, answers status polls and
//! calls back through webhooks. Delivery of webhooks is at-least-once; the
//! engine tolerates duplicates through the order status guard.

use crate::types::{Money, OrderId, PaymentReference};
use crate::BoxFuture;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Payment status as reported by the provider.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    /// Created, not yet captured
    Pending,
    /// Captured
    Succeeded,
    /// Declined or abandoned
    Failed,
    /// Captured, then returned to the buyer
    Refunded,
}

/// Provider failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// The provider could not be reached or returned a server error.
    #[error("Payment provider unavailable: {0}")]
    Unavailable(String),

    /// The provider refused the request.
    #[error("Payment provider rejected the request: {0}")]
    Rejected(String),

    /// The provider does not know the reference.
    #[error("Unknown payment reference: {0}")]
    UnknownReference(PaymentReference),
}

/// Outbound calls to the payment provider.
pub trait PaymentProvider: Send + Sync {
    /// Create a payment of `amount` for `order_id`.
    ///
    /// The order id is the idempotency key: calling twice for the same order
    /// must yield the same reference.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the provider fails.
    fn create_payment(
        &self,
        order_id: OrderId,
        amount: Money,
    ) -> BoxFuture<'_, Result<PaymentReference, PaymentError>>;

    /// Current status of a payment.
    ///
    /// # Errors
    ///
    /// Returns [`PaymentError`] if the provider fails.
    fn payment_status(
        &self,
        reference: PaymentReference,
    ) -> BoxFuture<'_, Result<PaymentStatus, PaymentError>>;
}

/// What a webhook reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookKind {
    /// Payment captured
    Succeeded,
    /// Payment failed
    Failed,
    /// Payment refunded
    Refunded,
}

impl WebhookKind {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
        }
    }
}

/// A verified webhook delivery.
///
/// Signature checking and per-event deduplication happen at the transport
/// boundary before this value is built.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentWebhook {
    /// Provider's event identifier
    pub provider_event_id: String,
    /// Order named in the payment metadata
    pub order_id: OrderId,
    /// Payment the event is about
    pub reference: PaymentReference,
    /// What happened
    pub kind: WebhookKind,
}
