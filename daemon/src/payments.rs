//! Payment provider used when no gateway is wired in.
//!
//! Every call gets a clear `Unavailable` instead of a silent success. The
//! pending order sweep polls the provider for orders that carry a payment
//! reference, so those orders stay pending until a gateway is wired in.

use atelier_core::payment::{PaymentError, PaymentProvider, PaymentStatus};
use atelier_core::types::{Money, OrderId, PaymentReference};
use atelier_core::BoxFuture;

/// Refuses every call with [`PaymentError::Unavailable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredPayments;

impl PaymentProvider for UnconfiguredPayments {
    fn create_payment(
        &self,
        order_id: OrderId,
        _amount: Money,
    ) -> BoxFuture<'_, Result<PaymentReference, PaymentError>> {
        Box::pin(async move {
            tracing::warn!(%order_id, "Payment requested but no provider is configured");
            Err(PaymentError::Unavailable("no payment provider configured".to_string()))
        })
    }

    fn payment_status(
        &self,
        _reference: PaymentReference,
    ) -> BoxFuture<'_, Result<PaymentStatus, PaymentError>> {
        Box::pin(async {
            Err(PaymentError::Unavailable("no payment provider configured".to_string()))
        })
    }
}
