//! Settlement reconciler.
//!
//! Two triggers race to move an order from `pending` to `paid`: the payment
//! provider's webhook and the buyer's own confirmation call. Both end up in
//! [`SettlementReconciler::settle`], which relies on the order status guard:
//! the winner runs the settlement effects once, the loser sees a settled
//! status and reports [`SettlementOutcome::AlreadySettled`] without running
//! anything.

use crate::environment::MarketplaceEnvironment;
use crate::lifecycle::{OrderLifecycle, TransitionReport};
use atelier_core::error::{SettlementError, TransitionError};
use atelier_core::order::{Order, OrderStatus};
use atelier_core::payment::{PaymentStatus, PaymentWebhook, WebhookKind};
use atelier_core::types::{OrderId, PaymentReference, UserId};
use metrics::counter;
use std::sync::Arc;

/// Reason recorded on orders refunded through the provider.
pub const PROVIDER_REFUND_REASON: &str = "payment refunded by provider";

/// Which path asked for settlement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementTrigger {
    /// Provider webhook
    Webhook,
    /// Buyer confirmation call
    Client,
    /// Pending order sweep that found the payment captured
    Sweeper,
}

impl SettlementTrigger {
    /// Label for logs and metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Webhook => "webhook",
            Self::Client => "client",
            Self::Sweeper => "sweeper",
        }
    }
}

/// Successful settlement result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SettlementOutcome {
    /// This call moved the order to `paid` and ran the settlement effects.
    Settled(TransitionReport),
    /// The order was already settled; nothing was done.
    AlreadySettled(Order),
}

impl SettlementOutcome {
    /// The order after settlement.
    #[must_use]
    pub const fn order(&self) -> &Order {
        match self {
            Self::Settled(report) => &report.order,
            Self::AlreadySettled(order) => order,
        }
    }

    const fn label(&self) -> &'static str {
        match self {
            Self::Settled(_) => "settled",
            Self::AlreadySettled(_) => "already_settled",
        }
    }
}

/// What a webhook delivery led to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    /// A success webhook settled the order (or found it settled).
    Settlement(SettlementOutcome),
    /// The provider reported a failed payment; the order stays `pending`.
    PaymentFailed(OrderId),
    /// A refund webhook cancelled the order.
    Refunded(TransitionReport),
    /// A refund webhook found the order already cancelled.
    AlreadyRefunded(OrderId),
}

/// Reconciles webhook and client settlement paths.
#[derive(Debug, Clone)]
pub struct SettlementReconciler {
    env: Arc<MarketplaceEnvironment>,
    lifecycle: OrderLifecycle,
}

impl SettlementReconciler {
    /// Create a reconciler over `env`.
    #[must_use]
    pub fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        let lifecycle = OrderLifecycle::new(Arc::clone(&env));
        Self { env, lifecycle }
    }

    async fn load(&self, order_id: OrderId) -> Result<Order, SettlementError> {
        self.env
            .orders
            .get(order_id)
            .await?
            .ok_or(SettlementError::OrderNotFound(order_id))
    }

    async fn load_owned(&self, buyer_id: UserId, order_id: OrderId) -> Result<Order, SettlementError> {
        let order = self.load(order_id).await?;
        if order.buyer_id == buyer_id {
            Ok(order)
        } else {
            tracing::warn!(%order_id, %buyer_id, "Caller does not own the order");
            Err(SettlementError::NotOrderOwner(order_id))
        }
    }

    /// Create the provider payment for a pending order.
    ///
    /// The order id is the provider's idempotency key; an order that already
    /// has a reference returns it without calling the provider.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::NotOrderOwner`] for another buyer's order,
    /// [`SettlementError::OrderCancelled`] for a cancelled one, a
    /// [`TransitionError::InvalidTransition`] for a settled one, or the
    /// provider/store failure.
    pub async fn initiate_payment(
        &self,
        buyer_id: UserId,
        order_id: OrderId,
    ) -> Result<PaymentReference, SettlementError> {
        let order = self.load_owned(buyer_id, order_id).await?;

        if let Some(reference) = order.payment_reference {
            return Ok(reference);
        }
        match order.status {
            OrderStatus::Pending => {}
            OrderStatus::Cancelled => return Err(SettlementError::OrderCancelled(order_id)),
            status => {
                return Err(TransitionError::InvalidTransition {
                    status,
                    event: "initiate payment",
                }
                .into());
            }
        }

        let created = self
            .env
            .payments
            .create_payment(order_id, order.total_amount)
            .await?;
        let stored = self
            .env
            .orders
            .set_payment_reference(order_id, created)
            .await?;

        tracing::info!(%order_id, reference = %stored, amount = %order.total_amount, "Payment initiated");
        Ok(stored)
    }

    /// Settle an order whose payment is known to have succeeded.
    ///
    /// Losing the race to another trigger is a success:
    /// [`SettlementOutcome::AlreadySettled`].
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::OrderCancelled`] if the order was cancelled
    /// first (the captured payment then needs a refund),
    /// [`SettlementError::OrderNotFound`], or a store failure.
    pub async fn settle(
        &self,
        order_id: OrderId,
        trigger: SettlementTrigger,
    ) -> Result<SettlementOutcome, SettlementError> {
        let result = match self.lifecycle.mark_paid(order_id).await {
            Ok(report) => {
                tracing::info!(%order_id, trigger = trigger.as_str(), "Settlement applied");
                Ok(SettlementOutcome::Settled(report))
            }
            Err(TransitionError::OrderNotFound(_)) => Err(SettlementError::OrderNotFound(order_id)),
            Err(error) => match error.observed_status() {
                Some(status) if status.is_settled() => {
                    tracing::debug!(
                        %order_id,
                        trigger = trigger.as_str(),
                        %status,
                        "Settlement lost the race; order already settled"
                    );
                    self.load(order_id).await.map(SettlementOutcome::AlreadySettled)
                }
                Some(OrderStatus::Cancelled) => {
                    tracing::error!(
                        %order_id,
                        trigger = trigger.as_str(),
                        "Payment confirmed for a cancelled order; refund needed"
                    );
                    Err(SettlementError::OrderCancelled(order_id))
                }
                _ => Err(error.into()),
            },
        };

        let outcome = match &result {
            Ok(outcome) => outcome.label(),
            Err(SettlementError::OrderCancelled(_)) => "cancelled",
            Err(_) => "error",
        };
        counter!("settlements_total", "trigger" => trigger.as_str(), "outcome" => outcome)
            .increment(1);
        result
    }

    /// Buyer-initiated confirmation.
    ///
    /// Polls the provider unless the order is already settled; only a
    /// `Succeeded` payment settles the order.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::NotOrderOwner`],
    /// [`SettlementError::OrderCancelled`],
    /// [`SettlementError::MissingReference`] if no payment was initiated,
    /// [`SettlementError::PaymentNotCompleted`] if the provider has not
    /// captured the payment, or a provider/store failure.
    pub async fn confirm_by_client(
        &self,
        buyer_id: UserId,
        order_id: OrderId,
    ) -> Result<SettlementOutcome, SettlementError> {
        let order = self.load_owned(buyer_id, order_id).await?;

        if order.status.is_settled() {
            counter!("settlements_total", "trigger" => "client", "outcome" => "already_settled")
                .increment(1);
            return Ok(SettlementOutcome::AlreadySettled(order));
        }
        if order.status == OrderStatus::Cancelled {
            return Err(SettlementError::OrderCancelled(order_id));
        }

        let reference = order
            .payment_reference
            .ok_or(SettlementError::MissingReference(order_id))?;
        match self.env.payments.payment_status(reference).await? {
            PaymentStatus::Succeeded => self.settle(order_id, SettlementTrigger::Client).await,
            status => {
                tracing::debug!(%order_id, ?status, "Payment not completed yet");
                Err(SettlementError::PaymentNotCompleted(order_id))
            }
        }
    }

    /// Handle a verified provider webhook.
    ///
    /// Tolerates redelivery: a second success or refund for the same order
    /// reports the already-applied state.
    ///
    /// # Errors
    ///
    /// Returns [`SettlementError::ReferenceMismatch`] if the webhook names a
    /// different payment than the one stored on the order, or whatever
    /// settlement or refund returned.
    pub async fn handle_webhook(
        &self,
        webhook: PaymentWebhook,
    ) -> Result<WebhookOutcome, SettlementError> {
        let order_id = webhook.order_id;
        let order = self.load(order_id).await?;

        if order
            .payment_reference
            .as_ref()
            .is_some_and(|stored| *stored != webhook.reference)
        {
            tracing::warn!(
                %order_id,
                event_id = %webhook.provider_event_id,
                reference = %webhook.reference,
                "Webhook payment reference does not match order"
            );
            return Err(SettlementError::ReferenceMismatch(order_id));
        }

        tracing::debug!(
            %order_id,
            event_id = %webhook.provider_event_id,
            kind = webhook.kind.as_str(),
            "Payment webhook received"
        );

        match webhook.kind {
            WebhookKind::Succeeded => self
                .settle(order_id, SettlementTrigger::Webhook)
                .await
                .map(WebhookOutcome::Settlement),
            WebhookKind::Failed => {
                tracing::warn!(
                    %order_id,
                    event_id = %webhook.provider_event_id,
                    "Payment failed; order stays pending until it expires"
                );
                Ok(WebhookOutcome::PaymentFailed(order_id))
            }
            WebhookKind::Refunded => match self.lifecycle.refund(order_id, PROVIDER_REFUND_REASON).await {
                Ok(report) => Ok(WebhookOutcome::Refunded(report)),
                Err(error) if error.observed_status() == Some(OrderStatus::Cancelled) => {
                    tracing::debug!(%order_id, "Refund webhook for an order already cancelled");
                    Ok(WebhookOutcome::AlreadyRefunded(order_id))
                }
                Err(error) => Err(error.into()),
            },
        }
    }
}
