//! Order lifecycle executor.
//!
//! Every command follows the same steps:
//!
//! 1. Load the order.
//! 2. Ask [`OrderStateMachine::decide`] for a [`Decision`].
//! 3. Compare-and-swap the status from `decision.from`.
//! 4. If the swap was won, run `decision.effects`.
//!
//! A caller that loses the swap gets [`TransitionError::Conflict`] and runs
//! nothing, which is what makes duplicate webhooks and double submits safe.

use crate::compensation::{Compensator, ReleaseReason};
use crate::environment::MarketplaceEnvironment;
use crate::retry::retry_with_predicate;
use atelier_core::error::{CompensationFailure, StoreError, TransitionError};
use atelier_core::grant::DigitalAccessGrant;
use atelier_core::notification::Notification;
use atelier_core::order::{Order, OrderStatus, TransitionOutcome};
use atelier_core::state_machine::{Decision, OrderEffect, OrderEvent, OrderStateMachine};
use atelier_core::types::OrderId;
use metrics::counter;
use std::sync::Arc;

/// Result of a transition that was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionReport {
    /// The order as written
    pub order: Order,
    /// Status before
    pub from: OrderStatus,
    /// Status after
    pub to: OrderStatus,
    /// Compensating actions that could not be completed
    pub compensation_failures: Vec<CompensationFailure>,
}

impl TransitionReport {
    /// Whether every compensating action completed.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.compensation_failures.is_empty()
    }
}

/// Applies order events under the status guard.
#[derive(Debug, Clone)]
pub struct OrderLifecycle {
    env: Arc<MarketplaceEnvironment>,
    compensator: Compensator,
}

impl OrderLifecycle {
    /// Create a lifecycle executor over `env`.
    #[must_use]
    pub fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        let compensator = Compensator::new(Arc::clone(&env));
        Self { env, compensator }
    }

    /// `pending → paid`: clear the cart, activate grants, notify the buyer.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn mark_paid(&self, order_id: OrderId) -> Result<TransitionReport, TransitionError> {
        self.apply(order_id, OrderEvent::SettlementConfirmed).await
    }

    /// Admin cancellation from `pending`, `paid` or `shipped`.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn cancel(
        &self,
        order_id: OrderId,
        reason: impl Into<String>,
    ) -> Result<TransitionReport, TransitionError> {
        self.apply(order_id, OrderEvent::Cancelled { reason: reason.into() })
            .await
    }

    /// Refund reported by the payment provider.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn refund(
        &self,
        order_id: OrderId,
        reason: impl Into<String>,
    ) -> Result<TransitionReport, TransitionError> {
        self.apply(order_id, OrderEvent::RefundReceived { reason: reason.into() })
            .await
    }

    /// `paid → shipped`.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn mark_shipped(&self, order_id: OrderId) -> Result<TransitionReport, TransitionError> {
        self.apply(order_id, OrderEvent::Shipped).await
    }

    /// `shipped → delivered`.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn mark_delivered(
        &self,
        order_id: OrderId,
    ) -> Result<TransitionReport, TransitionError> {
        self.apply(order_id, OrderEvent::Delivered).await
    }

    /// Expire an unpaid order whose payment window elapsed.
    ///
    /// # Errors
    ///
    /// See [`apply`](Self::apply).
    pub async fn expire(&self, order_id: OrderId) -> Result<TransitionReport, TransitionError> {
        self.apply(order_id, OrderEvent::Expired).await
    }

    /// Apply `event` to the order.
    ///
    /// # Errors
    ///
    /// - [`TransitionError::OrderNotFound`] if the order does not exist
    /// - [`TransitionError::InvalidTransition`] if the event is not allowed
    ///   from the current status
    /// - [`TransitionError::Conflict`] if another caller changed the status
    ///   first
    /// - [`TransitionError::Store`] if the store failed
    pub async fn apply(
        &self,
        order_id: OrderId,
        event: OrderEvent,
    ) -> Result<TransitionReport, TransitionError> {
        let order = self
            .env
            .orders
            .get(order_id)
            .await?
            .ok_or(TransitionError::OrderNotFound(order_id))?;

        let Decision {
            from,
            update,
            effects,
        } = OrderStateMachine::decide(&order, &event, self.env.clock.now())?;
        let to = update.to;

        let outcome = self
            .env
            .orders
            .transition(order_id, from, update)
            .await
            .map_err(|error| match error {
                StoreError::NotFound { .. } => TransitionError::OrderNotFound(order_id),
                other => TransitionError::Store(other),
            })?;

        let order = match outcome {
            TransitionOutcome::Applied(order) => order,
            TransitionOutcome::StatusMismatch { actual } => {
                counter!("order_transition_conflicts_total").increment(1);
                tracing::info!(
                    %order_id,
                    expected = %from,
                    actual = %actual,
                    event = event.name(),
                    "Order already processed"
                );
                return Err(TransitionError::Conflict {
                    order_id,
                    expected: from,
                    actual,
                });
            }
        };

        counter!("order_transitions_total", "from" => from.as_str(), "to" => to.as_str())
            .increment(1);
        tracing::info!(%order_id, %from, %to, event = event.name(), "Order transitioned");

        let mut compensation_failures = Vec::new();
        for effect in effects {
            if let Err(failure) = self.execute(&order, effect).await {
                compensation_failures.push(failure);
            }
        }

        Ok(TransitionReport {
            order,
            from,
            to,
            compensation_failures,
        })
    }

    async fn execute(&self, order: &Order, effect: OrderEffect) -> Result<(), CompensationFailure> {
        match effect {
            OrderEffect::ReleaseStock { item_id, quantity } => {
                self.compensator
                    .release(item_id, quantity, Some(order.id), ReleaseReason::OrderCancelled)
                    .await
            }
            OrderEffect::RevokeGrants { order_id } => {
                self.compensator.revoke_grants(order_id).await.map(|_| ())
            }
            OrderEffect::ClearCart { buyer_id } => {
                let carts = &self.env.carts;
                if let Err(error) = retry_with_predicate(
                    &self.env.settings.compensation_retry,
                    "clear_cart",
                    || carts.clear(buyer_id),
                    StoreError::is_transient,
                )
                .await
                {
                    tracing::warn!(order_id = %order.id, %buyer_id, error = %error, "Cart not cleared after settlement");
                }
                Ok(())
            }
            OrderEffect::ActivateGrants { order_id } => {
                self.activate_grants(order, order_id).await;
                Ok(())
            }
            OrderEffect::Notify(notification) => {
                self.notify(notification).await;
                Ok(())
            }
        }
    }

    async fn activate_grants(&self, order: &Order, order_id: OrderId) {
        let grants = &self.env.grants;
        let policy = &self.env.settings.compensation_retry;

        // The buyer's grant may still belong to an unpaid order; the paid one takes it over.
        for line in order.digital_lines() {
            let item_id = line.item_id;
            match retry_with_predicate(
                policy,
                "activate_grant",
                || {
                    grants.activate(DigitalAccessGrant::inactive(
                        order.buyer_id,
                        item_id,
                        order_id,
                        order.created_at,
                    ))
                },
                StoreError::is_transient,
            )
            .await
            {
                Ok(true) => tracing::debug!(%order_id, %item_id, "Access grant activated"),
                Ok(false) => {
                    tracing::info!(%order_id, %item_id, "Buyer already holds access through another paid order");
                }
                Err(error) => {
                    tracing::error!(%order_id, %item_id, error = %error, "Access grant not activated for paid order");
                }
            }
        }
    }

    async fn notify(&self, notification: Notification) {
        let kind = notification.kind();
        if let Err(error) = self.env.notifier.notify(notification).await {
            counter!("notifications_failed_total").increment(1);
            tracing::warn!(kind, error = %error, "Notification delivery failed");
        }
    }
}
