//! Periodic reconciliation sweeps.
//!
//! - [`PendingOrderSweeper`] expires `pending` orders whose payment window
//!   elapsed, releasing their stock through the normal cancellation path.
//!   An order with a payment reference is checked with the provider first:
//!   a captured payment settles the order instead.
//! - [`MembershipSweeper`] cancels memberships that were never confirmed,
//!   freeing their places.
//!
//! Both are safe to run concurrently with live traffic: an order settled
//! while the sweep runs wins or loses strictly through the status guard.

use crate::environment::MarketplaceEnvironment;
use crate::lifecycle::OrderLifecycle;
use crate::settlement::{SettlementOutcome, SettlementReconciler, SettlementTrigger};
use atelier_core::error::{SettlementError, StoreError, TransitionError};
use atelier_core::order::Order;
use atelier_core::payment::{PaymentError, PaymentStatus};
use chrono::{DateTime, TimeDelta, Utc};
use metrics::counter;
use std::sync::Arc;

/// Counts from one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Documents looked at
    pub examined: usize,
    /// Documents expired
    pub expired: usize,
    /// Orders settled because the provider had captured the payment
    pub settled: usize,
    /// Documents that changed state before the sweep reached them
    pub skipped: usize,
    /// Documents that failed to process
    pub failed: usize,
    /// Compensating actions that needed a correction record
    pub compensation_failures: usize,
}

fn cutoff(now: DateTime<Utc>, age: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(age).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Expires stale unpaid orders.
#[derive(Debug, Clone)]
pub struct PendingOrderSweeper {
    env: Arc<MarketplaceEnvironment>,
    lifecycle: OrderLifecycle,
    settlement: SettlementReconciler,
}

impl PendingOrderSweeper {
    /// Create a sweeper over `env`.
    #[must_use]
    pub fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        let lifecycle = OrderLifecycle::new(Arc::clone(&env));
        let settlement = SettlementReconciler::new(Arc::clone(&env));
        Self {
            env,
            lifecycle,
            settlement,
        }
    }

    /// Expire up to one batch of stale pending orders.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the stale orders cannot be listed. Failures
    /// on individual orders are counted in the report instead.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let settings = &self.env.settings;
        let before = cutoff(self.env.clock.now(), settings.pending_order_timeout);
        let stale = self
            .env
            .orders
            .stale_pending(before, settings.sweep_batch_size)
            .await?;

        let mut report = SweepReport {
            examined: stale.len(),
            ..SweepReport::default()
        };

        for order in stale {
            match self.payment_captured(&order).await {
                Ok(true) => self.settle(&order, &mut report).await,
                Ok(false) => self.expire(&order, &mut report).await,
                Err(error) => {
                    report.failed += 1;
                    tracing::warn!(
                        order_id = %order.id,
                        error = %error,
                        "Payment status unavailable; order left pending"
                    );
                }
            }
        }

        counter!("sweeper_orders_expired_total").increment(report.expired as u64);
        counter!("sweeper_orders_settled_total").increment(report.settled as u64);
        if report.examined > 0 {
            tracing::info!(
                examined = report.examined,
                expired = report.expired,
                settled = report.settled,
                skipped = report.skipped,
                failed = report.failed,
                "Pending order sweep complete"
            );
        }
        Ok(report)
    }

    /// Whether the provider has captured the payment for `order`.
    ///
    /// An order without a reference, or with one the provider does not know,
    /// was never paid.
    async fn payment_captured(&self, order: &Order) -> Result<bool, PaymentError> {
        let Some(reference) = order.payment_reference.clone() else {
            return Ok(false);
        };
        match self.env.payments.payment_status(reference).await {
            Ok(status) => Ok(status == PaymentStatus::Succeeded),
            Err(PaymentError::UnknownReference(_)) => Ok(false),
            Err(error) => Err(error),
        }
    }

    async fn settle(&self, order: &Order, report: &mut SweepReport) {
        match self.settlement.settle(order.id, SettlementTrigger::Sweeper).await {
            Ok(SettlementOutcome::Settled(transition)) => {
                report.settled += 1;
                report.compensation_failures += transition.compensation_failures.len();
            }
            Ok(SettlementOutcome::AlreadySettled(_)) | Err(SettlementError::OrderCancelled(_)) => {
                report.skipped += 1;
            }
            Err(error) => {
                report.failed += 1;
                tracing::warn!(order_id = %order.id, error = %error, "Could not settle pending order");
            }
        }
    }

    async fn expire(&self, order: &Order, report: &mut SweepReport) {
        match self.lifecycle.expire(order.id).await {
            Ok(transition) => {
                report.expired += 1;
                report.compensation_failures += transition.compensation_failures.len();
            }
            Err(TransitionError::Conflict { .. } | TransitionError::InvalidTransition { .. }) => {
                report.skipped += 1;
            }
            Err(error) => {
                report.failed += 1;
                tracing::warn!(order_id = %order.id, error = %error, "Could not expire pending order");
            }
        }
    }
}

/// Cancels memberships that were never confirmed.
#[derive(Debug, Clone)]
pub struct MembershipSweeper {
    env: Arc<MarketplaceEnvironment>,
}

impl MembershipSweeper {
    /// Create a sweeper over `env`.
    #[must_use]
    pub const fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        Self { env }
    }

    /// Cancel unconfirmed memberships older than the configured TTL.
    /// Does nothing when no TTL is configured.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the ledger update fails.
    pub async fn sweep(&self) -> Result<SweepReport, StoreError> {
        let Some(ttl) = self.env.settings.attendance_confirmation_ttl else {
            return Ok(SweepReport::default());
        };

        let expired = self
            .env
            .capacity
            .expire_unconfirmed(cutoff(self.env.clock.now(), ttl))
            .await?;

        for (resource_id, member_id) in &expired {
            tracing::debug!(%resource_id, %member_id, "Unconfirmed membership expired");
        }
        counter!("sweeper_memberships_expired_total").increment(expired.len() as u64);
        if !expired.is_empty() {
            tracing::info!(expired = expired.len(), "Membership sweep complete");
        }

        Ok(SweepReport {
            examined: expired.len(),
            expired: expired.len(),
            ..SweepReport::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cutoff_saturates_instead_of_panicking() {
        let now = DateTime::<Utc>::MIN_UTC + TimeDelta::seconds(5);
        assert_eq!(cutoff(now, TimeDelta::days(1)), DateTime::<Utc>::MIN_UTC);
        assert_eq!(cutoff(now, TimeDelta::seconds(5)), DateTime::<Utc>::MIN_UTC);
    }
}
