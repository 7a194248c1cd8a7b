//! Compensating actions.
//!
//! A checkout reserves items one by one and keeps a [`CompensationList`] of
//! what it took. Any failure before the order is persisted unwinds that list.
//! Cancellations release the reserved units of an existing order. Both paths
//! run each release through the [`Compensator`], which retries transient
//! failures and, once the retry policy is exhausted, writes a
//! [`CorrectionRecord`] so the discrepancy reaches an operator.

use crate::environment::MarketplaceEnvironment;
use crate::retry::retry_with_predicate;
use atelier_core::correction::{CorrectionKind, CorrectionRecord};
use atelier_core::error::{CompensationFailure, StoreError};
use atelier_core::types::{ItemId, OrderId};
use metrics::counter;
use smallvec::SmallVec;
use std::future::Future;
use std::sync::Arc;

/// Why units are being given back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// A checkout failed before its order was persisted.
    CheckoutRollback,
    /// An order was cancelled, refunded or expired.
    OrderCancelled,
}

impl ReleaseReason {
    /// Label for metrics.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutRollback => "checkout_rollback",
            Self::OrderCancelled => "order_cancelled",
        }
    }
}

/// A successful reservation that may need undoing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    /// Item reserved
    pub item_id: ItemId,
    /// Units taken
    pub quantity: u32,
}

/// Reservations taken so far by one checkout.
#[derive(Debug, Default)]
pub struct CompensationList {
    entries: SmallVec<[Reservation; 8]>,
}

impl CompensationList {
    /// An empty list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a successful reservation.
    pub fn record(&mut self, item_id: ItemId, quantity: u32) {
        self.entries.push(Reservation { item_id, quantity });
    }

    /// Reservations recorded so far, oldest first.
    #[must_use]
    pub fn entries(&self) -> &[Reservation] {
        &self.entries
    }

    /// Number of reservations recorded.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was reserved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The reservations are now owned by a persisted order; nothing to undo.
    pub fn commit(self) {}

    /// Undo every reservation, newest first.
    ///
    /// Every entry is attempted even if an earlier one fails; the failures
    /// are returned.
    pub async fn unwind<F, Fut>(self, mut release: F) -> Vec<CompensationFailure>
    where
        F: FnMut(Reservation) -> Fut,
        Fut: Future<Output = Result<(), CompensationFailure>>,
    {
        let mut failures = Vec::new();
        for reservation in self.entries.into_iter().rev() {
            if let Err(failure) = release(reservation).await {
                failures.push(failure);
            }
        }
        failures
    }
}

/// Runs compensating actions with retries and correction records.
#[derive(Debug, Clone)]
pub struct Compensator {
    env: Arc<MarketplaceEnvironment>,
}

impl Compensator {
    /// Create a compensator over `env`.
    #[must_use]
    pub const fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        Self { env }
    }

    /// Give `quantity` units of `item_id` back to the stock ledger.
    ///
    /// # Errors
    ///
    /// Returns [`CompensationFailure`] once retries are exhausted; a
    /// correction record has been written by then.
    pub async fn release(
        &self,
        item_id: ItemId,
        quantity: u32,
        order_id: Option<OrderId>,
        reason: ReleaseReason,
    ) -> Result<(), CompensationFailure> {
        let stock = &self.env.stock;
        let result = retry_with_predicate(
            &self.env.settings.compensation_retry,
            "release_stock",
            || stock.release(item_id, quantity),
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(()) => {
                counter!("stock_releases_total", "reason" => reason.as_str()).increment(1);
                tracing::debug!(%item_id, quantity, reason = reason.as_str(), "Stock released");
                Ok(())
            }
            Err(error) => Err(self
                .record_failure(CorrectionKind::ReleaseStock { item_id, quantity }, order_id, error)
                .await),
        }
    }

    /// Delete the digital access grants created by `order_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CompensationFailure`] once retries are exhausted.
    pub async fn revoke_grants(&self, order_id: OrderId) -> Result<u64, CompensationFailure> {
        let grants = &self.env.grants;
        let result = retry_with_predicate(
            &self.env.settings.compensation_retry,
            "revoke_grants",
            || grants.revoke_for_order(order_id),
            StoreError::is_transient,
        )
        .await;

        match result {
            Ok(revoked) => {
                tracing::debug!(%order_id, revoked, "Access grants revoked");
                Ok(revoked)
            }
            Err(error) => Err(self
                .record_failure(CorrectionKind::RevokeGrants, Some(order_id), error)
                .await),
        }
    }

    /// Write a correction record for a compensation that could not be done.
    ///
    /// If even that write fails, every field is logged so the discrepancy is
    /// never silently lost.
    pub async fn record_failure(
        &self,
        kind: CorrectionKind,
        order_id: Option<OrderId>,
        error: StoreError,
    ) -> CompensationFailure {
        counter!("compensation_failures_total", "kind" => kind.label()).increment(1);

        let record = CorrectionRecord::open(
            self.env.ids.correction_id(),
            kind.clone(),
            order_id,
            error.to_string(),
            self.env.clock.now(),
        );
        let correction_id = record.id;

        let recorded = match self.env.corrections.record(record).await {
            Ok(()) => {
                tracing::error!(
                    %correction_id,
                    order_id = ?order_id,
                    kind = %kind,
                    error = %error,
                    "Compensation failed; needs manual stock correction"
                );
                true
            }
            Err(log_error) => {
                tracing::error!(
                    %correction_id,
                    order_id = ?order_id,
                    kind = %kind,
                    error = %error,
                    log_error = %log_error,
                    "Compensation failed and the correction record could not be written; needs manual stock correction"
                );
                false
            }
        };

        CompensationFailure {
            kind,
            order_id,
            error,
            recorded,
        }
    }
}
