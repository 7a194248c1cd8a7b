//! Recording and fault-injecting collaborators.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)] // Panics only on a poisoned lock

use atelier_core::catalog::{ReserveOutcome, StockLedger};
use atelier_core::error::StoreError;
use atelier_core::notification::{Notification, NotificationError, Notifier};
use atelier_core::payment::{PaymentError, PaymentProvider, PaymentStatus};
use atelier_core::types::{ItemId, Money, OrderId, PaymentReference};
use atelier_core::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::future::ready;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ============================================================================
// Notifier
// ============================================================================

/// Notifier that remembers everything it was asked to send.
#[derive(Clone, Debug, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<Notification>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    /// Create a notifier that accepts everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every notification (they are still recorded).
    pub fn fail_deliveries(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Everything sent so far.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().clone()
    }

    /// How many notifications of `kind` were sent.
    #[must_use]
    pub fn count(&self, kind: &str) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.kind() == kind)
            .count()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotificationError>> {
        self.sent.lock().unwrap().push(notification);
        let result = if self.fail.load(Ordering::SeqCst) {
            Err(NotificationError("mailer offline".to_string()))
        } else {
            Ok(())
        };
        Box::pin(ready(result))
    }
}

// ============================================================================
// Payment provider
// ============================================================================

#[derive(Debug, Default)]
struct PaymentBook {
    by_order: HashMap<OrderId, PaymentReference>,
    statuses: HashMap<PaymentReference, PaymentStatus>,
    created: usize,
}

/// Payment provider whose answers are set by the test.
///
/// `create_payment` is idempotent per order and issues `pay_1`, `pay_2`, ...
/// New payments start `Pending`.
#[derive(Clone, Debug, Default)]
pub struct ScriptedPaymentProvider {
    book: Arc<Mutex<PaymentBook>>,
    unavailable: Arc<AtomicBool>,
}

impl ScriptedPaymentProvider {
    /// Create a provider with no payments.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail as if the provider were down.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Script the status of a payment.
    pub fn set_status(&self, reference: &PaymentReference, status: PaymentStatus) {
        self.book
            .lock()
            .unwrap()
            .statuses
            .insert(reference.clone(), status);
    }

    /// Distinct payments created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.book.lock().unwrap().created
    }

    fn check_available(&self) -> Result<(), PaymentError> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(PaymentError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

impl PaymentProvider for ScriptedPaymentProvider {
    fn create_payment(
        &self,
        order_id: OrderId,
        _amount: Money,
    ) -> BoxFuture<'_, Result<PaymentReference, PaymentError>> {
        let result = self.check_available().map(|()| {
            let mut book = self.book.lock().unwrap();
            if let Some(existing) = book.by_order.get(&order_id) {
                return existing.clone();
            }
            book.created += 1;
            let reference = PaymentReference::new(format!("pay_{}", book.created));
            book.by_order.insert(order_id, reference.clone());
            book.statuses.insert(reference.clone(), PaymentStatus::Pending);
            reference
        });
        Box::pin(ready(result))
    }

    fn payment_status(
        &self,
        reference: PaymentReference,
    ) -> BoxFuture<'_, Result<PaymentStatus, PaymentError>> {
        let result = self.check_available().and_then(|()| {
            self.book
                .lock()
                .unwrap()
                .statuses
                .get(&reference)
                .copied()
                .ok_or(PaymentError::UnknownReference(reference))
        });
        Box::pin(ready(result))
    }
}

// ============================================================================
// Faulty stock ledger
// ============================================================================

/// Stock ledger wrapper that injects failures.
///
/// - `fail_releases(n)` makes the next `n` releases fail with a transient
///   database error (`usize::MAX` for all of them)
/// - `fail_reserve_for(item)` makes reservations of `item` fail
#[derive(Clone)]
pub struct FaultyStockLedger {
    inner: Arc<dyn StockLedger>,
    release_failures: Arc<AtomicUsize>,
    release_calls: Arc<AtomicUsize>,
    failing_reserves: Arc<Mutex<HashSet<ItemId>>>,
}

impl std::fmt::Debug for FaultyStockLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FaultyStockLedger")
            .field("release_failures", &self.release_failures)
            .field("release_calls", &self.release_calls)
            .finish_non_exhaustive()
    }
}

impl FaultyStockLedger {
    /// Wrap `inner` with no faults enabled.
    #[must_use]
    pub fn new(inner: Arc<dyn StockLedger>) -> Self {
        Self {
            inner,
            release_failures: Arc::new(AtomicUsize::new(0)),
            release_calls: Arc::new(AtomicUsize::new(0)),
            failing_reserves: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Fail the next `count` releases.
    pub fn fail_releases(&self, count: usize) {
        self.release_failures.store(count, Ordering::SeqCst);
    }

    /// Fail every reservation of `item_id`.
    pub fn fail_reserve_for(&self, item_id: ItemId) {
        self.failing_reserves.lock().unwrap().insert(item_id);
    }

    /// Release attempts seen, including failed ones.
    #[must_use]
    pub fn release_calls(&self) -> usize {
        self.release_calls.load(Ordering::SeqCst)
    }

    fn take_release_failure(&self) -> bool {
        self.release_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| match left {
                0 => None,
                usize::MAX => Some(usize::MAX),
                n => Some(n - 1),
            })
            .is_ok()
    }
}

impl StockLedger for FaultyStockLedger {
    fn try_reserve(
        &self,
        item_id: ItemId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<ReserveOutcome, StoreError>> {
        if self.failing_reserves.lock().unwrap().contains(&item_id) {
            return Box::pin(ready(Err(StoreError::Database(
                "stock ledger unavailable".to_string(),
            ))));
        }
        self.inner.try_reserve(item_id, quantity)
    }

    fn release(&self, item_id: ItemId, quantity: u32) -> BoxFuture<'_, Result<(), StoreError>> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_release_failure() {
            return Box::pin(ready(Err(StoreError::Database(
                "connection reset".to_string(),
            ))));
        }
        self.inner.release(item_id, quantity)
    }
}
