//! Reconciliation sweep tests: stale pending orders and unconfirmed
//! memberships.
//!
//! Run with: `cargo test --test sweeper_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use atelier_core::capacity::MembershipStatus;
use atelier_core::catalog::ItemKind;
use atelier_core::order::{CartLine, Order, OrderStatus};
use atelier_core::payment::PaymentStatus;
use atelier_core::state_machine::EXPIRED_REASON;
use atelier_core::types::{ItemId, PaymentReference};
use atelier_runtime::{CheckoutRequest, EngineSettings, SweepReport};
use atelier_testing::harness::{address, fast_settings};
use atelier_testing::TestMarketplace;
use chrono::TimeDelta;

async fn place(t: &TestMarketplace, item: ItemId, quantity: u32) -> Order {
    t.market
        .checkout
        .checkout(CheckoutRequest {
            buyer_id: t.buyer(),
            lines: vec![CartLine::new(item, quantity)],
            shipping: Some(address()),
        })
        .await
        .expect("checkout succeeds")
}

#[tokio::test]
async fn stale_pending_orders_are_expired_and_restocked() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 10);

    let stale = place(&t, item, 3).await;
    let settled = place(&t, item, 2).await;
    t.market.lifecycle.mark_paid(settled.id).await.expect("paid");

    t.clock.advance(TimeDelta::minutes(20));
    let fresh = place(&t, item, 1).await;
    assert_eq!(t.available(item), Some(4));

    // The first orders are now 31 minutes old, the last one 11.
    t.clock.advance(TimeDelta::minutes(11));
    let report = t.market.pending_orders.sweep().await.expect("sweep");

    assert_eq!(
        report,
        SweepReport {
            examined: 1,
            expired: 1,
            ..SweepReport::default()
        }
    );
    let expired = t.order(stale.id).expect("order exists");
    assert_eq!(expired.status, OrderStatus::Cancelled);
    assert_eq!(expired.refund_reason.as_deref(), Some(EXPIRED_REASON));
    assert_eq!(t.order(settled.id).map(|o| o.status), Some(OrderStatus::Paid));
    assert_eq!(t.order(fresh.id).map(|o| o.status), Some(OrderStatus::Pending));
    assert_eq!(t.available(item), Some(7));

    // A second pass finds nothing new.
    let again = t.market.pending_orders.sweep().await.expect("sweep");
    assert_eq!(again, SweepReport::default());
}

async fn place_with_payment(t: &TestMarketplace, item: ItemId) -> (Order, PaymentReference) {
    let order = place(t, item, 1).await;
    let reference = t
        .market
        .settlement
        .initiate_payment(order.buyer_id, order.id)
        .await
        .expect("payment created");
    (order, reference)
}

#[tokio::test]
async fn captured_payment_settles_instead_of_expiring() {
    let t = TestMarketplace::new();
    let video = t.add_item(ItemKind::DigitalVideo, 2_000, 1);
    let (order, reference) = place_with_payment(&t, video).await;
    t.payments.set_status(&reference, PaymentStatus::Succeeded);

    t.clock.advance(TimeDelta::hours(1));
    let report = t.market.pending_orders.sweep().await.expect("sweep");

    assert_eq!(
        report,
        SweepReport {
            examined: 1,
            settled: 1,
            ..SweepReport::default()
        }
    );
    let stored = t.order(order.id).expect("order exists");
    assert_eq!(stored.status, OrderStatus::Paid);
    assert!(stored.paid_at.is_some());
    assert_eq!(t.available(video), Some(0));
    let grants = t.grants.all();
    assert_eq!(grants.len(), 1);
    assert!(grants[0].active);
    assert_eq!(grants[0].order_id, order.id);
    assert_eq!(t.notifier.count("order_confirmed"), 1);
}

#[tokio::test]
async fn uncaptured_payments_are_expired() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 3);
    let (waiting, _) = place_with_payment(&t, item).await;
    let (declined, reference) = place_with_payment(&t, item).await;
    t.payments.set_status(&reference, PaymentStatus::Failed);

    t.clock.advance(TimeDelta::hours(1));
    let report = t.market.pending_orders.sweep().await.expect("sweep");

    assert_eq!(report.expired, 2);
    assert_eq!(report.settled, 0);
    assert_eq!(t.order(waiting.id).map(|o| o.status), Some(OrderStatus::Cancelled));
    assert_eq!(t.order(declined.id).map(|o| o.status), Some(OrderStatus::Cancelled));
    assert_eq!(t.available(item), Some(3));
}

#[tokio::test]
async fn provider_outage_leaves_referenced_orders_pending() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 1);
    let (order, reference) = place_with_payment(&t, item).await;
    t.clock.advance(TimeDelta::hours(1));
    t.payments.set_unavailable(true);

    let report = t.market.pending_orders.sweep().await.expect("sweep");

    assert_eq!(report.failed, 1);
    assert_eq!(report.expired, 0);
    assert_eq!(t.order(order.id).map(|o| o.status), Some(OrderStatus::Pending));
    assert_eq!(t.available(item), Some(0));

    // The next sweep after the provider recovers sees the capture.
    t.payments.set_unavailable(false);
    t.payments.set_status(&reference, PaymentStatus::Succeeded);
    let report = t.market.pending_orders.sweep().await.expect("sweep");
    assert_eq!(report.settled, 1);
    assert_eq!(t.order(order.id).map(|o| o.status), Some(OrderStatus::Paid));
}

#[tokio::test]
async fn sweep_respects_batch_size() {
    let t = TestMarketplace::with_settings(EngineSettings {
        sweep_batch_size: 2,
        ..fast_settings()
    });
    let item = t.add_item(ItemKind::DigitalVideo, 500, 5);
    for _ in 0..5 {
        place(&t, item, 1).await;
    }
    t.clock.advance(TimeDelta::hours(1));

    let first = t.market.pending_orders.sweep().await.expect("sweep");
    assert_eq!(first.expired, 2);
    let second = t.market.pending_orders.sweep().await.expect("sweep");
    assert_eq!(second.expired, 2);
    let third = t.market.pending_orders.sweep().await.expect("sweep");
    assert_eq!(third.expired, 1);
    assert_eq!(t.available(item), Some(5));
}

#[tokio::test]
async fn sweep_reports_compensation_failures() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 1);
    let order = place(&t, item, 1).await;
    t.clock.advance(TimeDelta::hours(1));
    t.stock.fail_releases(usize::MAX);

    let report = t.market.pending_orders.sweep().await.expect("sweep");

    assert_eq!(report.expired, 1);
    assert_eq!(report.compensation_failures, 1);
    assert_eq!(t.corrections.all().len(), 1);
    assert_eq!(t.order(order.id).map(|o| o.status), Some(OrderStatus::Cancelled));
}

/// A settlement landing during the sweep wins or loses through the status
/// guard; the order is never both paid and restocked.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn sweep_racing_settlement_is_consistent() {
    for _ in 0..20 {
        let t = TestMarketplace::new();
        let item = t.add_item(ItemKind::Physical, 1_000, 1);
        let order = place(&t, item, 1).await;
        t.clock.advance(TimeDelta::hours(1));

        let sweep = {
            let market = t.market.clone();
            tokio::spawn(async move { market.pending_orders.sweep().await })
        };
        let pay = {
            let market = t.market.clone();
            tokio::spawn(async move { market.lifecycle.mark_paid(order.id).await })
        };
        let report = sweep.await.expect("task completes").expect("sweep");
        let paid = pay.await.expect("task completes");

        match t.order(order.id).map(|o| o.status) {
            Some(OrderStatus::Paid) => {
                assert!(paid.is_ok());
                assert_eq!(report.expired, 0);
                assert_eq!(t.available(item), Some(0));
            }
            Some(OrderStatus::Cancelled) => {
                assert!(paid.is_err());
                assert_eq!(report.expired, 1);
                assert_eq!(t.available(item), Some(1));
            }
            other => panic!("unexpected status {other:?}"),
        }
    }
}

#[tokio::test]
async fn unconfirmed_memberships_expire_and_free_capacity() {
    let t = TestMarketplace::new();
    let event = t.add_event(2);
    let (confirmed, lapsed) = (t.buyer(), t.buyer());

    let atelier_runtime::Admission::Joined(token) =
        t.market.attendance.join(event, confirmed).await.expect("joined")
    else {
        panic!("expected a new membership");
    };
    t.market.attendance.confirm(event, token).await.expect("confirmed");
    t.market.attendance.join(event, lapsed).await.expect("joined");
    assert!(t.market.attendance.join(event, t.buyer()).await.is_err());

    t.clock.advance(TimeDelta::hours(49));
    let report = t.market.memberships.sweep().await.expect("sweep");

    assert_eq!(report.expired, 1);
    let resource = t.capacity.snapshot(event).expect("event exists");
    assert_eq!(
        resource.membership(lapsed).map(|m| m.status),
        Some(MembershipStatus::Cancelled)
    );
    assert_eq!(
        resource.membership(confirmed).map(|m| m.status),
        Some(MembershipStatus::Registered)
    );
    assert!(t.market.attendance.join(event, t.buyer()).await.is_ok());
}

#[tokio::test]
async fn membership_expiry_can_be_disabled() {
    let t = TestMarketplace::with_settings(EngineSettings {
        attendance_confirmation_ttl: None,
        ..fast_settings()
    });
    let event = t.add_event(1);
    let member = t.buyer();
    t.market.attendance.join(event, member).await.expect("joined");

    t.clock.advance(TimeDelta::days(30));
    let report = t.market.memberships.sweep().await.expect("sweep");

    assert_eq!(report, SweepReport::default());
    assert_eq!(
        t.capacity
            .snapshot(event)
            .and_then(|r| r.membership(member).map(|m| m.status)),
        Some(MembershipStatus::NotConfirmed)
    );
}
