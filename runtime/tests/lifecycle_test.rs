//! Order lifecycle tests: guarded transitions, stock restoration and
//! compensation failures.
//!
//! Run with: `cargo test --test lifecycle_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)] // Test code can use unwrap/expect

use atelier_core::catalog::ItemKind;
use atelier_core::correction::CorrectionKind;
use atelier_core::error::TransitionError;
use atelier_core::grant::GrantStore;
use atelier_core::order::{CartLine, Order, OrderStatus};
use atelier_core::types::{OrderId, UserId};
use atelier_runtime::CheckoutRequest;
use atelier_testing::harness::address;
use atelier_testing::TestMarketplace;

async fn place(t: &TestMarketplace, lines: Vec<CartLine>) -> Order {
    t.market
        .checkout
        .checkout(CheckoutRequest {
            buyer_id: t.buyer(),
            lines,
            shipping: Some(address()),
        })
        .await
        .expect("checkout succeeds")
}

#[tokio::test]
async fn cancelling_a_paid_order_restores_stock_and_revokes_access() {
    let t = TestMarketplace::new();
    let print = t.add_item(ItemKind::Physical, 8_000, 5);
    let video = t.add_item(ItemKind::DigitalVideo, 1_500, 1);

    let order = place(&t, vec![CartLine::new(print, 3), CartLine::new(video, 1)]).await;
    t.market.lifecycle.mark_paid(order.id).await.expect("paid");
    assert!(t.grants.all().iter().all(|g| g.active));
    assert_eq!(t.available(print), Some(2));
    assert_eq!(t.available(video), Some(0));

    let report = t
        .market
        .lifecycle
        .cancel(order.id, "damaged in transit")
        .await
        .expect("cancel from paid");

    assert!(report.is_clean());
    assert_eq!(report.from, OrderStatus::Paid);
    assert_eq!(report.to, OrderStatus::Cancelled);
    assert_eq!(t.available(print), Some(5));
    assert_eq!(t.available(video), Some(1));
    assert!(t.grants.all().is_empty());

    let stored = t.order(order.id).expect("order exists");
    assert_eq!(stored.status, OrderStatus::Cancelled);
    assert_eq!(stored.refund_reason.as_deref(), Some("damaged in transit"));
    assert!(stored.refunded_at.is_some());
    assert_eq!(t.notifier.count("order_cancelled"), 1);
}

async fn place_for(t: &TestMarketplace, buyer_id: UserId, lines: Vec<CartLine>) -> Order {
    t.market
        .checkout
        .checkout(CheckoutRequest {
            buyer_id,
            lines,
            shipping: None,
        })
        .await
        .expect("checkout succeeds")
}

#[tokio::test]
async fn paid_order_keeps_access_when_an_earlier_unpaid_order_expires() {
    let t = TestMarketplace::new();
    let buyer = t.buyer();
    let video = t.add_item(ItemKind::DigitalVideo, 1_500, 2);

    let abandoned = place_for(&t, buyer, vec![CartLine::new(video, 1)]).await;
    let paid = place_for(&t, buyer, vec![CartLine::new(video, 1)]).await;
    let grant = t.grants.find(buyer, video).await.unwrap().expect("grant from checkout");
    assert_eq!(grant.order_id, abandoned.id);
    assert!(!grant.active);

    t.market.lifecycle.mark_paid(paid.id).await.expect("paid");
    t.market.lifecycle.expire(abandoned.id).await.expect("expired");

    let grant = t.grants.find(buyer, video).await.unwrap().expect("grant kept");
    assert_eq!(grant.order_id, paid.id);
    assert!(grant.active);
    assert_eq!(t.grants.all().len(), 1);
    assert_eq!(t.available(video), Some(1));

    // Cancelling the paid order now removes the access it owns.
    t.market.lifecycle.cancel(paid.id, "refund requested").await.expect("cancel");
    assert_eq!(t.grants.find(buyer, video).await, Ok(None));
}

#[tokio::test]
async fn second_paid_order_leaves_the_active_grant_with_the_first() {
    let t = TestMarketplace::new();
    let buyer = t.buyer();
    let video = t.add_item(ItemKind::DigitalVideo, 1_500, 2);

    let first = place_for(&t, buyer, vec![CartLine::new(video, 1)]).await;
    let second = place_for(&t, buyer, vec![CartLine::new(video, 1)]).await;
    t.market.lifecycle.mark_paid(first.id).await.expect("first paid");
    t.market.lifecycle.mark_paid(second.id).await.expect("second paid");

    let grant = t.grants.find(buyer, video).await.unwrap().expect("grant");
    assert_eq!(grant.order_id, first.id);
    assert!(grant.active);

    // Cancelling the order that does not own the grant leaves access intact.
    t.market.lifecycle.cancel(second.id, "duplicate").await.expect("cancel");
    assert!(t.grants.find(buyer, video).await.unwrap().is_some_and(|g| g.active));
}

#[tokio::test]
async fn cancelling_a_pending_order_restores_stock() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 1);
    let order = place(&t, vec![CartLine::new(item, 1)]).await;
    assert_eq!(t.available(item), Some(0));

    t.market
        .lifecycle
        .cancel(order.id, "buyer changed their mind")
        .await
        .expect("cancel from pending");

    assert_eq!(t.available(item), Some(1));
}

#[tokio::test]
async fn full_fulfilment_path() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 1);
    let order = place(&t, vec![CartLine::new(item, 1)]).await;

    t.market.lifecycle.mark_paid(order.id).await.expect("paid");
    t.market.lifecycle.mark_shipped(order.id).await.expect("shipped");
    let report = t.market.lifecycle.mark_delivered(order.id).await.expect("delivered");

    assert_eq!(report.to, OrderStatus::Delivered);
    let stored = t.order(order.id).expect("order exists");
    assert!(stored.paid_at.is_some());
    assert!(stored.shipped_at.is_some());
    assert!(stored.delivered_at.is_some());
    // Delivery does not give stock back.
    assert_eq!(t.available(item), Some(0));
}

#[tokio::test]
async fn invalid_transitions_are_rejected_without_effects() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 2);
    let order = place(&t, vec![CartLine::new(item, 1)]).await;

    let shipped_early = t.market.lifecycle.mark_shipped(order.id).await;
    assert_eq!(
        shipped_early,
        Err(TransitionError::InvalidTransition {
            status: OrderStatus::Pending,
            event: "mark shipped",
        })
    );

    t.market.lifecycle.cancel(order.id, "test").await.expect("cancel");

    // Cancelled is terminal; a second cancel must not release stock twice.
    let again = t.market.lifecycle.cancel(order.id, "test").await;
    assert!(matches!(
        again,
        Err(TransitionError::InvalidTransition {
            status: OrderStatus::Cancelled,
            ..
        })
    ));
    assert!(t.market.lifecycle.mark_paid(order.id).await.is_err());
    assert_eq!(t.available(item), Some(2));
}

#[tokio::test]
async fn delivered_orders_cannot_be_cancelled() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 1);
    let order = place(&t, vec![CartLine::new(item, 1)]).await;
    t.market.lifecycle.mark_paid(order.id).await.expect("paid");
    t.market.lifecycle.mark_shipped(order.id).await.expect("shipped");
    t.market.lifecycle.mark_delivered(order.id).await.expect("delivered");

    let result = t.market.lifecycle.cancel(order.id, "too late").await;
    assert!(matches!(result, Err(TransitionError::InvalidTransition { .. })));
    assert_eq!(t.available(item), Some(0));
}

#[tokio::test]
async fn unknown_order_is_reported() {
    let t = TestMarketplace::new();
    let missing = OrderId::new();
    assert_eq!(
        t.market.lifecycle.mark_paid(missing).await,
        Err(TransitionError::OrderNotFound(missing))
    );
}

/// Cancel racing ship: exactly one wins, and stock is restored only if the
/// cancel won.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancel_racing_ship_has_one_winner() {
    for round in 0..20 {
        let t = TestMarketplace::new();
        let item = t.add_item(ItemKind::Physical, 1_000, 1);
        let order = place(&t, vec![CartLine::new(item, 1)]).await;
        t.market.lifecycle.mark_paid(order.id).await.expect("paid");

        let cancel = {
            let market = t.market.clone();
            tokio::spawn(async move { market.lifecycle.cancel(order.id, "race").await })
        };
        let ship = {
            let market = t.market.clone();
            tokio::spawn(async move { market.lifecycle.mark_shipped(order.id).await })
        };
        let cancel = cancel.await.expect("task completes");
        let ship = ship.await.expect("task completes");

        let status = t.order(order.id).expect("order exists").status;
        match (&cancel, &ship) {
            (Ok(_), Err(_)) => {
                assert_eq!(status, OrderStatus::Cancelled, "round {round}");
                assert_eq!(t.available(item), Some(1));
            }
            (Err(_), Ok(_)) => {
                assert_eq!(status, OrderStatus::Shipped, "round {round}");
                assert_eq!(t.available(item), Some(0));
            }
            // Ship then cancel in sequence is also a legal interleaving.
            (Ok(_), Ok(_)) => {
                assert_eq!(status, OrderStatus::Cancelled, "round {round}");
                assert_eq!(t.available(item), Some(1));
            }
            (Err(c), Err(s)) => panic!("round {round}: both lost: {c} / {s}"),
        }
    }
}

/// Concurrent duplicate cancels release stock exactly once.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_cancels_release_once() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 3);
    let order = place(&t, vec![CartLine::new(item, 3)]).await;

    let handles: Vec<_> = (0..10)
        .map(|_| {
            let market = t.market.clone();
            tokio::spawn(async move { market.lifecycle.cancel(order.id, "dup").await })
        })
        .collect();

    let mut won = 0;
    for handle in handles {
        match handle.await.expect("task completes") {
            Ok(_) => won += 1,
            Err(TransitionError::Conflict { actual, .. }) => {
                assert_eq!(actual, OrderStatus::Cancelled);
            }
            Err(TransitionError::InvalidTransition { status, .. }) => {
                assert_eq!(status, OrderStatus::Cancelled);
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(won, 1);
    assert_eq!(t.available(item), Some(3));
    assert_eq!(t.notifier.count("order_cancelled"), 1);
}

#[tokio::test]
async fn transient_release_failure_is_retried() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 2);
    let order = place(&t, vec![CartLine::new(item, 2)]).await;

    t.stock.fail_releases(1);
    let report = t.market.lifecycle.cancel(order.id, "retry").await.expect("cancel");

    assert!(report.is_clean());
    assert_eq!(t.available(item), Some(2));
    assert_eq!(t.stock.release_calls(), 2);
    assert!(t.corrections.all().is_empty());
}

/// Retry exhaustion leaves the order cancelled and one correction record per
/// line that could not be released.
#[tokio::test]
async fn exhausted_release_retries_write_correction_records() {
    atelier_testing::init_tracing();
    let t = TestMarketplace::new();
    let a = t.add_item(ItemKind::Physical, 1_000, 2);
    let b = t.add_item(ItemKind::Physical, 1_000, 4);
    let order = place(&t, vec![CartLine::new(a, 1), CartLine::new(b, 4)]).await;

    t.stock.fail_releases(usize::MAX);
    let report = t.market.lifecycle.cancel(order.id, "broken ledger").await.expect("cancel");

    assert_eq!(report.to, OrderStatus::Cancelled);
    assert_eq!(report.compensation_failures.len(), 2);
    assert!(report.compensation_failures.iter().all(|f| f.recorded));

    let records = t.corrections.all();
    assert_eq!(records.len(), 2);
    assert!(records.iter().all(|r| r.order_id == Some(order.id) && !r.is_resolved()));
    assert!(records
        .iter()
        .any(|r| r.kind == CorrectionKind::ReleaseStock { item_id: a, quantity: 1 }));
    assert!(records
        .iter()
        .any(|r| r.kind == CorrectionKind::ReleaseStock { item_id: b, quantity: 4 }));

    // Stock was not restored, but the status change stands.
    assert_eq!(t.available(a), Some(1));
    assert_eq!(t.available(b), Some(0));
    assert_eq!(t.order(order.id).map(|o| o.status), Some(OrderStatus::Cancelled));
}

#[tokio::test]
async fn grant_revocation_failure_is_recorded() {
    let t = TestMarketplace::new();
    let video = t.add_item(ItemKind::DigitalVideo, 1_000, 1);
    let order = place(&t, vec![CartLine::new(video, 1)]).await;
    t.market.lifecycle.mark_paid(order.id).await.expect("paid");

    t.grants.fail_revocations(true);
    let report = t.market.lifecycle.cancel(order.id, "chargeback").await.expect("cancel");

    assert_eq!(report.compensation_failures.len(), 1);
    assert_eq!(report.compensation_failures[0].kind, CorrectionKind::RevokeGrants);
    assert_eq!(t.available(video), Some(1));
    assert_eq!(t.corrections.all().len(), 1);
}

#[tokio::test]
async fn correction_log_outage_is_reported_as_unrecorded() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 1);
    let order = place(&t, vec![CartLine::new(item, 1)]).await;

    t.stock.fail_releases(usize::MAX);
    t.corrections.fail_writes(true);
    let report = t.market.lifecycle.cancel(order.id, "outage").await.expect("cancel");

    assert_eq!(report.compensation_failures.len(), 1);
    assert!(!report.compensation_failures[0].recorded);
    assert!(t.corrections.all().is_empty());
}
