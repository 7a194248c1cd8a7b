//! Reservation coordinator tests: validation, rollback and contention.
//!
//! Run with: `cargo test --test checkout_test -- --nocapture`

#![allow(clippy::expect_used, clippy::unwrap_used)] // Test code can use unwrap/expect

use atelier_core::catalog::ItemKind;
use atelier_core::error::{CheckoutError, StoreError, ValidationError};
use atelier_core::order::{CartLine, OrderStatus};
use atelier_core::types::{ItemId, Money};
use atelier_runtime::CheckoutRequest;
use atelier_testing::harness::address;
use atelier_testing::TestMarketplace;
use futures::future::join_all;

fn request(t: &TestMarketplace, lines: Vec<CartLine>) -> CheckoutRequest {
    CheckoutRequest {
        buyer_id: t.buyer(),
        lines,
        shipping: Some(address()),
    }
}

#[tokio::test]
async fn checkout_creates_pending_order_with_commission_split() {
    let t = TestMarketplace::new();
    let painting = t.add_item(ItemKind::Physical, 3_333, 5);
    let video = t.add_item(ItemKind::DigitalVideo, 999, 10);

    let order = t
        .market
        .checkout
        .checkout(request(&t, vec![CartLine::new(painting, 3), CartLine::new(video, 1)]))
        .await
        .expect("checkout succeeds");

    assert_eq!(order.status, OrderStatus::Pending);
    assert_eq!(order.lines.len(), 2);
    // 99.99 at 10% -> 10.00 fee; 9.99 at 10% -> 1.00 fee (0.999 rounds up)
    assert_eq!(order.lines[0].platform_fee, Money::from_cents(1_000));
    assert_eq!(order.lines[0].seller_earnings, Money::from_cents(8_999));
    assert_eq!(order.lines[1].platform_fee, Money::from_cents(100));
    assert_eq!(order.subtotal, Money::from_cents(9_999 + 999));
    assert_eq!(order.total_amount, order.subtotal);
    assert_eq!(order.platform_fee_total, Money::from_cents(1_100));
    assert_eq!(order.platform_fee_rate, t.env.settings.commission_rate);

    assert_eq!(t.available(painting), Some(2));
    assert_eq!(t.available(video), Some(9));
    assert_eq!(t.order(order.id).map(|o| o.status), Some(OrderStatus::Pending));
}

#[tokio::test]
async fn digital_lines_record_inactive_grants() {
    let t = TestMarketplace::new();
    let video = t.add_item(ItemKind::DigitalVideo, 1_200, 3);
    let buyer = t.buyer();

    let order = t
        .market
        .checkout
        .checkout(CheckoutRequest {
            buyer_id: buyer,
            lines: vec![CartLine::new(video, 1)],
            shipping: None,
        })
        .await
        .expect("digital-only checkout needs no address");

    assert!(order.shipping.is_none());
    let grants = t.grants.all();
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].order_id, order.id);
    assert_eq!(grants[0].buyer_id, buyer);
    assert!(!grants[0].active);
}

#[tokio::test]
async fn checkout_cart_uses_stored_cart_and_leaves_it_in_place() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 500, 4);
    let buyer = t.buyer();
    t.carts.add(buyer, CartLine::new(item, 2));

    let order = t
        .market
        .checkout
        .checkout_cart(buyer, Some(address()))
        .await
        .expect("checkout succeeds");

    assert_eq!(order.buyer_id, buyer);
    assert_eq!(t.available(item), Some(2));
    // The cart is only cleared on settlement.
    assert_eq!(t.carts.lines(buyer).len(), 1);
    assert_eq!(t.carts.clear_count(buyer), 0);
}

#[tokio::test]
async fn validation_failures_have_no_side_effects() {
    let t = TestMarketplace::new();
    let physical = t.add_item(ItemKind::Physical, 1_000, 3);
    let hidden = t.add_item(ItemKind::Physical, 1_000, 3);
    t.catalog.set_for_sale(hidden, false);
    let missing = ItemId::new();

    let cases = vec![
        (request(&t, vec![]), ValidationError::EmptyCart),
        (
            request(&t, vec![CartLine::new(physical, 0)]),
            ValidationError::InvalidQuantity { item_id: physical },
        ),
        (
            request(&t, vec![CartLine::new(physical, 1), CartLine::new(missing, 1)]),
            ValidationError::ItemNotFound { item_id: missing },
        ),
        (
            request(&t, vec![CartLine::new(physical, 1), CartLine::new(hidden, 1)]),
            ValidationError::ItemNotForSale { item_id: hidden },
        ),
        (
            CheckoutRequest {
                buyer_id: t.buyer(),
                lines: vec![CartLine::new(physical, 1)],
                shipping: None,
            },
            ValidationError::MissingShippingInfo,
        ),
    ];

    for (req, expected) in cases {
        let result = t.market.checkout.checkout(req).await;
        assert_eq!(result, Err(CheckoutError::Validation(expected)));
    }

    assert_eq!(t.available(physical), Some(3));
    assert_eq!(t.available(hidden), Some(3));
    assert!(t.orders.is_empty());
}

#[tokio::test]
async fn incomplete_address_is_rejected() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 1_000, 1);
    let mut shipping = address();
    shipping.postal_code.clear();

    let result = t
        .market
        .checkout
        .checkout(CheckoutRequest {
            buyer_id: t.buyer(),
            lines: vec![CartLine::new(item, 1)],
            shipping: Some(shipping),
        })
        .await;

    assert_eq!(
        result,
        Err(CheckoutError::Validation(ValidationError::MissingShippingInfo))
    );
}

/// Rollback completeness: the third line fails, the first two are restored.
#[tokio::test]
async fn insufficient_stock_rolls_back_earlier_lines() {
    let t = TestMarketplace::new();
    let a = t.add_item(ItemKind::Physical, 1_000, 5);
    let b = t.add_item(ItemKind::Physical, 2_000, 2);
    let c = t.add_item(ItemKind::Physical, 3_000, 1);

    let result = t
        .market
        .checkout
        .checkout(request(
            &t,
            vec![CartLine::new(a, 2), CartLine::new(b, 2), CartLine::new(c, 3)],
        ))
        .await;

    assert_eq!(
        result,
        Err(CheckoutError::InsufficientStock {
            item_id: c,
            requested: 3,
            available: 1,
        })
    );
    assert_eq!(t.available(a), Some(5));
    assert_eq!(t.available(b), Some(2));
    assert_eq!(t.available(c), Some(1));
    assert!(t.orders.is_empty());
    assert!(t.corrections.all().is_empty());
}

#[tokio::test]
async fn ledger_error_mid_checkout_rolls_back() {
    let t = TestMarketplace::new();
    let a = t.add_item(ItemKind::Physical, 1_000, 5);
    let b = t.add_item(ItemKind::Physical, 1_000, 5);
    t.stock.fail_reserve_for(b);

    let result = t
        .market
        .checkout
        .checkout(request(&t, vec![CartLine::new(a, 1), CartLine::new(b, 1)]))
        .await;

    assert!(matches!(result, Err(CheckoutError::Store(StoreError::Database(_)))));
    assert_eq!(t.available(a), Some(5));
    assert!(t.orders.is_empty());
}

#[tokio::test]
async fn failed_order_write_rolls_back_every_reservation() {
    let t = TestMarketplace::new();
    let a = t.add_item(ItemKind::Physical, 1_000, 2);
    let b = t.add_item(ItemKind::DigitalVideo, 1_000, 2);
    t.orders.fail_inserts(true);

    let result = t
        .market
        .checkout
        .checkout(request(&t, vec![CartLine::new(a, 2), CartLine::new(b, 1)]))
        .await;

    assert!(matches!(result, Err(CheckoutError::Store(_))));
    assert_eq!(t.available(a), Some(2));
    assert_eq!(t.available(b), Some(2));
    assert!(t.grants.all().is_empty());
}

#[tokio::test]
async fn rollback_failure_is_recorded_for_manual_correction() {
    atelier_testing::init_tracing();
    let t = TestMarketplace::new();
    let a = t.add_item(ItemKind::Physical, 1_000, 4);
    let b = t.add_item(ItemKind::Physical, 1_000, 0);
    t.stock.fail_releases(usize::MAX);

    let result = t
        .market
        .checkout
        .checkout(request(&t, vec![CartLine::new(a, 3), CartLine::new(b, 1)]))
        .await;

    // The buyer still sees the precise stock error.
    assert!(matches!(result, Err(CheckoutError::InsufficientStock { item_id, .. }) if item_id == b));
    assert_eq!(t.available(a), Some(1));

    let records = t.corrections.all();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].kind,
        atelier_core::correction::CorrectionKind::ReleaseStock {
            item_id: a,
            quantity: 3
        }
    );
    assert_eq!(records[0].order_id, None);
    // Initial attempt + 2 retries.
    assert_eq!(t.stock.release_calls(), 3);
}

#[tokio::test]
async fn duplicate_lines_are_reserved_independently() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 700, 3);

    let order = t
        .market
        .checkout
        .checkout(request(&t, vec![CartLine::new(item, 1), CartLine::new(item, 2)]))
        .await
        .expect("both lines fit");
    assert_eq!(order.lines.len(), 2);
    assert_eq!(t.available(item), Some(0));

    let result = t
        .market
        .checkout
        .checkout(request(&t, vec![CartLine::new(item, 1)]))
        .await;
    assert!(matches!(result, Err(CheckoutError::InsufficientStock { available: 0, .. })));
}

/// Two buyers race for the last unit: one order, one precise rejection.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn last_unit_goes_to_exactly_one_buyer() {
    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::Physical, 45_000, 1);

    let attempts = (0..2).map(|_| {
        let market = t.market.clone();
        let req = request(&t, vec![CartLine::new(item, 1)]);
        tokio::spawn(async move { market.checkout.checkout(req).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task completes"))
        .collect();

    let orders: Vec<_> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].lines[0].item_id, item);
    assert!(results.iter().any(|r| *r
        == Err(CheckoutError::InsufficientStock {
            item_id: item,
            requested: 1,
            available: 0,
        })));
    assert_eq!(t.available(item), Some(0));
}

/// No oversell: M concurrent single-unit checkouts against N units.
#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_checkouts_never_oversell() {
    const STOCK: u32 = 10;
    const BUYERS: usize = 100;

    let t = TestMarketplace::new();
    let item = t.add_item(ItemKind::DigitalVideo, 1_000, STOCK);

    let attempts = (0..BUYERS).map(|_| {
        let market = t.market.clone();
        let req = request(&t, vec![CartLine::new(item, 1)]);
        tokio::spawn(async move { market.checkout.checkout(req).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task completes"))
        .collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let rejected = results
        .iter()
        .filter(|r| matches!(r, Err(CheckoutError::InsufficientStock { .. })))
        .count();

    println!("  ✅ {succeeded} succeeded, {rejected} rejected");
    assert_eq!(succeeded, STOCK as usize);
    assert_eq!(rejected, BUYERS - STOCK as usize);
    assert_eq!(t.available(item), Some(0));
    assert_eq!(t.orders.len(), STOCK as usize);
}
