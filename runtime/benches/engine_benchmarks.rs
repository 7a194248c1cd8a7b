//! Engine benchmarks
//!
//! - Commission split: pure integer arithmetic per line
//! - State machine decisions: table lookup plus effect list
//! - Retry policy delay computation
//! - Checkout and settlement round trips over in-memory stores
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::expect_used)] // Benchmarks can use expect for setup

use atelier_core::catalog::ItemKind;
use atelier_core::commission::{split, CommissionRate};
use atelier_core::order::{CartLine, OrderStatus};
use atelier_core::state_machine::{OrderEvent, OrderStateMachine};
use atelier_core::types::{Money, UserId};
use atelier_runtime::retry::RetryPolicy;
use atelier_runtime::CheckoutRequest;
use atelier_testing::harness::sample_order;
use atelier_testing::mocks::test_epoch;
use atelier_testing::TestMarketplace;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

fn benchmark_commission(c: &mut Criterion) {
    let mut group = c.benchmark_group("commission");

    for quantity in [1u32, 10, 1_000] {
        group.bench_with_input(BenchmarkId::new("split", quantity), &quantity, |b, &qty| {
            b.iter(|| {
                split(
                    black_box(Money::from_cents(12_345)),
                    black_box(qty),
                    black_box(CommissionRate::DEFAULT),
                )
            });
        });
    }

    group.bench_function("parse_rate", |b| {
        b.iter(|| black_box("0.1250").parse::<CommissionRate>());
    });

    group.finish();
}

fn benchmark_state_machine(c: &mut Criterion) {
    let mut group = c.benchmark_group("state_machine");
    let pending = sample_order(UserId::new(), test_epoch());
    let mut paid = pending.clone();
    paid.status = OrderStatus::Paid;

    group.bench_function("decide_settlement", |b| {
        b.iter(|| {
            OrderStateMachine::decide(
                black_box(&pending),
                &OrderEvent::SettlementConfirmed,
                test_epoch(),
            )
        });
    });

    group.bench_function("decide_cancel", |b| {
        let event = OrderEvent::Cancelled {
            reason: "bench".to_string(),
        };
        b.iter(|| OrderStateMachine::decide(black_box(&paid), &event, test_epoch()));
    });

    group.bench_function("decide_rejected", |b| {
        b.iter(|| OrderStateMachine::decide(black_box(&pending), &OrderEvent::Delivered, test_epoch()));
    });

    group.finish();
}

fn benchmark_retry_policy(c: &mut Criterion) {
    let policy = RetryPolicy::default();
    c.bench_function("retry_policy/delay_for_attempt", |b| {
        b.iter(|| {
            for attempt in 0..5 {
                black_box(policy.delay_for_attempt(black_box(attempt)));
            }
        });
    });
}

fn benchmark_round_trips(c: &mut Criterion) {
    let mut group = c.benchmark_group("round_trip");
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("Failed to build runtime");

    group.bench_function("checkout_and_cancel", |b| {
        let t = TestMarketplace::new();
        let item = t.add_item(ItemKind::Physical, 5_000, 1);
        let buyer = t.buyer();

        b.to_async(&runtime).iter(|| async {
            let order = t
                .market
                .checkout
                .checkout(CheckoutRequest {
                    buyer_id: buyer,
                    lines: vec![CartLine::new(item, 1)],
                    shipping: Some(atelier_testing::harness::address()),
                })
                .await
                .expect("stock is restored every iteration");
            t.market
                .lifecycle
                .cancel(order.id, "bench")
                .await
                .expect("cancel from pending");
        });
    });

    group.bench_function("checkout_and_settle", |b| {
        let t = TestMarketplace::new();
        let item = t.add_item(ItemKind::DigitalVideo, 900, u32::MAX);
        let buyer = t.buyer();

        b.to_async(&runtime).iter(|| async {
            let order = t
                .market
                .checkout
                .checkout(CheckoutRequest {
                    buyer_id: buyer,
                    lines: vec![CartLine::new(item, 1)],
                    shipping: None,
                })
                .await
                .expect("checkout");
            t.market
                .settlement
                .settle(order.id, atelier_runtime::SettlementTrigger::Webhook)
                .await
                .expect("settle");
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    benchmark_commission,
    benchmark_state_machine,
    benchmark_retry_policy,
    benchmark_round_trips
);
criterion_main!(benches);
