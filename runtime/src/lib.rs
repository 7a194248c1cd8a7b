//! # Atelier Runtime
//!
//! Executes the decisions of `atelier-core` against injected stores.
//!
//! ## Core Components
//!
//! - **Reservation coordinator**: turns a cart into a `pending` order, rolling
//!   back partial reservations on any failure
//! - **Order lifecycle**: guarded status transitions followed by their
//!   compensating actions
//! - **Settlement reconciler**: converges the webhook and client confirmation
//!   paths on exactly one settlement
//! - **Attendance coordinator**: capacity-limited event membership
//! - **Sweepers**: expire stale pending orders and unconfirmed memberships
//! - **Retry / compensation**: bounded retries with a manual-correction log
//!   as the last resort
//!
//! ## Example
//!
//! ```ignore
//! use atelier_runtime::{Marketplace, MarketplaceEnvironment};
//! use std::sync::Arc;
//!
//! let market = Marketplace::new(Arc::new(environment));
//!
//! let order = market.checkout.checkout_cart(buyer_id, Some(address)).await?;
//! let reference = market.settlement.initiate_payment(buyer_id, order.id).await?;
//! // ... later, from either path:
//! market.settlement.confirm_by_client(buyer_id, order.id).await?;
//! ```

use std::sync::Arc;

/// Event attendance
pub mod attendance;

/// Checkout orchestration
pub mod checkout;

/// Compensation list and compensating actions
pub mod compensation;

/// Injected dependencies and settings
pub mod environment;

/// Guarded order transitions
pub mod lifecycle;

/// Prometheus metrics for observability
pub mod metrics;

/// Development notifier
pub mod notifier;

/// Retry logic with exponential backoff
pub mod retry;

/// Settlement reconciliation
pub mod settlement;

/// Reconciliation sweeps
pub mod sweeper;

pub use attendance::{Admission, AttendanceCoordinator};
pub use checkout::{CheckoutRequest, ReservationCoordinator};
pub use environment::{EngineSettings, MarketplaceEnvironment};
pub use lifecycle::{OrderLifecycle, TransitionReport};
pub use settlement::{SettlementOutcome, SettlementReconciler, SettlementTrigger, WebhookOutcome};
pub use sweeper::{MembershipSweeper, PendingOrderSweeper, SweepReport};

/// Every engine component wired over one environment.
#[derive(Debug, Clone)]
pub struct Marketplace {
    /// Checkout
    pub checkout: ReservationCoordinator,
    /// Admin and internal order transitions
    pub lifecycle: OrderLifecycle,
    /// Payment initiation and settlement
    pub settlement: SettlementReconciler,
    /// Event attendance
    pub attendance: AttendanceCoordinator,
    /// Stale order expiry
    pub pending_orders: PendingOrderSweeper,
    /// Unconfirmed membership expiry
    pub memberships: MembershipSweeper,
}

impl Marketplace {
    /// Wire every component over `env`.
    #[must_use]
    pub fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        Self {
            checkout: ReservationCoordinator::new(Arc::clone(&env)),
            lifecycle: OrderLifecycle::new(Arc::clone(&env)),
            settlement: SettlementReconciler::new(Arc::clone(&env)),
            attendance: AttendanceCoordinator::new(Arc::clone(&env)),
            pending_orders: PendingOrderSweeper::new(Arc::clone(&env)),
            memberships: MembershipSweeper::new(env),
        }
    }
}
