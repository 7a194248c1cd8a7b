//! Injected dependencies and engine settings.

use crate::retry::RetryPolicy;
use atelier_core::capacity::CapacityLedger;
use atelier_core::catalog::{Catalog, StockLedger};
use atelier_core::commission::CommissionRate;
use atelier_core::correction::CorrectionLog;
use atelier_core::environment::{Clock, IdGenerator};
use atelier_core::grant::GrantStore;
use atelier_core::notification::Notifier;
use atelier_core::order::{CartStore, OrderStore};
use atelier_core::payment::PaymentProvider;
use chrono::TimeDelta;
use std::sync::Arc;

/// Tunables shared by every component.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Commission rate snapshotted onto new orders
    pub commission_rate: CommissionRate,
    /// Retry policy for compensating actions
    pub compensation_retry: RetryPolicy,
    /// Age after which an unpaid order is expired
    pub pending_order_timeout: TimeDelta,
    /// Age after which an unconfirmed membership is cancelled; `None` keeps
    /// joins final
    pub attendance_confirmation_ttl: Option<TimeDelta>,
    /// Maximum documents handled per sweep
    pub sweep_batch_size: usize,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            commission_rate: CommissionRate::DEFAULT,
            compensation_retry: RetryPolicy::default(),
            pending_order_timeout: TimeDelta::minutes(30),
            attendance_confirmation_ttl: Some(TimeDelta::hours(48)),
            sweep_batch_size: 100,
        }
    }
}

/// Everything the engine talks to.
///
/// Stores and collaborators are trait objects so production wiring
/// (`atelier-postgres`) and test wiring (`atelier-testing`) plug in the same
/// way.
#[derive(Clone)]
pub struct MarketplaceEnvironment {
    /// Catalog read model
    pub catalog: Arc<dyn Catalog>,
    /// Per-item available quantity
    pub stock: Arc<dyn StockLedger>,
    /// Per-event membership
    pub capacity: Arc<dyn CapacityLedger>,
    /// Order documents
    pub orders: Arc<dyn OrderStore>,
    /// Buyer carts
    pub carts: Arc<dyn CartStore>,
    /// Digital access grants
    pub grants: Arc<dyn GrantStore>,
    /// Manual-correction records
    pub corrections: Arc<dyn CorrectionLog>,
    /// Payment provider
    pub payments: Arc<dyn PaymentProvider>,
    /// Notification delivery
    pub notifier: Arc<dyn Notifier>,
    /// Time source
    pub clock: Arc<dyn Clock>,
    /// Identifier source
    pub ids: Arc<dyn IdGenerator>,
    /// Tunables
    pub settings: EngineSettings,
}

impl std::fmt::Debug for MarketplaceEnvironment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketplaceEnvironment")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
