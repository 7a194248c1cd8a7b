//! Prometheus metrics for the engine.
//!
//! Components record through the `metrics` facade; [`MetricsServer`] installs
//! the Prometheus recorder with an HTTP scrape endpoint and registers the
//! metric descriptions:
//!
//! - Checkout: attempts, rejections by reason, created orders, duration
//! - Ledgers: stock reservations and releases, capacity joins
//! - Orders: transitions, guard conflicts, settlements by trigger
//! - Compensation failures, correction records and failed notifications
//! - Sweepers: expired and late-settled orders, expired memberships
//!
//! # Example
//!
//! ```rust,no_run
//! use atelier_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//!
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram, Unit};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use std::net::SocketAddr;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus scrape endpoint.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    started: bool,
}

impl MetricsServer {
    /// Create a server that will listen on `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            started: false,
        }
    }

    /// Address the endpoint listens on.
    #[must_use]
    pub const fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Whether [`start`](Self::start) succeeded.
    #[must_use]
    pub const fn is_started(&self) -> bool {
        self.started
    }

    /// Register descriptions, install the recorder and start listening.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError`] if the exporter cannot be built or a recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .install()
            .map_err(|e| MetricsError::Install(e.to_string()))?;

        register_metrics();
        self.started = true;
        tracing::info!(addr = %self.addr, "Metrics endpoint listening at http://{}/metrics", self.addr);
        Ok(())
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Checkout
    describe_counter!("checkout_attempts_total", "Checkouts started");
    describe_counter!(
        "checkout_rejected_total",
        "Checkouts rejected, by reason (validation, insufficient_stock, store)"
    );
    describe_counter!("orders_created_total", "Pending orders created");
    describe_histogram!(
        "checkout_duration_seconds",
        Unit::Seconds,
        "Time from checkout start to order creation or rejection"
    );

    // Ledgers
    describe_counter!(
        "stock_reservations_total",
        "Stock reservation attempts, by outcome (reserved, insufficient)"
    );
    describe_counter!(
        "stock_releases_total",
        "Stock releases, by reason (checkout_rollback, order_cancelled)"
    );
    describe_counter!(
        "capacity_joins_total",
        "Event join attempts, by outcome (accepted, already_member, full)"
    );

    // Compensation
    describe_counter!(
        "compensation_failures_total",
        "Compensating actions that exhausted their retries, by kind"
    );
    describe_counter!("correction_records_total", "Correction records written, by kind");

    // Orders
    describe_counter!("order_transitions_total", "Order status transitions, by from and to");
    describe_counter!(
        "order_transition_conflicts_total",
        "Transitions rejected because another caller changed the status first"
    );
    describe_counter!(
        "settlements_total",
        "Settlement attempts, by trigger (webhook, client, sweeper) and outcome"
    );
    describe_counter!("notifications_failed_total", "Notifications the delivery service rejected");

    // Sweepers
    describe_counter!("sweeper_orders_expired_total", "Stale pending orders expired");
    describe_counter!(
        "sweeper_orders_settled_total",
        "Stale pending orders settled because the provider reported the payment captured"
    );
    describe_counter!(
        "sweeper_memberships_expired_total",
        "Unconfirmed memberships cancelled"
    );
}
