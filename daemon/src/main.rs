//! Atelier reconciliation daemon.
//!
//! Connects to `PostgreSQL`, applies migrations, exposes Prometheus metrics
//! and runs the reconciliation sweeps on a fixed interval until shutdown:
//!
//! - stale `pending` orders are expired, releasing their stock, unless the
//!   payment provider reports their payment captured
//! - unconfirmed event memberships past their TTL are cancelled

mod config;
mod payments;

use anyhow::Context;
use atelier_core::environment::{RandomIds, SystemClock};
use atelier_postgres::PostgresStore;
use atelier_runtime::metrics::MetricsServer;
use atelier_runtime::notifier::LoggingNotifier;
use atelier_runtime::{Marketplace, MarketplaceEnvironment};
use config::Config;
use payments::UnconfiguredPayments;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env is fine; the process environment still applies
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "atelier=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Atelier reconciliation daemon");

    let config = Config::from_env();
    let settings = config.engine_settings();
    info!(
        log_level = %config.server.log_level,
        commission_rate = %settings.commission_rate,
        pending_order_timeout_secs = config.sweeper.pending_order_timeout_secs,
        attendance_confirmation_ttl_secs = config.sweeper.attendance_confirmation_ttl_secs,
        sweep_interval_secs = config.sweeper.interval_secs,
        "Configuration loaded"
    );

    let mut metrics = MetricsServer::new(
        config
            .metrics_addr()
            .context("Invalid METRICS_HOST/METRICS_PORT")?,
    );
    metrics.start()?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.postgres.max_connections)
        .min_connections(config.postgres.min_connections)
        .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
        .connect(&config.postgres.url)
        .await
        .context("Failed to connect to PostgreSQL")?;
    let store = Arc::new(PostgresStore::from_pool(pool));
    store.migrate().await?;
    info!("Database connected and migrated");

    let env = Arc::new(MarketplaceEnvironment {
        catalog: store.clone(),
        stock: store.clone(),
        capacity: store.clone(),
        orders: store.clone(),
        carts: store.clone(),
        grants: store.clone(),
        corrections: store,
        payments: Arc::new(UnconfiguredPayments),
        notifier: Arc::new(LoggingNotifier),
        clock: Arc::new(SystemClock),
        ids: Arc::new(RandomIds),
        settings,
    });
    let market = Marketplace::new(env);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeps = tokio::spawn(run_sweeps(market, config.sweep_interval(), shutdown_rx));
    info!("Reconciliation sweeps started");

    shutdown_signal().await;
    let _ = shutdown_tx.send(true);

    match tokio::time::timeout(config.shutdown_timeout(), sweeps).await {
        Ok(Ok(())) => info!("Daemon stopped"),
        Ok(Err(join_error)) => error!(error = %join_error, "Sweep task failed"),
        Err(_) => warn!(
            timeout_secs = config.server.shutdown_timeout,
            "Sweep did not finish before the shutdown timeout"
        ),
    }
    Ok(())
}

/// Run both sweeps every `interval` until `shutdown` flips to `true`.
///
/// A sweep in progress is allowed to finish; only the wait between sweeps is
/// interrupted.
async fn run_sweeps(market: Marketplace, interval: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => break,
        }

        if let Err(error) = market.pending_orders.sweep().await {
            error!(error = %error, "Pending order sweep failed");
        }
        if let Err(error) = market.memberships.sweep().await {
            error!(error = %error, "Membership sweep failed");
        }
    }

    info!("Reconciliation sweeps stopped");
}

/// Graceful shutdown signal handler.
///
/// Waits for:
/// - Ctrl+C (SIGINT)
/// - SIGTERM (in production environments)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = signal::ctrl_c().await {
            error!(error = %error, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(error) => {
                error!(error = %error, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            info!("Received Ctrl+C signal, shutting down gracefully...");
        },
        () = terminate => {
            info!("Received SIGTERM signal, shutting down gracefully...");
        },
    }
}
