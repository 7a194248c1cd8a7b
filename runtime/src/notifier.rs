//! Notifier that writes notifications to the log.
//!
//! Stands in for the delivery service in development and in the daemon,
//! which has no delivery integration of its own.

use atelier_core::notification::{Notification, NotificationError, Notifier};
use atelier_core::BoxFuture;

/// Logs every notification at `info` and always succeeds.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn notify(&self, notification: Notification) -> BoxFuture<'_, Result<(), NotificationError>> {
        Box::pin(async move {
            match &notification {
                Notification::OrderConfirmed {
                    order_id,
                    buyer_id,
                    total_amount,
                } => {
                    tracing::info!(%order_id, %buyer_id, total = %total_amount, "📧 Order confirmed");
                }
                Notification::OrderCancelled {
                    order_id,
                    buyer_id,
                    reason,
                } => {
                    tracing::info!(%order_id, %buyer_id, reason, "📧 Order cancelled");
                }
                Notification::AttendancePendingConfirmation {
                    resource_id,
                    member_id,
                    token,
                } => {
                    tracing::info!(%resource_id, %member_id, %token, "📧 Confirm your attendance");
                }
            }
            Ok(())
        })
    }
}
