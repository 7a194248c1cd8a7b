//! Event attendance on top of the capacity ledger.

use crate::environment::MarketplaceEnvironment;
use atelier_core::capacity::JoinOutcome;
use atelier_core::error::{AttendanceError, StoreError};
use atelier_core::notification::Notification;
use atelier_core::types::{ConfirmationToken, ResourceId, UserId};
use metrics::counter;
use std::sync::Arc;

/// Successful join result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New member, pending confirmation with this token.
    Joined(ConfirmationToken),
    /// The member already held a place.
    AlreadyMember,
}

/// Joins, confirmations and departures for capacity-limited events.
#[derive(Debug, Clone)]
pub struct AttendanceCoordinator {
    env: Arc<MarketplaceEnvironment>,
}

impl AttendanceCoordinator {
    /// Create a coordinator over `env`.
    #[must_use]
    pub const fn new(env: Arc<MarketplaceEnvironment>) -> Self {
        Self { env }
    }

    /// Join an event.
    ///
    /// On acceptance a confirmation token is minted and sent to the member.
    /// A failed notification does not undo the join.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::CapacityFull`] when no place is free,
    /// [`AttendanceError::ResourceNotFound`] for an unknown event, or a store
    /// failure.
    pub async fn join(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
    ) -> Result<Admission, AttendanceError> {
        let token = self.env.ids.confirmation_token();
        let outcome = self
            .env
            .capacity
            .try_join(resource_id, member_id, token, self.env.clock.now())
            .await
            .map_err(|error| not_found_as_resource(error, resource_id))?;
        counter!("capacity_joins_total", "outcome" => outcome.label()).increment(1);

        match outcome {
            JoinOutcome::Accepted => {
                tracing::info!(%resource_id, %member_id, "Member joined, awaiting confirmation");
                let notification = Notification::AttendancePendingConfirmation {
                    resource_id,
                    member_id,
                    token,
                };
                if let Err(error) = self.env.notifier.notify(notification).await {
                    counter!("notifications_failed_total").increment(1);
                    tracing::warn!(%resource_id, %member_id, error = %error, "Confirmation notification failed; join kept");
                }
                Ok(Admission::Joined(token))
            }
            JoinOutcome::AlreadyMember => Ok(Admission::AlreadyMember),
            JoinOutcome::Full { capacity } => {
                tracing::info!(%resource_id, %member_id, capacity, "Event full");
                Err(AttendanceError::CapacityFull {
                    resource_id,
                    capacity,
                })
            }
        }
    }

    /// Confirm attendance with the token sent at join time. Returns `false`
    /// for an unknown token.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::ResourceNotFound`] or a store failure.
    pub async fn confirm(
        &self,
        resource_id: ResourceId,
        token: ConfirmationToken,
    ) -> Result<bool, AttendanceError> {
        let confirmed = self
            .env
            .capacity
            .confirm(resource_id, token)
            .await
            .map_err(|error| not_found_as_resource(error, resource_id))?;
        if confirmed {
            tracing::info!(%resource_id, "Attendance confirmed");
        }
        Ok(confirmed)
    }

    /// Leave an event. Returns whether the member was present.
    ///
    /// # Errors
    ///
    /// Returns [`AttendanceError::ResourceNotFound`] or a store failure.
    pub async fn leave(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
    ) -> Result<bool, AttendanceError> {
        let removed = self
            .env
            .capacity
            .leave(resource_id, member_id)
            .await
            .map_err(|error| not_found_as_resource(error, resource_id))?;
        if removed {
            tracing::info!(%resource_id, %member_id, "Member left");
        }
        Ok(removed)
    }
}

fn not_found_as_resource(error: StoreError, resource_id: ResourceId) -> AttendanceError {
    match error {
        StoreError::NotFound { .. } => AttendanceError::ResourceNotFound(resource_id),
        other => AttendanceError::Store(other),
    }
}
