//! Capacity-limited resources (events) and the capacity ledger.

use crate::error::StoreError;
use crate::types::{ConfirmationToken, ResourceId, UserId};
use crate::BoxFuture;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a member within a resource.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipStatus {
    /// Joined, waiting for the member to confirm through their token.
    NotConfirmed,
    /// Confirmed attendance.
    Registered,
    /// No longer attending; does not count against capacity.
    Cancelled,
}

impl MembershipStatus {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NotConfirmed => "not_confirmed",
            Self::Registered => "registered",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "not_confirmed" => Some(Self::NotConfirmed),
            "registered" => Some(Self::Registered),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    /// Whether the member counts against capacity.
    #[must_use]
    pub const fn is_active(&self) -> bool {
        !matches!(self, Self::Cancelled)
    }
}

impl fmt::Display for MembershipStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One participant of a resource.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    /// Participant
    pub member_id: UserId,
    /// Current status
    pub status: MembershipStatus,
    /// Token the member presents to confirm
    pub token: ConfirmationToken,
    /// When the member joined
    pub joined_at: DateTime<Utc>,
}

/// Result of a join attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    /// The member was added as `NotConfirmed`.
    Accepted,
    /// The member already holds an active place; nothing changed.
    AlreadyMember,
    /// No free places; nothing changed.
    Full {
        /// Configured maximum
        capacity: u32,
    },
}

impl JoinOutcome {
    /// Label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::AlreadyMember => "already_member",
            Self::Full { .. } => "full",
        }
    }
}

/// An event with bounded membership.
///
/// `max_capacity == 0` means unlimited. Whenever it is positive, the number of
/// active members never exceeds it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapacityResource {
    /// Resource identifier
    pub id: ResourceId,
    /// Maximum active members, 0 for unlimited
    pub max_capacity: u32,
    /// Every member, including cancelled ones
    pub members: Vec<Membership>,
}

impl CapacityResource {
    /// Create an empty resource.
    #[must_use]
    pub const fn new(id: ResourceId, max_capacity: u32) -> Self {
        Self {
            id,
            max_capacity,
            members: Vec::new(),
        }
    }

    /// Members that count against capacity.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.members.iter().filter(|m| m.status.is_active()).count()
    }

    /// The member's entry, if any.
    #[must_use]
    pub fn membership(&self, member_id: UserId) -> Option<&Membership> {
        self.members.iter().find(|m| m.member_id == member_id)
    }

    fn has_room(&self) -> bool {
        self.max_capacity == 0
            || u32::try_from(self.active_count()).is_ok_and(|active| active < self.max_capacity)
    }

    /// Apply the join rule to this document.
    ///
    /// Store implementations call this while holding exclusive access to the
    /// document, so the membership check, the capacity check and the insert
    /// form one atomic step. A previously cancelled entry for the same member
    /// is replaced.
    pub fn try_admit(
        &mut self,
        member_id: UserId,
        token: ConfirmationToken,
        joined_at: DateTime<Utc>,
    ) -> JoinOutcome {
        if self
            .membership(member_id)
            .is_some_and(|m| m.status.is_active())
        {
            return JoinOutcome::AlreadyMember;
        }
        if !self.has_room() {
            return JoinOutcome::Full {
                capacity: self.max_capacity,
            };
        }

        self.members.retain(|m| m.member_id != member_id);
        self.members.push(Membership {
            member_id,
            status: MembershipStatus::NotConfirmed,
            token,
            joined_at,
        });
        JoinOutcome::Accepted
    }

    /// Remove the member. Returns whether they were present.
    pub fn remove(&mut self, member_id: UserId) -> bool {
        let before = self.members.len();
        self.members.retain(|m| m.member_id != member_id);
        self.members.len() != before
    }

    /// Mark the active member holding `token` as registered.
    pub fn confirm(&mut self, token: ConfirmationToken) -> bool {
        match self
            .members
            .iter_mut()
            .find(|m| m.token == token && m.status.is_active())
        {
            Some(member) => {
                member.status = MembershipStatus::Registered;
                true
            }
            None => false,
        }
    }

    /// Cancel `NotConfirmed` members who joined before `joined_before`.
    /// Returns the members that were cancelled.
    pub fn expire_unconfirmed(&mut self, joined_before: DateTime<Utc>) -> Vec<UserId> {
        self.members
            .iter_mut()
            .filter(|m| m.status == MembershipStatus::NotConfirmed && m.joined_at < joined_before)
            .map(|m| {
                m.status = MembershipStatus::Cancelled;
                m.member_id
            })
            .collect()
    }
}

/// Bounded membership sets, one document per resource.
///
/// Every method is one atomic conditional update of one resource document.
/// In particular `try_join` must not be split into an existence check and a
/// capacity check, or two concurrent joiners could both see a free place.
pub trait CapacityLedger: Send + Sync {
    /// Read a resource.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn resource(
        &self,
        resource_id: ResourceId,
    ) -> BoxFuture<'_, Result<Option<CapacityResource>, StoreError>>;

    /// Insert the member as `NotConfirmed` if they are not already active and
    /// the resource has room.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the resource does not exist.
    fn try_join(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
        token: ConfirmationToken,
        joined_at: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<JoinOutcome, StoreError>>;

    /// Remove the member unconditionally. Returns whether they were present.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn leave(
        &self,
        resource_id: ResourceId,
        member_id: UserId,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Register the active member holding `token`. Returns `false` for an
    /// unknown token.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn confirm(
        &self,
        resource_id: ResourceId,
        token: ConfirmationToken,
    ) -> BoxFuture<'_, Result<bool, StoreError>>;

    /// Cancel every `NotConfirmed` membership that joined before
    /// `joined_before`, across all resources.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the store fails.
    fn expire_unconfirmed(
        &self,
        joined_before: DateTime<Utc>,
    ) -> BoxFuture<'_, Result<Vec<(ResourceId, UserId)>, StoreError>>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn at(minutes: i64) -> DateTime<Utc> {
        DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minutes)
    }

    #[test]
    fn join_respects_capacity() {
        let mut event = CapacityResource::new(ResourceId::new(), 2);
        let (a, b, c) = (UserId::new(), UserId::new(), UserId::new());

        assert_eq!(event.try_admit(a, ConfirmationToken::new(), at(0)), JoinOutcome::Accepted);
        assert_eq!(event.try_admit(a, ConfirmationToken::new(), at(1)), JoinOutcome::AlreadyMember);
        assert_eq!(event.try_admit(b, ConfirmationToken::new(), at(2)), JoinOutcome::Accepted);
        assert_eq!(
            event.try_admit(c, ConfirmationToken::new(), at(3)),
            JoinOutcome::Full { capacity: 2 }
        );
        assert_eq!(event.active_count(), 2);
    }

    #[test]
    fn zero_capacity_is_unlimited() {
        let mut event = CapacityResource::new(ResourceId::new(), 0);
        for minute in 0..50 {
            assert_eq!(
                event.try_admit(UserId::new(), ConfirmationToken::new(), at(minute)),
                JoinOutcome::Accepted
            );
        }
        assert_eq!(event.active_count(), 50);
    }

    #[test]
    fn cancelled_members_free_their_place_and_may_rejoin() {
        let mut event = CapacityResource::new(ResourceId::new(), 1);
        let (a, b) = (UserId::new(), UserId::new());
        event.try_admit(a, ConfirmationToken::new(), at(0));

        assert_eq!(event.expire_unconfirmed(at(10)), vec![a]);
        assert_eq!(event.active_count(), 0);

        assert_eq!(event.try_admit(a, ConfirmationToken::new(), at(11)), JoinOutcome::Accepted);
        assert_eq!(event.members.len(), 1);
        assert_eq!(
            event.try_admit(b, ConfirmationToken::new(), at(12)),
            JoinOutcome::Full { capacity: 1 }
        );
    }

    #[test]
    fn confirm_only_matches_the_issued_token() {
        let mut event = CapacityResource::new(ResourceId::new(), 0);
        let member = UserId::new();
        let token = ConfirmationToken::new();
        event.try_admit(member, token, at(0));

        assert!(!event.confirm(ConfirmationToken::new()));
        assert!(event.confirm(token));
        assert_eq!(
            event.membership(member).map(|m| m.status),
            Some(MembershipStatus::Registered)
        );

        // Registered members are not expired.
        assert!(event.expire_unconfirmed(at(60)).is_empty());
    }

    #[test]
    fn remove_reports_presence() {
        let mut event = CapacityResource::new(ResourceId::new(), 3);
        let member = UserId::new();
        event.try_admit(member, ConfirmationToken::new(), at(0));

        assert!(event.remove(member));
        assert!(!event.remove(member));
        assert_eq!(event.active_count(), 0);
    }
}
