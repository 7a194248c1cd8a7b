//! Order state machine.
//!
//! [`OrderStateMachine::decide`] is a pure function: given the order as last
//! read and an event, it either rejects the event or returns a [`Decision`]
//! holding the guarded status update and the compensating actions to run
//! afterwards, described as [`OrderEffect`] values.
//!
//! The runtime applies `decision.update` with a compare-and-swap on
//! `decision.from` and only executes the effects when that swap succeeds, so
//! a second caller racing on the same order never repeats them.
//!
//! | From | Event | To | Effects |
//! |---|---|---|---|
//! | pending | settlement confirmed | paid | clear cart, activate grants, notify |
//! | pending, paid, shipped | cancelled / refund received | cancelled | release stock per line, revoke grants, notify |
//! | pending | expired | cancelled | release stock per line, revoke grants, notify |
//! | paid | shipped | shipped | none |
//! | shipped | delivered | delivered | none |

use crate::error::TransitionError;
use crate::notification::Notification;
use crate::order::{Order, OrderStatus, StatusUpdate};
use crate::types::{ItemId, OrderId, UserId};
use chrono::{DateTime, Utc};
use smallvec::SmallVec;

/// Reason recorded when the sweeper expires an unpaid order.
pub const EXPIRED_REASON: &str = "payment window expired";

/// Something that happened to an order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderEvent {
    /// Payment was confirmed by the webhook or the buyer.
    SettlementConfirmed,
    /// An admin cancelled the order.
    Cancelled {
        /// Reason recorded on the order
        reason: String,
    },
    /// The payment provider reported a refund.
    RefundReceived {
        /// Reason recorded on the order
        reason: String,
    },
    /// An admin marked the order shipped.
    Shipped,
    /// An admin marked the order delivered.
    Delivered,
    /// The payment window elapsed while the order was pending.
    Expired,
}

impl OrderEvent {
    /// Short name for logs and errors.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SettlementConfirmed => "settlement confirmed",
            Self::Cancelled { .. } => "cancel",
            Self::RefundReceived { .. } => "refund received",
            Self::Shipped => "mark shipped",
            Self::Delivered => "mark delivered",
            Self::Expired => "expire",
        }
    }

    fn reason(&self) -> Option<&str> {
        match self {
            Self::Cancelled { reason } | Self::RefundReceived { reason } => Some(reason),
            Self::Expired => Some(EXPIRED_REASON),
            Self::SettlementConfirmed | Self::Shipped | Self::Delivered => None,
        }
    }
}

/// A side effect to run once the status swap has been won.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OrderEffect {
    /// Empty the buyer's cart.
    ClearCart {
        /// Cart owner
        buyer_id: UserId,
    },
    /// Activate the digital access grants created for the order.
    ActivateGrants {
        /// Owning order
        order_id: OrderId,
    },
    /// Delete the digital access grants created for the order.
    RevokeGrants {
        /// Owning order
        order_id: OrderId,
    },
    /// Give reserved units back to the stock ledger.
    ReleaseStock {
        /// Item to restore
        item_id: ItemId,
        /// Units to restore
        quantity: u32,
    },
    /// Send a notification.
    Notify(Notification),
}

/// The outcome of a successful guard check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    /// Status the update must swap from
    pub from: OrderStatus,
    /// Status update to write
    pub update: StatusUpdate,
    /// Effects to run after the write, in order
    pub effects: SmallVec<[OrderEffect; 4]>,
}

/// The order transition table.
#[derive(Debug, Clone, Copy, Default)]
pub struct OrderStateMachine;

impl OrderStateMachine {
    /// Target status for `event` from `from`, or `None` if not allowed.
    #[must_use]
    pub fn allowed(from: OrderStatus, event: &OrderEvent) -> Option<OrderStatus> {
        use OrderStatus::{Cancelled, Delivered, Paid, Pending, Shipped};

        match (from, event) {
            (Pending, OrderEvent::SettlementConfirmed) => Some(Paid),
            (
                Pending | Paid | Shipped,
                OrderEvent::Cancelled { .. } | OrderEvent::RefundReceived { .. },
            )
            | (Pending, OrderEvent::Expired) => Some(Cancelled),
            (Paid, OrderEvent::Shipped) => Some(Shipped),
            (Shipped, OrderEvent::Delivered) => Some(Delivered),
            _ => None,
        }
    }

    /// Decide how `event` changes `order`.
    ///
    /// # Errors
    ///
    /// Returns [`TransitionError::InvalidTransition`] if the event is not
    /// allowed from the order's current status.
    pub fn decide(
        order: &Order,
        event: &OrderEvent,
        at: DateTime<Utc>,
    ) -> Result<Decision, TransitionError> {
        let to = Self::allowed(order.status, event).ok_or(TransitionError::InvalidTransition {
            status: order.status,
            event: event.name(),
        })?;

        let reason = event.reason().map(str::to_string);
        let has_grants = order.digital_lines().next().is_some();
        let mut effects = SmallVec::new();

        match to {
            OrderStatus::Paid => {
                effects.push(OrderEffect::ClearCart {
                    buyer_id: order.buyer_id,
                });
                if has_grants {
                    effects.push(OrderEffect::ActivateGrants { order_id: order.id });
                }
                effects.push(OrderEffect::Notify(Notification::OrderConfirmed {
                    order_id: order.id,
                    buyer_id: order.buyer_id,
                    total_amount: order.total_amount,
                }));
            }
            OrderStatus::Cancelled => {
                effects.extend(order.lines.iter().map(|line| OrderEffect::ReleaseStock {
                    item_id: line.item_id,
                    quantity: line.quantity,
                }));
                if has_grants {
                    effects.push(OrderEffect::RevokeGrants { order_id: order.id });
                }
                effects.push(OrderEffect::Notify(Notification::OrderCancelled {
                    order_id: order.id,
                    buyer_id: order.buyer_id,
                    reason: reason.clone().unwrap_or_default(),
                }));
            }
            OrderStatus::Pending | OrderStatus::Shipped | OrderStatus::Delivered => {}
        }

        Ok(Decision {
            from: order.status,
            update: StatusUpdate {
                to,
                at,
                refund_reason: if to == OrderStatus::Cancelled {
                    reason
                } else {
                    None
                },
            },
            effects,
        })
    }
}
