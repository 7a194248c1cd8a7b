//! # Atelier Core
//!
//! Domain types and pure business rules for the Atelier marketplace engine.
//!
//! The engine coordinates purchases of limited-stock goods (artworks) and
//! limited-capacity resources (event seats) without relying on multi-document
//! transactions. This crate holds everything that does not perform I/O:
//!
//! - **Types**: identifiers, [`Money`](types::Money), stock items, capacity
//!   resources, orders and access grants
//! - **Commission**: the platform fee / seller earnings split
//! - **State machine**: the order lifecycle decision function, which returns
//!   effect descriptions instead of executing them
//! - **Ports**: `Send + Sync` traits for every store and external collaborator,
//!   injected into the runtime as `Arc<dyn Trait>`
//!
//! ## Architecture Principles
//!
//! - Functional core, imperative shell: decisions here, execution in `atelier-runtime`
//! - Every concurrent mutation is a single atomic store operation
//! - Compensation is explicit and described as data
//!
//! ## Example
//!
//! ```
//! use atelier_core::commission::{split, CommissionRate};
//! use atelier_core::types::Money;
//!
//! let rate: CommissionRate = "0.15".parse().expect("valid rate");
//! let split = split(Money::from_cents(3_333), 3, rate).expect("line total fits");
//!
//! assert_eq!(split.line_total, Money::from_cents(9_999));
//! assert_eq!(split.platform_fee, Money::from_cents(1_500));
//! assert_eq!(split.seller_earnings, Money::from_cents(8_499));
//! ```

use std::future::Future;
use std::pin::Pin;

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use smallvec::{smallvec, SmallVec};

pub mod capacity;
pub mod catalog;
pub mod commission;
pub mod correction;
pub mod error;
pub mod grant;
pub mod notification;
pub mod order;
pub mod payment;
pub mod state_machine;
pub mod types;

/// Boxed, `Send` future returned by every store and collaborator trait.
///
/// Traits return this instead of using `async fn` so they stay dyn-compatible
/// and can be shared as `Arc<dyn Trait>` across request workers.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Environment module - Dependency injection traits
///
/// All sources of non-determinism (time, identifiers) are abstracted behind
/// traits so the runtime can be driven deterministically in tests.
pub mod environment {
    use crate::types::{ConfirmationToken, CorrectionId, OrderId};
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```
    /// use atelier_core::environment::{Clock, SystemClock};
    ///
    /// let clock = SystemClock;
    /// let earlier = clock.now();
    /// assert!(clock.now() >= earlier);
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// Production clock backed by the system time.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }

    /// Identifier generation for entities the engine creates.
    pub trait IdGenerator: Send + Sync {
        /// Identifier for a newly created order.
        fn order_id(&self) -> OrderId;

        /// Token handed to a new event member so they can confirm attendance.
        fn confirmation_token(&self) -> ConfirmationToken;

        /// Identifier for a manual-correction record.
        fn correction_id(&self) -> CorrectionId;
    }

    /// Random (UUID v4) identifiers for production use.
    #[derive(Debug, Clone, Copy, Default)]
    pub struct RandomIds;

    impl IdGenerator for RandomIds {
        fn order_id(&self) -> OrderId {
            OrderId::new()
        }

        fn confirmation_token(&self) -> ConfirmationToken {
            ConfirmationToken::new()
        }

        fn correction_id(&self) -> CorrectionId {
            CorrectionId::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{IdGenerator, RandomIds};

    #[test]
    fn random_ids_are_distinct() {
        let ids = RandomIds;
        assert_ne!(ids.order_id(), ids.order_id());
        assert_ne!(ids.confirmation_token(), ids.confirmation_token());
    }
}
