//! # Atelier Testing
//!
//! Testing utilities for the Atelier marketplace engine.
//!
//! This crate provides:
//! - Deterministic clocks and identifier generators
//! - In-memory implementations of every store trait, each operation atomic
//!   per document like the production backend
//! - Recording and fault-injecting collaborators
//! - [`TestMarketplace`], a fully wired engine over all of the above
//!
//! ## Example
//!
//! ```
//! use atelier_core::catalog::ItemKind;
//! use atelier_core::order::CartLine;
//! use atelier_runtime::CheckoutRequest;
//! use atelier_testing::TestMarketplace;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let t = TestMarketplace::new();
//! let item = t.add_item(ItemKind::DigitalVideo, 1_500, 1);
//!
//! let order = t
//!     .market
//!     .checkout
//!     .checkout(CheckoutRequest {
//!         buyer_id: t.buyer(),
//!         lines: vec![CartLine::new(item, 1)],
//!         shipping: None,
//!     })
//!     .await?;
//!
//! assert_eq!(t.available(item), Some(0));
//! assert_eq!(order.lines.len(), 1);
//! # Ok(())
//! # }
//! ```

use atelier_core::environment::{Clock, IdGenerator};
use atelier_core::types::{ConfirmationToken, CorrectionId, OrderId};
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

pub mod collaborators;
pub mod harness;
pub mod stores;

/// Mock implementations of Environment traits.
pub mod mocks {
    use super::{Arc, AtomicU64, Clock, ConfirmationToken, CorrectionId, DateTime, IdGenerator, Mutex, Ordering, OrderId, TimeDelta, Utc, Uuid};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use atelier_testing::mocks::FixedClock;
    /// use atelier_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    #[must_use]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(test_epoch())
    }

    /// 2025-01-01 00:00:00 UTC
    #[must_use]
    pub fn test_epoch() -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp(1_735_689_600, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
    }

    /// Clock that only moves when told to.
    ///
    /// Clones share the same time, so a test can keep one handle and give
    /// another to the engine.
    ///
    /// ```
    /// use atelier_testing::mocks::ManualClock;
    /// use atelier_core::environment::Clock;
    /// use chrono::TimeDelta;
    ///
    /// let clock = ManualClock::default();
    /// let start = clock.now();
    /// clock.advance(TimeDelta::minutes(31));
    /// assert_eq!(clock.now() - start, TimeDelta::minutes(31));
    /// ```
    #[derive(Debug, Clone)]
    pub struct ManualClock {
        time: Arc<Mutex<DateTime<Utc>>>,
    }

    impl ManualClock {
        /// Start at `time`.
        #[must_use]
        pub fn new(time: DateTime<Utc>) -> Self {
            Self {
                time: Arc::new(Mutex::new(time)),
            }
        }

        /// Move time forward.
        #[allow(clippy::unwrap_used)] // Poisoned only if a test already panicked
        pub fn advance(&self, by: TimeDelta) {
            let mut time = self.time.lock().unwrap();
            *time += by;
        }
    }

    impl Default for ManualClock {
        fn default() -> Self {
            Self::new(test_epoch())
        }
    }

    impl Clock for ManualClock {
        #[allow(clippy::unwrap_used)] // Poisoned only if a test already panicked
        fn now(&self) -> DateTime<Utc> {
            *self.time.lock().unwrap()
        }
    }

    /// Predictable identifiers: 1, 2, 3, ... as UUIDs.
    #[derive(Debug, Default)]
    pub struct SequentialIds {
        next: AtomicU64,
    }

    impl SequentialIds {
        /// Start from 1.
        #[must_use]
        pub const fn new() -> Self {
            Self {
                next: AtomicU64::new(0),
            }
        }

        fn next_uuid(&self) -> Uuid {
            let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
            Uuid::from_u128(u128::from(n))
        }
    }

    impl IdGenerator for SequentialIds {
        fn order_id(&self) -> OrderId {
            OrderId::from_uuid(self.next_uuid())
        }

        fn confirmation_token(&self) -> ConfirmationToken {
            ConfirmationToken::from_uuid(self.next_uuid())
        }

        fn correction_id(&self) -> CorrectionId {
            CorrectionId::from_uuid(self.next_uuid())
        }
    }
}

/// Install a test-friendly `tracing` subscriber once per process.
///
/// Honors `RUST_LOG`; repeated calls are no-ops.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("atelier=debug")),
        )
        .with_test_writer()
        .try_init();
}

// Re-export commonly used items
pub use collaborators::{FaultyStockLedger, RecordingNotifier, ScriptedPaymentProvider};
pub use harness::TestMarketplace;
pub use mocks::{test_clock, FixedClock, ManualClock, SequentialIds};
pub use stores::{
    InMemoryCapacityLedger, InMemoryCartStore, InMemoryCatalog, InMemoryCorrectionLog,
    InMemoryGrantStore, InMemoryOrderStore,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_clock_is_frozen() {
        let clock = test_clock();
        assert_eq!(clock.now(), clock.now());
        assert_eq!(clock.now().to_rfc3339(), "2025-01-01T00:00:00+00:00");
    }

    #[test]
    fn sequential_ids_count_up() {
        let ids = SequentialIds::new();
        assert_eq!(ids.order_id().as_uuid(), &Uuid::from_u128(1));
        assert_eq!(ids.confirmation_token().as_uuid(), &Uuid::from_u128(2));
    }
}
