//! Identifiers and value objects shared by every component of the engine.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            #[doc = concat!("Creates a new random `", stringify!($name), "`")]
            #[must_use]
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            #[doc = concat!("Create a `", stringify!($name), "` from a `Uuid`")]
            #[must_use]
            pub const fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            /// Get the inner UUID
            #[must_use]
            pub const fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_identifier!(
    /// Unique identifier for a stock item (an artwork or other priced good)
    ItemId
);

uuid_identifier!(
    /// Unique identifier for a user acting as buyer, seller or event member
    UserId
);

uuid_identifier!(
    /// Unique identifier for an order
    OrderId
);

uuid_identifier!(
    /// Unique identifier for a capacity-limited resource (an event)
    ResourceId
);

uuid_identifier!(
    /// Single-use token a new event member presents to confirm attendance
    ConfirmationToken
);

uuid_identifier!(
    /// Unique identifier for a manual-correction record
    CorrectionId
);

/// External payment identifier issued by the payment provider.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PaymentReference(String);

impl PaymentReference {
    /// Wrap a provider-issued reference.
    #[must_use]
    pub fn new(reference: impl Into<String>) -> Self {
        Self(reference.into())
    }

    /// The raw reference string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PaymentReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// Monetary amount in minor currency units (cents).
///
/// All arithmetic is checked; an overflow surfaces as `None` rather than a
/// silently wrapped total.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(u64);

impl Money {
    /// Zero amount
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_cents(cents: u64) -> Self {
        Self(cents)
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn cents(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts, returning `None` on overflow
    #[must_use]
    pub const fn checked_add(self, other: Self) -> Option<Self> {
        match self.0.checked_add(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Subtracts `other`, returning `None` if the result would be negative
    #[must_use]
    pub const fn checked_sub(self, other: Self) -> Option<Self> {
        match self.0.checked_sub(other.0) {
            Some(cents) => Some(Self(cents)),
            None => None,
        }
    }

    /// Multiplies by a quantity, returning `None` on overflow
    #[must_use]
    pub fn checked_mul(self, quantity: u32) -> Option<Self> {
        self.0.checked_mul(u64::from(quantity)).map(Self)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn money_display_pads_minor_units() {
        assert_eq!(Money::from_cents(1_205).to_string(), "12.05");
        assert_eq!(Money::from_cents(7).to_string(), "0.07");
    }

    #[test]
    fn money_checked_arithmetic() {
        let price = Money::from_cents(2_500);
        assert_eq!(price.checked_mul(3), Some(Money::from_cents(7_500)));
        assert_eq!(Money::from_cents(u64::MAX).checked_mul(2), None);
        assert_eq!(Money::ZERO.checked_sub(price), None);
        assert_eq!(
            price.checked_add(Money::from_cents(1)),
            Some(Money::from_cents(2_501))
        );
    }

    #[test]
    fn identifiers_serialize_as_plain_uuid() {
        let id = OrderId::new();
        let json = serde_json::to_string(&id).expect("id serializes");
        assert_eq!(json, format!("\"{id}\""));
    }
}
