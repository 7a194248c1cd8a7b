//! Stock items and the stock ledger.
//!
//! The catalog owns prices and the for-sale flag; the engine only reads them.
//! The one field the engine mutates is `available_quantity`, and only through
//! [`StockLedger`], whose operations are single atomic conditional updates.

use crate::error::StoreError;
use crate::types::{ItemId, Money, UserId};
use crate::BoxFuture;
use serde::{Deserialize, Serialize};

/// What kind of good an item is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    /// Shipped to the buyer; requires a shipping address.
    Physical,
    /// Paid video content; purchases create a digital access grant.
    DigitalVideo,
}

impl ItemKind {
    /// Stored representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Physical => "physical",
            Self::DigitalVideo => "digital_video",
        }
    }

    /// Parse the stored representation.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "physical" => Some(Self::Physical),
            "digital_video" => Some(Self::DigitalVideo),
            _ => None,
        }
    }

    /// Whether buying this item needs a shipping address.
    #[must_use]
    pub const fn requires_shipping(&self) -> bool {
        matches!(self, Self::Physical)
    }

    /// Whether buying this item creates a digital access grant.
    #[must_use]
    pub const fn grants_access(&self) -> bool {
        matches!(self, Self::DigitalVideo)
    }
}

/// A priced good as seen by checkout.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItem {
    /// Item identifier
    pub id: ItemId,
    /// Seller who receives the earnings
    pub seller_id: UserId,
    /// Display title, used in notifications and logs
    pub title: String,
    /// Physical or digital
    pub kind: ItemKind,
    /// Price per unit, fixed for the duration of a checkout
    pub unit_price: Money,
    /// Gate checked before any reservation attempt
    pub is_for_sale: bool,
    /// Units left; never negative
    pub available_quantity: u32,
}

/// Result of [`StockLedger::try_reserve`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReserveOutcome {
    /// The units were taken.
    Reserved {
        /// Units left after the decrement
        remaining: u32,
    },
    /// Fewer units than requested were available; nothing changed.
    Insufficient {
        /// Units available at the time of the attempt
        available: u32,
    },
}

impl ReserveOutcome {
    /// Label for metrics.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Reserved { .. } => "reserved",
            Self::Insufficient { .. } => "insufficient",
        }
    }
}

/// Read access to catalog data.
pub trait Catalog: Send + Sync {
    /// Look up an item as of now. `Ok(None)` if it does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the lookup itself fails.
    fn item(&self, item_id: ItemId) -> BoxFuture<'_, Result<Option<StockItem>, StoreError>>;
}

/// Per-item available-quantity counter.
///
/// # Atomicity
///
/// Implementations must make each call one atomic step against the store
/// (a conditional update), never a read followed by a write. Concurrent
/// `try_reserve` calls on the same item serialize; once the counter reaches
/// zero only `release` can make another reservation succeed.
pub trait StockLedger: Send + Sync {
    /// Decrement `available_quantity` by `quantity` only if it is at least
    /// `quantity`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the item does not exist, or another
    /// [`StoreError`] if the store fails. Lack of stock is not an error; it is
    /// reported as [`ReserveOutcome::Insufficient`].
    fn try_reserve(
        &self,
        item_id: ItemId,
        quantity: u32,
    ) -> BoxFuture<'_, Result<ReserveOutcome, StoreError>>;

    /// Increment `available_quantity` by `quantity`, unconditionally.
    ///
    /// Not idempotent: callers must release each reservation exactly once.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the item is missing or the store fails.
    fn release(&self, item_id: ItemId, quantity: u32) -> BoxFuture<'_, Result<(), StoreError>>;
}
