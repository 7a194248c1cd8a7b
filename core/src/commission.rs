//! Commission calculator.
//!
//! Computes the platform fee / seller earnings split for a priced line item.
//!
//! # Rounding
//!
//! Amounts are integer minor units and the rate is expressed in basis points,
//! so the only rounding step is the fee itself:
//!
//! ```text
//! line_total      = unit_price * quantity
//! platform_fee    = round_half_up(line_total * rate)
//! seller_earnings = line_total - platform_fee
//! ```
//!
//! Seller earnings are never rounded independently, which makes
//! `platform_fee + seller_earnings == line_total` hold exactly for every line.
//!
//! The rate in force is snapshotted on each order at creation time and is
//! never re-derived afterwards.

use crate::types::Money;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Basis points in a rate of 1.0 (100%).
pub const BASIS_POINTS_PER_UNIT: u32 = 10_000;

const FRACTION_DIGITS: usize = 4;

/// Platform commission rate, stored in basis points (`0..=10_000`).
///
/// Parses from a decimal fraction with at most four fractional digits:
///
/// ```
/// use atelier_core::commission::CommissionRate;
///
/// let rate: CommissionRate = "0.125".parse().expect("valid rate");
/// assert_eq!(rate.basis_points(), 1_250);
/// assert!("1.5".parse::<CommissionRate>().is_err());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommissionRate(u32);

impl CommissionRate {
    /// No commission
    pub const ZERO: Self = Self(0);

    /// Platform default (10%)
    pub const DEFAULT: Self = Self(1_000);

    /// Creates a rate from basis points, rejecting values above 100%
    #[must_use]
    pub const fn from_basis_points(basis_points: u32) -> Option<Self> {
        if basis_points > BASIS_POINTS_PER_UNIT {
            None
        } else {
            Some(Self(basis_points))
        }
    }

    /// The rate in basis points
    #[must_use]
    pub const fn basis_points(&self) -> u32 {
        self.0
    }
}

impl Default for CommissionRate {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl fmt::Display for CommissionRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{:04}",
            self.0 / BASIS_POINTS_PER_UNIT,
            self.0 % BASIS_POINTS_PER_UNIT
        )
    }
}

/// Errors from parsing a [`CommissionRate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommissionRateError {
    /// Not a plain decimal number
    #[error("commission rate '{0}' is not a decimal fraction")]
    Malformed(String),

    /// More than four fractional digits
    #[error("commission rate '{0}' has more than four fractional digits")]
    TooPrecise(String),

    /// Outside `[0, 1]`
    #[error("commission rate '{0}' is outside the range 0..=1")]
    OutOfRange(String),
}

impl FromStr for CommissionRate {
    type Err = CommissionRateError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (whole, fraction) = raw.split_once('.').unwrap_or((raw, ""));

        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) {
            return Err(CommissionRateError::Malformed(raw.to_string()));
        }
        if fraction.len() > FRACTION_DIGITS {
            return Err(CommissionRateError::TooPrecise(raw.to_string()));
        }

        let whole: u32 = whole
            .parse()
            .map_err(|_| CommissionRateError::OutOfRange(raw.to_string()))?;
        let padded = format!("{fraction:0<width$}", width = FRACTION_DIGITS);
        let fraction: u32 = padded
            .parse()
            .map_err(|_| CommissionRateError::Malformed(raw.to_string()))?;

        whole
            .checked_mul(BASIS_POINTS_PER_UNIT)
            .and_then(|bps| bps.checked_add(fraction))
            .and_then(Self::from_basis_points)
            .ok_or_else(|| CommissionRateError::OutOfRange(raw.to_string()))
    }
}

/// Result of splitting one priced line between platform and seller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CommissionSplit {
    /// `unit_price * quantity`
    pub line_total: Money,
    /// Platform's share, rounded half-up to the nearest minor unit
    pub platform_fee: Money,
    /// `line_total - platform_fee`
    pub seller_earnings: Money,
}

/// Split a priced line item into platform fee and seller earnings.
///
/// Returns `None` if `unit_price * quantity` overflows.
#[must_use]
pub fn split(unit_price: Money, quantity: u32, rate: CommissionRate) -> Option<CommissionSplit> {
    let line_total = unit_price.checked_mul(quantity)?;

    let scaled = u128::from(line_total.cents()) * u128::from(rate.basis_points())
        + u128::from(BASIS_POINTS_PER_UNIT / 2);
    let fee = u64::try_from(scaled / u128::from(BASIS_POINTS_PER_UNIT)).ok()?;
    let platform_fee = Money::from_cents(fee);
    let seller_earnings = line_total.checked_sub(platform_fee)?;

    Some(CommissionSplit {
        line_total,
        platform_fee,
        seller_earnings,
    })
}
