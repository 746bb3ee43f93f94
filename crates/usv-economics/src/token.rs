// crates/usv-economics/src/token.rs
//
// USV (Universal) token amount type and denomination constants.
//
// The smallest unit of USV is one nano-USV. 1 USV = 10^9 units, the same
// denomination sUSV uses. Reserve tokens usually carry 18 decimals and are
// normalized down to this denomination by the treasury. All accounting is
// integer arithmetic on `u128` units.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// Decimal places of USV and sUSV.
pub const USV_DECIMALS: u8 = 9;

/// Number of units in one USV. 1 USV = 10^9 units.
pub const UNITS_PER_USV: u128 = 1_000_000_000;

/// Type alias for raw token units of any asset.
pub type Amount = u128;

/// Most decimals an asset may declare; `10^38` is the largest power of ten
/// a `u128` holds.
pub const MAX_DECIMALS: u8 = 38;

/// `10^decimals` as an amount, saturating above `MAX_DECIMALS`.
pub fn pow10(decimals: u8) -> Amount {
    10u128.checked_pow(decimals as u32).unwrap_or(Amount::MAX)
}

/// A USV amount, used for human-readable logging and display.
///
/// Wraps an amount in units (the smallest denomination).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Usv {
    /// Amount in units (1 USV = 10^9 units).
    pub units: Amount,
}

impl Usv {
    /// Create a Usv amount from a whole USV count.
    ///
    /// # Example
    /// ```
    /// use usv_economics::token::Usv;
    /// let amount = Usv::from_whole(19);
    /// assert_eq!(amount.units, 19_000_000_000);
    /// ```
    pub fn from_whole(amount: u64) -> Self {
        Self {
            units: amount as Amount * UNITS_PER_USV,
        }
    }

    /// Create a Usv amount from raw units.
    pub fn from_units(units: Amount) -> Self {
        Self { units }
    }

    /// Returns zero USV.
    pub fn zero() -> Self {
        Self { units: 0 }
    }
}

impl Add for Usv {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self {
            units: self.units.saturating_add(rhs.units),
        }
    }
}

impl Sub for Usv {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Self {
            units: self.units.saturating_sub(rhs.units),
        }
    }
}

impl fmt::Display for Usv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let whole = self.units / UNITS_PER_USV;
        let frac = self.units % UNITS_PER_USV;
        if frac == 0 {
            write!(f, "{} USV", whole)
        } else {
            // Display up to 9 decimal places, trimming trailing zeros
            let frac_str = format!("{:09}", frac);
            let trimmed = frac_str.trim_end_matches('0');
            write!(f, "{}.{} USV", whole, trimmed)
        }
    }
}
