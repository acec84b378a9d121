//! Amount - Exact integer value in the smallest indivisible unit
//!
//! All ledger arithmetic runs on `Amount`. Key characteristics:
//! - Unsigned integer storage, no floating point anywhere
//! - Every division floors
//! - Principals are capped at [`PRINCIPAL_CEILING`] so that
//!   `principal * rate * months` always fits the `u128` backing store
//! - Conversion to a decimal happens only at the presentation boundary

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Largest principal the engine accepts (`u64::MAX` base units)
pub const PRINCIPAL_CEILING: Amount = Amount(u64::MAX as u128);

/// Value in base units
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Amount(u128);

impl Amount {
    /// Zero base units
    pub const ZERO: Amount = Amount(0);

    /// Wrap a raw base-unit value
    #[inline]
    pub const fn new(units: u128) -> Self {
        Self(units)
    }

    /// Raw base-unit value
    #[inline]
    pub const fn units(self) -> u128 {
        self.0
    }

    #[inline]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    pub fn saturating_sub(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_sub(rhs.0))
    }

    pub fn saturating_add(self, rhs: Amount) -> Amount {
        Amount(self.0.saturating_add(rhs.0))
    }

    /// Multiply by a scalar, `None` on overflow
    pub fn checked_mul(self, factor: u128) -> Option<Amount> {
        self.0.checked_mul(factor).map(Amount)
    }

    /// Floor division by a scalar, `None` when dividing by zero
    pub fn checked_div_floor(self, divisor: u128) -> Option<Amount> {
        self.0.checked_div(divisor).map(Amount)
    }

    /// Convert to a decimal with `decimals` fractional digits.
    ///
    /// `Amount::new(1_500).to_decimal(3)` is `1.500`. Returns `None` when the
    /// value does not fit a `Decimal` mantissa (96 bits) or `decimals > 28`.
    pub fn to_decimal(self, decimals: u32) -> Option<Decimal> {
        let mantissa = i128::try_from(self.0).ok()?;
        Decimal::try_from_i128_with_scale(mantissa, decimals).ok()
    }
}

impl From<u64> for Amount {
    fn from(units: u64) -> Self {
        Amount(units as u128)
    }
}

impl From<u32> for Amount {
    fn from(units: u32) -> Self {
        Amount(units as u128)
    }
}

/// Saturating sum, used for portfolio totals
impl std::iter::Sum for Amount {
    fn sum<I: Iterator<Item = Amount>>(iter: I) -> Self {
        iter.fold(Amount::ZERO, Amount::saturating_add)
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
