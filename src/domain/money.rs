//! Fixed-point monetary amounts.
//!
//! Balances and transfer amounts are stored as a signed count of minor units
//! (cents). Conversions to and from the decimal display form go through
//! [`Decimal`] so that values like `1.99` never pass through binary floating
//! point arithmetic.

use std::fmt;
use std::ops::{Add, Sub};

use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};

/// Number of minor units in one major unit.
pub const MINOR_UNITS_PER_MAJOR: i64 = 100;

/// Number of fractional digits in the display form.
const DISPLAY_SCALE: u32 = 2;

/// Monetary amount in minor units.
///
/// Money carries no sign policy of its own: a negative value is a valid
/// amount. Higher layers decide whether a negative result is acceptable.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    sqlx::Type,
)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    #[must_use]
    pub const fn from_minor(minor_units: i64) -> Self {
        Self(minor_units)
    }

    #[must_use]
    pub const fn minor_units(self) -> i64 {
        self.0
    }

    /// Convert a decimal display amount into minor units.
    ///
    /// Fractional minor units are truncated toward zero (`0.019` becomes one
    /// cent). Returns `None` when the amount does not fit in 64 bits.
    #[must_use]
    pub fn from_display(amount: Decimal) -> Option<Self> {
        amount
            .checked_mul(Decimal::from(MINOR_UNITS_PER_MAJOR))?
            .trunc()
            .to_i64()
            .map(Self)
    }

    /// Decimal display form with exactly two fractional digits.
    #[must_use]
    pub fn to_display(self) -> Decimal {
        Decimal::new(self.0, DISPLAY_SCALE)
    }

    /// Convert a float display amount (as received in JSON) into minor units.
    ///
    /// The float is first read back as the shortest decimal that represents
    /// it, so `1.99_f64` maps to 199 cents and not 198.
    #[must_use]
    pub fn from_f64(amount: f64) -> Option<Self> {
        Decimal::from_f64(amount).and_then(Self::from_display)
    }

    /// Float display form for JSON bodies. Exact for any balance below 2^53
    /// minor units, since the division is correctly rounded.
    #[must_use]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / MINOR_UNITS_PER_MAJOR as f64
    }

    #[must_use]
    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    #[must_use]
    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    #[must_use]
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0 - rhs.0)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> Decimal {
        Decimal::from_str(s).unwrap()
    }

    #[test]
    fn test_from_display_exact_cents() {
        assert_eq!(Money::from_display(dec("100.00")), Some(Money::from_minor(10_000)));
        assert_eq!(Money::from_display(dec("1.99")), Some(Money::from_minor(199)));
        assert_eq!(Money::from_display(dec("0.01")), Some(Money::from_minor(1)));
        assert_eq!(Money::from_display(dec("-3.50")), Some(Money::from_minor(-350)));
    }

    #[test]
    fn test_from_display_truncates_fractional_cents() {
        assert_eq!(Money::from_display(dec("0.019")), Some(Money::from_minor(1)));
        assert_eq!(Money::from_display(dec("0.009")), Some(Money::ZERO));
        assert_eq!(Money::from_display(dec("-0.019")), Some(Money::from_minor(-1)));
    }

    #[test]
    fn test_from_display_overflow() {
        assert_eq!(Money::from_display(dec("999999999999999999999")), None);
    }

    #[test]
    fn test_display_round_trip_two_digits() {
        for raw in ["0.00", "0.01", "0.10", "1.99", "98.01", "123456789.99", "-42.42"] {
            let value = dec(raw);
            let money = Money::from_display(value).unwrap();
            assert_eq!(money.to_display(), value, "round trip of {raw}");
        }
    }

    #[test]
    fn test_minor_units_round_trip() {
        for minor in [-10_001, -1, 0, 1, 199, 9_801, i64::MAX / 100] {
            let money = Money::from_minor(minor);
            assert_eq!(Money::from_display(money.to_display()), Some(money));
        }
    }

    #[test]
    fn test_from_f64_avoids_binary_drift() {
        // 1.99 * 100.0 == 198.99999999999997 in binary floating point
        assert_eq!(Money::from_f64(1.99), Some(Money::from_minor(199)));
        assert_eq!(Money::from_f64(0.29), Some(Money::from_minor(29)));
        assert_eq!(Money::from_f64(100.0), Some(Money::from_minor(10_000)));
        assert_eq!(Money::from_f64(f64::NAN), None);
    }

    #[test]
    fn test_to_f64() {
        assert_eq!(Money::from_minor(9_801).to_f64(), 98.01);
        assert_eq!(Money::from_minor(-1).to_f64(), -0.01);
    }

    #[test]
    fn test_arithmetic_and_sign() {
        let balance = Money::from_minor(10_000);
        let amount = Money::from_minor(199);
        assert_eq!(balance - amount, Money::from_minor(9_801));
        assert_eq!(balance + amount, Money::from_minor(10_199));
        assert!((Money::ZERO - Money::from_minor(1)).is_negative());
        assert!(amount.is_positive());
        assert!(!Money::ZERO.is_positive());
        assert_eq!(Money::from_minor(i64::MAX).checked_add(Money::from_minor(1)), None);
        assert_eq!(Money::from_minor(i64::MIN).checked_sub(Money::from_minor(1)), None);
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(Money::from_minor(199).to_string(), "1.99");
        assert_eq!(Money::from_minor(10_000).to_string(), "100.00");
    }
}
