use crate::error::PayoutError;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// Number of fractional digits carried by every amount sent to the rail.
pub const MINOR_UNIT_SCALE: u32 = 2;

/// A non-negative monetary amount expressed in minor units (cents, kobo...).
///
/// Amounts never pass through floating point: major-unit decimals from the
/// boundary are converted exactly, and the rail receives a decimal string
/// rebuilt from the integer.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "i64", into = "i64")]
pub struct MinorUnits(i64);

impl MinorUnits {
    pub const ZERO: Self = Self(0);

    pub fn new(value: i64) -> Result<Self, PayoutError> {
        if value >= 0 {
            Ok(Self(value))
        } else {
            Err(PayoutError::Validation(
                "Amount must not be negative".to_string(),
            ))
        }
    }

    /// Converts a major-unit decimal (`5000.00`) into minor units (`500000`).
    pub fn from_major(value: Decimal) -> Result<Self, PayoutError> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(PayoutError::Validation(
                "Amount must not be negative".to_string(),
            ));
        }
        let scaled = value
            .checked_mul(dec!(100))
            .ok_or_else(|| PayoutError::Validation(format!("Amount {} is too large", value)))?;
        if !scaled.fract().is_zero() {
            return Err(PayoutError::Validation(format!(
                "Amount {} has more than {} fractional digits",
                value, MINOR_UNIT_SCALE
            )));
        }
        let minor = scaled
            .to_i64()
            .ok_or_else(|| PayoutError::Validation(format!("Amount {} is too large", value)))?;
        Self::new(minor)
    }

    pub fn value(&self) -> i64 {
        self.0
    }

    pub fn to_major(&self) -> Decimal {
        Decimal::new(self.0, MINOR_UNIT_SCALE)
    }

    /// Renders the amount with exactly two fractional digits, as the rail expects.
    pub fn to_major_string(&self) -> String {
        self.to_major().to_string()
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(Self)
    }
}

impl TryFrom<i64> for MinorUnits {
    type Error = PayoutError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MinorUnits> for i64 {
    fn from(amount: MinorUnits) -> Self {
        amount.0
    }
}

impl fmt::Display for MinorUnits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_major_string())
    }
}

// Saturating: batch totals are informational and must never panic.
impl Sum for MinorUnits {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, |acc, x| acc.checked_add(x).unwrap_or(Self(i64::MAX)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_major_to_minor_is_exact() {
        let amount = MinorUnits::from_major(dec!(5000.00)).unwrap();
        assert_eq!(amount.value(), 500000);
        assert_eq!(amount.to_major_string(), "5000.00");
    }

    #[test]
    fn test_small_amounts_keep_two_digits() {
        assert_eq!(MinorUnits::new(5).unwrap().to_major_string(), "0.05");
        assert_eq!(MinorUnits::new(0).unwrap().to_major_string(), "0.00");
        assert_eq!(MinorUnits::new(10050).unwrap().to_major_string(), "100.50");
    }

    #[test]
    fn test_values_that_float_would_round() {
        // 0.29 * 100 as f64 is 28.999999999999996
        assert_eq!(MinorUnits::from_major(dec!(0.29)).unwrap().value(), 29);
        assert_eq!(MinorUnits::from_major(dec!(1.1)).unwrap().value(), 110);
    }

    #[test]
    fn test_rejects_negative_and_sub_minor_precision() {
        assert!(matches!(
            MinorUnits::new(-1),
            Err(PayoutError::Validation(_))
        ));
        assert!(matches!(
            MinorUnits::from_major(dec!(-0.01)),
            Err(PayoutError::Validation(_))
        ));
        assert!(matches!(
            MinorUnits::from_major(dec!(10.001)),
            Err(PayoutError::Validation(_))
        ));
    }

    #[test]
    fn test_sum_saturates() {
        let total: MinorUnits = [MinorUnits(i64::MAX), MinorUnits(1)].into_iter().sum();
        assert_eq!(total.value(), i64::MAX);
        let total: MinorUnits = [MinorUnits(100), MinorUnits(250)].into_iter().sum();
        assert_eq!(total.value(), 350);
    }

    #[test]
    fn test_deserialize_rejects_negative() {
        assert!(serde_json::from_str::<MinorUnits>("-5").is_err());
        assert_eq!(serde_json::from_str::<MinorUnits>("42").unwrap().value(), 42);
    }
}
