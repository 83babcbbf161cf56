//! UCoin amounts.
//!
//! Amounts are stored as integer minor units (cents) so sums over the ledger are
//! exact. A UCoin is fixed 1:1 to the real currency, so two decimals are enough.

use crate::errors::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An amount of UCoin in minor units.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ucoin(i64);

impl Ucoin {
    /// Zero UCoin.
    pub const ZERO: Self = Self(0);

    /// Wraps a raw minor-unit amount.
    #[must_use]
    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    /// Whole UCoin, e.g. `Ucoin::whole(100)` is `100.00`.
    #[must_use]
    pub const fn whole(units: i64) -> Self {
        Self(units * 100)
    }

    /// Raw minor units as persisted.
    #[must_use]
    pub const fn cents(self) -> i64 {
        self.0
    }

    /// Strictly greater than zero.
    #[must_use]
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition, failing with [`Error::InvalidAmount`] on overflow.
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(Error::InvalidAmount { amount: other })
    }

    /// Checked multiplication by a quantity.
    pub fn checked_mul(self, quantity: i64) -> Result<Self> {
        self.0
            .checked_mul(quantity)
            .map(Self)
            .ok_or(Error::InvalidAmount { amount: self })
    }
}

impl fmt::Display for Ucoin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}{}.{:02}", abs / 100, abs % 100)
    }
}

impl FromStr for Ucoin {
    type Err = Error;

    /// Parses `"12"`, `"12.5"` or `"12.50"`. More than two decimals is rejected.
    fn from_str(s: &str) -> Result<Self> {
        let invalid = || Error::Config {
            message: format!("Invalid UCoin amount: '{s}'"),
        };
        let trimmed = s.trim();
        let (negative, digits) = trimmed
            .strip_prefix('-')
            .map_or((false, trimmed), |rest| (true, rest));
        let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if whole.is_empty() || fraction.len() > 2 || !all_digits(whole) || !all_digits(fraction) {
            return Err(invalid());
        }
        let whole: i64 = whole.parse().map_err(|_| invalid())?;
        let fraction: i64 = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().map_err(|_| invalid())? * 10,
            _ => fraction.parse().map_err(|_| invalid())?,
        };
        let cents = whole
            .checked_mul(100)
            .and_then(|c| c.checked_add(fraction))
            .ok_or_else(invalid)?;
        Ok(Self(if negative { -cents } else { cents }))
    }
}

impl From<Ucoin> for i64 {
    fn from(value: Ucoin) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(Ucoin::from_cents(0).to_string(), "0.00");
        assert_eq!(Ucoin::from_cents(5).to_string(), "0.05");
        assert_eq!(Ucoin::whole(100).to_string(), "100.00");
        assert_eq!(Ucoin::from_cents(-3_050).to_string(), "-30.50");
    }

    #[test]
    fn test_parse() {
        assert_eq!("12".parse::<Ucoin>().unwrap(), Ucoin::from_cents(1_200));
        assert_eq!("12.5".parse::<Ucoin>().unwrap(), Ucoin::from_cents(1_250));
        assert_eq!(" 0.07 ".parse::<Ucoin>().unwrap(), Ucoin::from_cents(7));
        assert_eq!("-1.25".parse::<Ucoin>().unwrap(), Ucoin::from_cents(-125));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!("".parse::<Ucoin>().is_err());
        assert!("1.234".parse::<Ucoin>().is_err());
        assert!("abc".parse::<Ucoin>().is_err());
        assert!(".50".parse::<Ucoin>().is_err());
    }

    #[test]
    fn test_checked_arithmetic() {
        let price = Ucoin::from_cents(1_250);
        assert_eq!(price.checked_mul(3).unwrap(), Ucoin::from_cents(3_750));
        assert!(Ucoin::from_cents(i64::MAX).checked_add(price).is_err());
    }
}
