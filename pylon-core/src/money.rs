//! Stablecoin amounts in integer micro-units
//!
//! External surfaces show human strings (`"$0.01"`); everything internal is
//! integer micro-USD (1 USD = 1,000,000 micro) so cost comparisons and chain
//! sums never drift.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Micro-units per whole dollar.
pub const MICRO_PER_USD: u64 = 1_000_000;

/// Micro-units per $0.001, the granularity of gateway pricing.
pub const MICRO_PER_MILLI: u64 = 1_000;

/// How to resolve decimal digits beyond micro precision.
///
/// Budget checks truncate so a caller cap is never inflated; gateway-side
/// pricing rounds up so a markup is never undercharged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rounding {
    /// Toward zero. Used when parsing caller budgets.
    TowardZero,
    /// Away from zero. Used when parsing gateway-side prices.
    AwayFromZero,
}

/// A non-negative USD amount in micro-units.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct MicroUsd(pub u64);

impl MicroUsd {
    pub const ZERO: MicroUsd = MicroUsd(0);

    /// Parse a human amount like `"$0.01"`, `"0.25"` or `"$1"`.
    ///
    /// A leading `$` is optional. Digits beyond micro precision are resolved
    /// per `rounding`. Negative or malformed input is an error.
    pub fn parse(s: &str, rounding: Rounding) -> Result<Self, MoneyError> {
        let raw = s.trim().trim_start_matches('$').trim();
        if raw.is_empty() {
            return Err(MoneyError::Malformed(s.to_string()));
        }
        if raw.starts_with('-') {
            return Err(MoneyError::Negative(s.to_string()));
        }

        let (whole, frac) = match raw.split_once('.') {
            Some((w, f)) => (w, f),
            None => (raw, ""),
        };
        let whole = if whole.is_empty() { "0" } else { whole };
        if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
            return Err(MoneyError::Malformed(s.to_string()));
        }

        let dollars: u64 = whole
            .parse()
            .map_err(|_| MoneyError::Malformed(s.to_string()))?;

        // First six fractional digits are exact micro-units.
        let mut micros: u64 = 0;
        for (i, b) in frac.bytes().take(6).enumerate() {
            micros += u64::from(b - b'0') * 10u64.pow(5 - i as u32);
        }
        let truncated_nonzero = frac.bytes().skip(6).any(|b| b != b'0');
        if truncated_nonzero && rounding == Rounding::AwayFromZero {
            micros += 1;
        }

        dollars
            .checked_mul(MICRO_PER_USD)
            .and_then(|d| d.checked_add(micros))
            .map(MicroUsd)
            .ok_or_else(|| MoneyError::Malformed(s.to_string()))
    }

    /// Round up to the nearest $0.001 multiple.
    pub fn ceil_to_milli(self) -> Self {
        MicroUsd(self.0.div_ceil(MICRO_PER_MILLI) * MICRO_PER_MILLI)
    }

    pub fn saturating_add(self, other: MicroUsd) -> Self {
        MicroUsd(self.0.saturating_add(other.0))
    }

    pub fn saturating_sub(self, other: MicroUsd) -> Self {
        MicroUsd(self.0.saturating_sub(other.0))
    }

    pub fn saturating_mul(self, factor: u64) -> Self {
        MicroUsd(self.0.saturating_mul(factor))
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn as_micros(self) -> u64 {
        self.0
    }

    /// Decimal USD string without the `$` sign, e.g. `0.005`.
    pub fn to_decimal_string(self) -> String {
        let dollars = self.0 / MICRO_PER_USD;
        let micros = self.0 % MICRO_PER_USD;
        let frac = format!("{micros:06}");
        let trimmed = frac.trim_end_matches('0');
        // Keep at least two decimal places so whole amounts read as currency.
        let frac = if trimmed.len() < 2 { &frac[..2] } else { trimmed };
        format!("{dollars}.{frac}")
    }
}

impl fmt::Display for MicroUsd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.to_decimal_string())
    }
}

/// Errors from amount parsing
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Malformed amount: {0:?}")]
    Malformed(String),

    #[error("Negative amount: {0:?}")]
    Negative(String),
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_common_prices() {
        assert_eq!(
            MicroUsd::parse("$0.01", Rounding::TowardZero).unwrap(),
            MicroUsd(10_000)
        );
        assert_eq!(
            MicroUsd::parse("$0.005", Rounding::TowardZero).unwrap(),
            MicroUsd(5_000)
        );
        assert_eq!(
            MicroUsd::parse("1", Rounding::TowardZero).unwrap(),
            MicroUsd(MICRO_PER_USD)
        );
        assert_eq!(
            MicroUsd::parse("0.25", Rounding::TowardZero).unwrap(),
            MicroUsd(250_000)
        );
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(MicroUsd::parse("", Rounding::TowardZero).is_err());
        assert!(MicroUsd::parse("$", Rounding::TowardZero).is_err());
        assert!(MicroUsd::parse("-0.01", Rounding::TowardZero).is_err());
        assert!(MicroUsd::parse("0.0a", Rounding::TowardZero).is_err());
        assert!(MicroUsd::parse("1.2.3", Rounding::TowardZero).is_err());
    }

    #[test]
    fn test_sub_micro_digits_round_by_mode() {
        // 7th decimal digit is below micro precision.
        let budget = MicroUsd::parse("0.0000001", Rounding::TowardZero).unwrap();
        assert_eq!(budget, MicroUsd::ZERO);

        let price = MicroUsd::parse("0.0000001", Rounding::AwayFromZero).unwrap();
        assert_eq!(price, MicroUsd(1));
    }

    #[test]
    fn test_ceil_to_milli() {
        assert_eq!(MicroUsd(10_001).ceil_to_milli(), MicroUsd(11_000));
        assert_eq!(MicroUsd(10_000).ceil_to_milli(), MicroUsd(10_000));
        assert_eq!(MicroUsd(1).ceil_to_milli(), MicroUsd(1_000));
        assert_eq!(MicroUsd::ZERO.ceil_to_milli(), MicroUsd::ZERO);
    }

    #[test]
    fn test_display() {
        assert_eq!(MicroUsd(10_000).to_string(), "$0.01");
        assert_eq!(MicroUsd(5_000).to_string(), "$0.005");
        assert_eq!(MicroUsd(MICRO_PER_USD).to_string(), "$1.00");
        assert_eq!(MicroUsd(1_500_000).to_string(), "$1.50");
        assert_eq!(MicroUsd::ZERO.to_string(), "$0.00");
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        for micros in [0u64, 1, 5_000, 10_000, 250_000, 1_234_567] {
            let amount = MicroUsd(micros);
            let parsed = MicroUsd::parse(&amount.to_string(), Rounding::TowardZero).unwrap();
            assert_eq!(parsed, amount);
        }
    }
}
