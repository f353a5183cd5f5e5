//! Scaled-integer money types.
//!
//! All amounts inside the matching, clearing, and wallet subsystems are
//! fixed-point integers scaled by `10^decimals` for the relevant asset
//! (satoshis for BTC, the symbol's `price_decimal` for a quoted price).
//! Floating point never appears in a balance or a ledger delta.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Deref;
use thiserror::Error;

/// An unsigned amount scaled by `10^decimals`. Construction only through
/// the parse functions below, so a bad string can never become a silent
/// truncation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaledAmount(u64);

/// A signed amount scaled by `10^decimals`, used for ledger deltas which
/// can move a balance in either direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScaledAmountSigned(i64);

impl ScaledAmount {
    pub fn to_raw(&self) -> u64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn checked_add(self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    pub fn checked_sub(self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }
}

impl ScaledAmountSigned {
    pub fn to_raw(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }

    pub fn abs(self) -> ScaledAmount {
        ScaledAmount(self.0.unsigned_abs())
    }

    /// Positive part of the delta (moves a balance's `available` up).
    pub fn positive_part(self) -> i64 {
        self.0.max(0)
    }

    /// Negative part of the delta (moves a balance's `frozen` down).
    pub fn negative_part(self) -> i64 {
        self.0.min(0)
    }
}

impl From<u64> for ScaledAmount {
    fn from(v: u64) -> Self {
        Self(v)
    }
}

impl From<i64> for ScaledAmountSigned {
    fn from(v: i64) -> Self {
        Self(v)
    }
}

impl Deref for ScaledAmount {
    type Target = u64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl Deref for ScaledAmountSigned {
    type Target = i64;
    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl fmt::Display for ScaledAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ScaledAmountSigned {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum MoneyError {
    #[error("precision overflow: provided {provided} decimals, max allowed {max}")]
    PrecisionOverflow { provided: u32, max: u32 },

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("amount too large, would overflow")]
    Overflow,

    #[error("invalid format: {0}")]
    InvalidFormat(String),
}

/// Parses a decimal string into a `ScaledAmount` at `decimals` precision.
/// Rejects anything that would require silent truncation: extra fractional
/// digits, a leading/trailing dot, commas, signs, scientific notation.
pub fn parse_amount(amount_str: &str, decimals: u32) -> Result<ScaledAmount, MoneyError> {
    let amount_str = amount_str.trim();
    if amount_str.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }
    if amount_str.starts_with('-') || amount_str.starts_with('+') {
        return Err(MoneyError::InvalidAmount);
    }

    let parts: Vec<&str> = amount_str.split('.').collect();
    let (whole, frac) = match parts.len() {
        1 => (parts[0], ""),
        2 => {
            if parts[0].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing leading zero (use 0.5 instead of .5)".into(),
                ));
            }
            if parts[1].is_empty() {
                return Err(MoneyError::InvalidFormat(
                    "missing fractional part (use 5.0 instead of 5.)".into(),
                ));
            }
            if decimals == 0 {
                return Err(MoneyError::InvalidFormat("decimals is 0, but dot provided".into()));
            }
            (parts[0], parts[1])
        }
        _ => return Err(MoneyError::InvalidFormat("multiple decimal points".into())),
    };

    if frac.len() > decimals as usize {
        return Err(MoneyError::PrecisionOverflow {
            provided: frac.len() as u32,
            max: decimals,
        });
    }

    let whole_num: u64 = whole
        .parse::<u64>()
        .map_err(|_| MoneyError::InvalidFormat(format!("invalid whole part: {whole}")))?;

    let frac_num: u64 = if decimals == 0 || frac.is_empty() {
        0
    } else {
        let frac_padded = format!("{:0<width$}", frac, width = decimals as usize);
        frac_padded[..decimals as usize]
            .parse::<u64>()
            .map_err(|_| MoneyError::InvalidFormat("invalid fractional part".into()))?
    };

    let multiplier = 10u64.checked_pow(decimals).ok_or(MoneyError::Overflow)?;
    let amount = whole_num
        .checked_mul(multiplier)
        .and_then(|v| v.checked_add(frac_num))
        .ok_or(MoneyError::Overflow)?;

    if amount == 0 {
        return Err(MoneyError::InvalidAmount);
    }
    Ok(ScaledAmount(amount))
}

/// Parses a `rust_decimal::Decimal` (the Clearing RPC's wire type) into a
/// `ScaledAmount` at `decimals` precision.
pub fn parse_decimal(amount: Decimal, decimals: u32) -> Result<ScaledAmount, MoneyError> {
    if amount.is_sign_negative() || amount.is_zero() {
        return Err(MoneyError::InvalidAmount);
    }
    if amount.scale() > decimals {
        return Err(MoneyError::PrecisionOverflow {
            provided: amount.scale(),
            max: decimals,
        });
    }
    let multiplier = Decimal::from(10u64.pow(decimals));
    let scaled = (amount * multiplier).to_u64().ok_or(MoneyError::Overflow)?;
    Ok(ScaledAmount(scaled))
}

/// Formats an internal amount back to a decimal string, truncated to
/// `display_decimals`.
pub fn format_amount(amount: u64, asset_decimals: u32, display_decimals: u32) -> String {
    let decimal_value = Decimal::from(amount) / Decimal::from(10u64.pow(asset_decimals));
    format!("{:.prec$}", decimal_value, prec = display_decimals as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn parse_amount_basic() {
        assert_eq!(*parse_amount("1.23", 2).unwrap(), 123);
        assert_eq!(*parse_amount("1.23", 8).unwrap(), 123_000_000);
        assert_eq!(*parse_amount("0.0001", 4).unwrap(), 1);
    }

    #[test]
    fn parse_amount_rejects_zero() {
        assert!(parse_amount("0", 2).is_err());
        assert!(parse_amount("0.00", 2).is_err());
    }

    #[test]
    fn parse_amount_rejects_bad_formats() {
        for case in [".5", "5.", "+1.23", "1,000.00", "1e2", "1..2"] {
            assert!(parse_amount(case, 8).is_err(), "should reject {case}");
        }
    }

    #[test]
    fn parse_amount_precision_overflow() {
        let res = parse_amount("1.2345", 3);
        assert!(matches!(
            res,
            Err(MoneyError::PrecisionOverflow { provided: 4, max: 3 })
        ));
    }

    #[test]
    fn parse_decimal_rejects_extra_scale() {
        let d = Decimal::from_str("1.23000").unwrap();
        assert!(parse_decimal(d, 2).is_err());
        let d = Decimal::from_str("1.23").unwrap();
        assert_eq!(*parse_decimal(d, 8).unwrap(), 123_000_000);
    }

    #[test]
    fn format_amount_truncates() {
        let val = 199_900_000;
        assert_eq!(format_amount(val, 8, 2), "1.99");
        assert_eq!(format_amount(val, 8, 0), "1");
    }

    #[test]
    fn signed_delta_splits_into_available_and_frozen_parts() {
        let credit = ScaledAmountSigned::from(500i64);
        assert_eq!(credit.positive_part(), 500);
        assert_eq!(credit.negative_part(), 0);

        let debit = ScaledAmountSigned::from(-500i64);
        assert_eq!(debit.positive_part(), 0);
        assert_eq!(debit.negative_part(), -500);
    }
}
