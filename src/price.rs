//! `price_usdc` — the wire/storage representation of a USDC amount.
//!
//! Per I5, `price_usdc` is a fixed-point decimal string with at most six
//! fractional digits, never negative. Amounts are compared as raw base-unit
//! integers (`decimal * 10^6`), never as floating point.

use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

pub const USDC_DECIMALS: u32 = 6;

static PRICE_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d+(\.\d{1,6})?$").expect("valid regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct PriceUsdc(Decimal);

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PriceParseError {
    #[error("price must be a non-negative decimal with at most 6 fractional digits")]
    InvalidFormat,
    #[error("price has too many fractional digits: {0}")]
    WrongPrecision(u32),
}

impl PriceUsdc {
    pub fn parse(input: &str) -> Result<Self, PriceParseError> {
        if !PRICE_RE.is_match(input) {
            return Err(PriceParseError::InvalidFormat);
        }
        let decimal = Decimal::from_str(input).map_err(|_| PriceParseError::InvalidFormat)?;
        if decimal.scale() > USDC_DECIMALS {
            return Err(PriceParseError::WrongPrecision(decimal.scale()));
        }
        Ok(PriceUsdc(decimal))
    }

    pub fn from_base_units(units: u128) -> Self {
        let decimal = Decimal::from_u128(units).expect("base units fit in Decimal");
        PriceUsdc(decimal / Decimal::from(10u64.pow(USDC_DECIMALS)))
    }

    /// Raw base-unit integer representation (amount * 10^6), used for all
    /// equality/ordering comparisons against on-chain values.
    pub fn to_base_units(&self) -> u128 {
        let scaled = self.0 * Decimal::from(10u64.pow(USDC_DECIMALS));
        scaled
            .round()
            .mantissa()
            .unsigned_abs()
    }

    pub fn is_negative(&self) -> bool {
        self.0.is_sign_negative()
    }
}

impl FromStr for PriceUsdc {
    type Err = PriceParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PriceUsdc::parse(s)
    }
}

impl fmt::Display for PriceUsdc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.6}", self.0)
    }
}

impl Serialize for PriceUsdc {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for PriceUsdc {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        PriceUsdc::parse(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_exact_six_fractional_digits() {
        let p = PriceUsdc::parse("1.000000").unwrap();
        assert_eq!(p.to_base_units(), 1_000_000);
    }

    #[test]
    fn rejects_negative() {
        assert!(PriceUsdc::parse("-1.00").is_err());
    }

    #[test]
    fn rejects_too_much_precision() {
        assert!(PriceUsdc::parse("1.0000001").is_err());
    }

    #[test]
    fn base_units_round_trip() {
        let p = PriceUsdc::parse("10.50").unwrap();
        assert_eq!(p.to_base_units(), 10_500_000);
        assert_eq!(PriceUsdc::from_base_units(10_500_000).to_string(), "10.500000");
    }
}
