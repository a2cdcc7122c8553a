//! Decimal ↔ f64 crossings
//!
//! Money stays in `Decimal`; statistics are computed in `f64`. These helpers are
//! the only place the two meet, so rounding and non-finite handling are uniform.
//!
//! ## Critical Rules
//!
//! 1. Non-finite floats never become prices: conversion returns `None`
//! 2. Prices produced from statistics are rounded to the instrument precision
//! 3. Decimal → f64 never fails; values outside f64 range saturate to 0.0

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};

/// Convert a decimal price into f64 for statistical work
pub fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

/// Convert an f64 into a decimal rounded to `decimals` places
pub fn from_f64(value: f64, decimals: u32) -> Option<Decimal> {
    if !value.is_finite() {
        return None;
    }
    Decimal::from_f64(value)
        .map(|d| d.round_dp_with_strategy(decimals, RoundingStrategy::MidpointNearestEven))
}

/// Clamp a float into [0, 1], mapping NaN to 0
pub fn clamp_unit(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_from_f64_rounds_and_rejects_non_finite() {
        assert_eq!(from_f64(4500.126, 2), Some(dec!(4500.13)));
        assert_eq!(from_f64(f64::NAN, 2), None);
        assert_eq!(from_f64(f64::INFINITY, 2), None);
    }

    #[test]
    fn test_clamp_unit() {
        assert_eq!(clamp_unit(1.5), 1.0);
        assert_eq!(clamp_unit(-0.2), 0.0);
        assert_eq!(clamp_unit(f64::NAN), 0.0);
        assert_eq!(clamp_unit(0.42), 0.42);
    }
}
