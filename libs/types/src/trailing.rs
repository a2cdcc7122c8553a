//! Trailing-stop regime and per-position state

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse market behaviour classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Regime {
    Trending,
    Ranging,
    Volatile,
}

impl fmt::Display for Regime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Regime::Trending => "trending",
            Regime::Ranging => "ranging",
            Regime::Volatile => "volatile",
        };
        f.write_str(name)
    }
}

/// Stop-placement algorithm identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrailingAlgorithmId {
    /// Fixed ATR multiple from the last price
    VolatilityAdaptive,
    /// ATR multiple from the best price since entry
    Chandelier,
    /// Just beyond the recent swing low/high
    SupportResistance,
}

impl fmt::Display for TrailingAlgorithmId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TrailingAlgorithmId::VolatilityAdaptive => "volatility_adaptive",
            TrailingAlgorithmId::Chandelier => "chandelier",
            TrailingAlgorithmId::SupportResistance => "support_resistance",
        };
        f.write_str(name)
    }
}

/// Trailing-engine state for one open position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrailingState {
    pub lifecycle_id: u64,
    pub regime: Regime,
    pub algorithm: TrailingAlgorithmId,
    pub last_stop: Option<Decimal>,
    pub confidence: f64,
    /// Accepted stop updates, never decreases
    pub updates: u64,
    /// Evaluations run, accepted or not
    pub evaluations: u64,
    /// Best price seen since entry (highest for longs, lowest for shorts)
    pub extreme_price: f64,
}

impl TrailingState {
    pub fn new(lifecycle_id: u64, last_stop: Option<Decimal>, entry_price: f64) -> Self {
        Self {
            lifecycle_id,
            regime: Regime::Ranging,
            algorithm: TrailingAlgorithmId::SupportResistance,
            last_stop,
            confidence: 0.0,
            updates: 0,
            evaluations: 0,
            extreme_price: entry_price,
        }
    }
}
