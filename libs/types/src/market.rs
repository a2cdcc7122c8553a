//! Market observations

use crate::identifiers::InstrumentId;
use crate::precision::{clamp_unit, to_f64};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Well-known keys in the indicator bag
pub mod indicator_keys {
    pub const MOMENTUM: &str = "momentum";
    pub const VOLATILITY: &str = "volatility";
    pub const OSCILLATOR: &str = "oscillator";
}

/// One market observation for one instrument
///
/// Immutable once created. `quality` is assigned at the codec boundary: 1.0 when
/// every field arrived intact, lower when fields were missing or sanitized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub instrument: InstrumentId,
    pub timestamp: DateTime<Utc>,
    pub price: Decimal,
    pub volume: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(default)]
    pub indicators: BTreeMap<String, f64>,
    #[serde(default = "full_quality")]
    pub quality: f64,
}

fn full_quality() -> f64 {
    1.0
}

impl MarketSnapshot {
    pub fn new(
        instrument: InstrumentId,
        timestamp: DateTime<Utc>,
        price: Decimal,
        volume: Decimal,
        bid: Decimal,
        ask: Decimal,
    ) -> Self {
        Self {
            instrument,
            timestamp,
            price,
            volume,
            bid,
            ask,
            indicators: BTreeMap::new(),
            quality: 1.0,
        }
    }

    pub fn with_indicator(mut self, key: impl Into<String>, value: f64) -> Self {
        self.indicators.insert(key.into(), value);
        self
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality = clamp_unit(quality);
        self
    }

    pub fn price_f64(&self) -> f64 {
        to_f64(self.price)
    }

    /// Mid price, falling back to last price when the book is one-sided
    pub fn mid_f64(&self) -> f64 {
        let bid = to_f64(self.bid);
        let ask = to_f64(self.ask);
        if bid > 0.0 && ask > 0.0 {
            (bid + ask) / 2.0
        } else {
            self.price_f64()
        }
    }

    /// Indicator value, `None` when missing or non-finite
    pub fn indicator(&self, key: &str) -> Option<f64> {
        self.indicators.get(key).copied().filter(|v| v.is_finite())
    }
}
