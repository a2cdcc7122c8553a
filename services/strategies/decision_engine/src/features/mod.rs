//! Feature engineering
//!
//! [`FeatureCache`] holds a bounded, append-only window of snapshots per
//! instrument. [`FeaturePipeline`] is a pure function of a window: identical
//! history always yields an identical [`FeatureVector`].

pub mod indicators;

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use torq_config::FeatureConfig;
use tracing::debug;
use types::market::indicator_keys;
use types::{feature_index as fi, FeatureVector, InstrumentId, MarketSnapshot, FEATURE_COUNT};

use indicators::*;

/// Per-instrument bounded history of market snapshots
pub struct FeatureCache {
    capacity: usize,
    windows: DashMap<InstrumentId, Arc<RwLock<VecDeque<MarketSnapshot>>>>,
}

impl FeatureCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: DashMap::new(),
        }
    }

    fn slot(&self, instrument: &InstrumentId) -> Arc<RwLock<VecDeque<MarketSnapshot>>> {
        self.windows
            .entry(instrument.clone())
            .or_insert_with(|| Arc::new(RwLock::new(VecDeque::with_capacity(self.capacity))))
            .clone()
    }

    /// Append a snapshot, evicting the oldest beyond capacity
    ///
    /// Snapshots older than the newest one already held are rejected.
    pub fn push(&self, snapshot: MarketSnapshot) -> bool {
        let slot = self.slot(&snapshot.instrument);
        let mut window = slot.write();
        if let Some(last) = window.back() {
            if snapshot.timestamp < last.timestamp {
                debug!(
                    "Dropping out-of-order snapshot for {} ({} < {})",
                    snapshot.instrument, snapshot.timestamp, last.timestamp
                );
                return false;
            }
        }
        window.push_back(snapshot);
        while window.len() > self.capacity {
            window.pop_front();
        }
        true
    }

    /// Consistent copy of the instrument's window, oldest first
    pub fn window(&self, instrument: &InstrumentId) -> Vec<MarketSnapshot> {
        match self.windows.get(instrument).map(|slot| slot.clone()) {
            Some(slot) => slot.read().iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub fn latest(&self, instrument: &InstrumentId) -> Option<MarketSnapshot> {
        let slot = self.windows.get(instrument).map(|slot| slot.clone())?;
        let window = slot.read();
        window.back().cloned()
    }

    pub fn len(&self, instrument: &InstrumentId) -> usize {
        self.windows
            .get(instrument)
            .map(|slot| slot.read().len())
            .unwrap_or(0)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn instruments(&self) -> Vec<InstrumentId> {
        self.windows.iter().map(|entry| entry.key().clone()).collect()
    }
}

/// Statistics derived from a window, shared by planner, fallback and trailing
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MarketStats {
    pub samples: usize,
    pub last_price: f64,
    pub atr: f64,
    /// Standard deviation of price changes
    pub volatility: f64,
    /// Short over long volatility, 1.0 when undetermined
    pub volatility_ratio: f64,
    /// Signed efficiency ratio in [-1, 1]
    pub efficiency: f64,
    pub persistence: f64,
    pub recent_high: f64,
    pub recent_low: f64,
    pub momentum: f64,
}

impl MarketStats {
    pub fn efficiency_abs(&self) -> f64 {
        self.efficiency.abs()
    }
}

#[derive(Debug, Clone)]
pub struct FeaturePipeline {
    config: FeatureConfig,
}

impl FeaturePipeline {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Feature vector for the last snapshot in `window`
    pub fn compute(&self, window: &[MarketSnapshot]) -> FeatureVector {
        let cold_start = window.len() < self.config.min_window;
        let Some(current) = window.last() else {
            return FeatureVector::sanitized([0.0; FEATURE_COUNT], true, 0.0);
        };

        let prices: Vec<f64> = window.iter().map(MarketSnapshot::price_f64).collect();
        let long = self.config.long_ma;
        let mut raw = [0.0; FEATURE_COUNT];

        raw[fi::RETURN_1] = lagged_return(&prices, 1);
        raw[fi::RETURN_5] = lagged_return(&prices, 5);
        raw[fi::RETURN_20] = lagged_return(&prices, 20);

        let long_ma = sma(&prices, long);
        raw[fi::MA_RATIO] = if long_ma.abs() > f64::EPSILON {
            sma(&prices, self.config.short_ma) / long_ma - 1.0
        } else {
            0.0
        };
        raw[fi::MOMENTUM] = lagged_return(&prices, self.config.momentum_period);
        raw[fi::VOLATILITY] = std_dev(&step_returns(&prices, long));
        raw[fi::RSI] = (rsi(&prices, self.config.rsi_period) - 50.0) / 50.0;
        raw[fi::ZSCORE] = zscore(&prices, long);
        raw[fi::RANGE_POSITION] = range_position(&prices, long);
        raw[fi::PERSISTENCE] = persistence(&prices, long);
        raw[fi::EFFICIENCY] = efficiency_ratio(&prices, long);

        let mid = current.mid_f64();
        let spread = types::precision::to_f64(current.ask - current.bid);
        raw[fi::SPREAD_BPS] = if mid > 0.0 { spread / mid * 10_000.0 } else { 0.0 };

        let volumes: Vec<f64> = window
            .iter()
            .map(|s| types::precision::to_f64(s.volume))
            .collect();
        let mean_volume = mean(tail(&volumes, long));
        raw[fi::VOLUME_RATIO] = if mean_volume > f64::EPSILON {
            types::precision::to_f64(current.volume) / mean_volume
        } else {
            0.0
        };

        raw[fi::EXT_MOMENTUM] = current.indicator(indicator_keys::MOMENTUM).unwrap_or(0.0);
        raw[fi::EXT_VOLATILITY] = current.indicator(indicator_keys::VOLATILITY).unwrap_or(0.0);
        raw[fi::EXT_OSCILLATOR] = current.indicator(indicator_keys::OSCILLATOR).unwrap_or(0.0);

        FeatureVector::sanitized(raw, cold_start, current.quality)
    }

    /// Window statistics over the last `lookback` steps
    pub fn stats(&self, window: &[MarketSnapshot], lookback: usize) -> MarketStats {
        let prices: Vec<f64> = window.iter().map(MarketSnapshot::price_f64).collect();
        let Some(last_price) = prices.last().copied() else {
            return MarketStats {
                volatility_ratio: 1.0,
                ..MarketStats::default()
            };
        };
        let lookback = lookback.max(2);

        let long_changes = price_changes(&prices, lookback);
        let short_changes = price_changes(&prices, (lookback / 4).max(3));
        let long_vol = std_dev(&long_changes);
        let short_vol = std_dev(&short_changes);
        let volatility_ratio = if long_vol > f64::EPSILON {
            short_vol / long_vol
        } else {
            1.0
        };

        let (recent_low, recent_high) = min_max(tail(&prices, lookback));

        MarketStats {
            samples: prices.len(),
            last_price,
            atr: atr(&prices, self.config.atr_period),
            volatility: long_vol,
            volatility_ratio,
            efficiency: efficiency_ratio(&prices, lookback),
            persistence: persistence(&prices, lookback),
            recent_high,
            recent_low,
            momentum: lagged_return(&prices, self.config.momentum_period),
        }
    }
}
