//! Shared, versioned parameter tables
//!
//! Readers take an `Arc` of the current table and never observe a partial
//! update. The feedback loop is the only writer: it reads the current table,
//! computes a replacement and publishes it as a whole under a writer lock.

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use torq_config::EngineConfig;
use types::{Regime, TrailingAlgorithmId};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Versioned<T> {
    pub version: u64,
    pub updated_at: DateTime<Utc>,
    pub value: T,
}

pub struct SharedTable<T> {
    current: RwLock<Arc<Versioned<T>>>,
    writer: Mutex<()>,
}

impl<T: Clone> SharedTable<T> {
    pub fn new(value: T) -> Self {
        Self::from_versioned(Versioned {
            version: 1,
            updated_at: Utc::now(),
            value,
        })
    }

    pub fn from_versioned(versioned: Versioned<T>) -> Self {
        Self {
            current: RwLock::new(Arc::new(versioned)),
            writer: Mutex::new(()),
        }
    }

    pub fn load(&self) -> Arc<Versioned<T>> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Read-compute-publish; `f` sees the table current at the time of the call
    pub fn update<F>(&self, f: F) -> Arc<Versioned<T>>
    where
        F: FnOnce(&T) -> T,
    {
        let _writer = self.writer.lock();
        let current = self.load();
        let next = Arc::new(Versioned {
            version: current.version + 1,
            updated_at: Utc::now(),
            value: f(&current.value),
        });
        *self.current.write() = next.clone();
        next
    }
}

/// Ensemble weight per predictor id, always summing to 1
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WeightTable {
    weights: BTreeMap<String, f64>,
}

impl WeightTable {
    pub fn uniform<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::from_raw(ids.into_iter().map(|id| (id.into(), 1.0)).collect())
    }

    /// Configured weights for `ids`; ids without a configured weight take the
    /// mean of the configured ones (or 1 when none are configured)
    pub fn with_initial<I, S>(ids: I, initial: &BTreeMap<String, f64>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ids: Vec<String> = ids.into_iter().map(Into::into).collect();
        let configured: Vec<f64> = ids.iter().filter_map(|id| initial.get(id).copied()).collect();
        let fill = if configured.is_empty() {
            1.0
        } else {
            configured.iter().sum::<f64>() / configured.len() as f64
        };
        Self::from_raw(
            ids.into_iter()
                .map(|id| {
                    let weight = initial.get(&id).copied().unwrap_or(fill);
                    (id, weight)
                })
                .collect(),
        )
    }

    /// Normalize arbitrary non-negative weights; degenerate input becomes uniform
    pub fn from_raw(raw: BTreeMap<String, f64>) -> Self {
        let cleaned: BTreeMap<String, f64> = raw
            .into_iter()
            .map(|(id, w)| (id, if w.is_finite() && w > 0.0 { w } else { 0.0 }))
            .collect();
        let total: f64 = cleaned.values().sum();
        let weights = if total > f64::EPSILON {
            cleaned.into_iter().map(|(id, w)| (id, w / total)).collect()
        } else {
            let n = cleaned.len().max(1) as f64;
            cleaned.into_keys().map(|id| (id, 1.0 / n)).collect()
        };
        Self { weights }
    }

    pub fn get(&self, id: &str) -> f64 {
        self.weights.get(id).copied().unwrap_or(0.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &f64)> {
        self.weights.iter()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn as_map(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub min_confidence: f64,
}

/// Running performance of one trailing algorithm in one regime
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AlgorithmStats {
    pub samples: u32,
    pub wins: u32,
    pub mean_r: f64,
}

impl AlgorithmStats {
    pub fn record(&mut self, r_multiple: f64) {
        let r = if r_multiple.is_finite() { r_multiple } else { 0.0 };
        self.samples = self.samples.saturating_add(1);
        if r > 0.0 {
            self.wins = self.wins.saturating_add(1);
        }
        self.mean_r += (r - self.mean_r) / self.samples as f64;
    }

    pub fn win_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.wins as f64 / self.samples as f64
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TrailingStats {
    by_regime: BTreeMap<Regime, BTreeMap<TrailingAlgorithmId, AlgorithmStats>>,
}

impl TrailingStats {
    pub fn get(&self, regime: Regime, algorithm: TrailingAlgorithmId) -> AlgorithmStats {
        self.by_regime
            .get(&regime)
            .and_then(|algos| algos.get(&algorithm))
            .copied()
            .unwrap_or_default()
    }

    pub fn record(&mut self, regime: Regime, algorithm: TrailingAlgorithmId, r_multiple: f64) {
        self.by_regime
            .entry(regime)
            .or_default()
            .entry(algorithm)
            .or_default()
            .record(r_multiple);
    }
}

/// All learnable parameters
pub struct ParameterStore {
    pub weights: Arc<SharedTable<WeightTable>>,
    pub thresholds: Arc<SharedTable<Thresholds>>,
    pub trailing: Arc<SharedTable<TrailingStats>>,
}

impl ParameterStore {
    pub fn new(predictor_ids: &[String], config: &EngineConfig) -> Self {
        Self {
            weights: Arc::new(SharedTable::new(WeightTable::with_initial(
                predictor_ids.iter().cloned(),
                &config.ensemble.initial_weights,
            ))),
            thresholds: Arc::new(SharedTable::new(Thresholds {
                min_confidence: config.validator.min_confidence,
            })),
            trailing: Arc::new(SharedTable::new(TrailingStats::default())),
        }
    }

    /// Adopt a persisted weight table, keeping only known predictors
    pub fn restore_weights(&self, persisted: &WeightTable) {
        self.weights.update(|current| {
            let merged = current
                .iter()
                .map(|(id, w)| {
                    let restored = persisted.as_map().get(id).copied().unwrap_or(*w);
                    (id.clone(), restored)
                })
                .collect();
            WeightTable::from_raw(merged)
        });
    }
}
