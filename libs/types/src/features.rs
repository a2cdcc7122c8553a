//! Versioned numeric feature vectors

use crate::errors::ValidationError;
use crate::precision::clamp_unit;
use serde::{Deserialize, Serialize};

/// Current feature schema version
pub const FEATURE_SCHEMA_VERSION: u16 = 1;

/// Number of values in a schema v1 vector
pub const FEATURE_COUNT: usize = 16;

/// Positions of each feature in a schema v1 vector
pub mod feature_index {
    pub const RETURN_1: usize = 0;
    pub const RETURN_5: usize = 1;
    pub const RETURN_20: usize = 2;
    pub const MA_RATIO: usize = 3;
    pub const MOMENTUM: usize = 4;
    pub const VOLATILITY: usize = 5;
    pub const RSI: usize = 6;
    pub const ZSCORE: usize = 7;
    pub const RANGE_POSITION: usize = 8;
    pub const PERSISTENCE: usize = 9;
    pub const EFFICIENCY: usize = 10;
    pub const SPREAD_BPS: usize = 11;
    pub const VOLUME_RATIO: usize = 12;
    pub const EXT_MOMENTUM: usize = 13;
    pub const EXT_VOLATILITY: usize = 14;
    pub const EXT_OSCILLATOR: usize = 15;
}

/// Fixed-length feature vector
///
/// Never contains NaN or infinite values: [`FeatureVector::sanitized`] replaces
/// them with 0 and records how many were replaced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub schema_version: u16,
    values: Vec<f64>,
    /// Produced from fewer snapshots than the minimum window
    pub cold_start: bool,
    /// Number of non-finite values replaced by 0
    pub sanitized: usize,
    /// Input quality in [0, 1]
    pub quality: f64,
}

impl FeatureVector {
    /// Build a vector from raw values, replacing non-finite entries with 0
    ///
    /// Each sanitized value lowers quality by 0.1.
    pub fn sanitized(
        raw: [f64; FEATURE_COUNT],
        cold_start: bool,
        input_quality: f64,
    ) -> Self {
        let mut sanitized = 0;
        let values = raw
            .iter()
            .map(|v| {
                if v.is_finite() {
                    *v
                } else {
                    sanitized += 1;
                    0.0
                }
            })
            .collect();

        let penalty = 1.0 - 0.1 * sanitized as f64;
        Self {
            schema_version: FEATURE_SCHEMA_VERSION,
            values,
            cold_start,
            sanitized,
            quality: clamp_unit(clamp_unit(input_quality) * penalty),
        }
    }

    /// Rebuild a vector from stored values, validating the schema
    pub fn from_values(
        values: Vec<f64>,
        cold_start: bool,
        quality: f64,
    ) -> Result<Self, ValidationError> {
        if values.len() != FEATURE_COUNT {
            return Err(ValidationError::FeatureLength {
                schema: FEATURE_SCHEMA_VERSION,
                expected: FEATURE_COUNT,
                actual: values.len(),
            });
        }
        let mut raw = [0.0; FEATURE_COUNT];
        raw.copy_from_slice(&values);
        Ok(Self::sanitized(raw, cold_start, quality))
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn get(&self, index: usize) -> f64 {
        self.values.get(index).copied().unwrap_or(0.0)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}
