//! Predictor outputs and aggregated ensemble decisions

use crate::identifiers::InstrumentId;
use crate::precision::clamp_unit;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Trade direction recommended by the ensemble
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Long,
    Short,
    Hold,
}

impl Direction {
    /// +1 for long, -1 for short, 0 for hold
    pub fn sign(self) -> i64 {
        match self {
            Direction::Long => 1,
            Direction::Short => -1,
            Direction::Hold => 0,
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Direction::Long => Direction::Short,
            Direction::Short => Direction::Long,
            Direction::Hold => Direction::Hold,
        }
    }

    /// Direction implied by a signed position size
    pub fn from_size(size: i64) -> Self {
        match size.signum() {
            1 => Direction::Long,
            -1 => Direction::Short,
            _ => Direction::Hold,
        }
    }
}

/// Probability mass over {long, short}
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DirectionalScore {
    pub long: f64,
    pub short: f64,
}

impl DirectionalScore {
    /// Normalize raw non-negative scores into probability mass
    ///
    /// Degenerate inputs (both zero or non-finite) collapse to 50/50.
    pub fn normalized(long: f64, short: f64) -> Self {
        let long = if long.is_finite() { long.max(0.0) } else { 0.0 };
        let short = if short.is_finite() { short.max(0.0) } else { 0.0 };
        let total = long + short;
        if total <= f64::EPSILON {
            return Self {
                long: 0.5,
                short: 0.5,
            };
        }
        Self {
            long: long / total,
            short: short / total,
        }
    }

    /// Score favouring `direction` with probability `p`
    pub fn favouring(direction: Direction, p: f64) -> Self {
        let p = clamp_unit(p);
        match direction {
            Direction::Long => Self {
                long: p,
                short: 1.0 - p,
            },
            Direction::Short => Self {
                long: 1.0 - p,
                short: p,
            },
            Direction::Hold => Self::normalized(1.0, 1.0),
        }
    }

    pub fn leaning(&self) -> Direction {
        if self.long > self.short {
            Direction::Long
        } else if self.short > self.long {
            Direction::Short
        } else {
            Direction::Hold
        }
    }
}

/// Why a predictor was excluded from aggregation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum PredictionFailure {
    Timeout,
    Error(String),
}

/// Output of a single predictor for one feature vector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelPrediction {
    pub predictor_id: String,
    pub score: DirectionalScore,
    pub confidence: f64,
    pub latency_us: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<PredictionFailure>,
    /// Normalized weight this prediction carried in its aggregation (0 if failed)
    #[serde(default)]
    pub weight: f64,
}

impl ModelPrediction {
    pub fn succeeded(
        predictor_id: impl Into<String>,
        score: DirectionalScore,
        confidence: f64,
        latency_us: u64,
    ) -> Self {
        Self {
            predictor_id: predictor_id.into(),
            score,
            confidence: clamp_unit(confidence),
            latency_us,
            failure: None,
            weight: 0.0,
        }
    }

    pub fn failed(predictor_id: impl Into<String>, failure: PredictionFailure, latency_us: u64) -> Self {
        Self {
            predictor_id: predictor_id.into(),
            score: DirectionalScore::normalized(1.0, 1.0),
            confidence: 0.0,
            latency_us,
            failure: Some(failure),
            weight: 0.0,
        }
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }
}

/// Recommendation strength bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationTier {
    Strong,
    Weak,
    Hold,
}

/// Entry, protective stop and profit targets for a directional decision
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePlan {
    pub entry: Decimal,
    pub stop: Decimal,
    pub target: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub second_target: Option<Decimal>,
    pub quantity: u64,
}

impl TradePlan {
    /// Reward-to-risk ratio for a trade in `direction`, `None` when risk is not positive
    pub fn risk_reward(&self, direction: Direction) -> Option<Decimal> {
        let (risk, reward) = match direction {
            Direction::Long => (self.entry - self.stop, self.target - self.entry),
            Direction::Short => (self.stop - self.entry, self.entry - self.target),
            Direction::Hold => return None,
        };
        if risk <= Decimal::ZERO {
            return None;
        }
        Some(reward / risk)
    }
}

/// Aggregated, auditable ensemble output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleDecision {
    pub instrument: InstrumentId,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub confidence: f64,
    /// |Σ w·long − Σ w·short| in [0, 1]
    pub strength: f64,
    pub tier: RecommendationTier,
    pub predictions: Vec<ModelPrediction>,
    /// At least one predictor failed or timed out
    pub degraded: bool,
    /// No predictor survived; decision derived from price momentum
    pub fallback: bool,
    pub weights_version: u64,
    pub data_quality: f64,
    pub cold_start: bool,
    pub reference_price: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<TradePlan>,
}

impl EnsembleDecision {
    pub fn is_actionable(&self) -> bool {
        self.direction != Direction::Hold && self.tier != RecommendationTier::Hold
    }

    pub fn surviving_predictions(&self) -> impl Iterator<Item = &ModelPrediction> {
        self.predictions.iter().filter(|p| !p.is_failed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_directional_score_normalization() {
        let score = DirectionalScore::normalized(3.0, 1.0);
        assert!((score.long - 0.75).abs() < 1e-12);
        assert_eq!(score.leaning(), Direction::Long);

        let degenerate = DirectionalScore::normalized(f64::NAN, 0.0);
        assert_eq!(degenerate.long, 0.5);
        assert_eq!(degenerate.leaning(), Direction::Hold);
    }

    #[test]
    fn test_risk_reward_by_direction() {
        let long = TradePlan {
            entry: dec!(100),
            stop: dec!(98),
            target: dec!(104),
            second_target: None,
            quantity: 1,
        };
        assert_eq!(long.risk_reward(Direction::Long), Some(dec!(2)));
        // Same prices read as a short have negative risk
        assert_eq!(long.risk_reward(Direction::Short), None);

        let short = TradePlan {
            entry: dec!(100),
            stop: dec!(101),
            target: dec!(97),
            second_target: Some(dec!(95)),
            quantity: 2,
        };
        assert_eq!(short.risk_reward(Direction::Short), Some(dec!(3)));
    }
}
