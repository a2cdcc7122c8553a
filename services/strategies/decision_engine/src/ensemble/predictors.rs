//! Predictor interface and the built-in predictor set
//!
//! Every built-in reduces the feature vector to a signal `s ∈ [-1, 1]`
//! (positive favours long). The signal maps to probability mass
//! `long = 0.5 + 0.5·s` and confidence `0.5 + 0.5·|s|`, so a predictor with
//! no opinion reports an even split at the lowest confidence.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use types::{feature_index as fi, Direction, DirectionalScore, FeatureVector};

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PredictorError {
    #[error("Insufficient input: {0}")]
    InsufficientData(String),

    #[error("Model failure: {0}")]
    Model(String),
}

/// One predictor's raw output, before aggregation
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Prediction {
    pub score: DirectionalScore,
    pub confidence: f64,
}

impl Prediction {
    /// Map a signed signal in [-1, 1] to score and confidence
    pub fn from_signal(signal: f64) -> Self {
        let s = if signal.is_finite() {
            signal.clamp(-1.0, 1.0)
        } else {
            0.0
        };
        Self {
            score: DirectionalScore::favouring(Direction::Long, 0.5 + 0.5 * s),
            confidence: 0.5 + 0.5 * s.abs(),
        }
    }
}

#[async_trait]
pub trait Predictor: Send + Sync {
    fn id(&self) -> &str;

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError>;
}

/// Recent returns and momentum
pub struct MomentumPredictor;

#[async_trait]
impl Predictor for MomentumPredictor {
    fn id(&self) -> &str {
        "momentum"
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError> {
        let raw = 0.6 * features.get(fi::MOMENTUM) + 0.4 * features.get(fi::RETURN_5);
        let external = features.get(fi::EXT_MOMENTUM).clamp(-1.0, 1.0);
        Ok(Prediction::from_signal(0.8 * (raw * 100.0).tanh() + 0.2 * external))
    }
}

/// Moving-average alignment weighted by trend efficiency
pub struct TrendFollowingPredictor;

#[async_trait]
impl Predictor for TrendFollowingPredictor {
    fn id(&self) -> &str {
        "trend_following"
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError> {
        let ma = (features.get(fi::MA_RATIO) * 200.0).tanh();
        let efficiency = features.get(fi::EFFICIENCY);
        Ok(Prediction::from_signal(0.5 * ma + 0.5 * efficiency))
    }
}

/// Fades stretched prices when the market is not trending
pub struct MeanReversionPredictor;

#[async_trait]
impl Predictor for MeanReversionPredictor {
    fn id(&self) -> &str {
        "mean_reversion"
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError> {
        let stretch = 0.6 * (features.get(fi::ZSCORE) / 2.0).tanh() + 0.4 * features.get(fi::RSI);
        let chop = 1.0 - features.get(fi::EFFICIENCY).abs();
        Ok(Prediction::from_signal(-stretch * chop))
    }
}

/// Range extremes confirmed by volume
pub struct BreakoutPredictor;

#[async_trait]
impl Predictor for BreakoutPredictor {
    fn id(&self) -> &str {
        "breakout"
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError> {
        let edge = 2.0 * features.get(fi::RANGE_POSITION) - 1.0;
        let volume = features.get(fi::VOLUME_RATIO);
        let confirmation = 0.5 + 0.5 * (volume - 1.0).clamp(0.0, 1.0);
        Ok(Prediction::from_signal(edge * edge.abs() * confirmation))
    }
}

/// Directional persistence of price changes and the venue oscillator
pub struct OrderFlowPredictor;

#[async_trait]
impl Predictor for OrderFlowPredictor {
    fn id(&self) -> &str {
        "order_flow"
    }

    async fn predict(&self, features: &FeatureVector) -> Result<Prediction, PredictorError> {
        let volume = features.get(fi::VOLUME_RATIO);
        if volume <= 0.0 {
            return Err(PredictorError::InsufficientData("no volume history".to_string()));
        }
        let flow = 1.5 * features.get(fi::PERSISTENCE) + 0.5 * features.get(fi::EXT_OSCILLATOR);
        let participation = (volume / 2.0).min(1.0);
        Ok(Prediction::from_signal(flow.tanh() * participation))
    }
}

/// The five built-in predictors in registration order
pub fn default_predictors() -> Vec<Arc<dyn Predictor>> {
    vec![
        Arc::new(MomentumPredictor),
        Arc::new(TrendFollowingPredictor),
        Arc::new(MeanReversionPredictor),
        Arc::new(BreakoutPredictor),
        Arc::new(OrderFlowPredictor),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use types::FEATURE_COUNT;

    fn vector(set: &[(usize, f64)]) -> FeatureVector {
        let mut raw = [0.0; FEATURE_COUNT];
        for (index, value) in set {
            raw[*index] = *value;
        }
        FeatureVector::sanitized(raw, false, 1.0)
    }

    #[test]
    fn test_signal_mapping() {
        let neutral = Prediction::from_signal(0.0);
        assert_eq!(neutral.confidence, 0.5);
        assert_eq!(neutral.score.leaning(), Direction::Hold);

        let strong = Prediction::from_signal(3.0);
        assert_eq!(strong.confidence, 1.0);
        assert_eq!(strong.score.long, 1.0);

        let nan = Prediction::from_signal(f64::NAN);
        assert_eq!(nan.confidence, 0.5);
    }

    #[tokio::test]
    async fn test_trend_predictors_agree_on_uptrend() {
        let features = vector(&[
            (fi::MOMENTUM, 0.01),
            (fi::RETURN_5, 0.005),
            (fi::MA_RATIO, 0.004),
            (fi::EFFICIENCY, 0.9),
            (fi::RANGE_POSITION, 1.0),
            (fi::VOLUME_RATIO, 1.5),
            (fi::PERSISTENCE, 0.8),
        ]);
        for predictor in [
            Arc::new(MomentumPredictor) as Arc<dyn Predictor>,
            Arc::new(TrendFollowingPredictor),
            Arc::new(BreakoutPredictor),
            Arc::new(OrderFlowPredictor),
        ] {
            let prediction = predictor.predict(&features).await.unwrap();
            assert_eq!(prediction.score.leaning(), Direction::Long, "{}", predictor.id());
            assert!(prediction.confidence > 0.5);
        }
    }

    #[tokio::test]
    async fn test_mean_reversion_fades_stretch() {
        let features = vector(&[(fi::ZSCORE, 2.5), (fi::RSI, 0.6), (fi::EFFICIENCY, 0.1)]);
        let prediction = MeanReversionPredictor.predict(&features).await.unwrap();
        assert_eq!(prediction.score.leaning(), Direction::Short);
    }

    #[tokio::test]
    async fn test_order_flow_requires_volume() {
        let err = OrderFlowPredictor.predict(&vector(&[])).await.unwrap_err();
        assert!(matches!(err, PredictorError::InsufficientData(_)));
    }

    #[test]
    fn test_default_ids_are_unique() {
        let predictors = default_predictors();
        let mut ids: Vec<&str> = predictors.iter().map(|p| p.id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 5);
    }
}
