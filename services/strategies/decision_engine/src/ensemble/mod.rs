//! Model ensemble
//!
//! Every registered predictor runs on its own task against a shared deadline.
//! Late or failing predictors are excluded from that call only; survivors'
//! weights are renormalized so they sum to 1. With no survivors the ensemble
//! falls back to a deterministic momentum decision.

pub mod planner;
pub mod predictors;

pub use planner::TradePlanner;
pub use predictors::{default_predictors, Prediction, Predictor, PredictorError};

use crate::features::MarketStats;
use crate::params::{ParameterStore, WeightTable};
use chrono::{DateTime, Utc};
use network::elapsed_us;
use rust_decimal::Decimal;
use std::sync::Arc;
use torq_config::EnsembleConfig;
use tracing::{debug, warn};
use types::precision::clamp_unit;
use types::{
    Direction, DirectionalScore, EnsembleDecision, FeatureVector, InstrumentId, ModelPrediction,
    PredictionFailure, RecommendationTier,
};

/// Direction, confidence and strength from one aggregation
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub direction: Direction,
    pub confidence: f64,
    pub strength: f64,
    pub survivors: usize,
}

/// Confidence-weighted vote over the surviving predictions
///
/// Writes each prediction's effective weight back into it; failed predictions
/// carry weight 0. Returns `None` when nothing survived.
pub fn aggregate(predictions: &mut [ModelPrediction], weights: &WeightTable) -> Option<Aggregate> {
    let survivors = predictions.iter().filter(|p| !p.is_failed()).count();
    if survivors == 0 {
        for prediction in predictions.iter_mut() {
            prediction.weight = 0.0;
        }
        return None;
    }

    let total: f64 = predictions
        .iter()
        .filter(|p| !p.is_failed())
        .map(|p| weights.get(&p.predictor_id))
        .sum();

    let (mut long, mut short, mut confidence) = (0.0, 0.0, 0.0);
    for prediction in predictions.iter_mut() {
        if prediction.is_failed() {
            prediction.weight = 0.0;
            continue;
        }
        let weight = if total > f64::EPSILON {
            weights.get(&prediction.predictor_id) / total
        } else {
            1.0 / survivors as f64
        };
        prediction.weight = weight;
        long += weight * prediction.score.long;
        short += weight * prediction.score.short;
        confidence += weight * prediction.confidence;
    }

    let mass = DirectionalScore { long, short };
    Some(Aggregate {
        direction: mass.leaning(),
        confidence: clamp_unit(confidence),
        strength: clamp_unit((long - short).abs()),
        survivors,
    })
}

/// Tier for a confidence/strength pair; hold below the weak threshold
pub fn tier_for(confidence: f64, strength: f64, config: &EnsembleConfig) -> RecommendationTier {
    if confidence >= config.strong_confidence && strength >= config.strong_strength {
        RecommendationTier::Strong
    } else if confidence >= config.weak_confidence {
        RecommendationTier::Weak
    } else {
        RecommendationTier::Hold
    }
}

/// Deterministic decision from price momentum, capped at 0.5 confidence
pub fn momentum_fallback(stats: &MarketStats) -> Aggregate {
    let signal = if stats.momentum.is_finite() {
        (stats.momentum * 100.0).tanh()
    } else {
        0.0
    };
    let direction = if signal.abs() < 1e-9 {
        Direction::Hold
    } else if signal > 0.0 {
        Direction::Long
    } else {
        Direction::Short
    };
    Aggregate {
        direction,
        confidence: clamp_unit(0.5 * signal.abs()),
        strength: clamp_unit(signal.abs()),
        survivors: 0,
    }
}

/// Inputs for one ensemble call
pub struct DecisionInput<'a> {
    pub instrument: &'a InstrumentId,
    pub features: &'a FeatureVector,
    pub stats: &'a MarketStats,
    pub reference_price: Decimal,
    pub timestamp: DateTime<Utc>,
}

pub struct Ensemble {
    predictors: Vec<Arc<dyn Predictor>>,
    params: Arc<ParameterStore>,
}

impl Ensemble {
    pub fn new(predictors: Vec<Arc<dyn Predictor>>, params: Arc<ParameterStore>) -> Self {
        Self { predictors, params }
    }

    pub fn predictor_ids(&self) -> Vec<String> {
        self.predictors.iter().map(|p| p.id().to_string()).collect()
    }

    /// Run every predictor under the deadline and aggregate the survivors
    pub async fn decide(&self, input: DecisionInput<'_>, config: &EnsembleConfig) -> EnsembleDecision {
        let weights = self.params.weights.load();
        let mut predictions = self.collect(input.features, config).await;

        let degraded = predictions.iter().any(ModelPrediction::is_failed);
        let (aggregate, fallback) = match aggregate(&mut predictions, &weights.value) {
            Some(aggregate) => (aggregate, false),
            None => {
                warn!(
                    "All {} predictors failed for {}; using momentum fallback",
                    predictions.len(),
                    input.instrument
                );
                (momentum_fallback(input.stats), true)
            }
        };

        let features = input.features;
        let penalty = if features.cold_start {
            config.cold_start_penalty
        } else {
            1.0
        };
        let confidence = clamp_unit(aggregate.confidence * features.quality * penalty);
        let tier = if aggregate.direction == Direction::Hold {
            RecommendationTier::Hold
        } else {
            tier_for(confidence, aggregate.strength, config)
        };
        let direction = if tier == RecommendationTier::Hold {
            Direction::Hold
        } else {
            aggregate.direction
        };

        debug!(
            "{}: {:?} conf={:.3} strength={:.3} survivors={}/{} weights=v{}",
            input.instrument,
            direction,
            confidence,
            aggregate.strength,
            aggregate.survivors,
            predictions.len(),
            weights.version
        );

        EnsembleDecision {
            instrument: input.instrument.clone(),
            timestamp: input.timestamp,
            direction,
            confidence,
            strength: aggregate.strength,
            tier,
            predictions,
            degraded: degraded || fallback,
            fallback,
            weights_version: weights.version,
            data_quality: features.quality,
            cold_start: features.cold_start,
            reference_price: input.reference_price,
            plan: None,
        }
    }

    async fn collect(&self, features: &FeatureVector, config: &EnsembleConfig) -> Vec<ModelPrediction> {
        let features = Arc::new(features.clone());
        let started = std::time::Instant::now();
        let deadline = tokio::time::Instant::now() + config.deadline();

        let handles: Vec<_> = self
            .predictors
            .iter()
            .map(|predictor| {
                let id = predictor.id().to_string();
                let predictor = Arc::clone(predictor);
                let features = Arc::clone(&features);
                let handle = tokio::spawn(async move {
                    let call_started = std::time::Instant::now();
                    let result = predictor.predict(&features).await;
                    (result, elapsed_us(call_started))
                });
                (id, handle)
            })
            .collect();

        let mut predictions = Vec::with_capacity(handles.len());
        for (id, mut handle) in handles {
            let prediction = match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok((Ok(output), latency))) => {
                    ModelPrediction::succeeded(id, output.score, output.confidence, latency)
                }
                Ok(Ok((Err(e), latency))) => {
                    debug!("Predictor {} failed: {}", id, e);
                    ModelPrediction::failed(id, PredictionFailure::Error(e.to_string()), latency)
                }
                Ok(Err(join_error)) => ModelPrediction::failed(
                    id,
                    PredictionFailure::Error(format!("predictor task failed: {}", join_error)),
                    elapsed_us(started),
                ),
                Err(_) => {
                    handle.abort();
                    debug!("Predictor {} missed the {:?} deadline", id, config.deadline());
                    ModelPrediction::failed(id, PredictionFailure::Timeout, elapsed_us(started))
                }
            };
            predictions.push(prediction);
        }
        predictions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FixedPredictor;
    use std::time::Duration;
    use torq_config::EngineConfig;
    use types::FEATURE_COUNT;

    fn store(ids: &[&str]) -> Arc<ParameterStore> {
        let ids: Vec<String> = ids.iter().map(|s| s.to_string()).collect();
        Arc::new(ParameterStore::new(&ids, &EngineConfig::default()))
    }

    fn input_parts() -> (InstrumentId, FeatureVector, MarketStats) {
        (
            InstrumentId::new("ES").unwrap(),
            FeatureVector::sanitized([0.0; FEATURE_COUNT], false, 1.0),
            MarketStats {
                momentum: 0.01,
                ..MarketStats::default()
            },
        )
    }

    async fn run(ensemble: &Ensemble, config: &EnsembleConfig) -> EnsembleDecision {
        let (instrument, features, stats) = input_parts();
        ensemble
            .decide(
                DecisionInput {
                    instrument: &instrument,
                    features: &features,
                    stats: &stats,
                    reference_price: Decimal::new(4500, 0),
                    timestamp: Utc::now(),
                },
                config,
            )
            .await
    }

    #[test]
    fn test_aggregate_renormalizes_survivors() {
        let weights = WeightTable::uniform(["a", "b", "c", "d"]);
        let mut predictions = vec![
            ModelPrediction::succeeded("a", DirectionalScore::favouring(Direction::Long, 0.8), 0.8, 10),
            ModelPrediction::succeeded("b", DirectionalScore::favouring(Direction::Long, 0.6), 0.6, 10),
            ModelPrediction::failed("c", PredictionFailure::Timeout, 10),
            ModelPrediction::failed("d", PredictionFailure::Error("boom".into()), 10),
        ];
        let aggregate = aggregate(&mut predictions, &weights).unwrap();
        assert_eq!(aggregate.direction, Direction::Long);
        assert_eq!(aggregate.survivors, 2);
        assert!((aggregate.confidence - 0.7).abs() < 1e-12);
        assert!((aggregate.strength - 0.4).abs() < 1e-12);
        let total: f64 = predictions.iter().map(|p| p.weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(predictions[2].weight, 0.0);
    }

    #[test]
    fn test_tie_is_hold() {
        let weights = WeightTable::uniform(["a", "b"]);
        let mut predictions = vec![
            ModelPrediction::succeeded("a", DirectionalScore::favouring(Direction::Long, 0.7), 0.7, 1),
            ModelPrediction::succeeded("b", DirectionalScore::favouring(Direction::Short, 0.7), 0.7, 1),
        ];
        assert_eq!(aggregate(&mut predictions, &weights).unwrap().direction, Direction::Hold);
    }

    #[tokio::test]
    async fn test_timeout_excluded_and_tagged_degraded() {
        let ensemble = Ensemble::new(
            vec![
                Arc::new(FixedPredictor::new("fast", Direction::Long, 0.9)),
                Arc::new(FixedPredictor::new("slow", Direction::Short, 0.9).with_delay(Duration::from_secs(5))),
            ],
            store(&["fast", "slow"]),
        );
        let config = EnsembleConfig {
            deadline_ms: 30,
            ..EnsembleConfig::default()
        };
        let decision = run(&ensemble, &config).await;
        assert!(decision.degraded);
        assert!(!decision.fallback);
        assert_eq!(decision.direction, Direction::Long);
        assert_eq!(decision.predictions[1].failure, Some(PredictionFailure::Timeout));
        assert_eq!(decision.predictions[0].weight, 1.0);
    }

    #[tokio::test]
    async fn test_all_failed_uses_momentum_fallback() {
        let ensemble = Ensemble::new(
            vec![Arc::new(FixedPredictor::failing("broken", "no model"))],
            store(&["broken"]),
        );
        let decision = run(&ensemble, &EnsembleConfig::default()).await;
        assert!(decision.fallback);
        assert!(decision.degraded);
        assert!(decision.confidence <= 0.5);
        // Fallback confidence stays under the weak tier
        assert_eq!(decision.direction, Direction::Hold);
    }

    #[tokio::test]
    async fn test_cold_start_penalizes_confidence() {
        let ensemble = Ensemble::new(
            vec![Arc::new(FixedPredictor::new("a", Direction::Long, 0.9))],
            store(&["a"]),
        );
        let instrument = InstrumentId::new("ES").unwrap();
        let features = FeatureVector::sanitized([0.0; FEATURE_COUNT], true, 1.0);
        let decision = ensemble
            .decide(
                DecisionInput {
                    instrument: &instrument,
                    features: &features,
                    stats: &MarketStats::default(),
                    reference_price: Decimal::new(4500, 0),
                    timestamp: Utc::now(),
                },
                &EnsembleConfig::default(),
            )
            .await;
        assert!(decision.cold_start);
        assert!((decision.confidence - 0.45).abs() < 1e-12);
        assert_eq!(decision.tier, RecommendationTier::Hold);
    }

    #[test]
    fn test_tiers() {
        let config = EnsembleConfig::default();
        assert_eq!(tier_for(0.8, 0.5, &config), RecommendationTier::Strong);
        assert_eq!(tier_for(0.8, 0.1, &config), RecommendationTier::Weak);
        assert_eq!(tier_for(0.5, 0.9, &config), RecommendationTier::Hold);
    }
}
