//! # Online Learning Feedback Loop
//!
//! Consumes closed-trade outcomes and adjusts, in this order:
//!
//! 1. Session risk counters (the only writer of [`RiskState`])
//! 2. Ensemble weights, by smoothed per-predictor reward
//! 3. The minimum-confidence threshold, by win/loss streak
//! 4. Per-regime trailing algorithm statistics
//!
//! Every table change is a whole-table swap through [`SharedTable::update`],
//! so a decision in progress keeps the table it started with.
//!
//! ## Phases
//!
//! | Phase       | Entered at              | Rate scale | Threshold relaxation |
//! |-------------|-------------------------|------------|----------------------|
//! | Warmup      | start                   | 0.5        | no                   |
//! | Calibrating | `warmup_trades` trades  | 1.0        | yes                  |
//! | Mature      | `mature_trades` trades  | 0.5        | yes                  |

use chrono::{DateTime, Utc};
use network::Clock;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use torq_config::LearningConfig;
use types::{Direction, EnsembleDecision, RiskState, TradeOutcome};

use crate::log_learning;
use crate::params::{ParameterStore, Thresholds, WeightTable};
use crate::persistence::{PersistRecord, PersistenceHandle};
use crate::risk::RiskLedger;

const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LearningPhase {
    Warmup,
    Calibrating,
    Mature,
}

impl LearningPhase {
    pub fn for_trades(total_trades: u64, config: &LearningConfig) -> Self {
        if total_trades >= config.mature_trades {
            LearningPhase::Mature
        } else if total_trades >= config.warmup_trades {
            LearningPhase::Calibrating
        } else {
            LearningPhase::Warmup
        }
    }

    /// Fraction of the configured learning rate applied in this phase
    pub fn rate_scale(self) -> f64 {
        match self {
            LearningPhase::Warmup => 0.25,
            LearningPhase::Calibrating => 0.5,
            LearningPhase::Mature => 1.0,
        }
    }

    pub fn allows_relaxation(self) -> bool {
        self != LearningPhase::Warmup
    }
}

/// What one outcome changed
#[derive(Debug, Clone, PartialEq)]
pub struct LearningReport {
    pub phase: LearningPhase,
    pub weights_version: u64,
    pub min_confidence: f64,
    pub threshold_changed: bool,
    pub risk: RiskState,
}

pub struct FeedbackLoop {
    config: LearningConfig,
    params: Arc<ParameterStore>,
    risk: Arc<RiskLedger>,
    persistence: PersistenceHandle,
    threshold_floor: f64,
    threshold_ceiling: f64,
    smoothed_rewards: Mutex<HashMap<String, f64>>,
    total_trades: AtomicU64,
    phase: Mutex<LearningPhase>,
}

impl FeedbackLoop {
    pub fn new(
        config: LearningConfig,
        params: Arc<ParameterStore>,
        risk: Arc<RiskLedger>,
        persistence: PersistenceHandle,
    ) -> Self {
        let threshold_floor = config.threshold_floor.min(config.threshold_ceiling);
        let threshold_ceiling = config.threshold_ceiling.max(threshold_floor);
        let phase = LearningPhase::for_trades(0, &config);
        Self {
            config,
            params,
            risk,
            persistence,
            threshold_floor,
            threshold_ceiling,
            smoothed_rewards: Mutex::new(HashMap::new()),
            total_trades: AtomicU64::new(0),
            phase: Mutex::new(phase),
        }
    }

    pub fn phase(&self) -> LearningPhase {
        *self.phase.lock()
    }

    pub fn total_trades(&self) -> u64 {
        self.total_trades.load(Ordering::Relaxed)
    }

    pub fn handle(&self, outcome: &TradeOutcome, now: DateTime<Utc>) -> LearningReport {
        let risk = self.risk.record(outcome, now);
        let phase = self.advance_phase();

        let weights_version = match &outcome.decision {
            Some(decision) => self.update_weights(decision, outcome, phase),
            None => self.params.weights.version(),
        };
        let (min_confidence, threshold_changed) = self.update_threshold(&risk, phase);

        if let (Some(regime), Some(algorithm)) = (outcome.regime, outcome.trailing_algorithm) {
            let r_multiple = outcome.r_multiple();
            self.params.trailing.update(|stats| {
                let mut stats = stats.clone();
                stats.record(regime, algorithm, r_multiple);
                stats
            });
        }

        self.persistence
            .record(PersistRecord::Outcome(Box::new(outcome.clone())));

        log_learning!(
            "{} lifecycle {} closed {} ({:?}); streak L{}/W{}, min confidence {:.3}, weights v{}",
            outcome.instrument,
            outcome.lifecycle_id,
            outcome.realized_pnl,
            outcome.exit_reason,
            risk.consecutive_losses,
            risk.consecutive_wins,
            min_confidence,
            weights_version
        );

        LearningReport {
            phase,
            weights_version,
            min_confidence,
            threshold_changed,
            risk,
        }
    }

    fn advance_phase(&self) -> LearningPhase {
        let total = self.total_trades.fetch_add(1, Ordering::Relaxed) + 1;
        let next = LearningPhase::for_trades(total, &self.config);
        let mut phase = self.phase.lock();
        if *phase != next {
            log_learning!("Learning phase {:?} → {:?} after {} trades", *phase, next, total);
            *phase = next;
        }
        next
    }

    /// Reward each surviving predictor for agreeing with a win or dissenting
    /// from a loss, then take one bounded multiplicative step
    fn update_weights(&self, decision: &EnsembleDecision, outcome: &TradeOutcome, phase: LearningPhase) -> u64 {
        let result = if outcome.is_win() {
            1.0
        } else if outcome.is_loss() {
            -1.0
        } else {
            0.0
        };
        let alpha = self.config.reward_smoothing.clamp(0.0, 1.0);

        let mut steps: BTreeMap<String, f64> = BTreeMap::new();
        {
            let mut smoothed = self.smoothed_rewards.lock();
            for prediction in decision.surviving_predictions() {
                let agreement = match prediction.score.leaning() {
                    Direction::Hold => 0.0,
                    leaning if leaning == outcome.side => 1.0,
                    _ => -1.0,
                };
                let reward = prediction.confidence * agreement * result;
                let entry = smoothed.entry(prediction.predictor_id.clone()).or_insert(0.0);
                *entry = (1.0 - alpha) * *entry + alpha * reward;

                let step = (self.config.learning_rate * phase.rate_scale() * *entry)
                    .clamp(-self.config.max_weight_step, self.config.max_weight_step);
                steps.insert(prediction.predictor_id.clone(), step);
            }
        }
        if steps.is_empty() {
            return self.params.weights.version();
        }

        let min_weight = self.config.min_weight.max(0.0);
        let published = self.params.weights.update(|current| {
            let raw = current
                .iter()
                .map(|(id, weight)| {
                    let step = steps.get(id).copied().unwrap_or(0.0);
                    (id.clone(), (weight * (1.0 + step)).max(min_weight))
                })
                .collect();
            WeightTable::from_raw(raw)
        });
        self.persistence
            .record(PersistRecord::Weights((*published).clone()));
        published.version
    }

    fn update_threshold(&self, risk: &RiskState, phase: LearningPhase) -> (f64, bool) {
        let current = self.params.thresholds.load().value.min_confidence;
        let step = self.config.threshold_step;
        let next = if risk.consecutive_losses >= self.config.loss_streak_trigger {
            (current + step).min(self.threshold_ceiling)
        } else if risk.consecutive_wins >= self.config.win_streak_trigger && phase.allows_relaxation() {
            (current - step).max(self.threshold_floor)
        } else {
            current
        };

        if (next - current).abs() <= f64::EPSILON {
            return (current, false);
        }
        self.params.thresholds.update(|_| Thresholds { min_confidence: next });
        log_learning!("Minimum confidence {:.3} → {:.3}", current, next);
        (next, true)
    }

    /// Consume outcomes until the channel closes, rolling the session on a timer
    pub fn spawn(
        self: Arc<Self>,
        mut outcomes: mpsc::UnboundedReceiver<TradeOutcome>,
        clock: Arc<dyn Clock>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut session_timer = tokio::time::interval(SESSION_CHECK_INTERVAL);
            session_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    outcome = outcomes.recv() => match outcome {
                        Some(outcome) => {
                            self.handle(&outcome, clock.now());
                        }
                        None => break,
                    },
                    _ = session_timer.tick() => {
                        self.risk.roll_if_needed(clock.now());
                    }
                }
            }
            tracing::info!("Feedback loop stopped after {} trades", self.total_trades());
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use torq_config::{EngineConfig, RiskConfig};
    use types::{
        DirectionalScore, ExitReason, InstrumentId, ModelPrediction, RecommendationTier, Regime,
        TrailingAlgorithmId,
    };

    fn setup(config: LearningConfig) -> (FeedbackLoop, Arc<ParameterStore>) {
        let ids = vec!["momentum".to_string(), "mean_reversion".to_string()];
        let params = Arc::new(ParameterStore::new(&ids, &EngineConfig::default()));
        let risk = Arc::new(RiskLedger::new(&RiskConfig::default(), Utc::now()));
        let feedback = FeedbackLoop::new(config, params.clone(), risk, PersistenceHandle::disabled());
        (feedback, params)
    }

    fn decision() -> EnsembleDecision {
        EnsembleDecision {
            instrument: InstrumentId::new("ES").unwrap(),
            timestamp: Utc::now(),
            direction: Direction::Long,
            confidence: 0.8,
            strength: 0.5,
            tier: RecommendationTier::Strong,
            predictions: vec![
                ModelPrediction::succeeded("momentum", DirectionalScore::favouring(Direction::Long, 0.9), 0.9, 10),
                ModelPrediction::succeeded(
                    "mean_reversion",
                    DirectionalScore::favouring(Direction::Short, 0.7),
                    0.7,
                    12,
                ),
            ],
            degraded: false,
            fallback: false,
            weights_version: 1,
            data_quality: 1.0,
            cold_start: false,
            reference_price: dec!(4500),
            plan: None,
        }
    }

    fn outcome(pnl: Decimal) -> TradeOutcome {
        TradeOutcome {
            instrument: InstrumentId::new("ES").unwrap(),
            lifecycle_id: 1,
            side: Direction::Long,
            quantity: 1,
            entry_price: dec!(4500),
            exit_price: dec!(4500) + pnl,
            realized_pnl: pnl,
            initial_risk: Some(dec!(10)),
            exit_reason: ExitReason::Target,
            opened_at: None,
            closed_at: Utc::now(),
            decision: Some(decision()),
            regime: Some(Regime::Trending),
            trailing_algorithm: Some(TrailingAlgorithmId::Chandelier),
        }
    }

    #[test]
    fn test_win_shifts_weight_to_agreeing_predictor() {
        let config = LearningConfig::default();
        let (feedback, params) = setup(config.clone());
        let before = params.weights.load();

        let report = feedback.handle(&outcome(dec!(20)), Utc::now());
        let after = params.weights.load();

        assert!(report.weights_version > before.version);
        assert!(after.value.get("momentum") > before.value.get("momentum"));
        assert!(after.value.get("mean_reversion") < before.value.get("mean_reversion"));
        assert!((after.value.total() - 1.0).abs() < 1e-9);

        // Bounded: no weight moves by more than the step cap in relative terms
        let ratio = after.value.get("momentum") / before.value.get("momentum");
        assert!(ratio <= (1.0 + config.max_weight_step) / (1.0 - config.max_weight_step) + 1e-9);

        let stats = params.trailing.load();
        assert_eq!(
            stats.value.get(Regime::Trending, TrailingAlgorithmId::Chandelier).samples,
            1
        );
    }

    #[test]
    fn test_loss_streak_raises_threshold_within_ceiling() {
        let config = LearningConfig::default();
        let (feedback, params) = setup(config.clone());
        let start = params.thresholds.load().value.min_confidence;

        let mut last = start;
        for i in 0..4 {
            let report = feedback.handle(&outcome(dec!(-10)), Utc::now());
            assert_eq!(report.risk.consecutive_losses, i + 1);
            assert!(report.min_confidence >= last);
            assert!(report.min_confidence <= config.threshold_ceiling);
            last = report.min_confidence;
        }
        assert!(last > start);
    }

    #[test]
    fn test_no_relaxation_during_warmup() {
        let config = LearningConfig {
            warmup_trades: 5,
            win_streak_trigger: 2,
            ..LearningConfig::default()
        };
        let (feedback, params) = setup(config);
        let start = params.thresholds.load().value.min_confidence;

        for _ in 0..4 {
            let report = feedback.handle(&outcome(dec!(10)), Utc::now());
            assert_eq!(report.phase, LearningPhase::Warmup);
            assert!(!report.threshold_changed);
        }
        let report = feedback.handle(&outcome(dec!(10)), Utc::now());
        assert_eq!(report.phase, LearningPhase::Calibrating);
        assert!(report.threshold_changed);
        assert!(report.min_confidence < start);
    }

    #[test]
    fn test_phase_schedule() {
        let config = LearningConfig::default();
        assert_eq!(LearningPhase::for_trades(0, &config), LearningPhase::Warmup);
        assert_eq!(
            LearningPhase::for_trades(config.warmup_trades, &config),
            LearningPhase::Calibrating
        );
        assert_eq!(
            LearningPhase::for_trades(config.mature_trades, &config),
            LearningPhase::Mature
        );
    }

    #[test]
    fn test_rate_scale_grows_with_experience() {
        let scales = [
            LearningPhase::Warmup.rate_scale(),
            LearningPhase::Calibrating.rate_scale(),
            LearningPhase::Mature.rate_scale(),
        ];
        assert_eq!(scales, [0.25, 0.5, 1.0]);
        assert!(scales.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[test]
    fn test_warmup_steps_are_smaller_than_mature_steps() {
        let moved = |warmup_trades: u64, mature_trades: u64| {
            let config = LearningConfig {
                warmup_trades,
                mature_trades,
                ..LearningConfig::default()
            };
            let (feedback, params) = setup(config);
            let before = params.weights.load().value.get("momentum");
            feedback.handle(&outcome(dec!(20)), Utc::now());
            params.weights.load().value.get("momentum") - before
        };

        let warmup = moved(10, 50);
        let mature = moved(0, 0);
        assert!(warmup > 0.0);
        assert!(mature > warmup, "mature {} should exceed warmup {}", mature, warmup);
    }

    #[test]
    fn test_outcome_without_decision_keeps_weights() {
        let (feedback, params) = setup(LearningConfig::default());
        let before = params.weights.version();
        let mut outcome = outcome(dec!(5));
        outcome.decision = None;
        let report = feedback.handle(&outcome, Utc::now());
        assert_eq!(report.weights_version, before);
        assert_eq!(report.risk.trade_count, 1);
    }
}
