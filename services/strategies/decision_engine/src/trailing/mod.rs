//! # Smart Trailing Engine
//!
//! Moves the protective stop of an open position on a fixed cadence:
//!
//! 1. Classify the market regime from recent volatility and efficiency
//! 2. Select an algorithm from the regime and learned per-algorithm statistics
//! 3. Ask the algorithm for a stop proposal with confidence
//! 4. Accept only a confident proposal that is strictly more protective
//! 5. Cap the move at a fraction of recent volatility
//!
//! Accepted stops are rounded away from the market (longs down, shorts up) to
//! the instrument precision and must still be more protective after rounding.

pub mod algorithms;
pub mod regime;
pub mod selection;
pub mod supervisor;

pub use algorithms::{standard_algorithms, StopProposal, TrailContext, TrailingAlgorithm};
pub use regime::classify;
pub use selection::{prior_order, select};
pub use supervisor::TrailingSupervisor;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use torq_config::TrailingConfig;
use types::precision::to_f64;
use types::{Direction, Position, PositionPhase, Regime, TrailingAlgorithmId, TrailingState};

use crate::features::MarketStats;
use crate::params::{SharedTable, TrailingStats};

#[derive(Debug, Clone, PartialEq)]
pub enum TrailDecision {
    Move {
        stop: Decimal,
        confidence: f64,
        regime: Regime,
        algorithm: TrailingAlgorithmId,
    },
    Hold {
        reason: String,
    },
}

impl TrailDecision {
    fn hold(reason: impl Into<String>) -> Self {
        TrailDecision::Hold {
            reason: reason.into(),
        }
    }
}

pub struct TrailingEngine {
    config: TrailingConfig,
    price_decimals: u32,
    algorithms: Vec<Box<dyn TrailingAlgorithm>>,
    stats: Arc<SharedTable<TrailingStats>>,
}

impl TrailingEngine {
    pub fn new(config: TrailingConfig, price_decimals: u32, stats: Arc<SharedTable<TrailingStats>>) -> Self {
        let algorithms = standard_algorithms(&config);
        Self {
            config,
            price_decimals,
            algorithms,
            stats,
        }
    }

    pub fn config(&self) -> &TrailingConfig {
        &self.config
    }

    /// Run one evaluation, updating the regime, algorithm, extreme price and
    /// evaluation count in `state`
    pub fn evaluate(
        &self,
        position: &Position,
        state: &mut TrailingState,
        stats: &MarketStats,
    ) -> TrailDecision {
        state.evaluations += 1;

        if position.phase != PositionPhase::Open || position.lifecycle_id != state.lifecycle_id {
            return TrailDecision::hold("position not open");
        }
        let side = position.side();
        let last_price = stats.last_price;
        if side == Direction::Hold || !(last_price > 0.0) {
            return TrailDecision::hold("no price");
        }

        state.extreme_price = match side {
            Direction::Long => state.extreme_price.max(last_price),
            _ => state.extreme_price.min(last_price),
        };

        let regime = classify(stats, &self.config);
        let algorithm_id = select(regime, &self.stats.load().value, self.config.min_samples);
        state.regime = regime;
        state.algorithm = algorithm_id;

        let Some(algorithm) = self.algorithms.iter().find(|a| a.id() == algorithm_id) else {
            return TrailDecision::hold(format!("{} unavailable", algorithm_id));
        };

        let current_stop = position.stop_price.map(to_f64);
        let ctx = TrailContext {
            side,
            last_price,
            entry_price: to_f64(position.average_entry_price),
            extreme_price: state.extreme_price,
            current_stop,
            stats,
            regime,
        };
        let Some(proposal) = algorithm.propose(&ctx) else {
            return TrailDecision::hold(format!("{} had no proposal", algorithm_id));
        };
        if proposal.confidence < self.config.min_confidence {
            return TrailDecision::hold(format!(
                "confidence {:.2} below {:.2}",
                proposal.confidence, self.config.min_confidence
            ));
        }

        let mut stop = proposal.stop;
        if let Some(current) = current_stop {
            let max_move = stats.atr * self.config.max_move_volatility_fraction;
            stop = match side {
                Direction::Long => stop.min(current + max_move),
                _ => stop.max(current - max_move),
            };
        }

        let wrong_side = match side {
            Direction::Long => stop >= last_price,
            _ => stop <= last_price,
        };
        if wrong_side {
            return TrailDecision::hold("proposal through the market");
        }

        let Some(stop) = self.round_away_from_market(stop, side) else {
            return TrailDecision::hold("stop not representable");
        };
        if !position.is_more_protective(stop) {
            return TrailDecision::hold("not more protective");
        }

        TrailDecision::Move {
            stop,
            confidence: proposal.confidence,
            regime,
            algorithm: algorithm_id,
        }
    }

    /// Book an update the tracker accepted
    pub fn record_accepted(&self, state: &mut TrailingState, stop: Decimal, confidence: f64) {
        state.last_stop = Some(stop);
        state.confidence = confidence;
        state.updates += 1;
    }

    fn round_away_from_market(&self, stop: f64, side: Direction) -> Option<Decimal> {
        if !stop.is_finite() || stop <= 0.0 {
            return None;
        }
        let strategy = match side {
            Direction::Long => RoundingStrategy::ToNegativeInfinity,
            _ => RoundingStrategy::ToPositiveInfinity,
        };
        Decimal::from_f64(stop).map(|d| d.round_dp_with_strategy(self.price_decimals, strategy))
    }
}
