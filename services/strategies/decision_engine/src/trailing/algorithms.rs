//! Stop-placement algorithms
//!
//! Each algorithm proposes a raw stop in `f64` price space together with its
//! confidence in that placement. Capping, rounding and the protective-only
//! rule are applied by the engine, never here.

use torq_config::TrailingConfig;
use types::{Direction, Regime, TrailingAlgorithmId};

use crate::features::MarketStats;

/// Inputs shared by every algorithm
#[derive(Debug, Clone, Copy)]
pub struct TrailContext<'a> {
    pub side: Direction,
    pub last_price: f64,
    pub entry_price: f64,
    /// Best price since entry
    pub extreme_price: f64,
    pub current_stop: Option<f64>,
    pub stats: &'a MarketStats,
    pub regime: Regime,
}

impl TrailContext<'_> {
    /// +1 for longs, -1 for shorts
    fn sign(&self) -> f64 {
        self.side.sign() as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StopProposal {
    pub stop: f64,
    pub confidence: f64,
}

pub trait TrailingAlgorithm: Send + Sync {
    fn id(&self) -> TrailingAlgorithmId;

    /// `None` when the algorithm has nothing to say for this context
    fn propose(&self, ctx: &TrailContext<'_>) -> Option<StopProposal>;
}

fn usable(ctx: &TrailContext<'_>) -> bool {
    ctx.stats.atr > 0.0 && ctx.stats.atr.is_finite() && ctx.side != Direction::Hold
}

/// ATR multiple behind the last price; wider in volatile markets
pub struct VolatilityAdaptive {
    trending_multiple: f64,
    volatile_multiple: f64,
}

impl VolatilityAdaptive {
    pub fn new(config: &TrailingConfig) -> Self {
        Self {
            trending_multiple: config.atr_multiple_trending,
            volatile_multiple: config.atr_multiple_volatile,
        }
    }
}

impl TrailingAlgorithm for VolatilityAdaptive {
    fn id(&self) -> TrailingAlgorithmId {
        TrailingAlgorithmId::VolatilityAdaptive
    }

    fn propose(&self, ctx: &TrailContext<'_>) -> Option<StopProposal> {
        if !usable(ctx) {
            return None;
        }
        let multiple = match ctx.regime {
            Regime::Volatile => self.volatile_multiple,
            Regime::Trending | Regime::Ranging => self.trending_multiple,
        };
        Some(StopProposal {
            stop: ctx.last_price - ctx.sign() * ctx.stats.atr * multiple,
            confidence: 0.55 + 0.4 * ctx.stats.efficiency_abs().min(1.0),
        })
    }
}

/// ATR multiple behind the best price since entry
pub struct Chandelier {
    multiple: f64,
}

impl Chandelier {
    pub fn new(config: &TrailingConfig) -> Self {
        Self {
            multiple: config.chandelier_multiple,
        }
    }
}

impl TrailingAlgorithm for Chandelier {
    fn id(&self) -> TrailingAlgorithmId {
        TrailingAlgorithmId::Chandelier
    }

    fn propose(&self, ctx: &TrailContext<'_>) -> Option<StopProposal> {
        if !usable(ctx) {
            return None;
        }
        Some(StopProposal {
            stop: ctx.extreme_price - ctx.sign() * ctx.stats.atr * self.multiple,
            confidence: 0.5 + 0.5 * ctx.stats.persistence.abs().min(1.0),
        })
    }
}

/// Just beyond the recent swing low (longs) or swing high (shorts)
pub struct SupportResistance {
    buffer_atr: f64,
}

impl SupportResistance {
    pub fn new(config: &TrailingConfig) -> Self {
        Self {
            buffer_atr: config.support_buffer_atr,
        }
    }
}

impl TrailingAlgorithm for SupportResistance {
    fn id(&self) -> TrailingAlgorithmId {
        TrailingAlgorithmId::SupportResistance
    }

    fn propose(&self, ctx: &TrailContext<'_>) -> Option<StopProposal> {
        if !usable(ctx) {
            return None;
        }
        let buffer = self.buffer_atr * ctx.stats.atr;
        let stop = match ctx.side {
            Direction::Long => ctx.stats.recent_low - buffer,
            Direction::Short => ctx.stats.recent_high + buffer,
            Direction::Hold => return None,
        };
        // Ranging markets respect swing levels best
        Some(StopProposal {
            stop,
            confidence: 0.5 + 0.5 * (1.0 - ctx.stats.efficiency_abs().min(1.0)),
        })
    }
}

pub fn standard_algorithms(config: &TrailingConfig) -> Vec<Box<dyn TrailingAlgorithm>> {
    vec![
        Box::new(VolatilityAdaptive::new(config)),
        Box::new(Chandelier::new(config)),
        Box::new(SupportResistance::new(config)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats() -> MarketStats {
        MarketStats {
            samples: 30,
            last_price: 4520.0,
            atr: 4.0,
            volatility: 3.0,
            volatility_ratio: 1.0,
            efficiency: 0.5,
            persistence: 0.6,
            recent_high: 4522.0,
            recent_low: 4505.0,
            momentum: 0.002,
        }
    }

    fn ctx(side: Direction, stats: &MarketStats) -> TrailContext<'_> {
        TrailContext {
            side,
            last_price: stats.last_price,
            entry_price: 4500.0,
            extreme_price: if side == Direction::Long { 4525.0 } else { 4495.0 },
            current_stop: None,
            stats,
            regime: Regime::Trending,
        }
    }

    #[test]
    fn test_long_proposals_sit_below_price() {
        let config = TrailingConfig::default();
        let stats = stats();
        let ctx = ctx(Direction::Long, &stats);
        for algorithm in standard_algorithms(&config) {
            let proposal = algorithm.propose(&ctx).unwrap();
            assert!(proposal.stop < ctx.last_price, "{}", algorithm.id());
            assert!((0.0..=1.0).contains(&proposal.confidence));
        }

        let chandelier = Chandelier::new(&config).propose(&ctx).unwrap();
        assert!((chandelier.stop - (4525.0 - 12.0)).abs() < 1e-9);
        let swing = SupportResistance::new(&config).propose(&ctx).unwrap();
        assert!((swing.stop - 4504.0).abs() < 1e-9);
    }

    #[test]
    fn test_short_proposals_sit_above_levels() {
        let config = TrailingConfig::default();
        let mut stats = stats();
        stats.last_price = 4490.0;
        let ctx = ctx(Direction::Short, &stats);
        let adaptive = VolatilityAdaptive::new(&config).propose(&ctx).unwrap();
        assert!((adaptive.stop - 4498.0).abs() < 1e-9);
        let swing = SupportResistance::new(&config).propose(&ctx).unwrap();
        assert!((swing.stop - 4523.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_proposal_without_volatility() {
        let config = TrailingConfig::default();
        let mut stats = stats();
        stats.atr = 0.0;
        let ctx = ctx(Direction::Long, &stats);
        assert!(standard_algorithms(&config).iter().all(|a| a.propose(&ctx).is_none()));
    }
}
