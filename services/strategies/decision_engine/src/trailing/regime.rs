//! Market regime classification

use torq_config::TrailingConfig;
use types::Regime;

use crate::features::MarketStats;

/// Volatile wins over trending: a volatility burst invalidates trend distances
pub fn classify(stats: &MarketStats, config: &TrailingConfig) -> Regime {
    if stats.volatility_ratio >= config.volatile_ratio {
        Regime::Volatile
    } else if stats.efficiency_abs() >= config.trend_efficiency {
        Regime::Trending
    } else {
        Regime::Ranging
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stats(volatility_ratio: f64, efficiency: f64) -> MarketStats {
        MarketStats {
            volatility_ratio,
            efficiency,
            ..MarketStats::default()
        }
    }

    #[test]
    fn test_classify() {
        let config = TrailingConfig::default();
        assert_eq!(classify(&stats(2.0, 0.9), &config), Regime::Volatile);
        assert_eq!(classify(&stats(1.0, 0.6), &config), Regime::Trending);
        assert_eq!(classify(&stats(1.0, -0.6), &config), Regime::Trending);
        assert_eq!(classify(&stats(1.0, 0.1), &config), Regime::Ranging);
        assert_eq!(classify(&stats(config.volatile_ratio, 0.0), &config), Regime::Volatile);
    }
}
