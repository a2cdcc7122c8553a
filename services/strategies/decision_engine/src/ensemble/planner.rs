//! Entry, stop and target placement for directional decisions

use crate::features::MarketStats;
use rust_decimal::Decimal;
use torq_config::PlannerConfig;
use types::precision::from_f64;
use types::{Direction, TradePlan};

#[derive(Debug, Clone)]
pub struct TradePlanner {
    config: PlannerConfig,
}

impl TradePlanner {
    pub fn new(config: PlannerConfig) -> Self {
        Self { config }
    }

    /// Smallest price increment at the configured precision
    pub fn tick(&self) -> Decimal {
        Decimal::new(1, self.config.price_decimals)
    }

    /// Plan a trade at `price`; `None` for hold or an unusable price
    ///
    /// Stop distance is `max(ATR × multiple, price × min fraction)` and never
    /// less than one tick. Targets sit at the configured reward multiples of
    /// that distance.
    pub fn plan(&self, direction: Direction, price: Decimal, stats: &MarketStats) -> Option<TradePlan> {
        let sign = Decimal::from(direction.sign());
        if sign.is_zero() || price <= Decimal::ZERO {
            return None;
        }
        let decimals = self.config.price_decimals;
        let price_f = types::precision::to_f64(price);

        let raw_distance = (stats.atr * self.config.stop_atr_multiple)
            .max(price_f * self.config.min_stop_fraction);
        let distance = from_f64(raw_distance, decimals)?.max(self.tick());

        let target_rr = from_f64(self.config.target_rr, 4)?;
        let second_rr = from_f64(self.config.second_target_rr, 4)?;

        let stop = price - sign * distance;
        if stop <= Decimal::ZERO {
            return None;
        }
        let target = (price + sign * distance * target_rr).round_dp(decimals);
        let second_target = (second_rr > target_rr)
            .then(|| (price + sign * distance * second_rr).round_dp(decimals))
            .filter(|t| *t > Decimal::ZERO);

        Some(TradePlan {
            entry: price,
            stop,
            target,
            second_target,
            quantity: self.config.default_quantity,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn stats(atr: f64) -> MarketStats {
        MarketStats {
            atr,
            last_price: 4500.0,
            ..MarketStats::default()
        }
    }

    #[test]
    fn test_long_plan_uses_atr_distance() {
        let planner = TradePlanner::new(PlannerConfig::default());
        let plan = planner.plan(Direction::Long, dec!(4500), &stats(5.0)).unwrap();
        assert_eq!(plan.stop, dec!(4490));
        assert_eq!(plan.target, dec!(4520));
        assert_eq!(plan.second_target, Some(dec!(4530)));
        assert_eq!(plan.risk_reward(Direction::Long), Some(dec!(2)));
    }

    #[test]
    fn test_short_plan_mirrors_long() {
        let planner = TradePlanner::new(PlannerConfig::default());
        let plan = planner.plan(Direction::Short, dec!(4500), &stats(5.0)).unwrap();
        assert_eq!(plan.stop, dec!(4510));
        assert_eq!(plan.target, dec!(4480));
        assert_eq!(plan.risk_reward(Direction::Short), Some(dec!(2)));
    }

    #[test]
    fn test_minimum_fraction_applies_without_volatility() {
        let planner = TradePlanner::new(PlannerConfig::default());
        let plan = planner.plan(Direction::Long, dec!(4500), &stats(0.0)).unwrap();
        // 0.1% of 4500
        assert_eq!(plan.stop, dec!(4495.50));
    }

    #[test]
    fn test_hold_has_no_plan() {
        let planner = TradePlanner::new(PlannerConfig::default());
        assert!(planner.plan(Direction::Hold, dec!(4500), &stats(5.0)).is_none());
        assert!(planner.plan(Direction::Long, dec!(0), &stats(5.0)).is_none());
    }
}
