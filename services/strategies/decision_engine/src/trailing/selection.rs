//! Algorithm selection from regime and learned statistics

use types::{Regime, TrailingAlgorithmId};

use crate::params::TrailingStats;

/// Candidate order per regime, best prior first
pub fn prior_order(regime: Regime) -> [TrailingAlgorithmId; 3] {
    use TrailingAlgorithmId::*;
    match regime {
        Regime::Trending => [Chandelier, VolatilityAdaptive, SupportResistance],
        Regime::Volatile => [VolatilityAdaptive, Chandelier, SupportResistance],
        Regime::Ranging => [SupportResistance, VolatilityAdaptive, Chandelier],
    }
}

/// Pick the algorithm for `regime`
///
/// Candidates with at least `min_samples` closed trades are scored by their
/// mean R-multiple, the rest score zero. Ties go to the better prior rank.
pub fn select(regime: Regime, stats: &TrailingStats, min_samples: u32) -> TrailingAlgorithmId {
    let order = prior_order(regime);
    let mut best = order[0];
    let mut best_score = f64::NEG_INFINITY;
    for algorithm in order {
        let record = stats.get(regime, algorithm);
        let score = if record.samples >= min_samples && record.mean_r.is_finite() {
            record.mean_r
        } else {
            0.0
        };
        if score > best_score {
            best = algorithm;
            best_score = score;
        }
    }
    best
}
