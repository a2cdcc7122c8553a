//! Window indicators over price series
//!
//! All functions are pure over the slice they are given and return `0.0` (or
//! a neutral value) when the slice is too short, never NaN.

/// Last `n` elements, or the whole slice when shorter
pub fn tail(values: &[f64], n: usize) -> &[f64] {
    &values[values.len().saturating_sub(n)..]
}

pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        return 0.0;
    }
    let m = mean(values);
    let variance = values.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / values.len() as f64;
    variance.sqrt()
}

/// Simple moving average of the last `period` prices
pub fn sma(prices: &[f64], period: usize) -> f64 {
    mean(tail(prices, period.max(1)))
}

/// Fractional return over `lag` steps, clamped to the available history
pub fn lagged_return(prices: &[f64], lag: usize) -> f64 {
    if prices.len() < 2 || lag == 0 {
        return 0.0;
    }
    let lag = lag.min(prices.len() - 1);
    let current = prices[prices.len() - 1];
    let past = prices[prices.len() - 1 - lag];
    if past.abs() <= f64::EPSILON {
        return 0.0;
    }
    current / past - 1.0
}

/// One-step fractional returns over the last `period` steps
pub fn step_returns(prices: &[f64], period: usize) -> Vec<f64> {
    let window = tail(prices, period + 1);
    window
        .windows(2)
        .filter(|w| w[0].abs() > f64::EPSILON)
        .map(|w| w[1] / w[0] - 1.0)
        .collect()
}

/// Absolute one-step price changes over the last `period` steps
pub fn price_changes(prices: &[f64], period: usize) -> Vec<f64> {
    tail(prices, period + 1)
        .windows(2)
        .map(|w| w[1] - w[0])
        .collect()
}

/// Relative strength index in [0, 100]; 50 when undetermined
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    let changes = price_changes(prices, period);
    if changes.is_empty() {
        return 50.0;
    }
    let gains: f64 = changes.iter().filter(|c| **c > 0.0).sum();
    let losses: f64 = -changes.iter().filter(|c| **c < 0.0).sum::<f64>();
    if gains + losses <= f64::EPSILON {
        return 50.0;
    }
    100.0 * gains / (gains + losses)
}

/// Average true range; each step's range is its absolute price change
pub fn atr(prices: &[f64], period: usize) -> f64 {
    let changes = price_changes(prices, period);
    mean(&changes.iter().map(|c| c.abs()).collect::<Vec<_>>())
}

/// Signed Kaufman efficiency ratio in [-1, 1]
pub fn efficiency_ratio(prices: &[f64], period: usize) -> f64 {
    let window = tail(prices, period + 1);
    if window.len() < 2 {
        return 0.0;
    }
    let net = window[window.len() - 1] - window[0];
    let path: f64 = window.windows(2).map(|w| (w[1] - w[0]).abs()).sum();
    if path <= f64::EPSILON {
        return 0.0;
    }
    (net / path).clamp(-1.0, 1.0)
}

/// Net share of up-moves minus down-moves in [-1, 1]
pub fn persistence(prices: &[f64], period: usize) -> f64 {
    let changes = price_changes(prices, period);
    if changes.is_empty() {
        return 0.0;
    }
    let ups = changes.iter().filter(|c| **c > 0.0).count() as f64;
    let downs = changes.iter().filter(|c| **c < 0.0).count() as f64;
    (ups - downs) / changes.len() as f64
}

pub fn zscore(prices: &[f64], period: usize) -> f64 {
    let window = tail(prices, period);
    let sd = std_dev(window);
    match window.last() {
        Some(last) if sd > f64::EPSILON => (last - mean(window)) / sd,
        _ => 0.0,
    }
}

/// Position of the last price within the window's range, 0.5 when flat
pub fn range_position(prices: &[f64], period: usize) -> f64 {
    let window = tail(prices, period);
    let (low, high) = min_max(window);
    match window.last() {
        Some(last) if high - low > f64::EPSILON => ((last - low) / (high - low)).clamp(0.0, 1.0),
        _ => 0.5,
    }
}

pub fn min_max(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(*v), hi.max(*v)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_input_is_neutral() {
        assert_eq!(lagged_return(&[100.0], 5), 0.0);
        assert_eq!(rsi(&[], 14), 50.0);
        assert_eq!(atr(&[100.0], 14), 0.0);
        assert_eq!(zscore(&[1.0], 20), 0.0);
        assert_eq!(range_position(&[5.0, 5.0], 20), 0.5);
    }

    #[test]
    fn test_trend_indicators() {
        let rising: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        assert_eq!(rsi(&rising, 14), 100.0);
        assert!((efficiency_ratio(&rising, 20) - 1.0).abs() < 1e-12);
        assert!((persistence(&rising, 20) - 1.0).abs() < 1e-12);
        assert!((atr(&rising, 14) - 1.0).abs() < 1e-12);
        assert_eq!(range_position(&rising, 20), 1.0);
        assert!(lagged_return(&rising, 5) > 0.0);
    }

    #[test]
    fn test_choppy_efficiency_is_low() {
        let choppy: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 100.0 } else { 101.0 }).collect();
        assert!(efficiency_ratio(&choppy, 20).abs() <= 0.05);
        assert!(persistence(&choppy, 20).abs() <= 0.05);
    }
}
