//! Decision engine configuration sections
//!
//! Every field has a serde default so a partial TOML file (or none at all)
//! yields a complete configuration. [`EngineConfig::validate`] runs before a
//! snapshot is ever published.

use anyhow::{bail, Result};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Retry configuration for failed transport operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Base delay between retries in milliseconds
    pub base_delay_ms: u64,
    /// Maximum delay between retries in milliseconds
    pub max_delay_ms: u64,
    /// Whether to use exponential backoff
    pub use_exponential_backoff: bool,
}

impl RetryConfig {
    pub fn new(max_attempts: u32, base_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms,
            max_delay_ms: base_delay_ms.saturating_mul(60),
            use_exponential_backoff: true,
        }
    }

    /// Delay in milliseconds before retry number `attempt` (0-based)
    pub fn calculate_delay(&self, attempt: u32) -> u64 {
        if self.use_exponential_backoff {
            let delay = self
                .base_delay_ms
                .saturating_mul(2_u64.pow(attempt.min(10)));
            delay.min(self.max_delay_ms)
        } else {
            self.base_delay_ms
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3, 100)
    }
}

/// Execution-client connection server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    /// Lines longer than this close the connection
    pub max_line_bytes: usize,
    /// Outbound heartbeat to execution clients, 0 disables
    pub heartbeat_interval_secs: u64,
    pub accept_retry: RetryConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 7600,
            max_line_bytes: 64 * 1024,
            heartbeat_interval_secs: 30,
            accept_retry: RetryConfig {
                max_attempts: 10,
                base_delay_ms: 50,
                max_delay_ms: 5_000,
                use_exponential_backoff: true,
            },
        }
    }
}

/// Monitoring WebSocket server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardSection {
    pub enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub max_connections: usize,
    pub heartbeat_interval_secs: u64,
    /// Broadcast channel depth before slow clients start lagging
    pub broadcast_capacity: usize,
}

impl Default for DashboardSection {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 100,
            heartbeat_interval_secs: 30,
            broadcast_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub window_capacity: usize,
    /// Below this many snapshots vectors are flagged cold-start
    pub min_window: usize,
    pub short_ma: usize,
    pub long_ma: usize,
    pub momentum_period: usize,
    pub rsi_period: usize,
    pub atr_period: usize,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            window_capacity: 200,
            min_window: 30,
            short_ma: 5,
            long_ma: 20,
            momentum_period: 10,
            rsi_period: 14,
            atr_period: 14,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnsembleConfig {
    /// Per-predictor deadline
    pub deadline_ms: u64,
    pub strong_confidence: f64,
    pub strong_strength: f64,
    pub weak_confidence: f64,
    /// Confidence multiplier applied to cold-start vectors
    pub cold_start_penalty: f64,
    /// Minimum spacing between decisions per instrument, 0 evaluates every tick
    pub decision_interval_ms: u64,
    /// Starting weights by predictor id; missing predictors share equally
    pub initial_weights: BTreeMap<String, f64>,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            deadline_ms: 150,
            strong_confidence: 0.75,
            strong_strength: 0.3,
            weak_confidence: 0.55,
            cold_start_penalty: 0.5,
            decision_interval_ms: 0,
            initial_weights: BTreeMap::new(),
        }
    }
}

impl EnsembleConfig {
    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    pub stop_atr_multiple: f64,
    /// Stop distance floor as a fraction of price
    pub min_stop_fraction: f64,
    pub target_rr: f64,
    pub second_target_rr: f64,
    pub default_quantity: u64,
    pub price_decimals: u32,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            stop_atr_multiple: 2.0,
            min_stop_fraction: 0.001,
            target_rr: 2.0,
            second_target_rr: 3.0,
            default_quantity: 1,
            price_decimals: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    /// Starting value of the live minimum-confidence threshold
    pub min_confidence: f64,
    pub min_risk_reward: f64,
    pub max_concurrent_positions: usize,
    pub cooldown_secs: u64,
    pub min_data_quality: f64,
    pub max_daily_loss: Decimal,
    pub max_consecutive_losses: u32,
    /// Gates removed from the chain by name
    pub disabled_gates: Vec<String>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.6,
            min_risk_reward: 1.5,
            max_concurrent_positions: 3,
            cooldown_secs: 300,
            min_data_quality: 0.5,
            max_daily_loss: Decimal::from(1000),
            max_consecutive_losses: 5,
            disabled_gates: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrailingConfig {
    pub enabled: bool,
    pub interval_secs: u64,
    /// Proposals below this confidence are ignored
    pub min_confidence: f64,
    /// Cap on a single stop move as a fraction of recent volatility (ATR)
    pub max_move_volatility_fraction: f64,
    pub trend_efficiency: f64,
    pub volatile_ratio: f64,
    pub lookback: usize,
    pub atr_multiple_trending: f64,
    pub atr_multiple_volatile: f64,
    pub chandelier_multiple: f64,
    pub support_buffer_atr: f64,
    /// Samples an algorithm needs before its statistics outrank the prior order
    pub min_samples: u32,
    /// Time an OPENING slot may see a flat venue before reverting
    pub opening_grace_secs: u64,
}

impl Default for TrailingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: 15,
            min_confidence: 0.5,
            max_move_volatility_fraction: 0.5,
            trend_efficiency: 0.4,
            volatile_ratio: 1.5,
            lookback: 20,
            atr_multiple_trending: 2.0,
            atr_multiple_volatile: 3.0,
            chandelier_multiple: 3.0,
            support_buffer_atr: 0.25,
            min_samples: 5,
            opening_grace_secs: 30,
        }
    }
}

impl TrailingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    pub command_timeout_ms: u64,
    pub sweep_interval_ms: u64,
    pub send_retry: RetryConfig,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            command_timeout_ms: 5_000,
            sweep_interval_ms: 500,
            send_retry: RetryConfig::new(3, 100),
        }
    }
}

impl DispatcherConfig {
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    pub learning_rate: f64,
    /// Largest relative change to one weight in a single update
    pub max_weight_step: f64,
    pub min_weight: f64,
    pub threshold_step: f64,
    pub threshold_floor: f64,
    pub threshold_ceiling: f64,
    pub loss_streak_trigger: u32,
    pub win_streak_trigger: u32,
    /// Trades before leaving warmup
    pub warmup_trades: u64,
    /// Trades before the mature phase
    pub mature_trades: u64,
    /// Exponential smoothing factor for per-predictor rewards
    pub reward_smoothing: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            learning_rate: 0.1,
            max_weight_step: 0.05,
            min_weight: 0.02,
            threshold_step: 0.02,
            threshold_floor: 0.5,
            threshold_ceiling: 0.9,
            loss_streak_trigger: 2,
            win_streak_trigger: 3,
            warmup_trades: 10,
            mature_trades: 50,
            reward_smoothing: 0.2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// UTC hour at which a new trading session starts
    pub session_reset_hour_utc: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            session_reset_hour_utc: 22,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub data_dir: PathBuf,
    pub queue_size: usize,
    /// Snapshots replayed per instrument at startup
    pub bootstrap_snapshots: usize,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: PathBuf::from("./data/decision_engine"),
            queue_size: 10_000,
            bootstrap_snapshots: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Complete decision engine configuration
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub server: ServerConfig,
    pub dashboard: DashboardSection,
    pub features: FeatureConfig,
    pub ensemble: EnsembleConfig,
    pub planner: PlannerConfig,
    pub validator: ValidatorConfig,
    pub trailing: TrailingConfig,
    pub dispatcher: DispatcherConfig,
    pub learning: LearningConfig,
    pub risk: RiskConfig,
    pub persistence: PersistenceConfig,
    pub logging: LoggingConfig,
}

fn unit(name: &str, value: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&value) {
        bail!("{} must be within [0, 1], got {}", name, value);
    }
    Ok(())
}

fn positive(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || value <= 0.0 {
        bail!("{} must be positive, got {}", name, value);
    }
    Ok(())
}

impl EngineConfig {
    /// Reject inconsistent settings before publication
    pub fn validate(&self) -> Result<()> {
        if self.server.max_line_bytes == 0 {
            bail!("server.max_line_bytes must be non-zero");
        }

        let f = &self.features;
        if f.window_capacity == 0 || f.min_window == 0 {
            bail!("features.window_capacity and features.min_window must be non-zero");
        }
        if f.min_window > f.window_capacity {
            bail!(
                "features.min_window ({}) exceeds features.window_capacity ({})",
                f.min_window,
                f.window_capacity
            );
        }
        if f.short_ma == 0 || f.short_ma >= f.long_ma {
            bail!("features.short_ma must be non-zero and below features.long_ma");
        }
        if f.long_ma > f.window_capacity {
            bail!("features.long_ma exceeds features.window_capacity");
        }

        let e = &self.ensemble;
        if e.deadline_ms == 0 {
            bail!("ensemble.deadline_ms must be non-zero");
        }
        unit("ensemble.strong_confidence", e.strong_confidence)?;
        unit("ensemble.weak_confidence", e.weak_confidence)?;
        unit("ensemble.strong_strength", e.strong_strength)?;
        unit("ensemble.cold_start_penalty", e.cold_start_penalty)?;
        if e.weak_confidence > e.strong_confidence {
            bail!("ensemble.weak_confidence exceeds ensemble.strong_confidence");
        }
        for (id, weight) in &e.initial_weights {
            if !weight.is_finite() || *weight < 0.0 {
                bail!("ensemble.initial_weights.{} must be non-negative", id);
            }
        }

        let p = &self.planner;
        positive("planner.stop_atr_multiple", p.stop_atr_multiple)?;
        positive("planner.min_stop_fraction", p.min_stop_fraction)?;
        positive("planner.target_rr", p.target_rr)?;
        if p.second_target_rr < p.target_rr {
            bail!("planner.second_target_rr must not be below planner.target_rr");
        }
        if p.default_quantity == 0 {
            bail!("planner.default_quantity must be non-zero");
        }
        if p.price_decimals > 10 {
            bail!("planner.price_decimals must be at most 10");
        }

        let v = &self.validator;
        unit("validator.min_confidence", v.min_confidence)?;
        unit("validator.min_data_quality", v.min_data_quality)?;
        if v.max_daily_loss <= Decimal::ZERO {
            bail!("validator.max_daily_loss must be positive");
        }

        let t = &self.trailing;
        if t.interval_secs == 0 {
            bail!("trailing.interval_secs must be non-zero");
        }
        unit("trailing.min_confidence", t.min_confidence)?;
        unit("trailing.trend_efficiency", t.trend_efficiency)?;
        positive("trailing.max_move_volatility_fraction", t.max_move_volatility_fraction)?;
        positive("trailing.volatile_ratio", t.volatile_ratio)?;
        positive("trailing.atr_multiple_trending", t.atr_multiple_trending)?;
        positive("trailing.atr_multiple_volatile", t.atr_multiple_volatile)?;
        positive("trailing.chandelier_multiple", t.chandelier_multiple)?;
        if t.lookback < 2 {
            bail!("trailing.lookback must be at least 2");
        }

        if self.dispatcher.command_timeout_ms == 0 {
            bail!("dispatcher.command_timeout_ms must be non-zero");
        }

        let l = &self.learning;
        unit("learning.learning_rate", l.learning_rate)?;
        unit("learning.max_weight_step", l.max_weight_step)?;
        unit("learning.reward_smoothing", l.reward_smoothing)?;
        unit("learning.threshold_floor", l.threshold_floor)?;
        unit("learning.threshold_ceiling", l.threshold_ceiling)?;
        if l.threshold_floor > l.threshold_ceiling {
            bail!("learning.threshold_floor exceeds learning.threshold_ceiling");
        }
        if !(l.threshold_floor..=l.threshold_ceiling).contains(&v.min_confidence) {
            bail!(
                "validator.min_confidence ({}) outside learning threshold band [{}, {}]",
                v.min_confidence,
                l.threshold_floor,
                l.threshold_ceiling
            );
        }
        if !(0.0..0.5).contains(&l.min_weight) {
            bail!("learning.min_weight must be within [0, 0.5)");
        }
        if l.warmup_trades > l.mature_trades {
            bail!("learning.warmup_trades exceeds learning.mature_trades");
        }

        if self.risk.session_reset_hour_utc > 23 {
            bail!("risk.session_reset_hour_utc must be within 0..=23");
        }

        if self.persistence.enabled && self.persistence.queue_size == 0 {
            bail!("persistence.queue_size must be non-zero when persistence is enabled");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn test_retry_config() {
        let config = RetryConfig::new(5, 50);

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.calculate_delay(0), 50);
        assert_eq!(config.calculate_delay(1), 100);
        assert_eq!(config.calculate_delay(2), 200);
        assert_eq!(config.calculate_delay(30), 3_000);

        let no_backoff = RetryConfig {
            use_exponential_backoff: false,
            ..config
        };
        assert_eq!(no_backoff.calculate_delay(0), 50);
        assert_eq!(no_backoff.calculate_delay(5), 50);
    }

    #[test]
    fn test_rejects_inconsistent_thresholds() {
        let mut config = EngineConfig::default();
        config.ensemble.weak_confidence = 0.9;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.validator.min_confidence = 0.95;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.features.min_window = 500;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.learning.threshold_floor = 0.95;
        assert!(config.validate().is_err());
    }
}
