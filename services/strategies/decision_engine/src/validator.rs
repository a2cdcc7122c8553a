//! Risk & trade validation
//!
//! A decision must pass every gate in the chain before it can become a
//! command. The chain always runs every gate so a rejection reports every
//! failing reason, not just the first.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use torq_config::ValidatorConfig;
use types::{EnsembleDecision, Position, RiskState};

use crate::params::{SharedTable, Thresholds};

/// What a decision would do if it passed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeIntent {
    Entry,
    Exit,
}

/// Everything a gate may look at
pub struct GateContext<'a> {
    pub decision: &'a EnsembleDecision,
    pub position: &'a Position,
    pub risk: &'a RiskState,
    pub intent: TradeIntent,
    /// Non-flat positions across all instruments
    pub open_positions: usize,
    pub last_trade_at: Option<DateTime<Utc>>,
    pub now: DateTime<Utc>,
}

pub trait Gate: Send + Sync {
    fn name(&self) -> &str;

    fn applies_to(&self, _intent: TradeIntent) -> bool {
        true
    }

    /// `Err(reason)` rejects the decision
    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GateFailure {
    pub gate: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub passed: bool,
    pub failures: Vec<GateFailure>,
}

impl Verdict {
    pub fn reasons(&self) -> String {
        self.failures
            .iter()
            .map(|f| format!("{}: {}", f.gate, f.reason))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// Confidence at or above the live minimum threshold
pub struct ConfidenceGate {
    thresholds: Arc<SharedTable<Thresholds>>,
}

impl ConfidenceGate {
    pub fn new(thresholds: Arc<SharedTable<Thresholds>>) -> Self {
        Self { thresholds }
    }
}

impl Gate for ConfidenceGate {
    fn name(&self) -> &str {
        "confidence"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        let minimum = self.thresholds.load().value.min_confidence;
        if ctx.decision.confidence >= minimum {
            Ok(())
        } else {
            Err(format!(
                "confidence {:.3} below minimum {:.3}",
                ctx.decision.confidence, minimum
            ))
        }
    }
}

/// Reward-to-risk of the planned trade
pub struct RiskRewardGate {
    minimum: Decimal,
}

impl RiskRewardGate {
    pub fn new(minimum: f64) -> Self {
        Self {
            minimum: Decimal::from_f64(minimum).unwrap_or(Decimal::ZERO),
        }
    }
}

impl Gate for RiskRewardGate {
    fn name(&self) -> &str {
        "risk_reward"
    }

    fn applies_to(&self, intent: TradeIntent) -> bool {
        intent == TradeIntent::Entry
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        let plan = ctx
            .decision
            .plan
            .as_ref()
            .ok_or_else(|| "no trade plan".to_string())?;
        match plan.risk_reward(ctx.decision.direction) {
            Some(ratio) if ratio >= self.minimum => Ok(()),
            Some(ratio) => Err(format!(
                "risk/reward {:.2} below minimum {}",
                ratio, self.minimum
            )),
            None => Err("stop is not on the protective side of entry".to_string()),
        }
    }
}

/// One position per instrument and a global cap on open positions
pub struct ExposureGate {
    max_positions: usize,
}

impl ExposureGate {
    pub fn new(max_positions: usize) -> Self {
        Self { max_positions }
    }
}

impl Gate for ExposureGate {
    fn name(&self) -> &str {
        "exposure"
    }

    fn applies_to(&self, intent: TradeIntent) -> bool {
        intent == TradeIntent::Entry
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        if !ctx.position.is_flat() {
            return Err(format!(
                "{} already {:?}",
                ctx.position.instrument, ctx.position.phase
            ));
        }
        if ctx.open_positions >= self.max_positions {
            return Err(format!(
                "{} open positions at limit {}",
                ctx.open_positions, self.max_positions
            ));
        }
        Ok(())
    }
}

/// Minimum spacing between trades on one instrument
pub struct CooldownGate {
    cooldown: Duration,
}

impl CooldownGate {
    pub fn new(cooldown: Duration) -> Self {
        Self { cooldown }
    }
}

impl Gate for CooldownGate {
    fn name(&self) -> &str {
        "cooldown"
    }

    fn applies_to(&self, intent: TradeIntent) -> bool {
        intent == TradeIntent::Entry
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        match ctx.last_trade_at {
            Some(last) if !network::window_elapsed(last, self.cooldown, ctx.now) => {
                let elapsed = (ctx.now - last).num_seconds().max(0);
                Err(format!(
                    "{}s since last trade, cooldown {}s",
                    elapsed,
                    self.cooldown.as_secs()
                ))
            }
            _ => Ok(()),
        }
    }
}

pub struct DataQualityGate {
    floor: f64,
}

impl DataQualityGate {
    pub fn new(floor: f64) -> Self {
        Self { floor }
    }
}

impl Gate for DataQualityGate {
    fn name(&self) -> &str {
        "data_quality"
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        if ctx.decision.data_quality >= self.floor {
            Ok(())
        } else {
            Err(format!(
                "data quality {:.2} below floor {:.2}",
                ctx.decision.data_quality, self.floor
            ))
        }
    }
}

/// Blocks new entries after the daily loss or loss-streak limit is hit
pub struct CircuitBreakerGate {
    max_daily_loss: Decimal,
    max_consecutive_losses: u32,
}

impl CircuitBreakerGate {
    pub fn new(max_daily_loss: Decimal, max_consecutive_losses: u32) -> Self {
        Self {
            max_daily_loss: max_daily_loss.abs(),
            max_consecutive_losses,
        }
    }
}

impl Gate for CircuitBreakerGate {
    fn name(&self) -> &str {
        "circuit_breaker"
    }

    fn applies_to(&self, intent: TradeIntent) -> bool {
        intent == TradeIntent::Entry
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<(), String> {
        let mut tripped = Vec::new();
        if -ctx.risk.daily_pnl >= self.max_daily_loss {
            tripped.push(format!(
                "daily loss {} at limit {}",
                -ctx.risk.daily_pnl, self.max_daily_loss
            ));
        }
        if ctx.risk.consecutive_losses >= self.max_consecutive_losses {
            tripped.push(format!(
                "{} consecutive losses at limit {}",
                ctx.risk.consecutive_losses, self.max_consecutive_losses
            ));
        }
        if tripped.is_empty() {
            Ok(())
        } else {
            Err(tripped.join(", "))
        }
    }
}

#[derive(Default)]
pub struct ValidatorChain {
    gates: Vec<Box<dyn Gate>>,
}

impl ValidatorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard gate set, minus any disabled by name
    pub fn standard(config: &ValidatorConfig, thresholds: Arc<SharedTable<Thresholds>>) -> Self {
        let mut chain = Self::new();
        chain.add(Box::new(ConfidenceGate::new(thresholds)));
        chain.add(Box::new(RiskRewardGate::new(config.min_risk_reward)));
        chain.add(Box::new(ExposureGate::new(config.max_concurrent_positions)));
        chain.add(Box::new(CooldownGate::new(Duration::from_secs(config.cooldown_secs))));
        chain.add(Box::new(DataQualityGate::new(config.min_data_quality)));
        chain.add(Box::new(CircuitBreakerGate::new(
            config.max_daily_loss,
            config.max_consecutive_losses,
        )));
        for name in &config.disabled_gates {
            chain.remove(name);
        }
        chain
    }

    /// Add a gate, replacing any gate with the same name
    pub fn add(&mut self, gate: Box<dyn Gate>) {
        let name = gate.name().to_string();
        self.remove(&name);
        self.gates.push(gate);
    }

    pub fn remove(&mut self, name: &str) -> bool {
        let before = self.gates.len();
        self.gates.retain(|gate| gate.name() != name);
        self.gates.len() != before
    }

    pub fn names(&self) -> Vec<&str> {
        self.gates.iter().map(|gate| gate.name()).collect()
    }

    pub fn validate(&self, ctx: &GateContext<'_>) -> Verdict {
        let failures: Vec<GateFailure> = self
            .gates
            .iter()
            .filter(|gate| gate.applies_to(ctx.intent))
            .filter_map(|gate| {
                gate.check(ctx).err().map(|reason| GateFailure {
                    gate: gate.name().to_string(),
                    reason,
                })
            })
            .collect();
        Verdict {
            passed: failures.is_empty(),
            failures,
        }
    }
}
