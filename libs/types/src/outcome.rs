//! Completed trade records

use crate::identifiers::InstrumentId;
use crate::prediction::{Direction, EnsembleDecision};
use crate::trailing::{Regime, TrailingAlgorithmId};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Why a position lifecycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Target,
    Stop,
    Manual,
    Time,
    /// Closed locally because the venue reported flat
    Reconciled,
}

impl ExitReason {
    /// Parse a venue-supplied exit reason, defaulting to manual
    pub fn from_venue(reason: Option<&str>) -> Self {
        let Some(reason) = reason else {
            return ExitReason::Manual;
        };
        let lowered = reason.to_ascii_lowercase();
        if lowered.contains("target") || lowered.contains("profit") {
            ExitReason::Target
        } else if lowered.contains("stop") {
            ExitReason::Stop
        } else if lowered.contains("time") || lowered.contains("session") {
            ExitReason::Time
        } else {
            ExitReason::Manual
        }
    }
}

/// Immutable record closing one position lifecycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub instrument: InstrumentId,
    pub lifecycle_id: u64,
    pub side: Direction,
    pub quantity: u64,
    pub entry_price: Decimal,
    pub exit_price: Decimal,
    pub realized_pnl: Decimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_risk: Option<Decimal>,
    pub exit_reason: ExitReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opened_at: Option<DateTime<Utc>>,
    pub closed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<EnsembleDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regime: Option<Regime>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing_algorithm: Option<TrailingAlgorithmId>,
}

impl TradeOutcome {
    pub fn is_win(&self) -> bool {
        self.realized_pnl > Decimal::ZERO
    }

    pub fn is_loss(&self) -> bool {
        self.realized_pnl < Decimal::ZERO
    }

    /// P&L in units of initial risk; ±1 when no initial risk was recorded
    pub fn r_multiple(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;

        match self.initial_risk {
            Some(risk) if risk > Decimal::ZERO => {
                (self.realized_pnl / risk).to_f64().unwrap_or(0.0)
            }
            _ if self.is_win() => 1.0,
            _ if self.is_loss() => -1.0,
            _ => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_reason_from_venue() {
        assert_eq!(ExitReason::from_venue(Some("Profit target")), ExitReason::Target);
        assert_eq!(ExitReason::from_venue(Some("Trail stop")), ExitReason::Stop);
        assert_eq!(ExitReason::from_venue(Some("Exit on session close")), ExitReason::Time);
        assert_eq!(ExitReason::from_venue(None), ExitReason::Manual);
    }
}
