//! Session risk counters

use crate::outcome::TradeOutcome;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Process-wide risk counters for one trading session
///
/// Counters use saturating arithmetic and are only ever cleared by
/// [`RiskState::reset_for_session`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskState {
    pub session: NaiveDate,
    pub daily_pnl: Decimal,
    pub trade_count: u32,
    pub consecutive_losses: u32,
    pub consecutive_wins: u32,
}

impl RiskState {
    pub fn new(session: NaiveDate) -> Self {
        Self {
            session,
            daily_pnl: Decimal::ZERO,
            trade_count: 0,
            consecutive_losses: 0,
            consecutive_wins: 0,
        }
    }

    /// Fold one closed trade into the counters
    pub fn record(&mut self, outcome: &TradeOutcome) {
        self.trade_count = self.trade_count.saturating_add(1);
        self.daily_pnl = self
            .daily_pnl
            .checked_add(outcome.realized_pnl)
            .unwrap_or(self.daily_pnl);

        if outcome.is_loss() {
            self.consecutive_losses = self.consecutive_losses.saturating_add(1);
            self.consecutive_wins = 0;
        } else if outcome.is_win() {
            self.consecutive_wins = self.consecutive_wins.saturating_add(1);
            self.consecutive_losses = 0;
        }
        // Scratch trades leave both streaks untouched
    }

    pub fn reset_for_session(&mut self, session: NaiveDate) {
        *self = Self::new(session);
    }

    /// View of the counters as they would read in `session`
    pub fn as_of(&self, session: NaiveDate) -> Self {
        if session > self.session {
            Self::new(session)
        } else {
            self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::InstrumentId;
    use crate::outcome::ExitReason;
    use crate::prediction::Direction;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn outcome(pnl: Decimal) -> TradeOutcome {
        TradeOutcome {
            instrument: InstrumentId::new("ES").unwrap(),
            lifecycle_id: 1,
            side: Direction::Long,
            quantity: 1,
            entry_price: dec!(100),
            exit_price: dec!(100) + pnl,
            realized_pnl: pnl,
            initial_risk: None,
            exit_reason: ExitReason::Manual,
            opened_at: None,
            closed_at: Utc::now(),
            decision: None,
            regime: None,
            trailing_algorithm: None,
        }
    }

    #[test]
    fn test_streaks_and_pnl() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let mut state = RiskState::new(day);
        state.record(&outcome(dec!(-10)));
        state.record(&outcome(dec!(-5)));
        assert_eq!(state.consecutive_losses, 2);
        assert_eq!(state.daily_pnl, dec!(-15));

        state.record(&outcome(dec!(0)));
        assert_eq!(state.consecutive_losses, 2);

        state.record(&outcome(dec!(20)));
        assert_eq!(state.consecutive_losses, 0);
        assert_eq!(state.consecutive_wins, 1);
        assert_eq!(state.trade_count, 4);
    }

    #[test]
    fn test_counters_saturate() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let mut state = RiskState::new(day);
        state.trade_count = u32::MAX;
        state.consecutive_losses = u32::MAX;
        state.record(&outcome(dec!(-1)));
        assert_eq!(state.trade_count, u32::MAX);
        assert_eq!(state.consecutive_losses, u32::MAX);
    }

    #[test]
    fn test_as_of_new_session_reads_reset() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let mut state = RiskState::new(day);
        state.record(&outcome(dec!(-10)));

        let next = day.succ_opt().unwrap();
        assert_eq!(state.as_of(next).consecutive_losses, 0);
        assert_eq!(state.as_of(day).consecutive_losses, 1);
    }
}
