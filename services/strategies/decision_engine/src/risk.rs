//! Session risk ledger
//!
//! Holds the process-wide [`RiskState`]. The feedback loop is the only writer;
//! the validator reads snapshots. A session starting at the configured UTC
//! hour counts toward the next calendar day, so counters reset exactly once
//! per session boundary.

use chrono::{DateTime, Days, NaiveDate, Timelike, Utc};
use parking_lot::RwLock;
use torq_config::RiskConfig;
use types::{RiskState, TradeOutcome};

use crate::log_risk;

pub struct RiskLedger {
    reset_hour: u32,
    state: RwLock<RiskState>,
}

impl RiskLedger {
    pub fn new(config: &RiskConfig, now: DateTime<Utc>) -> Self {
        let reset_hour = config.session_reset_hour_utc;
        Self {
            reset_hour,
            state: RwLock::new(RiskState::new(session_for(reset_hour, now))),
        }
    }

    pub fn session_for(&self, now: DateTime<Utc>) -> NaiveDate {
        session_for(self.reset_hour, now)
    }

    /// Counters as they read at `now`; a passed boundary reads as reset
    pub fn snapshot(&self, now: DateTime<Utc>) -> RiskState {
        self.state.read().as_of(self.session_for(now))
    }

    /// Reset the counters if a session boundary has passed; true when reset
    pub fn roll_if_needed(&self, now: DateTime<Utc>) -> bool {
        let session = self.session_for(now);
        let mut state = self.state.write();
        if session <= state.session {
            return false;
        }
        log_risk!(
            "Session boundary: {} closed with P&L {} over {} trades",
            state.session,
            state.daily_pnl,
            state.trade_count
        );
        state.reset_for_session(session);
        true
    }

    /// Fold a closed trade into the current session
    pub fn record(&self, outcome: &TradeOutcome, now: DateTime<Utc>) -> RiskState {
        self.roll_if_needed(now);
        let mut state = self.state.write();
        state.record(outcome);
        state.clone()
    }
}

fn session_for(reset_hour: u32, now: DateTime<Utc>) -> NaiveDate {
    let date = now.date_naive();
    if reset_hour > 0 && now.hour() >= reset_hour {
        date.checked_add_days(Days::new(1)).unwrap_or(date)
    } else {
        date
    }
}
