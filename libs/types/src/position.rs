//! Authoritative per-instrument position

use crate::identifiers::InstrumentId;
use crate::prediction::{Direction, EnsembleDecision};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Position lifecycle phase: `Flat → Opening → Open → Closing → Flat`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionPhase {
    Flat,
    Opening,
    Open,
    Closing,
}

/// The one position that exists per instrument
///
/// Owned by the position tracker; every other component reads snapshots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub instrument: InstrumentId,
    /// Increments each time a new lifecycle starts from flat
    pub lifecycle_id: u64,
    pub phase: PositionPhase,
    /// Signed size, 0 when flat
    pub size: i64,
    pub average_entry_price: Decimal,
    pub stop_price: Option<Decimal>,
    pub initial_stop: Option<Decimal>,
    pub target_price: Option<Decimal>,
    pub second_target_price: Option<Decimal>,
    pub opened_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin: Option<EnsembleDecision>,
}

impl Position {
    pub fn flat(instrument: InstrumentId, lifecycle_id: u64, now: DateTime<Utc>) -> Self {
        Self {
            instrument,
            lifecycle_id,
            phase: PositionPhase::Flat,
            size: 0,
            average_entry_price: Decimal::ZERO,
            stop_price: None,
            initial_stop: None,
            target_price: None,
            second_target_price: None,
            opened_at: None,
            updated_at: now,
            origin: None,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.phase == PositionPhase::Flat
    }

    /// Holding size at the venue (open or closing)
    pub fn is_live(&self) -> bool {
        matches!(self.phase, PositionPhase::Open | PositionPhase::Closing)
    }

    pub fn side(&self) -> Direction {
        Direction::from_size(self.size)
    }

    pub fn quantity(&self) -> u64 {
        self.size.unsigned_abs()
    }

    /// Whether `candidate` reduces risk relative to the current stop
    ///
    /// A long stop may only rise and a short stop may only fall. With no stop in
    /// place any candidate on the protective side is an improvement.
    pub fn is_more_protective(&self, candidate: Decimal) -> bool {
        match (self.side(), self.stop_price) {
            (Direction::Long, Some(current)) => candidate > current,
            (Direction::Short, Some(current)) => candidate < current,
            (Direction::Long | Direction::Short, None) => true,
            (Direction::Hold, _) => false,
        }
    }

    /// Realized P&L for closing the whole position at `exit_price`
    ///
    /// Saturates at the `Decimal` range instead of overflowing.
    pub fn pnl_at(&self, exit_price: Decimal) -> Decimal {
        exit_price
            .saturating_sub(self.average_entry_price)
            .saturating_mul(Decimal::from(self.size))
    }

    /// Initial risk in price × quantity terms, when an initial stop was set
    pub fn initial_risk(&self) -> Option<Decimal> {
        self.initial_stop
            .and_then(|stop| self.average_entry_price.checked_sub(stop))
            .and_then(|distance| distance.abs().checked_mul(Decimal::from(self.quantity())))
            .filter(|risk| *risk > Decimal::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_long() -> Position {
        let mut position = Position::flat(InstrumentId::new("ES").unwrap(), 1, Utc::now());
        position.phase = PositionPhase::Open;
        position.size = 2;
        position.average_entry_price = dec!(100);
        position.stop_price = Some(dec!(98));
        position.initial_stop = Some(dec!(98));
        position
    }

    #[test]
    fn test_protective_direction_long_and_short() {
        let long = open_long();
        assert!(long.is_more_protective(dec!(98.5)));
        assert!(!long.is_more_protective(dec!(98)));
        assert!(!long.is_more_protective(dec!(97)));

        let mut short = open_long();
        short.size = -2;
        short.stop_price = Some(dec!(102));
        assert!(short.is_more_protective(dec!(101)));
        assert!(!short.is_more_protective(dec!(103)));
    }

    #[test]
    fn test_pnl_and_initial_risk() {
        let long = open_long();
        assert_eq!(long.pnl_at(dec!(103)), dec!(6));
        assert_eq!(long.initial_risk(), Some(dec!(4)));
    }

    #[test]
    fn test_extreme_size_does_not_overflow() {
        let mut huge = open_long();
        huge.size = i64::MAX;
        huge.average_entry_price = Decimal::MAX / dec!(2);
        huge.initial_stop = Some(dec!(1));

        assert_eq!(huge.pnl_at(Decimal::MAX), Decimal::MAX);
        assert_eq!(huge.pnl_at(Decimal::ZERO), Decimal::MIN);
        assert_eq!(huge.initial_risk(), None);
    }
}
