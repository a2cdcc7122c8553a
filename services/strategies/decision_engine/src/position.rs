//! Position state tracker
//!
//! The single owner of every [`Position`]. Transitions follow
//! `Flat → Opening → Open → Closing → Flat` and run under a per-instrument
//! lock, so a status tick and a trailing update cannot interleave.
//!
//! Local commands move the state optimistically. Externally reported status
//! is authoritative: [`PositionTracker::reconcile`] runs on every status tick
//! and corrects local state toward it, emitting a `reconciled` outcome when
//! the venue is flat under a live local position.

use chrono::{DateTime, Utc};
use codec::{PositionReport, TradeCompleted, TradeEntry};
use dashmap::DashMap;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use types::{
    Direction, EnsembleDecision, ExitReason, InstrumentId, Position, PositionPhase, Regime,
    TradeOutcome, TradePlan, TrailingAlgorithmId,
};

use crate::error::{EngineError, Result};
use crate::log_position;

/// Observable result of a transition
#[derive(Debug, Clone, PartialEq)]
pub enum PositionEvent {
    /// Entry confirmed or external position adopted
    Opened(Position),
    /// Lifecycle ended with exactly one outcome
    Closed {
        position: Position,
        outcome: TradeOutcome,
    },
    /// Opening abandoned without a fill; nothing realized
    Reverted(Position),
    /// Size, price or stop corrected in place
    Updated(Position),
}

impl PositionEvent {
    pub fn position(&self) -> &Position {
        match self {
            PositionEvent::Opened(position)
            | PositionEvent::Reverted(position)
            | PositionEvent::Updated(position) => position,
            PositionEvent::Closed { position, .. } => position,
        }
    }

    pub fn outcome(&self) -> Option<&TradeOutcome> {
        match self {
            PositionEvent::Closed { outcome, .. } => Some(outcome),
            _ => None,
        }
    }
}

struct Slot {
    position: Position,
    last_trade_at: Option<DateTime<Utc>>,
    /// `last_trade_at` before the current optimistic opening
    prior_trade_at: Option<DateTime<Utc>>,
    opening_since: Option<DateTime<Utc>>,
    /// P&L and quantity from partial closes in the current lifecycle
    realized: Decimal,
    closed_quantity: u64,
    regime: Option<Regime>,
    algorithm: Option<TrailingAlgorithmId>,
}

impl Slot {
    fn new(instrument: InstrumentId, now: DateTime<Utc>) -> Self {
        Self {
            position: Position::flat(instrument, 0, now),
            last_trade_at: None,
            prior_trade_at: None,
            opening_since: None,
            realized: Decimal::ZERO,
            closed_quantity: 0,
            regime: None,
            algorithm: None,
        }
    }

    fn start_lifecycle(&mut self, lifecycle_id: u64, now: DateTime<Utc>) {
        self.position = Position::flat(self.position.instrument.clone(), lifecycle_id, now);
        self.opening_since = None;
        self.realized = Decimal::ZERO;
        self.closed_quantity = 0;
        self.regime = None;
        self.algorithm = None;
    }

    /// Close the current lifecycle at `exit_price`, returning its outcome
    fn close(
        &mut self,
        exit_price: Decimal,
        pnl: Option<Decimal>,
        reason: ExitReason,
        now: DateTime<Utc>,
    ) -> PositionEvent {
        let position = &self.position;
        let remaining_pnl = pnl.unwrap_or_else(|| position.pnl_at(exit_price));
        let outcome = TradeOutcome {
            instrument: position.instrument.clone(),
            lifecycle_id: position.lifecycle_id,
            side: position.side(),
            quantity: self.closed_quantity.saturating_add(position.quantity()),
            entry_price: position.average_entry_price,
            exit_price,
            realized_pnl: self.realized.saturating_add(remaining_pnl),
            initial_risk: position.initial_risk(),
            exit_reason: reason,
            opened_at: position.opened_at,
            closed_at: now,
            decision: position.origin.clone(),
            regime: self.regime,
            trailing_algorithm: self.algorithm,
        };

        let instrument = position.instrument.clone();
        let lifecycle_id = position.lifecycle_id;
        self.position = Position::flat(instrument, lifecycle_id, now);
        self.opening_since = None;
        self.realized = Decimal::ZERO;
        self.closed_quantity = 0;
        self.last_trade_at = Some(now);

        log_position!(
            "{} lifecycle {} closed ({:?}): {} {} @ {} → {} P&L {}",
            outcome.instrument,
            outcome.lifecycle_id,
            outcome.exit_reason,
            outcome.quantity,
            format!("{:?}", outcome.side).to_lowercase(),
            outcome.entry_price,
            outcome.exit_price,
            outcome.realized_pnl
        );
        PositionEvent::Closed {
            position: self.position.clone(),
            outcome,
        }
    }
}

/// Quantity-weighted average of two fills; `None` on overflow or zero quantity
fn weighted_average(price: Decimal, quantity: u64, add_price: Decimal, add_quantity: u64) -> Option<Decimal> {
    let quantity = Decimal::from(quantity);
    let add_quantity = Decimal::from(add_quantity);
    let total = quantity.checked_add(add_quantity)?;
    if total <= Decimal::ZERO {
        return None;
    }
    price
        .checked_mul(quantity)?
        .checked_add(add_price.checked_mul(add_quantity)?)?
        .checked_div(total)
}

pub struct PositionTracker {
    slots: DashMap<InstrumentId, Arc<Mutex<Slot>>>,
    next_lifecycle: AtomicU64,
    opening_grace: Duration,
}

impl PositionTracker {
    pub fn new(opening_grace: Duration) -> Self {
        Self {
            slots: DashMap::new(),
            next_lifecycle: AtomicU64::new(1),
            opening_grace,
        }
    }

    fn slot(&self, instrument: &InstrumentId) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(instrument.clone())
            .or_insert_with(|| Arc::new(Mutex::new(Slot::new(instrument.clone(), Utc::now()))))
            .clone()
    }

    fn next_lifecycle(&self) -> u64 {
        self.next_lifecycle.fetch_add(1, Ordering::Relaxed)
    }

    pub fn position(&self, instrument: &InstrumentId) -> Position {
        self.slot(instrument).lock().position.clone()
    }

    pub fn positions(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self
            .slots
            .iter()
            .map(|entry| entry.value().lock().position.clone())
            .collect();
        positions.sort_by(|a, b| a.instrument.cmp(&b.instrument));
        positions
    }

    /// Instruments not currently flat
    pub fn open_positions(&self) -> usize {
        self.slots
            .iter()
            .filter(|entry| !entry.value().lock().position.is_flat())
            .count()
    }

    pub fn last_trade_at(&self, instrument: &InstrumentId) -> Option<DateTime<Utc>> {
        self.slot(instrument).lock().last_trade_at
    }

    /// Optimistically start a new lifecycle for a dispatched entry
    pub fn begin_open(
        &self,
        decision: &EnsembleDecision,
        plan: &TradePlan,
        now: DateTime<Utc>,
    ) -> Result<Position> {
        let slot = self.slot(&decision.instrument);
        let mut slot = slot.lock();
        if !slot.position.is_flat() {
            return Err(EngineError::InvalidTransition {
                instrument: decision.instrument.to_string(),
                phase: slot.position.phase,
                event: "begin_open",
            });
        }
        let lifecycle_id = self.next_lifecycle();
        slot.start_lifecycle(lifecycle_id, now);

        let quantity = i64::try_from(plan.quantity).unwrap_or(i64::MAX);
        let position = &mut slot.position;
        position.phase = PositionPhase::Opening;
        position.size = decision.direction.sign() * quantity;
        position.average_entry_price = plan.entry;
        position.stop_price = Some(plan.stop);
        position.initial_stop = Some(plan.stop);
        position.target_price = Some(plan.target);
        position.second_target_price = plan.second_target;
        position.origin = Some(decision.clone());
        slot.opening_since = Some(now);
        slot.prior_trade_at = slot.last_trade_at.replace(now);

        log_position!(
            "{} lifecycle {} opening {:?} x{}",
            decision.instrument,
            lifecycle_id,
            decision.direction,
            plan.quantity
        );
        Ok(slot.position.clone())
    }

    /// Apply a `trade_entry` fill
    pub fn confirm_entry(&self, entry: &TradeEntry, now: DateTime<Utc>) -> Option<PositionEvent> {
        let slot = self.slot(&entry.instrument);
        let mut slot = slot.lock();
        let signed = entry.side.sign() * i64::try_from(entry.quantity).unwrap_or(i64::MAX);

        match slot.position.phase {
            PositionPhase::Opening | PositionPhase::Flat => {
                if slot.position.is_flat() {
                    let lifecycle_id = self.next_lifecycle();
                    slot.start_lifecycle(lifecycle_id, now);
                    warn!(
                        "{}: entry without a local command, adopting lifecycle {}",
                        entry.instrument, lifecycle_id
                    );
                } else if slot.position.side() != entry.side {
                    warn!(
                        "{}: fill side {:?} differs from requested {:?}",
                        entry.instrument,
                        entry.side,
                        slot.position.side()
                    );
                }
                let position = &mut slot.position;
                position.phase = PositionPhase::Open;
                position.size = signed;
                position.average_entry_price = entry.price;
                position.opened_at = Some(entry.timestamp);
                position.updated_at = now;
                if position.stop_price.is_some() && !stop_protects(position, position.stop_price) {
                    warn!(
                        "{}: planned stop {:?} is through the fill at {}, dropping it",
                        position.instrument, position.stop_price, entry.price
                    );
                    position.stop_price = None;
                    position.initial_stop = None;
                }
                slot.opening_since = None;
                slot.last_trade_at = Some(now);
                log_position!(
                    "{} lifecycle {} open {} @ {}",
                    entry.instrument,
                    slot.position.lifecycle_id,
                    signed,
                    entry.price
                );
                Some(PositionEvent::Opened(slot.position.clone()))
            }
            PositionPhase::Open if slot.position.side() == entry.side => {
                let position = &mut slot.position;
                match weighted_average(
                    position.average_entry_price,
                    position.quantity(),
                    entry.price,
                    entry.quantity,
                ) {
                    Some(average) => position.average_entry_price = average,
                    None => warn!(
                        "{}: scale-in of {} @ {} overflows the average, keeping {}",
                        entry.instrument, entry.quantity, entry.price, position.average_entry_price
                    ),
                }
                position.size = position.size.saturating_add(signed);
                position.updated_at = now;
                debug!("{}: scaled in to {}", entry.instrument, position.size);
                Some(PositionEvent::Updated(position.clone()))
            }
            phase => {
                warn!(
                    "{}: ignoring {:?} entry while {:?}; next status tick reconciles",
                    entry.instrument, entry.side, phase
                );
                None
            }
        }
    }

    /// Optimistically mark an open position as closing
    pub fn begin_close(&self, instrument: &InstrumentId, now: DateTime<Utc>) -> Result<Position> {
        let slot = self.slot(instrument);
        let mut slot = slot.lock();
        if slot.position.phase != PositionPhase::Open {
            return Err(EngineError::InvalidTransition {
                instrument: instrument.to_string(),
                phase: slot.position.phase,
                event: "begin_close",
            });
        }
        slot.position.phase = PositionPhase::Closing;
        slot.position.updated_at = now;
        Ok(slot.position.clone())
    }

    /// Apply a `trade_completed` fill
    ///
    /// Partial closes reduce size and accumulate P&L; the final close emits
    /// the lifecycle's only outcome. A close for a lifecycle that already
    /// ended (for example by reconciliation) is ignored.
    pub fn complete_close(&self, completed: &TradeCompleted, now: DateTime<Utc>) -> Option<PositionEvent> {
        let slot = self.slot(&completed.instrument);
        let mut slot = slot.lock();

        if slot.position.is_flat() {
            debug!(
                "{}: trade_completed for an already closed lifecycle, ignoring",
                completed.instrument
            );
            return None;
        }
        if slot.position.phase == PositionPhase::Opening {
            // Filled and closed before the entry report arrived
            let position = &mut slot.position;
            position.size = completed.side.sign() * i64::try_from(completed.quantity).unwrap_or(i64::MAX);
            position.average_entry_price = completed.entry_price;
            position.opened_at.get_or_insert(completed.timestamp);
        }

        let held = slot.position.quantity();
        let closing = completed.quantity.min(held);
        let reason = ExitReason::from_venue(completed.exit_reason.as_deref());

        if closing < held {
            let partial_pnl = completed.pnl.unwrap_or_else(|| {
                completed
                    .exit_price
                    .saturating_sub(slot.position.average_entry_price)
                    .saturating_mul(Decimal::from(slot.position.side().sign()))
                    .saturating_mul(Decimal::from(closing))
            });
            slot.realized = slot.realized.saturating_add(partial_pnl);
            slot.closed_quantity = slot.closed_quantity.saturating_add(closing);
            let sign = slot.position.side().sign();
            let remaining = i64::try_from(held - closing).unwrap_or(i64::MAX);
            slot.position.size = sign * remaining;
            slot.position.updated_at = now;
            log_position!(
                "{} lifecycle {} partially closed {} of {}, P&L so far {}",
                completed.instrument,
                slot.position.lifecycle_id,
                closing,
                held,
                slot.realized
            );
            return Some(PositionEvent::Updated(slot.position.clone()));
        }

        Some(slot.close(completed.exit_price, completed.pnl, reason, now))
    }

    /// Correct local state toward an external status report
    pub fn reconcile(&self, report: &PositionReport, now: DateTime<Utc>) -> Vec<PositionEvent> {
        let slot = self.slot(&report.instrument);
        let mut slot = slot.lock();
        let external = report.size;
        let local = slot.position.size;
        let mut events = Vec::new();

        match slot.position.phase {
            PositionPhase::Flat => {
                if external != 0 {
                    warn!(
                        "{}: venue holds {} while local is flat, adopting",
                        report.instrument, external
                    );
                    events.push(self.adopt(&mut slot, report, now));
                }
            }
            PositionPhase::Opening => {
                if external == 0 {
                    let since = slot.opening_since.unwrap_or(now);
                    if network::window_elapsed(since, self.opening_grace, now) {
                        warn!(
                            "{}: entry unfilled after {:?}, reverting lifecycle {}",
                            report.instrument, self.opening_grace, slot.position.lifecycle_id
                        );
                        let lifecycle_id = slot.position.lifecycle_id;
                        slot.start_lifecycle(lifecycle_id, now);
                        events.push(PositionEvent::Reverted(slot.position.clone()));
                    }
                } else {
                    let side_matches = Direction::from_size(external) == slot.position.side();
                    let position = &mut slot.position;
                    position.phase = PositionPhase::Open;
                    position.size = external;
                    if let Some(price) = report.average_price {
                        position.average_entry_price = price;
                    }
                    if !side_matches {
                        position.stop_price = None;
                        position.initial_stop = None;
                        position.target_price = None;
                        position.second_target_price = None;
                    }
                    position.opened_at.get_or_insert(report.timestamp);
                    position.updated_at = now;
                    slot.opening_since = None;
                    log_position!(
                        "{}: status confirms lifecycle {} open at {}",
                        report.instrument,
                        slot.position.lifecycle_id,
                        external
                    );
                    events.push(PositionEvent::Opened(slot.position.clone()));
                }
            }
            PositionPhase::Open | PositionPhase::Closing => {
                if external == 0 {
                    warn!(
                        "{}: venue flat while local holds {}, force-closing lifecycle {}",
                        report.instrument, local, slot.position.lifecycle_id
                    );
                    let exit = report
                        .last_price
                        .unwrap_or(slot.position.average_entry_price);
                    events.push(slot.close(exit, None, ExitReason::Reconciled, now));
                } else if external.signum() != local.signum() {
                    warn!(
                        "{}: venue flipped {} → {}, closing and adopting",
                        report.instrument, local, external
                    );
                    let exit = report
                        .last_price
                        .or(report.average_price)
                        .unwrap_or(slot.position.average_entry_price);
                    events.push(slot.close(exit, None, ExitReason::Reconciled, now));
                    events.push(self.adopt(&mut slot, report, now));
                } else {
                    let price_diverged = report
                        .average_price
                        .is_some_and(|price| price != slot.position.average_entry_price);
                    if external != local || price_diverged {
                        warn!(
                            "{}: size {} → {} (avg {} → {:?}), venue wins",
                            report.instrument,
                            local,
                            external,
                            slot.position.average_entry_price,
                            report.average_price
                        );
                        let position = &mut slot.position;
                        position.size = external;
                        if let Some(price) = report.average_price {
                            position.average_entry_price = price;
                        }
                        position.updated_at = now;
                        events.push(PositionEvent::Updated(position.clone()));
                    }
                }
            }
        }
        events
    }

    fn adopt(&self, slot: &mut Slot, report: &PositionReport, now: DateTime<Utc>) -> PositionEvent {
        let lifecycle_id = self.next_lifecycle();
        slot.start_lifecycle(lifecycle_id, now);
        let position = &mut slot.position;
        position.phase = PositionPhase::Open;
        position.size = report.size;
        position.average_entry_price = report
            .average_price
            .or(report.last_price)
            .unwrap_or(Decimal::ZERO);
        position.opened_at = Some(report.timestamp);
        slot.last_trade_at = Some(now);
        log_position!(
            "{} lifecycle {} adopted at {} @ {}",
            report.instrument,
            lifecycle_id,
            report.size,
            slot.position.average_entry_price
        );
        PositionEvent::Opened(slot.position.clone())
    }

    /// Undo an optimistic opening whose command was rejected or lost
    pub fn cancel_opening(&self, instrument: &InstrumentId, now: DateTime<Utc>) -> Option<PositionEvent> {
        let slot = self.slot(instrument);
        let mut slot = slot.lock();
        if slot.position.phase != PositionPhase::Opening {
            return None;
        }
        let lifecycle_id = slot.position.lifecycle_id;
        slot.start_lifecycle(lifecycle_id, now);
        // An entry that never reached the market does not start the cooldown
        slot.last_trade_at = slot.prior_trade_at.take();
        log_position!("{} lifecycle {} opening cancelled", instrument, lifecycle_id);
        Some(PositionEvent::Reverted(slot.position.clone()))
    }

    /// Return a closing position to open after its close was rejected or lost
    pub fn abort_closing(&self, instrument: &InstrumentId, now: DateTime<Utc>) -> Option<PositionEvent> {
        let slot = self.slot(instrument);
        let mut slot = slot.lock();
        if slot.position.phase != PositionPhase::Closing {
            return None;
        }
        slot.position.phase = PositionPhase::Open;
        slot.position.updated_at = now;
        Some(PositionEvent::Updated(slot.position.clone()))
    }

    /// Move the stop of lifecycle `lifecycle_id`, only ever toward less risk
    pub fn apply_stop_update(
        &self,
        instrument: &InstrumentId,
        lifecycle_id: u64,
        stop: Decimal,
        now: DateTime<Utc>,
    ) -> Option<Position> {
        let slot = self.slot(instrument);
        let mut slot = slot.lock();
        let position = &mut slot.position;
        if position.phase != PositionPhase::Open
            || position.lifecycle_id != lifecycle_id
            || !position.is_more_protective(stop)
        {
            return None;
        }
        position.stop_price = Some(stop);
        position.updated_at = now;
        Some(position.clone())
    }

    /// Remember which regime and algorithm last managed this lifecycle's stop
    pub fn record_trailing(
        &self,
        instrument: &InstrumentId,
        lifecycle_id: u64,
        regime: Regime,
        algorithm: TrailingAlgorithmId,
    ) {
        let slot = self.slot(instrument);
        let mut slot = slot.lock();
        if slot.position.lifecycle_id == lifecycle_id && slot.position.is_live() {
            slot.regime = Some(regime);
            slot.algorithm = Some(algorithm);
        }
    }
}

fn stop_protects(position: &Position, stop: Option<Decimal>) -> bool {
    match (position.side(), stop) {
        (Direction::Long, Some(stop)) => stop < position.average_entry_price,
        (Direction::Short, Some(stop)) => stop > position.average_entry_price,
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use types::RecommendationTier;

    fn es() -> InstrumentId {
        InstrumentId::new("ES").unwrap()
    }

    fn decision(direction: Direction) -> EnsembleDecision {
        EnsembleDecision {
            instrument: es(),
            timestamp: Utc::now(),
            direction,
            confidence: 0.8,
            strength: 0.6,
            tier: RecommendationTier::Strong,
            predictions: Vec::new(),
            degraded: false,
            fallback: false,
            weights_version: 1,
            data_quality: 1.0,
            cold_start: false,
            reference_price: dec!(4500),
            plan: None,
        }
    }

    fn plan() -> TradePlan {
        TradePlan {
            entry: dec!(4500),
            stop: dec!(4490),
            target: dec!(4520),
            second_target: None,
            quantity: 2,
        }
    }

    fn entry(price: Decimal, now: DateTime<Utc>) -> TradeEntry {
        TradeEntry {
            instrument: es(),
            side: Direction::Long,
            quantity: 2,
            price,
            timestamp: now,
            command_id: Some(1),
        }
    }

    fn report(size: i64, last: Option<Decimal>, now: DateTime<Utc>) -> PositionReport {
        PositionReport {
            instrument: es(),
            timestamp: now,
            size,
            average_price: None,
            last_price: last,
            realized_pnl: None,
        }
    }

    fn open_long(tracker: &PositionTracker, now: DateTime<Utc>) -> Position {
        tracker.begin_open(&decision(Direction::Long), &plan(), now).unwrap();
        tracker.confirm_entry(&entry(dec!(4501), now), now).unwrap();
        tracker.position(&es())
    }

    #[test]
    fn test_full_lifecycle() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        let opening = tracker.begin_open(&decision(Direction::Long), &plan(), now).unwrap();
        assert_eq!(opening.phase, PositionPhase::Opening);
        assert!(tracker.begin_open(&decision(Direction::Long), &plan(), now).is_err());

        let opened = tracker.confirm_entry(&entry(dec!(4501), now), now).unwrap();
        assert_eq!(opened.position().phase, PositionPhase::Open);
        assert_eq!(opened.position().average_entry_price, dec!(4501));
        assert_eq!(opened.position().stop_price, Some(dec!(4490)));

        tracker.begin_close(&es(), now).unwrap();
        let completed = TradeCompleted {
            instrument: es(),
            side: Direction::Long,
            quantity: 2,
            entry_price: dec!(4501),
            exit_price: dec!(4511),
            pnl: None,
            exit_reason: Some("Profit target".into()),
            timestamp: now,
            command_id: None,
        };
        let closed = tracker.complete_close(&completed, now).unwrap();
        let outcome = closed.outcome().unwrap();
        assert_eq!(outcome.realized_pnl, dec!(20));
        assert_eq!(outcome.exit_reason, ExitReason::Target);
        assert_eq!(outcome.initial_risk, Some(dec!(22)));
        assert!(outcome.decision.is_some());
        assert!(tracker.position(&es()).is_flat());

        // Duplicate close report never produces a second outcome
        assert!(tracker.complete_close(&completed, now).is_none());
    }

    #[test]
    fn test_partial_closes_accumulate_into_one_outcome() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        open_long(&tracker, now);
        let partial = TradeCompleted {
            instrument: es(),
            side: Direction::Long,
            quantity: 1,
            entry_price: dec!(4501),
            exit_price: dec!(4511),
            pnl: None,
            exit_reason: None,
            timestamp: now,
            command_id: None,
        };
        let event = tracker.complete_close(&partial, now).unwrap();
        assert!(matches!(event, PositionEvent::Updated(ref p) if p.size == 1));

        let last = TradeCompleted {
            exit_price: dec!(4521),
            ..partial
        };
        let outcome = tracker.complete_close(&last, now).unwrap().outcome().cloned().unwrap();
        assert_eq!(outcome.quantity, 2);
        assert_eq!(outcome.realized_pnl, dec!(30));
    }

    #[test]
    fn test_reconcile_flat_force_closes_once() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        open_long(&tracker, now);

        let events = tracker.reconcile(&report(0, Some(dec!(4495)), now), now);
        assert_eq!(events.len(), 1);
        let outcome = events[0].outcome().unwrap();
        assert_eq!(outcome.exit_reason, ExitReason::Reconciled);
        assert_eq!(outcome.realized_pnl, dec!(-12));

        assert!(tracker.reconcile(&report(0, Some(dec!(4495)), now), now).is_empty());
    }

    #[test]
    fn test_opening_grace_then_revert() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        tracker.begin_open(&decision(Direction::Long), &plan(), now).unwrap();

        assert!(tracker.reconcile(&report(0, None, now), now + ChronoDuration::seconds(5)).is_empty());
        let events = tracker.reconcile(&report(0, None, now), now + ChronoDuration::seconds(31));
        assert!(matches!(events.as_slice(), [PositionEvent::Reverted(_)]));
        assert!(events[0].outcome().is_none());
        assert!(tracker.position(&es()).is_flat());
    }

    #[test]
    fn test_adopt_and_flip() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        let mut adopted = report(3, Some(dec!(4500)), now);
        adopted.average_price = Some(dec!(4498));
        let events = tracker.reconcile(&adopted, now);
        assert!(matches!(events.as_slice(), [PositionEvent::Opened(p)] if p.size == 3));
        let first_lifecycle = tracker.position(&es()).lifecycle_id;

        let flipped = report(-1, Some(dec!(4490)), now);
        let events = tracker.reconcile(&flipped, now);
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].outcome().unwrap().lifecycle_id, first_lifecycle);
        let position = tracker.position(&es());
        assert_eq!(position.size, -1);
        assert_ne!(position.lifecycle_id, first_lifecycle);
    }

    #[test]
    fn test_size_mismatch_external_wins() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        open_long(&tracker, now);
        let events = tracker.reconcile(&report(1, None, now), now);
        assert!(matches!(events.as_slice(), [PositionEvent::Updated(p)] if p.size == 1));
    }

    #[test]
    fn test_stop_updates_are_monotonic() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        let position = open_long(&tracker, now);
        let lifecycle = position.lifecycle_id;

        assert!(tracker.apply_stop_update(&es(), lifecycle, dec!(4495), now).is_some());
        assert!(tracker.apply_stop_update(&es(), lifecycle, dec!(4493), now).is_none());
        assert!(tracker.apply_stop_update(&es(), lifecycle + 1, dec!(4499), now).is_none());
        assert_eq!(tracker.position(&es()).stop_price, Some(dec!(4495)));
    }

    #[test]
    fn test_cancel_opening_and_abort_closing() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        tracker.begin_open(&decision(Direction::Short), &plan(), now).unwrap();
        assert_eq!(tracker.open_positions(), 1);
        assert!(tracker.cancel_opening(&es(), now).is_some());
        assert_eq!(tracker.open_positions(), 0);

        open_long(&tracker, now);
        tracker.begin_close(&es(), now).unwrap();
        assert!(tracker.abort_closing(&es(), now).is_some());
        assert_eq!(tracker.position(&es()).phase, PositionPhase::Open);
    }

    #[test]
    fn test_cancelled_opening_restores_cooldown_clock() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        tracker.begin_open(&decision(Direction::Long), &plan(), now).unwrap();
        assert_eq!(tracker.last_trade_at(&es()), Some(now));
        tracker.cancel_opening(&es(), now);
        assert_eq!(tracker.last_trade_at(&es()), None);

        // After a completed trade the cooldown reverts to that close
        open_long(&tracker, now);
        let closed_at = now + ChronoDuration::seconds(10);
        tracker.reconcile(&report(0, Some(dec!(4505)), closed_at), closed_at);
        let retry_at = now + ChronoDuration::seconds(20);
        tracker.begin_open(&decision(Direction::Long), &plan(), retry_at).unwrap();
        tracker.cancel_opening(&es(), retry_at);
        assert_eq!(tracker.last_trade_at(&es()), Some(closed_at));
    }

    #[test]
    fn test_scale_in_overflow_keeps_previous_average() {
        let tracker = PositionTracker::new(Duration::from_secs(30));
        let now = Utc::now();
        open_long(&tracker, now);

        let huge = TradeEntry {
            quantity: u64::MAX,
            price: Decimal::MAX,
            ..entry(dec!(4501), now)
        };
        let event = tracker.confirm_entry(&huge, now).unwrap();
        assert!(matches!(event, PositionEvent::Updated(_)));
        assert_eq!(tracker.position(&es()).average_entry_price, dec!(4501));
        assert_eq!(tracker.position(&es()).size, i64::MAX);

        let scaled = TradeEntry {
            quantity: 2,
            price: dec!(4511),
            ..entry(dec!(4501), now)
        };
        let fresh = PositionTracker::new(Duration::from_secs(30));
        open_long(&fresh, now);
        fresh.confirm_entry(&scaled, now);
        assert_eq!(fresh.position(&es()).average_entry_price, dec!(4506));
    }
}
