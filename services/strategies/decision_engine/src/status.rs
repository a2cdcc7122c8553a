//! Engine status broadcast
//!
//! Remembers the latest decision and trailing state per instrument and pushes
//! a full [`StatusSnapshot`] whenever any of decision, position or trailing
//! state changes.

use chrono::Utc;
use dashboard_websocket::StatusFeed;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::warn;
use types::{
    Direction, EnsembleDecision, InstrumentId, Position, RecommendationTier, StatusSnapshot,
    TrailingState,
};

/// What a dashboard reader would see change
#[derive(Debug, Clone, PartialEq)]
struct Published {
    position: Position,
    decision: Option<(Direction, RecommendationTier)>,
    trailing: Option<TrailingState>,
}

pub struct StatusHub {
    feed: Arc<StatusFeed>,
    decisions: DashMap<InstrumentId, EnsembleDecision>,
    trailing: DashMap<InstrumentId, TrailingState>,
    published: DashMap<InstrumentId, Published>,
}

impl StatusHub {
    pub fn new(feed: Arc<StatusFeed>) -> Self {
        Self {
            feed,
            decisions: DashMap::new(),
            trailing: DashMap::new(),
            published: DashMap::new(),
        }
    }

    pub fn feed(&self) -> Arc<StatusFeed> {
        self.feed.clone()
    }

    pub fn update_decision(&self, decision: &EnsembleDecision) {
        self.decisions
            .insert(decision.instrument.clone(), decision.clone());
    }

    /// `None` clears trailing state once the position is gone
    pub fn update_trailing(&self, instrument: &InstrumentId, state: Option<TrailingState>) {
        match state {
            Some(state) => {
                self.trailing.insert(instrument.clone(), state);
            }
            None => {
                self.trailing.remove(instrument);
            }
        }
    }

    pub fn snapshot(&self, position: &Position) -> StatusSnapshot {
        let instrument = &position.instrument;
        StatusSnapshot {
            instrument: instrument.clone(),
            timestamp: Utc::now(),
            position: position.clone(),
            decision: self.decisions.get(instrument).map(|d| d.value().clone()),
            trailing: self.trailing.get(instrument).map(|t| t.value().clone()),
        }
    }

    fn published_view(&self, snapshot: &StatusSnapshot) -> Published {
        Published {
            position: snapshot.position.clone(),
            decision: snapshot.decision.as_ref().map(|d| (d.direction, d.tier)),
            trailing: snapshot.trailing.clone(),
        }
    }

    pub fn publish(&self, position: &Position) {
        let snapshot = self.snapshot(position);
        self.published
            .insert(snapshot.instrument.clone(), self.published_view(&snapshot));
        self.send(&snapshot);
    }

    /// Publish only if position, trailing state, or the decision's direction
    /// or tier differ from the last broadcast; true when published
    pub fn publish_if_changed(&self, position: &Position) -> bool {
        let snapshot = self.snapshot(position);
        let view = self.published_view(&snapshot);
        if self
            .published
            .get(&snapshot.instrument)
            .is_some_and(|last| *last == view)
        {
            return false;
        }
        self.published.insert(snapshot.instrument.clone(), view);
        self.send(&snapshot);
        true
    }

    fn send(&self, snapshot: &StatusSnapshot) {
        match codec::status_message(snapshot) {
            Ok(value) => self.feed.publish(value),
            Err(e) => warn!("Failed to encode status for {}: {}", snapshot.instrument, e),
        }
    }
}
