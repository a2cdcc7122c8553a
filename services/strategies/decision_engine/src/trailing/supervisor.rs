//! One periodic trailing task per open position
//!
//! A task starts when a position opens and is aborted the instant it closes.
//! The task never writes the position itself: accepted stops go through
//! [`PositionTracker::apply_stop_update`], which rejects stale lifecycles and
//! anything less protective than the stop in place.

use dashmap::DashMap;
use network::Clock;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use types::precision::to_f64;
use types::{InstrumentId, Position, PositionPhase, TrailingState};

use codec::CommandKind;

use super::{TrailDecision, TrailingEngine};
use crate::dispatcher::{CommandDispatcher, CommandRequest};
use crate::features::{FeatureCache, FeaturePipeline};
use crate::log_trailing;
use crate::position::PositionTracker;
use crate::status::StatusHub;

pub struct TrailingSupervisor {
    engine: TrailingEngine,
    tracker: Arc<PositionTracker>,
    cache: Arc<FeatureCache>,
    features: Arc<FeaturePipeline>,
    dispatcher: Arc<CommandDispatcher>,
    status: Arc<StatusHub>,
    clock: Arc<dyn Clock>,
    states: DashMap<InstrumentId, TrailingState>,
    tasks: DashMap<InstrumentId, JoinHandle<()>>,
}

impl TrailingSupervisor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        engine: TrailingEngine,
        tracker: Arc<PositionTracker>,
        cache: Arc<FeatureCache>,
        features: Arc<FeaturePipeline>,
        dispatcher: Arc<CommandDispatcher>,
        status: Arc<StatusHub>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            engine,
            tracker,
            cache,
            features,
            dispatcher,
            status,
            clock,
            states: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    pub fn state(&self, instrument: &InstrumentId) -> Option<TrailingState> {
        self.states.get(instrument).map(|s| s.value().clone())
    }

    pub fn active(&self) -> usize {
        self.tasks.len()
    }

    /// Create trailing state for `position` and start its periodic task
    pub fn start(self: &Arc<Self>, position: &Position) {
        let instrument = position.instrument.clone();
        let state = TrailingState::new(
            position.lifecycle_id,
            position.stop_price,
            to_f64(position.average_entry_price),
        );
        self.states.insert(instrument.clone(), state.clone());
        self.status.update_trailing(&instrument, Some(state));

        if !self.engine.config().enabled {
            return;
        }

        let supervisor = Arc::clone(self);
        let period = self.engine.config().interval().max(std::time::Duration::from_millis(10));
        let task_instrument = instrument.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick completes immediately; trailing starts one period in
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if !supervisor.tick(&task_instrument).await {
                    debug!("{}: trailing task finished", task_instrument);
                    break;
                }
            }
        });

        if let Some(previous) = self.tasks.insert(instrument.clone(), task) {
            previous.abort();
        }
        log_trailing!("{} lifecycle {} trailing started", instrument, position.lifecycle_id);
    }

    /// Abort the task and discard trailing state
    pub fn stop(&self, instrument: &InstrumentId) {
        if let Some((_, task)) = self.tasks.remove(instrument) {
            task.abort();
        }
        if let Some((_, state)) = self.states.remove(instrument) {
            log_trailing!(
                "{} lifecycle {} trailing stopped after {} updates / {} evaluations",
                instrument,
                state.lifecycle_id,
                state.updates,
                state.evaluations
            );
        }
        self.status.update_trailing(instrument, None);
    }

    /// One evaluation; false once the position this state belongs to is gone
    pub async fn tick(&self, instrument: &InstrumentId) -> bool {
        let Some(mut state) = self.state(instrument) else {
            return false;
        };
        let position = self.tracker.position(instrument);
        if position.lifecycle_id != state.lifecycle_id || !position.is_live() {
            return false;
        }
        if position.phase == PositionPhase::Closing {
            return true;
        }

        let window = self.cache.window(instrument);
        let stats = self.features.stats(&window, self.engine.config().lookback);
        let decision = self.engine.evaluate(&position, &mut state, &stats);
        let now = self.clock.now();

        let mut updated_position = None;
        match decision {
            TrailDecision::Move {
                stop,
                confidence,
                regime,
                algorithm,
            } => {
                if let Some(updated) =
                    self.tracker
                        .apply_stop_update(instrument, state.lifecycle_id, stop, now)
                {
                    self.engine.record_accepted(&mut state, stop, confidence);
                    self.tracker
                        .record_trailing(instrument, state.lifecycle_id, regime, algorithm);
                    log_trailing!(
                        "{} stop → {} via {} in {} regime (confidence {:.2})",
                        instrument,
                        stop,
                        algorithm,
                        regime,
                        confidence
                    );
                    updated_position = Some(updated);
                }
            }
            TrailDecision::Hold { reason } => {
                debug!("{}: trailing hold: {}", instrument, reason);
            }
        }

        // Write back only if this lifecycle still owns the slot
        match self.states.get_mut(instrument) {
            Some(mut current) if current.lifecycle_id == state.lifecycle_id => {
                *current = state.clone();
            }
            _ => return false,
        }
        self.status.update_trailing(instrument, Some(state));

        if let Some(updated) = updated_position {
            self.status.publish(&updated);
            let request = CommandRequest {
                kind: CommandKind::UpdateStop,
                instrument: instrument.clone(),
                quantity: updated.quantity(),
                price: None,
                stop_loss: updated.stop_price,
                target: updated.target_price,
                reason: "trailing stop".to_string(),
            };
            if let Err(e) = self.dispatcher.submit(request).await {
                warn!("{}: stop update not delivered: {}", instrument, e);
            }
        }
        true
    }
}
