//! # Decision Pipeline
//!
//! ## Purpose
//!
//! Turns validated inbound events into position transitions and commands.
//! Each instrument has its own worker task fed by an unbounded channel, so
//! every stage for one instrument runs in arrival order with a single writer
//! while different instruments proceed in parallel.
//!
//! ## Flow
//!
//! ```text
//! market_data ─→ FeatureCache ─→ FeaturePipeline ─→ Ensemble ─→ TradePlanner
//!                                                                    │
//!                          ValidatorChain ←──────────────────────────┘
//!                                │ pass
//!                                ↓
//!                  PositionTracker (optimistic) ─→ CommandDispatcher ─→ client
//!
//! strategy_status / trade_entry / trade_completed / command_ack
//!           ─→ PositionTracker ─→ PositionEvent ─→ trailing / feedback / status
//! ```

use chrono::{DateTime, Utc};
use codec::{AckStatus, CommandKind, CommandMessage, Inbound};
use dashmap::DashMap;
use network::Clock;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use torq_config::ConfigHandle;
use tracing::{debug, warn};
use types::{EnsembleDecision, InstrumentId, PositionPhase, TradeOutcome};

use crate::dispatcher::{CommandDispatcher, CommandRequest, SubmitOutcome};
use crate::ensemble::{DecisionInput, Ensemble, TradePlanner};
use crate::features::{FeatureCache, FeaturePipeline};
use crate::persistence::{PersistRecord, PersistenceHandle};
use crate::position::{PositionEvent, PositionTracker};
use crate::risk::RiskLedger;
use crate::status::StatusHub;
use crate::trailing::TrailingSupervisor;
use crate::validator::{GateContext, TradeIntent, ValidatorChain, Verdict};
use crate::{log_decision, log_risk};

/// What the pipeline did with one decision
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Dispatched(CommandMessage),
    Queued,
    Rejected(Verdict),
    NoAction,
    Failed(String),
}

pub struct DecisionPipeline {
    pub(crate) config: Arc<ConfigHandle>,
    pub(crate) cache: Arc<FeatureCache>,
    pub(crate) features: Arc<FeaturePipeline>,
    pub(crate) ensemble: Ensemble,
    pub(crate) planner: TradePlanner,
    pub(crate) validator: ValidatorChain,
    pub(crate) tracker: Arc<PositionTracker>,
    pub(crate) risk: Arc<RiskLedger>,
    pub(crate) dispatcher: Arc<CommandDispatcher>,
    pub(crate) trailing: Arc<TrailingSupervisor>,
    pub(crate) status: Arc<StatusHub>,
    pub(crate) outcomes: mpsc::UnboundedSender<TradeOutcome>,
    pub(crate) persistence: PersistenceHandle,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) last_decision_at: DashMap<InstrumentId, DateTime<Utc>>,
}

impl DecisionPipeline {
    pub async fn handle_event(&self, event: Inbound) {
        let now = self.clock.now();
        match event {
            Inbound::MarketData(snapshot) => {
                let instrument = snapshot.instrument.clone();
                self.persistence
                    .record(PersistRecord::Snapshot(snapshot.clone()));
                if !self.cache.push(snapshot) {
                    debug!("{}: out-of-order snapshot dropped", instrument);
                    return;
                }
                if !self.decision_due(&instrument, now) {
                    return;
                }
                if let Some(decision) = self.evaluate(&instrument, now).await {
                    self.act(decision, now).await;
                }
            }
            Inbound::StrategyStatus(report) => {
                let events = self.tracker.reconcile(&report, now);
                self.apply_events(events).await;
            }
            Inbound::TradeEntry(entry) => {
                self.dispatcher
                    .acknowledge(
                        &entry.instrument,
                        entry.command_id,
                        &[CommandKind::GoLong, CommandKind::GoShort],
                    )
                    .await;
                if let Some(event) = self.tracker.confirm_entry(&entry, now) {
                    self.apply_events(vec![event]).await;
                }
            }
            Inbound::TradeCompleted(completed) => {
                // Close the lifecycle before freeing the slot so nothing queued
                // for it is sent to a flat instrument
                if let Some(event) = self.tracker.complete_close(&completed, now) {
                    self.apply_events(vec![event]).await;
                }
                self.dispatcher
                    .acknowledge(
                        &completed.instrument,
                        completed.command_id,
                        &[CommandKind::ClosePosition],
                    )
                    .await;
            }
            Inbound::CommandAck(ack) => match ack.status {
                AckStatus::Rejected => {
                    let reason = ack.reason.as_deref().unwrap_or("rejected by venue");
                    self.dispatcher
                        .reject(&ack.instrument, ack.command_id, reason)
                        .await;
                }
                AckStatus::Accepted | AckStatus::Filled => {
                    self.dispatcher
                        .acknowledge(&ack.instrument, Some(ack.command_id), &[])
                        .await;
                }
            },
            // Registrations are consumed by the session layer
            Inbound::Registration(_) | Inbound::Heartbeat => {}
        }
    }

    fn decision_due(&self, instrument: &InstrumentId, now: DateTime<Utc>) -> bool {
        let interval = std::time::Duration::from_millis(
            self.config.snapshot().config.ensemble.decision_interval_ms,
        );
        let due = self
            .last_decision_at
            .get(instrument)
            .map_or(true, |last| network::window_elapsed(*last, interval, now));
        if due {
            self.last_decision_at.insert(instrument.clone(), now);
        }
        due
    }

    /// Features, ensemble and plan for the current window
    pub async fn evaluate(&self, instrument: &InstrumentId, now: DateTime<Utc>) -> Option<EnsembleDecision> {
        let snapshot = self.config.snapshot();
        let config = &snapshot.config;

        let window = self.cache.window(instrument);
        let latest = window.last()?;
        let reference_price = latest.price;
        let features = self.features.compute(&window);
        let stats = self.features.stats(&window, config.trailing.lookback);

        let mut decision = self
            .ensemble
            .decide(
                DecisionInput {
                    instrument,
                    features: &features,
                    stats: &stats,
                    reference_price,
                    timestamp: now,
                },
                &config.ensemble,
            )
            .await;
        if decision.is_actionable() {
            decision.plan = self.planner.plan(decision.direction, reference_price, &stats);
            log_decision!(
                "{} {:?} {:?} conf={:.3} strength={:.3}{}",
                instrument,
                decision.tier,
                decision.direction,
                decision.confidence,
                decision.strength,
                if decision.degraded { " (degraded)" } else { "" }
            );
        }

        self.status.update_decision(&decision);
        self.persistence
            .record(PersistRecord::Decision(Box::new(decision.clone())));
        Some(decision)
    }

    /// Validate and dispatch an entry or an exit for `decision`
    pub async fn act(&self, decision: EnsembleDecision, now: DateTime<Utc>) -> ActionOutcome {
        let instrument = decision.instrument.clone();
        let position = self.tracker.position(&instrument);

        let outcome = match position.phase {
            PositionPhase::Flat if decision.is_actionable() => self.enter(&decision, now).await,
            PositionPhase::Open
                if decision.is_actionable() && decision.direction == position.side().opposite() =>
            {
                self.exit(&decision, now).await
            }
            _ => ActionOutcome::NoAction,
        };

        self.status.publish_if_changed(&self.tracker.position(&instrument));
        outcome
    }

    fn verdict(&self, decision: &EnsembleDecision, intent: TradeIntent, now: DateTime<Utc>) -> Verdict {
        let position = self.tracker.position(&decision.instrument);
        let risk = self.risk.snapshot(now);
        let ctx = GateContext {
            decision,
            position: &position,
            risk: &risk,
            intent,
            open_positions: self.tracker.open_positions(),
            last_trade_at: self.tracker.last_trade_at(&decision.instrument),
            now,
        };
        self.validator.validate(&ctx)
    }

    async fn enter(&self, decision: &EnsembleDecision, now: DateTime<Utc>) -> ActionOutcome {
        let (Some(plan), Some(kind)) = (&decision.plan, CommandKind::entry_for(decision.direction)) else {
            return ActionOutcome::NoAction;
        };

        let verdict = self.verdict(decision, TradeIntent::Entry, now);
        if !verdict.passed {
            log_risk!("{} entry rejected: {}", decision.instrument, verdict.reasons());
            return ActionOutcome::Rejected(verdict);
        }

        if let Err(e) = self.tracker.begin_open(decision, plan, now) {
            return ActionOutcome::Failed(e.to_string());
        }

        let request = CommandRequest {
            kind,
            instrument: decision.instrument.clone(),
            quantity: plan.quantity,
            price: Some(plan.entry),
            stop_loss: Some(plan.stop),
            target: Some(plan.target),
            reason: format!(
                "{:?} ensemble signal, confidence {:.2}",
                decision.tier, decision.confidence
            ),
        };
        self.submit(request).await
    }

    async fn exit(&self, decision: &EnsembleDecision, now: DateTime<Utc>) -> ActionOutcome {
        let verdict = self.verdict(decision, TradeIntent::Exit, now);
        if !verdict.passed {
            log_risk!("{} exit rejected: {}", decision.instrument, verdict.reasons());
            return ActionOutcome::Rejected(verdict);
        }

        let position = match self.tracker.begin_close(&decision.instrument, now) {
            Ok(position) => position,
            Err(e) => return ActionOutcome::Failed(e.to_string()),
        };

        let request = CommandRequest {
            kind: CommandKind::ClosePosition,
            instrument: decision.instrument.clone(),
            quantity: position.quantity(),
            price: None,
            stop_loss: None,
            target: None,
            reason: format!(
                "{:?} reversal signal, confidence {:.2}",
                decision.direction, decision.confidence
            ),
        };
        self.submit(request).await
    }

    async fn submit(&self, request: CommandRequest) -> ActionOutcome {
        match self.dispatcher.submit(request).await {
            Ok(SubmitOutcome::Sent(command)) => ActionOutcome::Dispatched(command),
            Ok(SubmitOutcome::Queued) => ActionOutcome::Queued,
            // The release handler has already rolled the position back
            Err(e) => ActionOutcome::Failed(e.to_string()),
        }
    }

    pub(crate) async fn apply_events(&self, events: Vec<PositionEvent>) {
        for event in events {
            match &event {
                PositionEvent::Opened(position) => self.trailing.start(position),
                PositionEvent::Closed { position, outcome } => {
                    self.trailing.stop(&position.instrument);
                    self.end_lifecycle(&position.instrument).await;
                    if self.outcomes.send(outcome.clone()).is_err() {
                        warn!(
                            "{}: feedback loop gone, outcome for lifecycle {} not learned",
                            position.instrument, outcome.lifecycle_id
                        );
                    }
                }
                PositionEvent::Reverted(position) => {
                    self.trailing.stop(&position.instrument);
                    self.end_lifecycle(&position.instrument).await;
                }
                PositionEvent::Updated(_) => {}
            }
            self.status.publish(event.position());
        }
    }

    /// Drop commands still queued or in flight for a lifecycle that ended
    async fn end_lifecycle(&self, instrument: &InstrumentId) {
        let cleared = self.dispatcher.clear_lifecycle(instrument).await;
        if !cleared.is_empty() {
            debug!(
                "{}: lifecycle ended, dropped in-flight {:?} and pending {:?}",
                instrument,
                cleared.in_flight.map(|c| c.command),
                cleared.pending.map(|r| r.kind)
            );
        }
    }
}

/// Per-instrument worker tasks
pub struct EventRouter {
    pipeline: Arc<DecisionPipeline>,
    workers: DashMap<InstrumentId, mpsc::UnboundedSender<Inbound>>,
    tasks: DashMap<InstrumentId, JoinHandle<()>>,
}

impl EventRouter {
    pub fn new(pipeline: Arc<DecisionPipeline>) -> Self {
        Self {
            pipeline,
            workers: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    pub fn pipeline(&self) -> &Arc<DecisionPipeline> {
        &self.pipeline
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queue `event` on its instrument's worker, starting one if needed
    pub fn route(&self, event: Inbound) {
        let Some(instrument) = event.instrument().cloned() else {
            return;
        };
        let tx = self
            .workers
            .entry(instrument.clone())
            .or_insert_with(|| self.spawn_worker(&instrument))
            .clone();
        if let Err(mpsc::error::SendError(event)) = tx.send(event) {
            warn!("{}: worker stopped, restarting", instrument);
            let tx = self.spawn_worker(&instrument);
            let _ = tx.send(event);
            self.workers.insert(instrument, tx);
        }
    }

    fn spawn_worker(&self, instrument: &InstrumentId) -> mpsc::UnboundedSender<Inbound> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Inbound>();
        let pipeline = Arc::clone(&self.pipeline);
        let name = instrument.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                pipeline.handle_event(event).await;
            }
            debug!("{}: worker stopped", name);
        });
        if let Some(previous) = self.tasks.insert(instrument.clone(), task) {
            previous.abort();
        }
        debug!("{}: worker started", instrument);
        tx
    }

    pub fn shutdown(&self) {
        self.workers.clear();
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
        self.tasks.clear();
    }
}
