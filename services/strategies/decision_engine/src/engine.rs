//! Engine assembly
//!
//! Builds every stage from one configuration snapshot and owns the
//! background tasks: the feedback loop and the dispatcher's timeout sweeper.

use chrono::Utc;
use dashboard_websocket::StatusFeed;
use network::Clock;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use torq_config::ConfigHandle;
use tracing::{debug, info};
use types::TradeOutcome;

use codec::CommandKind;

use crate::dispatcher::{CommandDispatcher, CommandSink, Release, ReleaseHandler};
use crate::ensemble::{Ensemble, Predictor, TradePlanner};
use crate::error::Result;
use crate::features::{FeatureCache, FeaturePipeline};
use crate::learning::FeedbackLoop;
use crate::params::ParameterStore;
use crate::persistence::{PersistenceBackend, PersistenceHandle};
use crate::pipeline::{DecisionPipeline, EventRouter};
use crate::position::PositionTracker;
use crate::risk::RiskLedger;
use crate::status::StatusHub;
use crate::trailing::{TrailingEngine, TrailingSupervisor};
use crate::validator::ValidatorChain;
use crate::{log_position, log_success};

/// External collaborators the engine is built around
pub struct EngineDeps {
    pub sink: Arc<dyn CommandSink>,
    pub feed: Arc<StatusFeed>,
    pub clock: Arc<dyn Clock>,
    pub predictors: Vec<Arc<dyn Predictor>>,
    pub persistence: PersistenceHandle,
}

/// Rolls back optimistic transitions for commands that will never execute
struct PositionReleaser {
    tracker: Arc<PositionTracker>,
    status: Arc<StatusHub>,
    clock: Arc<dyn Clock>,
}

impl ReleaseHandler for PositionReleaser {
    fn on_release(&self, release: &Release) {
        let now = self.clock.now();
        let event = match release.kind {
            CommandKind::GoLong | CommandKind::GoShort => self.tracker.cancel_opening(&release.instrument, now),
            CommandKind::ClosePosition => self.tracker.abort_closing(&release.instrument, now),
            CommandKind::UpdateStop => {
                debug!(
                    "{}: stop update {:?} released ({:?})",
                    release.instrument, release.command_id, release.reason
                );
                None
            }
        };
        if let Some(event) = event {
            log_position!(
                "{} {} released ({:?}), position rolled back",
                release.instrument,
                release.kind.as_str(),
                release.reason
            );
            self.status.publish(event.position());
        }
    }
}

pub struct DecisionEngine {
    config: Arc<ConfigHandle>,
    params: Arc<ParameterStore>,
    cache: Arc<FeatureCache>,
    tracker: Arc<PositionTracker>,
    risk: Arc<RiskLedger>,
    dispatcher: Arc<CommandDispatcher>,
    trailing: Arc<TrailingSupervisor>,
    status: Arc<StatusHub>,
    learning: Arc<FeedbackLoop>,
    pipeline: Arc<DecisionPipeline>,
    router: Arc<EventRouter>,
    clock: Arc<dyn Clock>,
    outcomes_rx: Mutex<Option<mpsc::UnboundedReceiver<TradeOutcome>>>,
}

impl DecisionEngine {
    pub fn new(config: Arc<ConfigHandle>, deps: EngineDeps) -> Self {
        let snapshot = config.snapshot();
        let cfg = &snapshot.config;
        let clock = deps.clock;

        let ensemble_ids: Vec<String> = deps.predictors.iter().map(|p| p.id().to_string()).collect();
        let params = Arc::new(ParameterStore::new(&ensemble_ids, cfg));
        let cache = Arc::new(FeatureCache::new(cfg.features.window_capacity));
        let features = Arc::new(FeaturePipeline::new(cfg.features.clone()));
        let tracker = Arc::new(PositionTracker::new(Duration::from_secs(
            cfg.trailing.opening_grace_secs,
        )));
        let risk = Arc::new(RiskLedger::new(&cfg.risk, clock.now()));
        let status = Arc::new(StatusHub::new(deps.feed));

        let dispatcher = Arc::new(CommandDispatcher::new(deps.sink, &cfg.dispatcher, clock.clone()));
        dispatcher.set_release_handler(Arc::new(PositionReleaser {
            tracker: tracker.clone(),
            status: status.clone(),
            clock: clock.clone(),
        }));

        let trailing = Arc::new(TrailingSupervisor::new(
            TrailingEngine::new(
                cfg.trailing.clone(),
                cfg.planner.price_decimals,
                params.trailing.clone(),
            ),
            tracker.clone(),
            cache.clone(),
            features.clone(),
            dispatcher.clone(),
            status.clone(),
            clock.clone(),
        ));

        let learning = Arc::new(FeedbackLoop::new(
            cfg.learning.clone(),
            params.clone(),
            risk.clone(),
            deps.persistence.clone(),
        ));

        let (outcomes_tx, outcomes_rx) = mpsc::unbounded_channel();
        let pipeline = Arc::new(DecisionPipeline {
            config: config.clone(),
            cache: cache.clone(),
            features,
            ensemble: Ensemble::new(deps.predictors, params.clone()),
            planner: TradePlanner::new(cfg.planner.clone()),
            validator: ValidatorChain::standard(&cfg.validator, params.thresholds.clone()),
            tracker: tracker.clone(),
            risk: risk.clone(),
            dispatcher: dispatcher.clone(),
            trailing: trailing.clone(),
            status: status.clone(),
            outcomes: outcomes_tx,
            persistence: deps.persistence,
            clock: clock.clone(),
            last_decision_at: Default::default(),
        });
        let router = Arc::new(EventRouter::new(pipeline.clone()));

        info!(
            "Decision engine assembled: {} predictors, config v{}",
            ensemble_ids.len(),
            snapshot.version
        );

        Self {
            config,
            params,
            cache,
            tracker,
            risk,
            dispatcher,
            trailing,
            status,
            learning,
            pipeline,
            router,
            clock,
            outcomes_rx: Mutex::new(Some(outcomes_rx)),
        }
    }

    /// Warm the feature cache and weight table from a previous run
    pub async fn bootstrap(&self, backend: &dyn PersistenceBackend) -> Result<()> {
        if let Some(persisted) = backend.load_weights().await? {
            self.params.restore_weights(&persisted.value);
            log_success!(
                "Restored ensemble weights saved at {} (v{})",
                persisted.updated_at,
                persisted.version
            );
        }

        let limit = self.config.snapshot().config.persistence.bootstrap_snapshots;
        let snapshots = backend.load_snapshots(limit).await?;
        let total = snapshots.len();
        let accepted = snapshots
            .into_iter()
            .filter(|snapshot| self.cache.push(snapshot.clone()))
            .count();
        log_success!(
            "Warmed feature cache with {}/{} snapshots across {} instruments",
            accepted,
            total,
            self.cache.instruments().len()
        );
        Ok(())
    }

    /// Spawn the feedback loop and the dispatcher sweeper
    ///
    /// Call once; later calls only restart the sweeper.
    pub fn start(&self) -> Vec<JoinHandle<()>> {
        let sweep = Duration::from_millis(self.config.snapshot().config.dispatcher.sweep_interval_ms);
        let mut tasks = vec![self.dispatcher.spawn_sweeper(sweep)];
        if let Some(outcomes) = self.outcomes_rx.lock().take() {
            tasks.push(Arc::clone(&self.learning).spawn(outcomes, self.clock.clone()));
        }
        log_success!("Decision engine started at {}", Utc::now());
        tasks
    }

    pub fn shutdown(&self) {
        self.router.shutdown();
        for position in self.tracker.positions() {
            self.trailing.stop(&position.instrument);
        }
    }

    pub fn config(&self) -> &Arc<ConfigHandle> {
        &self.config
    }

    pub fn params(&self) -> &Arc<ParameterStore> {
        &self.params
    }

    pub fn cache(&self) -> &Arc<FeatureCache> {
        &self.cache
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    pub fn risk(&self) -> &Arc<RiskLedger> {
        &self.risk
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher> {
        &self.dispatcher
    }

    pub fn trailing(&self) -> &Arc<TrailingSupervisor> {
        &self.trailing
    }

    pub fn status(&self) -> &Arc<StatusHub> {
        &self.status
    }

    pub fn learning(&self) -> &Arc<FeedbackLoop> {
        &self.learning
    }

    pub fn pipeline(&self) -> &Arc<DecisionPipeline> {
        &self.pipeline
    }

    pub fn router(&self) -> Arc<EventRouter> {
        self.router.clone()
    }
}
