//! # Command Dispatcher - One In-Flight Command Per Instrument
//!
//! ## Purpose
//!
//! Serializes validated entries, exits and accepted trailing-stop updates into
//! wire commands and forwards them to the execution client, guaranteeing that
//! at most one command per instrument is ever unacknowledged.
//!
//! ## Architecture Role
//!
//! ```text
//! Validated decision ─┐
//!                     ├→ [submit] ─→ slot free?  ── yes → send (retry policy) → in flight
//! Trailing update ────┘                  │
//!                                        └─ no ──→ pending (latest wins, older dropped)
//!
//! command_ack / trade_entry / trade_completed → [acknowledge] → slot freed → pending sent
//! sweeper → [expire] → in flight past timeout declared lost → slot freed → pending sent
//! lifecycle closed / reverted → [clear_lifecycle] → in flight resolved, pending dropped
//! ```
//!
//! Commands that will never execute (superseded, rejected, lost, failed to
//! send) are reported to the [`ReleaseHandler`] so optimistic position state
//! can be rolled back.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codec::{CommandKind, CommandMessage};
use dashmap::DashMap;
use network::{Clock, RetryPolicy};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use torq_config::DispatcherConfig;
use tracing::{debug, warn};
use types::InstrumentId;

use crate::error::{EngineError, Result};
use crate::log_execution;

/// Outbound boundary to the execution client
#[async_trait]
pub trait CommandSink: Send + Sync {
    async fn send(&self, command: &CommandMessage) -> Result<()>;
}

/// A command before it is assigned an id and sent
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    pub kind: CommandKind,
    pub instrument: InstrumentId,
    pub quantity: u64,
    pub price: Option<Decimal>,
    pub stop_loss: Option<Decimal>,
    pub target: Option<Decimal>,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SubmitOutcome {
    Sent(CommandMessage),
    /// Waiting behind the in-flight command
    Queued,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ReleaseReason {
    Superseded,
    Rejected(String),
    Lost,
    SendFailed(String),
}

/// A command that will not execute
#[derive(Debug, Clone, PartialEq)]
pub struct Release {
    pub instrument: InstrumentId,
    pub kind: CommandKind,
    pub command_id: Option<u64>,
    pub reason: ReleaseReason,
}

/// Commands discarded when a position lifecycle ended
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClearedCommands {
    pub in_flight: Option<CommandMessage>,
    pub pending: Option<CommandRequest>,
}

impl ClearedCommands {
    pub fn is_empty(&self) -> bool {
        self.in_flight.is_none() && self.pending.is_none()
    }
}

pub trait ReleaseHandler: Send + Sync {
    fn on_release(&self, release: &Release);
}

#[derive(Debug, Clone)]
struct InFlight {
    command: CommandMessage,
    sent_at: DateTime<Utc>,
}

#[derive(Default)]
struct Slot {
    in_flight: Option<InFlight>,
    pending: Option<CommandRequest>,
}

pub struct CommandDispatcher {
    sink: Arc<dyn CommandSink>,
    retry: RetryPolicy,
    timeout: Duration,
    clock: Arc<dyn Clock>,
    next_id: AtomicU64,
    slots: DashMap<InstrumentId, Arc<Mutex<Slot>>>,
    release_handler: parking_lot::RwLock<Option<Arc<dyn ReleaseHandler>>>,
}

impl CommandDispatcher {
    pub fn new(sink: Arc<dyn CommandSink>, config: &DispatcherConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            sink,
            retry: RetryPolicy::new(config.send_retry.clone()).with_jitter(0.1),
            timeout: config.command_timeout(),
            clock,
            next_id: AtomicU64::new(1),
            slots: DashMap::new(),
            release_handler: parking_lot::RwLock::new(None),
        }
    }

    pub fn set_release_handler(&self, handler: Arc<dyn ReleaseHandler>) {
        *self.release_handler.write() = Some(handler);
    }

    fn slot(&self, instrument: &InstrumentId) -> Arc<Mutex<Slot>> {
        self.slots
            .entry(instrument.clone())
            .or_default()
            .clone()
    }

    fn release(&self, release: Release) {
        debug!(
            "{}: {} (id {:?}) released: {:?}",
            release.instrument,
            release.kind.as_str(),
            release.command_id,
            release.reason
        );
        let handler = self.release_handler.read().clone();
        if let Some(handler) = handler {
            handler.on_release(&release);
        }
    }

    /// Send now if the instrument is idle, otherwise queue as the latest request
    pub async fn submit(&self, request: CommandRequest) -> Result<SubmitOutcome> {
        let slot = self.slot(&request.instrument);
        let mut slot = slot.lock().await;

        if slot.in_flight.is_some() {
            if let Some(superseded) = slot.pending.replace(request) {
                self.release(Release {
                    instrument: superseded.instrument,
                    kind: superseded.kind,
                    command_id: None,
                    reason: ReleaseReason::Superseded,
                });
            }
            return Ok(SubmitOutcome::Queued);
        }

        self.send_locked(&mut slot, request).await.map(SubmitOutcome::Sent)
    }

    async fn send_locked(&self, slot: &mut Slot, request: CommandRequest) -> Result<CommandMessage> {
        let command = CommandMessage {
            command: request.kind,
            command_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            instrument: request.instrument,
            quantity: request.quantity,
            price: request.price,
            stop_loss: request.stop_loss,
            target: request.target,
            reason: request.reason,
            timestamp: self.clock.now(),
        };

        let sink = &self.sink;
        let sent = self
            .retry
            .run("send command", |_| {
                let command = &command;
                async move { sink.send(command).await }
            })
            .await;

        match sent {
            Ok(()) => {
                log_execution!(
                    "{} {} #{} x{} stop={:?} target={:?}",
                    command.instrument,
                    command.command.as_str(),
                    command.command_id,
                    command.quantity,
                    command.stop_loss,
                    command.target
                );
                slot.in_flight = Some(InFlight {
                    command: command.clone(),
                    sent_at: self.clock.now(),
                });
                Ok(command)
            }
            Err(e) => {
                self.release(Release {
                    instrument: command.instrument.clone(),
                    kind: command.command,
                    command_id: Some(command.command_id),
                    reason: ReleaseReason::SendFailed(e.to_string()),
                });
                Err(EngineError::Dispatch {
                    message: format!(
                        "{} {} not delivered: {}",
                        command.instrument,
                        command.command.as_str(),
                        e
                    ),
                })
            }
        }
    }

    /// Free the slot if its in-flight command matches, then send any pending
    ///
    /// `command_id` of `None` matches any in-flight command whose kind is in
    /// `kinds`. Returns the acknowledged command.
    pub async fn acknowledge(
        &self,
        instrument: &InstrumentId,
        command_id: Option<u64>,
        kinds: &[CommandKind],
    ) -> Option<CommandMessage> {
        let slot = self.slot(instrument);
        let mut slot = slot.lock().await;

        let matches = slot.in_flight.as_ref().is_some_and(|in_flight| match command_id {
            Some(id) => in_flight.command.command_id == id,
            None => kinds.contains(&in_flight.command.command),
        });
        if !matches {
            debug!("{}: stale acknowledgement {:?}", instrument, command_id);
            return None;
        }

        let acknowledged = slot.in_flight.take().map(|in_flight| in_flight.command);
        self.send_pending(&mut slot).await;
        acknowledged
    }

    /// Like [`acknowledge`](Self::acknowledge) for a venue rejection
    pub async fn reject(
        &self,
        instrument: &InstrumentId,
        command_id: u64,
        reason: &str,
    ) -> Option<CommandMessage> {
        let rejected = self
            .acknowledge(instrument, Some(command_id), &[])
            .await?;
        warn!(
            "{}: {} #{} rejected: {}",
            instrument,
            rejected.command.as_str(),
            command_id,
            reason
        );
        self.release(Release {
            instrument: instrument.clone(),
            kind: rejected.command,
            command_id: Some(command_id),
            reason: ReleaseReason::Rejected(reason.to_string()),
        });
        Some(rejected)
    }

    /// Discard every command tied to a lifecycle that has ended
    ///
    /// The in-flight command is resolved without a release since there is
    /// nothing left to roll back; the pending request is released as
    /// superseded and never sent.
    pub async fn clear_lifecycle(&self, instrument: &InstrumentId) -> ClearedCommands {
        let slot = self.slot(instrument);
        let mut slot = slot.lock().await;
        let cleared = ClearedCommands {
            in_flight: slot.in_flight.take().map(|in_flight| in_flight.command),
            pending: slot.pending.take(),
        };

        if let Some(command) = &cleared.in_flight {
            debug!(
                "{}: {} #{} resolved by end of lifecycle",
                instrument,
                command.command.as_str(),
                command.command_id
            );
        }
        if let Some(request) = &cleared.pending {
            self.release(Release {
                instrument: request.instrument.clone(),
                kind: request.kind,
                command_id: None,
                reason: ReleaseReason::Superseded,
            });
        }
        cleared
    }

    async fn send_pending(&self, slot: &mut Slot) {
        if let Some(request) = slot.pending.take() {
            if let Err(e) = self.send_locked(slot, request).await {
                warn!("Pending command failed: {}", e);
            }
        }
    }

    /// Declare commands in flight longer than the timeout lost
    pub async fn expire(&self, now: DateTime<Utc>) -> Vec<CommandMessage> {
        let slots: Vec<Arc<Mutex<Slot>>> = self.slots.iter().map(|entry| entry.value().clone()).collect();
        let mut lost = Vec::new();

        for slot in slots {
            let mut slot = slot.lock().await;
            let expired = slot
                .in_flight
                .as_ref()
                .is_some_and(|in_flight| network::window_elapsed(in_flight.sent_at, self.timeout, now));
            if !expired {
                continue;
            }
            if let Some(in_flight) = slot.in_flight.take() {
                let command = in_flight.command;
                warn!(
                    "{}: {} #{} unacknowledged after {:?}, declaring lost",
                    command.instrument,
                    command.command.as_str(),
                    command.command_id,
                    self.timeout
                );
                self.release(Release {
                    instrument: command.instrument.clone(),
                    kind: command.command,
                    command_id: Some(command.command_id),
                    reason: ReleaseReason::Lost,
                });
                lost.push(command);
            }
            self.send_pending(&mut slot).await;
        }
        lost
    }

    pub async fn in_flight(&self, instrument: &InstrumentId) -> Option<CommandMessage> {
        let slot = self.slot(instrument);
        let slot = slot.lock().await;
        slot.in_flight.as_ref().map(|in_flight| in_flight.command.clone())
    }

    pub async fn pending(&self, instrument: &InstrumentId) -> Option<CommandRequest> {
        let slot = self.slot(instrument);
        let slot = slot.lock().await;
        slot.pending.clone()
    }

    /// Periodically expire lost commands
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let now = dispatcher.clock.now();
                dispatcher.expire(now).await;
            }
        })
    }
}
