//! Testing utilities for the decision engine

use crate::dispatcher::CommandSink;
use crate::ensemble::{Prediction, Predictor, PredictorError};
use crate::error::{EngineError, Result};
use async_trait::async_trait;
use codec::CommandMessage;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use types::{Direction, DirectionalScore, FeatureVector};

/// Predictor with a scripted answer, optional latency and optional failure
pub struct FixedPredictor {
    id: String,
    output: std::result::Result<Prediction, PredictorError>,
    delay: Option<Duration>,
}

impl FixedPredictor {
    pub fn new(id: impl Into<String>, direction: Direction, confidence: f64) -> Self {
        Self {
            id: id.into(),
            output: Ok(Prediction {
                score: DirectionalScore::favouring(direction, confidence),
                confidence,
            }),
            delay: None,
        }
    }

    pub fn failing(id: impl Into<String>, message: &str) -> Self {
        Self {
            id: id.into(),
            output: Err(PredictorError::Model(message.to_string())),
            delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

#[async_trait]
impl Predictor for FixedPredictor {
    fn id(&self) -> &str {
        &self.id
    }

    async fn predict(&self, _features: &FeatureVector) -> std::result::Result<Prediction, PredictorError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.output.clone()
    }
}

/// Command sink that records every command it is handed
#[derive(Default)]
pub struct RecordingSink {
    sent: Mutex<Vec<CommandMessage>>,
    failures_remaining: AtomicU32,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next `count` sends
    pub fn failing(count: u32) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures_remaining: AtomicU32::new(count),
        }
    }

    pub fn sent(&self) -> Vec<CommandMessage> {
        self.sent.lock().clone()
    }

    pub fn last(&self) -> Option<CommandMessage> {
        self.sent.lock().last().cloned()
    }
}

#[async_trait]
impl CommandSink for RecordingSink {
    async fn send(&self, command: &CommandMessage) -> Result<()> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(EngineError::NoSession {
                instrument: command.instrument.to_string(),
            });
        }
        self.sent.lock().push(command.clone());
        Ok(())
    }
}
