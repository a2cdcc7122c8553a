//! Persistence collaborator
//!
//! Snapshots, decisions and outcomes are appended as JSON Lines; the weight
//! table is rewritten whole. Writes go through a bounded channel to a single
//! writer task so the decision path never waits on disk, and a full queue
//! drops the record with a warning instead of blocking.
//!
//! Files under the data directory:
//! - `snapshots.jsonl`, `predictions.jsonl`, `outcomes.jsonl`
//! - `weights.json`
//!
//! Everything is read back only at startup.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use types::{EnsembleDecision, InstrumentId, MarketSnapshot, TradeOutcome};

use crate::error::{EngineError, Result};
use crate::params::{Versioned, WeightTable};

pub const SNAPSHOTS_FILE: &str = "snapshots.jsonl";
pub const PREDICTIONS_FILE: &str = "predictions.jsonl";
pub const OUTCOMES_FILE: &str = "outcomes.jsonl";
pub const WEIGHTS_FILE: &str = "weights.json";

#[async_trait]
pub trait PersistenceBackend: Send + Sync {
    async fn append_snapshot(&self, snapshot: &MarketSnapshot) -> Result<()>;
    async fn append_decision(&self, decision: &EnsembleDecision) -> Result<()>;
    async fn append_outcome(&self, outcome: &TradeOutcome) -> Result<()>;
    async fn save_weights(&self, weights: &Versioned<WeightTable>) -> Result<()>;

    /// Most recent `limit` snapshots per instrument, oldest first
    async fn load_snapshots(&self, limit: usize) -> Result<Vec<MarketSnapshot>>;
    async fn load_weights(&self) -> Result<Option<Versioned<WeightTable>>>;
}

/// Append-only JSON Lines store in one directory
pub struct JsonlStore {
    dir: PathBuf,
}

impl JsonlStore {
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await.map_err(|e| EngineError::Persistence {
            message: format!("create {}: {}", dir.display(), e),
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    async fn append<T: serde::Serialize>(&self, file: &str, record: &T) -> Result<()> {
        let mut line = serde_json::to_string(record)?;
        line.push('\n');
        let mut handle = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.dir.join(file))
            .await?;
        handle.write_all(line.as_bytes()).await?;
        handle.flush().await?;
        Ok(())
    }

    /// Parse every readable line, skipping malformed ones
    async fn read_lines<T: serde::de::DeserializeOwned>(&self, file: &str) -> Result<Vec<T>> {
        let path = self.dir.join(file);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut skipped = 0usize;
        let records = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(record) => Some(record),
                Err(_) => {
                    skipped += 1;
                    None
                }
            })
            .collect();
        if skipped > 0 {
            warn!("Skipped {} unreadable lines in {}", skipped, path.display());
        }
        Ok(records)
    }
}

#[async_trait]
impl PersistenceBackend for JsonlStore {
    async fn append_snapshot(&self, snapshot: &MarketSnapshot) -> Result<()> {
        self.append(SNAPSHOTS_FILE, snapshot).await
    }

    async fn append_decision(&self, decision: &EnsembleDecision) -> Result<()> {
        self.append(PREDICTIONS_FILE, decision).await
    }

    async fn append_outcome(&self, outcome: &TradeOutcome) -> Result<()> {
        self.append(OUTCOMES_FILE, outcome).await
    }

    async fn save_weights(&self, weights: &Versioned<WeightTable>) -> Result<()> {
        let target = self.dir.join(WEIGHTS_FILE);
        let tmp = target.with_extension("json.tmp");
        let payload = serde_json::to_vec_pretty(weights)?;
        tokio::fs::write(&tmp, payload).await?;
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    async fn load_snapshots(&self, limit: usize) -> Result<Vec<MarketSnapshot>> {
        let all: Vec<MarketSnapshot> = self.read_lines(SNAPSHOTS_FILE).await?;
        let mut kept_per_instrument: HashMap<InstrumentId, usize> = HashMap::new();
        let mut kept: Vec<MarketSnapshot> = all
            .into_iter()
            .rev()
            .filter(|snapshot| {
                let count = kept_per_instrument
                    .entry(snapshot.instrument.clone())
                    .or_insert(0);
                *count += 1;
                *count <= limit
            })
            .collect();
        kept.reverse();
        Ok(kept)
    }

    async fn load_weights(&self) -> Result<Option<Versioned<WeightTable>>> {
        match tokio::fs::read_to_string(self.dir.join(WEIGHTS_FILE)).await {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PersistRecord {
    Snapshot(MarketSnapshot),
    Decision(Box<EnsembleDecision>),
    Outcome(Box<TradeOutcome>),
    Weights(Versioned<WeightTable>),
}

impl PersistRecord {
    fn kind(&self) -> &'static str {
        match self {
            PersistRecord::Snapshot(_) => "snapshot",
            PersistRecord::Decision(_) => "decision",
            PersistRecord::Outcome(_) => "outcome",
            PersistRecord::Weights(_) => "weights",
        }
    }
}

/// Fire-and-continue sender into the writer task
#[derive(Clone, Default)]
pub struct PersistenceHandle {
    tx: Option<mpsc::Sender<PersistRecord>>,
}

impl PersistenceHandle {
    /// A handle that drops every record
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn record(&self, record: PersistRecord) {
        let Some(tx) = &self.tx else {
            return;
        };
        match tx.try_send(record) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(record)) => {
                warn!("Persistence queue full, dropping {}", record.kind());
            }
            Err(mpsc::error::TrySendError::Closed(record)) => {
                debug!("Persistence writer gone, dropping {}", record.kind());
            }
        }
    }
}

/// Start the single writer; it exits once every handle is dropped
pub fn spawn_writer(
    backend: Arc<dyn PersistenceBackend>,
    queue_size: usize,
) -> (PersistenceHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::channel::<PersistRecord>(queue_size.max(1));
    let task = tokio::spawn(async move {
        let mut written = 0u64;
        while let Some(record) = rx.recv().await {
            let kind = record.kind();
            let result = match &record {
                PersistRecord::Snapshot(snapshot) => backend.append_snapshot(snapshot).await,
                PersistRecord::Decision(decision) => backend.append_decision(decision).await,
                PersistRecord::Outcome(outcome) => backend.append_outcome(outcome).await,
                PersistRecord::Weights(weights) => backend.save_weights(weights).await,
            };
            match result {
                Ok(()) => written += 1,
                Err(e) => warn!("Failed to persist {}: {}", kind, e),
            }
        }
        info!("Persistence writer stopped after {} records", written);
    });
    (PersistenceHandle { tx: Some(tx) }, task)
}
