//! Monitoring snapshots

use crate::identifiers::InstrumentId;
use crate::position::Position;
use crate::prediction::EnsembleDecision;
use crate::trailing::TrailingState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Everything a monitoring client sees for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub instrument: InstrumentId,
    pub timestamp: DateTime<Utc>,
    pub position: Position,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<EnsembleDecision>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trailing: Option<TrailingState>,
}
