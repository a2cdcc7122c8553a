//! Instrument identification
//!
//! Venue symbols (`ES 12-25`, `BTCUSD`, ...) are carried verbatim. The wrapper
//! exists so instrument ids cannot be confused with other strings in function
//! signatures, and so maps keyed by instrument sort deterministically.

use crate::errors::ValidationError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue-assigned instrument symbol
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstrumentId(String);

impl InstrumentId {
    /// Create an instrument id, trimming surrounding whitespace
    pub fn new(symbol: impl AsRef<str>) -> Result<Self, ValidationError> {
        let trimmed = symbol.as_ref().trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptyInstrument);
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstrumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for InstrumentId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
