//! Immutable, versioned configuration snapshots
//!
//! Stages hold an `Arc<ConfigSnapshot>` for the duration of one unit of work;
//! a publish never mutates a snapshot already handed out.

use crate::engine::EngineConfig;
use anyhow::Result;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, PartialEq)]
pub struct ConfigSnapshot {
    pub version: u64,
    pub config: EngineConfig,
}

#[derive(Debug)]
pub struct ConfigHandle {
    current: RwLock<Arc<ConfigSnapshot>>,
}

impl ConfigHandle {
    /// Wrap an already validated configuration as version 1
    pub fn new(config: EngineConfig) -> Self {
        Self {
            current: RwLock::new(Arc::new(ConfigSnapshot { version: 1, config })),
        }
    }

    pub fn snapshot(&self) -> Arc<ConfigSnapshot> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version
    }

    /// Validate and publish a replacement, returning its version
    pub fn publish(&self, config: EngineConfig) -> Result<u64> {
        config.validate()?;
        let mut guard = self.current.write();
        let version = guard.version + 1;
        *guard = Arc::new(ConfigSnapshot { version, config });
        info!("Published configuration version {}", version);
        Ok(version)
    }
}
