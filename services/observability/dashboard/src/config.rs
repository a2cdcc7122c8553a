//! Dashboard server configuration

use serde::{Deserialize, Serialize};
use torq_config::DashboardSection;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DashboardConfig {
    /// WebSocket server bind address
    pub bind_address: String,

    /// WebSocket server port, 0 picks an ephemeral port
    pub port: u16,

    /// Maximum number of concurrent WebSocket connections
    pub max_connections: usize,

    /// Enable CORS for web browsers
    pub enable_cors: bool,

    /// Heartbeat interval in seconds
    pub heartbeat_interval_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1".to_string(),
            port: 8080,
            max_connections: 100,
            enable_cors: true,
            heartbeat_interval_secs: 30,
        }
    }
}

impl From<&DashboardSection> for DashboardConfig {
    fn from(section: &DashboardSection) -> Self {
        Self {
            bind_address: section.bind_address.clone(),
            port: section.port,
            max_connections: section.max_connections,
            enable_cors: true,
            heartbeat_interval_secs: section.heartbeat_interval_secs,
        }
    }
}
