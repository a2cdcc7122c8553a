//! Status broadcast envelopes for monitoring clients

use crate::error::ProtocolError;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use types::StatusSnapshot;

pub const ENGINE_STATUS: &str = "engine_status";
pub const ENGINE_HEARTBEAT: &str = "heartbeat";

/// Wrap a snapshot as `{"msg_type": "engine_status", ...}`
pub fn status_message(snapshot: &StatusSnapshot) -> Result<Value, ProtocolError> {
    let mut value = serde_json::to_value(snapshot)?;
    if let Value::Object(ref mut map) = value {
        map.insert("msg_type".to_string(), Value::String(ENGINE_STATUS.to_string()));
    }
    Ok(value)
}

pub fn heartbeat_message(timestamp: DateTime<Utc>, connected_clients: usize) -> Value {
    json!({
        "msg_type": ENGINE_HEARTBEAT,
        "timestamp": timestamp,
        "connected_clients": connected_clients,
    })
}
