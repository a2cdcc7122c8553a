//! Status feed shared between the engine and the dashboard server
//!
//! The engine publishes JSON envelopes; the feed keeps the latest envelope per
//! instrument so a client connecting mid-session starts from current state.

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

pub struct StatusFeed {
    tx: broadcast::Sender<Value>,
    latest: DashMap<String, Value>,
}

impl StatusFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self {
            tx,
            latest: DashMap::new(),
        }
    }

    /// Cache (when keyed by `instrument`) and broadcast one envelope
    pub fn publish(&self, value: Value) {
        if let Some(instrument) = value.get("instrument").and_then(Value::as_str) {
            self.latest.insert(instrument.to_string(), value.clone());
        }
        // No receivers is normal while no dashboard is running
        let receivers = self.tx.send(value).unwrap_or(0);
        trace!("Published status to {} receivers", receivers);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Value> {
        self.tx.subscribe()
    }

    /// Latest envelope per instrument, sorted by instrument
    pub fn latest(&self) -> Vec<Value> {
        let mut entries: Vec<(String, Value)> = self
            .latest
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries.into_iter().map(|(_, value)| value).collect()
    }

    pub fn instrument_count(&self) -> usize {
        self.latest.len()
    }
}

impl Default for StatusFeed {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_publish_caches_latest_per_instrument() {
        let feed = StatusFeed::new(16);
        let mut rx = feed.subscribe();

        feed.publish(json!({"msg_type": "engine_status", "instrument": "NQ", "seq": 1}));
        feed.publish(json!({"msg_type": "engine_status", "instrument": "ES", "seq": 2}));
        feed.publish(json!({"msg_type": "engine_status", "instrument": "NQ", "seq": 3}));
        feed.publish(json!({"msg_type": "heartbeat"}));

        assert_eq!(rx.recv().await.unwrap()["seq"], 1);
        let latest = feed.latest();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0]["instrument"], "ES");
        assert_eq!(latest[1]["seq"], 3);
    }

    #[test]
    fn test_publish_without_receivers() {
        let feed = StatusFeed::default();
        feed.publish(json!({"instrument": "ES"}));
        assert_eq!(feed.instrument_count(), 1);
    }
}
