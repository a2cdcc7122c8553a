//! Execution-client sessions
//!
//! Every connection gets an id and an outbound line queue drained by its own
//! writer task. Commands for an instrument go to the connection that
//! registered it, otherwise to the most recent connection. A disconnect only
//! drops routing; positions and trailing state are untouched.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use codec::{CommandMessage, OutboundMessage, Registration};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};
use types::InstrumentId;

use crate::dispatcher::CommandSink;
use crate::error::{EngineError, Result};

/// Unique identifier for client connections
pub type ConnectionId = u64;

#[derive(Debug, Clone)]
struct Connection {
    peer: SocketAddr,
    connected_at: DateTime<Utc>,
    tx: mpsc::Sender<String>,
}

#[derive(Default)]
pub struct SessionRegistry {
    next_id: AtomicU64,
    connections: DashMap<ConnectionId, Connection>,
    routes: DashMap<InstrumentId, ConnectionId>,
    latest: Mutex<Option<ConnectionId>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connect(&self, peer: SocketAddr, tx: mpsc::Sender<String>) -> ConnectionId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        self.connections.insert(
            id,
            Connection {
                peer,
                connected_at: Utc::now(),
                tx,
            },
        );
        *self.latest.lock() = Some(id);
        info!("🔗 Execution client {} connected from {}", id, peer);
        id
    }

    pub fn disconnect(&self, id: ConnectionId) {
        let Some((_, connection)) = self.connections.remove(&id) else {
            return;
        };
        self.routes.retain(|_, owner| *owner != id);
        let mut latest = self.latest.lock();
        if *latest == Some(id) {
            *latest = self.connections.iter().map(|entry| *entry.key()).max();
        }
        info!(
            "Execution client {} ({}) disconnected after {}s",
            id,
            connection.peer,
            (Utc::now() - connection.connected_at).num_seconds()
        );
    }

    pub fn register(&self, id: ConnectionId, registration: &Registration) {
        if !self.connections.contains_key(&id) {
            return;
        }
        self.routes.insert(registration.instrument.clone(), id);
        info!(
            "{} registered on connection {} (account {:?}, client {:?})",
            registration.instrument, id, registration.account, registration.client
        );
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Connection a command for `instrument` would be written to
    pub fn route_for(&self, instrument: &InstrumentId) -> Option<ConnectionId> {
        let registered = self
            .routes
            .get(instrument)
            .map(|owner| *owner)
            .filter(|owner| self.connections.contains_key(owner));
        registered.or_else(|| *self.latest.lock())
    }

    fn sender_for(&self, instrument: &InstrumentId) -> Option<(ConnectionId, mpsc::Sender<String>)> {
        let id = self.route_for(instrument)?;
        self.connections
            .get(&id)
            .map(|connection| (id, connection.tx.clone()))
    }
}

#[async_trait]
impl CommandSink for SessionRegistry {
    async fn send(&self, command: &CommandMessage) -> Result<()> {
        let line = codec::encode_line(&OutboundMessage::Command(command.clone()))?;
        let (id, tx) = self
            .sender_for(&command.instrument)
            .ok_or_else(|| EngineError::NoSession {
                instrument: command.instrument.to_string(),
            })?;
        tx.send(line)
            .await
            .map_err(|_| EngineError::ChannelClosed("connection writer"))?;
        debug!("Command #{} queued on connection {}", command.command_id, id);
        Ok(())
    }
}
