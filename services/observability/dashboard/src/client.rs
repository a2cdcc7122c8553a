//! WebSocket client management

use crate::error::{DashboardError, Result};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

/// One connected monitoring client
pub struct Client {
    pub id: Uuid,
    pub connected_at: DateTime<Utc>,
    pub sender: mpsc::UnboundedSender<Value>,
}

impl Client {
    pub fn new(sender: mpsc::UnboundedSender<Value>) -> Self {
        Self {
            id: Uuid::new_v4(),
            connected_at: Utc::now(),
            sender,
        }
    }

    /// Queue a JSON message for this client's writer
    pub fn send_message(&self, message: Value) -> Result<()> {
        self.sender.send(message).map_err(|_| DashboardError::Client {
            message: format!("client {} channel closed", self.id),
        })
    }
}

/// Manages all connected WebSocket clients
pub struct ClientManager {
    clients: Arc<RwLock<HashMap<Uuid, Client>>>,
    max_connections: usize,
}

impl ClientManager {
    pub fn new(max_connections: usize) -> Self {
        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            max_connections,
        }
    }

    /// Register a client, replaying `initial` messages to it first
    pub async fn add_client(&self, client: Client, initial: Vec<Value>) -> Result<()> {
        let mut clients = self.clients.write().await;

        if clients.len() >= self.max_connections {
            return Err(DashboardError::Client {
                message: format!("maximum connections ({}) reached", self.max_connections),
            });
        }

        for message in initial {
            client.send_message(message)?;
        }

        let client_id = client.id;
        clients.insert(client_id, client);

        info!(
            "Added client {}, total connections: {}",
            client_id,
            clients.len()
        );
        Ok(())
    }

    pub async fn remove_client(&self, client_id: Uuid) {
        let mut clients = self.clients.write().await;
        if clients.remove(&client_id).is_some() {
            info!(
                "Removed client {}, total connections: {}",
                client_id,
                clients.len()
            );
        }
    }

    /// Broadcast a message to all connected clients, dropping dead ones
    pub async fn broadcast(&self, message: Value) {
        let clients = self.clients.read().await;
        let failed: Vec<Uuid> = clients
            .iter()
            .filter(|(_, client)| client.send_message(message.clone()).is_err())
            .map(|(id, _)| *id)
            .collect();
        drop(clients);

        if !failed.is_empty() {
            let mut clients = self.clients.write().await;
            for client_id in failed {
                clients.remove(&client_id);
                debug!("Removed disconnected client {}", client_id);
            }
        }
    }

    pub async fn client_count(&self) -> usize {
        self.clients.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_client_manager_limits() {
        let manager = ClientManager::new(1);

        let (tx, _rx) = mpsc::unbounded_channel();
        let client = Client::new(tx);
        let client_id = client.id;
        manager.add_client(client, Vec::new()).await.unwrap();
        assert_eq!(manager.client_count().await, 1);

        let (tx, _rx2) = mpsc::unbounded_channel();
        assert!(manager.add_client(Client::new(tx), Vec::new()).await.is_err());

        manager.remove_client(client_id).await;
        assert_eq!(manager.client_count().await, 0);
    }

    #[tokio::test]
    async fn test_initial_replay_then_broadcast() {
        let manager = ClientManager::new(10);
        let (tx, mut rx) = mpsc::unbounded_channel();

        let snapshot = json!({"msg_type": "engine_status", "instrument": "ES"});
        manager
            .add_client(Client::new(tx), vec![snapshot.clone()])
            .await
            .unwrap();

        let update = json!({"msg_type": "engine_status", "instrument": "NQ"});
        manager.broadcast(update.clone()).await;

        assert_eq!(rx.recv().await.unwrap(), snapshot);
        assert_eq!(rx.recv().await.unwrap(), update);
    }

    #[tokio::test]
    async fn test_broadcast_prunes_closed_clients() {
        let manager = ClientManager::new(10);
        let (tx, rx) = mpsc::unbounded_channel();
        manager.add_client(Client::new(tx), Vec::new()).await.unwrap();
        drop(rx);

        manager.broadcast(json!({"msg_type": "heartbeat"})).await;
        assert_eq!(manager.client_count().await, 0);
    }
}
