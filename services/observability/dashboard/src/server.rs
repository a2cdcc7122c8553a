//! Dashboard WebSocket server

use crate::client::{Client, ClientManager};
use crate::config::DashboardConfig;
use crate::error::{DashboardError, Result};
use crate::feed::StatusFeed;
use chrono::Utc;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info, warn};
use warp::Filter;

/// Main dashboard server
pub struct DashboardServer {
    config: DashboardConfig,
    client_manager: Arc<ClientManager>,
    feed: Arc<StatusFeed>,
}

/// Running server tasks; dropping the handle leaves them running
pub struct DashboardHandle {
    pub local_addr: SocketAddr,
    tasks: Vec<JoinHandle<()>>,
}

impl DashboardHandle {
    pub fn shutdown(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

impl DashboardServer {
    pub fn new(config: DashboardConfig, feed: Arc<StatusFeed>) -> Self {
        let client_manager = Arc::new(ClientManager::new(config.max_connections));

        Self {
            config,
            client_manager,
            feed,
        }
    }

    pub fn client_manager(&self) -> Arc<ClientManager> {
        self.client_manager.clone()
    }

    /// Bind the HTTP/WebSocket listener and spawn the forwarding and heartbeat tasks
    pub async fn start(&self) -> Result<DashboardHandle> {
        let addr: SocketAddr = format!("{}:{}", self.config.bind_address, self.config.port)
            .parse()
            .map_err(|e| DashboardError::Configuration {
                message: format!("Invalid bind address: {}", e),
            })?;

        let routes = routes(self.client_manager.clone(), self.feed.clone());
        let (local_addr, server_task) = if self.config.enable_cors {
            let (addr, server) = warp::serve(routes.with(warp::cors().allow_any_origin()))
                .try_bind_ephemeral(addr)?;
            (addr, tokio::spawn(server))
        } else {
            let (addr, server) = warp::serve(routes).try_bind_ephemeral(addr)?;
            (addr, tokio::spawn(server))
        };
        info!("Dashboard WebSocket server listening on {}", local_addr);

        let tasks = vec![
            server_task,
            self.start_forwarder(),
            self.start_heartbeat_task(),
        ];

        Ok(DashboardHandle { local_addr, tasks })
    }

    fn start_forwarder(&self) -> JoinHandle<()> {
        let client_manager = self.client_manager.clone();
        let mut rx = self.feed.subscribe();

        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(message) => client_manager.broadcast(message).await,
                    Err(RecvError::Lagged(skipped)) => {
                        warn!("Dashboard forwarder lagged, skipped {} status messages", skipped);
                    }
                    Err(RecvError::Closed) => {
                        info!("Status feed closed, stopping dashboard forwarder");
                        break;
                    }
                }
            }
        })
    }

    fn start_heartbeat_task(&self) -> JoinHandle<()> {
        let client_manager = self.client_manager.clone();
        let interval_secs = self.config.heartbeat_interval_secs.max(1);

        tokio::spawn(async move {
            let mut interval = interval(Duration::from_secs(interval_secs));

            loop {
                interval.tick().await;
                let count = client_manager.client_count().await;
                client_manager
                    .broadcast(codec::heartbeat_message(Utc::now(), count))
                    .await;
                debug!("Sent heartbeat to {} clients", count);
            }
        })
    }
}

/// HTTP and WebSocket routes
pub fn routes(
    client_manager: Arc<ClientManager>,
    feed: Arc<StatusFeed>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let ws_clients = client_manager.clone();
    let ws_feed = feed.clone();
    let ws_handler = move |ws: warp::ws::Ws| {
        let client_manager = ws_clients.clone();
        let feed = ws_feed.clone();
        async move {
            Ok::<_, warp::Rejection>(ws.on_upgrade(move |socket| {
                handle_websocket_connection(client_manager, feed, socket)
            }))
        }
    };

    let ws_route = warp::path("ws").and(warp::ws()).and_then(ws_handler.clone());
    let ws_stream_route = warp::path("stream").and(warp::ws()).and_then(ws_handler);

    let health_route = warp::path("health")
        .map(|| warp::reply::with_status("OK", warp::http::StatusCode::OK));

    let status_route = warp::path("status").and_then(move || {
        let client_manager = client_manager.clone();
        let feed = feed.clone();
        async move {
            Ok::<_, warp::Rejection>(warp::reply::json(&json!({
                "status": "running",
                "service": "torq-decision-engine",
                "version": env!("CARGO_PKG_VERSION"),
                "clients": client_manager.client_count().await,
                "instruments": feed.latest(),
            })))
        }
    });

    ws_route.or(ws_stream_route).or(health_route).or(status_route)
}

async fn handle_websocket_connection(
    client_manager: Arc<ClientManager>,
    feed: Arc<StatusFeed>,
    ws: warp::ws::WebSocket,
) {
    if let Err(e) = handle_client_connection(client_manager, feed, ws).await {
        warn!("WebSocket connection error: {}", e);
    }
}

async fn handle_client_connection(
    client_manager: Arc<ClientManager>,
    feed: Arc<StatusFeed>,
    ws: warp::ws::WebSocket,
) -> Result<()> {
    use futures_util::{SinkExt, StreamExt};
    use tokio::sync::mpsc;
    use warp::ws::Message;

    let (tx, mut rx) = mpsc::unbounded_channel::<serde_json::Value>();
    let client = Client::new(tx);
    let client_id = client.id;

    client_manager.add_client(client, feed.latest()).await?;

    let (mut ws_sender, mut ws_receiver) = ws.split();

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(message) = msg else {
                    info!("Message channel closed for client {}", client_id);
                    break;
                };
                let json_str = match serde_json::to_string(&message) {
                    Ok(s) => s,
                    Err(e) => {
                        error!("Failed to serialize message: {}", e);
                        continue;
                    }
                };
                if let Err(e) = ws_sender.send(Message::text(json_str)).await {
                    warn!("Failed to send message to client {}: {}", client_id, e);
                    break;
                }
            }

            ws_msg = ws_receiver.next() => {
                match ws_msg {
                    // Monitoring clients are read-only; inbound text is ignored
                    Some(Ok(msg)) if msg.is_close() => {
                        info!("Client {} disconnected", client_id);
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!("WebSocket error for client {}: {}", client_id, e);
                        break;
                    }
                    None => {
                        info!("WebSocket stream closed for client {}", client_id);
                        break;
                    }
                }
            }
        }
    }

    client_manager.remove_client(client_id).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    #[tokio::test]
    async fn test_ws_client_receives_latest_then_updates() {
        let feed = Arc::new(StatusFeed::new(16));
        feed.publish(json!({"msg_type": "engine_status", "instrument": "ES", "seq": 1}));
        let manager = Arc::new(ClientManager::new(4));

        let mut client = warp::test::ws()
            .path("/ws")
            .handshake(routes(manager.clone(), feed.clone()))
            .await
            .expect("handshake");

        let first = client.recv().await.expect("initial snapshot");
        let value: Value = serde_json::from_str(first.to_str().unwrap()).unwrap();
        assert_eq!(value["instrument"], "ES");

        manager
            .broadcast(json!({"msg_type": "engine_status", "instrument": "NQ"}))
            .await;
        let second = client.recv().await.expect("broadcast");
        let value: Value = serde_json::from_str(second.to_str().unwrap()).unwrap();
        assert_eq!(value["instrument"], "NQ");
    }

    #[tokio::test]
    async fn test_health_and_status_endpoints() {
        let feed = Arc::new(StatusFeed::new(16));
        feed.publish(json!({"msg_type": "engine_status", "instrument": "CL"}));
        let filter = routes(Arc::new(ClientManager::new(4)), feed);

        let health = warp::test::request().path("/health").reply(&filter).await;
        assert_eq!(health.status(), 200);
        assert_eq!(health.body(), "OK");

        let status = warp::test::request().path("/status").reply(&filter).await;
        let value: Value = serde_json::from_slice(status.body()).unwrap();
        assert_eq!(value["status"], "running");
        assert_eq!(value["instruments"][0]["instrument"], "CL");
    }

    #[tokio::test]
    async fn test_server_binds_ephemeral_port() {
        let config = DashboardConfig {
            port: 0,
            heartbeat_interval_secs: 60,
            ..DashboardConfig::default()
        };
        let server = DashboardServer::new(config, Arc::new(StatusFeed::default()));
        let handle = server.start().await.unwrap();
        assert_ne!(handle.local_addr.port(), 0);

        let mut stream = TcpStream::connect(handle.local_addr).await.unwrap();
        stream
            .write_all(b"GET /health HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));

        handle.shutdown();
    }
}
