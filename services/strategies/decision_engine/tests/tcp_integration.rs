//! Execution-client protocol over a real TCP socket

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashboard_websocket::StatusFeed;
use decision_engine::testing::FixedPredictor;
use decision_engine::{
    DecisionEngine, EngineDeps, EngineServer, PersistenceHandle, Predictor, SessionRegistry,
};
use network::{Clock, SystemClock};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use torq_config::{ConfigHandle, EngineConfig, ServerConfig};
use types::Direction;

struct Running {
    _engine: DecisionEngine,
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl Drop for Running {
    fn drop(&mut self) {
        self.server.abort();
    }
}

async fn start(tune: impl FnOnce(&mut ServerConfig)) -> Running {
    let mut config = EngineConfig::default();
    config.trailing.enabled = false;
    config.server.port = 0;
    config.server.heartbeat_interval_secs = 0;
    tune(&mut config.server);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let sessions = Arc::new(SessionRegistry::new());
    let predictors: Vec<Arc<dyn Predictor>> = (0..3)
        .map(|i| {
            Arc::new(FixedPredictor::new(format!("model_{}", i), Direction::Long, 0.82))
                as Arc<dyn Predictor>
        })
        .collect();

    let engine = DecisionEngine::new(
        Arc::new(ConfigHandle::new(config.clone())),
        EngineDeps {
            sink: sessions.clone(),
            feed: Arc::new(StatusFeed::new(64)),
            clock: clock.clone(),
            predictors,
            persistence: PersistenceHandle::disabled(),
        },
    );
    let server = EngineServer::bind(&config.server, engine.router(), sessions, clock)
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    Running {
        _engine: engine,
        addr,
        server: server.spawn(),
    }
}

fn market_line(at: DateTime<Utc>, price: f64) -> String {
    format!(
        "{{\"type\":\"market_data\",\"instrument\":\"ES\",\"timestamp\":\"{}\",\"price\":{:.2},\"volume\":250,\"bid\":{:.2},\"ask\":{:.2}}}\n",
        at.to_rfc3339(),
        price,
        price - 0.25,
        price + 0.25
    )
}

async fn next_message(lines: &mut Lines<BufReader<OwnedReadHalf>>, kind: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let line = lines.next_line().await.unwrap().expect("connection open");
            let value: Value = serde_json::from_str(&line).unwrap();
            if value["type"] == kind {
                return value;
            }
        }
    })
    .await
    .expect("message before timeout")
}

#[tokio::test]
async fn test_market_data_stream_produces_go_long_command() {
    let running = start(|_| {}).await;
    let stream = TcpStream::connect(running.addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    write_half
        .write_all(b"{\"type\":\"instrument_registration\",\"instrument\":\"ES\",\"account\":\"sim\"}\n")
        .await
        .unwrap();
    // Malformed and unknown lines are skipped without closing the connection
    write_half.write_all(b"{not json\n").await.unwrap();
    write_half
        .write_all(b"{\"type\":\"mystery\",\"instrument\":\"ES\"}\n")
        .await
        .unwrap();

    let base = Utc::now() - ChronoDuration::seconds(60);
    for i in 0..30 {
        let line = market_line(base + ChronoDuration::seconds(i), 4470.0 + i as f64);
        write_half.write_all(line.as_bytes()).await.unwrap();
    }

    let command = next_message(&mut lines, "command").await;
    assert_eq!(command["command"], "go_long");
    assert_eq!(command["instrument"], "ES");
    assert_eq!(command["quantity"], 1);
    assert!(command["command_id"].as_u64().is_some());
    assert!(!command["stop_loss"].is_null());
    assert!(!command["target"].is_null());
}

#[tokio::test]
async fn test_oversized_line_closes_connection() {
    let running = start(|server| server.max_line_bytes = 256).await;
    let stream = TcpStream::connect(running.addr).await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let oversized = format!("{{\"type\":\"heartbeat\",\"pad\":\"{}\"}}\n", "x".repeat(1024));
    write_half.write_all(oversized.as_bytes()).await.unwrap();

    let closed = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("server closes promptly");
    assert!(matches!(closed, Ok(None) | Err(_)));
}

#[tokio::test]
async fn test_idle_connection_receives_heartbeats() {
    let running = start(|server| server.heartbeat_interval_secs = 1).await;
    let stream = TcpStream::connect(running.addr).await.unwrap();
    let (read_half, _write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let heartbeat = next_message(&mut lines, "heartbeat").await;
    assert!(heartbeat["timestamp"].is_string());
}
