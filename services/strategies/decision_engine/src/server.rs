//! Execution-client TCP server
//!
//! ## Connection Pattern
//! - **Read task**: line → codec → router, one instrument worker per symbol
//! - **Write task**: drains the connection's command queue and sends a
//!   heartbeat on the configured interval
//! - **Cleanup**: the session is dropped when the read side ends; engine
//!   state survives the disconnect
//!
//! A malformed or unknown line is logged and skipped. An oversized line
//! closes the connection.

use network::{Clock, LineListener, LineReader, LineWriter, RetryPolicy, TransportError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use torq_config::ServerConfig;
use tracing::{debug, error, warn};

use codec::{Inbound, OutboundMessage};

use crate::error::Result;
use crate::logging::LogEmoji;
use crate::pipeline::EventRouter;
use crate::session::{ConnectionId, SessionRegistry};

const OUTBOUND_QUEUE: usize = 256;

pub struct EngineServer {
    listener: LineListener,
    config: ServerConfig,
    router: Arc<EventRouter>,
    sessions: Arc<SessionRegistry>,
    clock: Arc<dyn Clock>,
}

impl EngineServer {
    pub async fn bind(
        config: &ServerConfig,
        router: Arc<EventRouter>,
        sessions: Arc<SessionRegistry>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let addr = format!("{}:{}", config.bind_address, config.port);
        let listener = LineListener::bind(&addr, RetryPolicy::new(config.accept_retry.clone())).await?;
        Ok(Self {
            listener,
            config: config.clone(),
            router,
            sessions,
            clock,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is aborted
    pub async fn run(self) {
        let server = Arc::new(self);
        loop {
            match server.listener.accept().await {
                Ok((stream, peer)) => {
                    let server = Arc::clone(&server);
                    tokio::spawn(async move {
                        server.handle_connection(stream, peer).await;
                    });
                }
                Err(e) => {
                    error!("{} Accept loop failure: {}", LogEmoji::ERROR, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn handle_connection(&self, stream: TcpStream, peer: SocketAddr) {
        let (read_half, write_half) = stream.into_split();
        let (tx, rx) = mpsc::channel::<String>(OUTBOUND_QUEUE);
        let id = self.sessions.connect(peer, tx);

        let heartbeat = (self.config.heartbeat_interval_secs > 0)
            .then(|| Duration::from_secs(self.config.heartbeat_interval_secs));
        let writer = tokio::spawn(write_loop(
            id,
            LineWriter::new(write_half),
            rx,
            heartbeat,
            Arc::clone(&self.clock),
        ));

        let mut reader = LineReader::new(read_half, self.config.max_line_bytes);
        let mut lines = 0u64;
        loop {
            match reader.next_line().await {
                Ok(Some(line)) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    lines += 1;
                    self.dispatch_line(id, &line);
                }
                Ok(None) => break,
                Err(TransportError::MessageTooLarge { size, max }) => {
                    warn!(
                        "Connection {}: {} byte line exceeds {} limit, closing",
                        id, size, max
                    );
                    break;
                }
                Err(e) => {
                    warn!("Connection {} read error: {}", id, e);
                    break;
                }
            }
        }

        self.sessions.disconnect(id);
        writer.abort();
        debug!("Connection {} read task ended after {} lines", id, lines);
    }

    fn dispatch_line(&self, id: ConnectionId, line: &str) {
        match codec::decode_line(line, self.clock.now()) {
            Ok(Inbound::Registration(registration)) => {
                self.sessions.register(id, &registration);
            }
            Ok(Inbound::Heartbeat) => {
                debug!("Connection {} heartbeat", id);
            }
            Ok(event) => self.router.route(event),
            Err(e) => {
                warn!("{} Connection {}: skipping line: {}", LogEmoji::WARNING, id, e);
            }
        }
    }
}

async fn write_loop(
    id: ConnectionId,
    mut writer: LineWriter<tokio::net::tcp::OwnedWriteHalf>,
    mut rx: mpsc::Receiver<String>,
    heartbeat: Option<Duration>,
    clock: Arc<dyn Clock>,
) {
    let mut ticker = heartbeat.map(|period| {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker
    });
    loop {
        let line = tokio::select! {
            line = rx.recv() => match line {
                Some(line) => line,
                None => break,
            },
            _ = next_heartbeat(ticker.as_mut()) => {
                match codec::encode_line(&OutboundMessage::Heartbeat { timestamp: clock.now() }) {
                    Ok(line) => line,
                    Err(e) => {
                        warn!("Failed to encode heartbeat: {}", e);
                        continue;
                    }
                }
            }
        };
        if let Err(e) = writer.write_line(&line).await {
            warn!("Failed to write to connection {}: {}", id, e);
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn next_heartbeat(ticker: Option<&mut tokio::time::Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}
