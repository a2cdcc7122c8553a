//! Decision Engine Service Entry Point

use anyhow::{Context, Result};
use clap::Parser;
use dashboard_websocket::{DashboardConfig, DashboardServer, StatusFeed};
use decision_engine::logging::init_logging;
use decision_engine::{
    default_predictors, spawn_writer, DecisionEngine, EngineDeps, EngineServer, JsonlStore,
    PersistenceHandle, SessionRegistry,
};
use network::{Clock, SystemClock};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use torq_config::{load_config, ConfigHandle};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "decision_engine", about = "Real-time ensemble decision engine")]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "DECISION_ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the execution-client port
    #[arg(short, long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = load_config(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.server.port = port;
    }
    init_logging(&config.logging)?;
    info!("Starting Torq Decision Engine");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let feed = Arc::new(StatusFeed::new(config.dashboard.broadcast_capacity));
    let sessions = Arc::new(SessionRegistry::new());

    let mut tasks = Vec::new();
    let (persistence, store) = if config.persistence.enabled {
        let store = Arc::new(
            JsonlStore::open(&config.persistence.data_dir)
                .await
                .context("Failed to open persistence directory")?,
        );
        let (handle, writer) = spawn_writer(store.clone(), config.persistence.queue_size);
        tasks.push(writer);
        (handle, Some(store))
    } else {
        (PersistenceHandle::disabled(), None)
    };

    let engine = DecisionEngine::new(
        Arc::new(ConfigHandle::new(config.clone())),
        EngineDeps {
            sink: sessions.clone(),
            feed: feed.clone(),
            clock: clock.clone(),
            predictors: default_predictors(),
            persistence,
        },
    );
    if let Some(store) = &store {
        if let Err(e) = engine.bootstrap(store.as_ref()).await {
            warn!("Bootstrap from {} failed, starting cold: {}", store.dir().display(), e);
        }
    }
    tasks.extend(engine.start());

    let dashboard = if config.dashboard.enabled {
        let server = DashboardServer::new(DashboardConfig::from(&config.dashboard), feed.clone());
        Some(server.start().await.context("Failed to start dashboard")?)
    } else {
        None
    };

    let server = EngineServer::bind(&config.server, engine.router(), sessions, clock)
        .await
        .context("Failed to bind execution-client listener")?;
    info!("Decision engine listening on {}", server.local_addr()?);
    tasks.push(server.spawn());

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    info!("Shutting down Torq Decision Engine");
    engine.shutdown();
    if let Some(dashboard) = dashboard {
        dashboard.shutdown();
    }
    for task in tasks {
        task.abort();
    }
    Ok(())
}
