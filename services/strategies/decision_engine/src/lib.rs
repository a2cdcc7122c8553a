//! # Decision Engine
//!
//! Real-time trading decision engine. Market data and execution reports
//! arrive as newline-delimited JSON from execution clients; the engine
//! answers with entry, exit and stop-update commands.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────┐   ┌───────────────┐
//! │ EngineServer │──→│ EventRouter   │──→│ Ensemble │──→│ ValidatorChain│
//! │ (NDJSON/TCP) │   │ (per symbol)  │   └──────────┘   └───────┬───────┘
//! └──────▲───────┘   └──────┬────────┘                          │
//!        │                  ↓                                   ↓
//!        │           PositionTracker ←──────────────── CommandDispatcher
//!        │                  │                                   │
//!        │        TrailingSupervisor / FeedbackLoop             │
//!        └──────────────────────────────────────────────────────┘
//! ```

pub mod dispatcher;
pub mod engine;
pub mod ensemble;
pub mod error;
pub mod features;
pub mod learning;
pub mod logging;
pub mod params;
pub mod persistence;
pub mod pipeline;
pub mod position;
pub mod risk;
pub mod server;
pub mod session;
pub mod status;
pub mod testing;
pub mod trailing;
pub mod validator;

pub use dispatcher::{CommandDispatcher, CommandRequest, CommandSink, SubmitOutcome};
pub use engine::{DecisionEngine, EngineDeps};
pub use ensemble::{default_predictors, Ensemble, Predictor, TradePlanner};
pub use error::{EngineError, Result};
pub use features::{FeatureCache, FeaturePipeline, MarketStats};
pub use learning::{FeedbackLoop, LearningPhase};
pub use params::ParameterStore;
pub use persistence::{spawn_writer, JsonlStore, PersistenceBackend, PersistenceHandle};
pub use pipeline::{ActionOutcome, DecisionPipeline, EventRouter};
pub use position::{PositionEvent, PositionTracker};
pub use risk::RiskLedger;
pub use server::EngineServer;
pub use session::SessionRegistry;
pub use status::StatusHub;
pub use trailing::{TrailingEngine, TrailingSupervisor};
pub use validator::ValidatorChain;
