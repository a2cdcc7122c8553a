//! Error types for the decision engine

use thiserror::Error;
use types::PositionPhase;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Protocol error: {0}")]
    Protocol(#[from] codec::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] network::TransportError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid transition for {instrument}: {event} while {phase:?}")]
    InvalidTransition {
        instrument: String,
        phase: PositionPhase,
        event: &'static str,
    },

    #[error("Dispatch error: {message}")]
    Dispatch { message: String },

    #[error("No execution client connected for {instrument}")]
    NoSession { instrument: String },

    #[error("Persistence error: {message}")]
    Persistence { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Channel closed: {0}")]
    ChannelClosed(&'static str),
}

pub type Result<T> = std::result::Result<T, EngineError>;
