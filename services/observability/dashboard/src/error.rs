//! Error types for dashboard WebSocket server

use thiserror::Error;

#[derive(Debug, Error)]
pub enum DashboardError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] warp::Error),

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Client error: {message}")]
    Client { message: String },
}

pub type Result<T> = std::result::Result<T, DashboardError>;
