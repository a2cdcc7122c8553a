//! Dashboard WebSocket Server
//!
//! Streams decision engine status envelopes to monitoring clients over
//! WebSocket (`/ws`, `/stream`) with `/health` and `/status` HTTP endpoints.

pub mod client;
pub mod config;
pub mod error;
pub mod feed;
pub mod server;

pub use client::{Client, ClientManager};
pub use config::DashboardConfig;
pub use error::{DashboardError, Result};
pub use feed::StatusFeed;
pub use server::DashboardServer;
