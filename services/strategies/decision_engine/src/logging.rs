//! Standardized logging for the decision engine
//!
//! Emoji prefixes make decision, execution and risk events easy to pick out
//! of a busy log. `RUST_LOG` always overrides the configured level.

use anyhow::{Context, Result};
use torq_config::LoggingConfig;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Standard emoji set for decision engine logging
pub struct LogEmoji;

impl LogEmoji {
    // Status indicators
    pub const SUCCESS: &'static str = "✅";
    pub const ERROR: &'static str = "❌";
    pub const WARNING: &'static str = "⚠️";

    // Module-specific
    pub const DECISION: &'static str = "🧠";
    pub const EXECUTE: &'static str = "⚡";
    pub const RISK: &'static str = "🛡️";
    pub const TRAIL: &'static str = "🎯";
    pub const LEARN: &'static str = "📈";
    pub const POSITION: &'static str = "📍";
    pub const NETWORK: &'static str = "🌐";
}

/// Install the global subscriber
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .context("Invalid log level")?;

    let registry = tracing_subscriber::registry().with(filter);
    if config.json {
        registry
            .with(fmt::layer().json())
            .try_init()
            .context("Failed to install JSON log subscriber")?;
    } else {
        registry
            .with(fmt::layer())
            .try_init()
            .context("Failed to install log subscriber")?;
    }
    Ok(())
}

#[macro_export]
macro_rules! log_success {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::SUCCESS, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_decision {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::DECISION, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_execution {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::EXECUTE, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_risk {
    ($($arg:tt)*) => {
        tracing::warn!("{} {}", $crate::logging::LogEmoji::RISK, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_trailing {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::TRAIL, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_learning {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::LEARN, format!($($arg)*))
    };
}

#[macro_export]
macro_rules! log_position {
    ($($arg:tt)*) => {
        tracing::info!("{} {}", $crate::logging::LogEmoji::POSITION, format!($($arg)*))
    };
}
