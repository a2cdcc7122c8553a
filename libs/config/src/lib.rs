//! # Torq Decision Engine Configuration
//!
//! Versioned configuration for every stage of the decision engine.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use torq_config::{load_config, ConfigHandle};
//!
//! let config = load_config(None).expect("configuration");
//! let handle = ConfigHandle::new(config);
//! let snapshot = handle.snapshot();
//! println!("deadline: {:?}", snapshot.config.ensemble.deadline());
//! ```

pub mod engine;
pub mod handle;
pub mod loader;

// Re-export commonly used types
pub use engine::{
    DashboardSection, DispatcherConfig, EngineConfig, EnsembleConfig, FeatureConfig,
    LearningConfig, LoggingConfig, PersistenceConfig, PlannerConfig, RetryConfig, RiskConfig,
    ServerConfig, TrailingConfig, ValidatorConfig,
};
pub use handle::{ConfigHandle, ConfigSnapshot};
pub use loader::{load_config, DEFAULT_CONFIG_PATH};
