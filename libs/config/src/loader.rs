//! Configuration loading
//!
//! Sources, lowest precedence first:
//! 1. Serde defaults for every field
//! 2. TOML file (`--config` path, or `config/decision_engine.toml` if present)
//! 3. Environment variables `TORQ__SECTION__FIELD`, e.g. `TORQ__SERVER__PORT=7700`

use crate::engine::EngineConfig;
use anyhow::{Context, Result};
use config_crate::{Config, Environment, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const DEFAULT_CONFIG_PATH: &str = "config/decision_engine.toml";
pub const ENV_PREFIX: &str = "TORQ";

impl EngineConfig {
    /// Load from an optional file plus environment overrides
    ///
    /// An explicitly given path must exist; the default path is optional.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                info!("Loading configuration: {:?}", path);
                builder = builder.add_source(File::from(path).required(true));
            }
            None => {
                debug!("Looking for optional configuration at {}", DEFAULT_CONFIG_PATH);
                builder = builder.add_source(File::with_name(DEFAULT_CONFIG_PATH).required(false));
            }
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: EngineConfig = builder
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        Ok(config)
    }

    /// Parse a TOML document without consulting files or the environment
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse TOML configuration")
    }

    /// Expand `~` and `$VARS` in path settings
    pub fn expand_env_vars(&mut self) -> Result<()> {
        let raw = self.persistence.data_dir.to_string_lossy().to_string();
        let expanded = shellexpand::full(&raw).context("Failed to expand persistence.data_dir")?;
        self.persistence.data_dir = PathBuf::from(expanded.as_ref());
        Ok(())
    }
}

/// Load, expand and validate in one step
pub fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let mut config = EngineConfig::load(path)?;
    config.expand_env_vars()?;
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_partial_file_keeps_defaults() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");

        let config_content = r#"
[server]
port = 7701

[ensemble]
deadline_ms = 50

[ensemble.initial_weights]
momentum = 0.4
trend = 0.6

[validator]
min_confidence = 0.65
max_daily_loss = 250.0
"#;
        fs::write(&config_path, config_content).unwrap();

        let config = load_config(Some(&config_path)).unwrap();
        assert_eq!(config.server.port, 7701);
        assert_eq!(config.server.bind_address, "127.0.0.1");
        assert_eq!(config.ensemble.deadline_ms, 50);
        assert_eq!(config.ensemble.initial_weights.get("trend"), Some(&0.6));
        assert_eq!(config.validator.min_confidence, 0.65);
        assert_eq!(config.features.window_capacity, 200);
        assert_eq!(config.trailing.interval_secs, 15);
    }

    #[test]
    fn test_missing_explicit_file_fails() {
        let dir = tempdir().unwrap();
        let missing = dir.path().join("nope.toml");
        assert!(load_config(Some(&missing)).is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(
            &config_path,
            "[features]\nwindow_capacity = 10\nmin_window = 30\n",
        )
        .unwrap();
        let err = load_config(Some(&config_path)).unwrap_err();
        assert!(format!("{:#}", err).contains("min_window"));
    }

    #[test]
    fn test_environment_override() {
        let dir = tempdir().unwrap();
        let config_path = dir.path().join("engine.toml");
        fs::write(&config_path, "[dispatcher]\ncommand_timeout_ms = 1000\n").unwrap();

        std::env::set_var("TORQ__DISPATCHER__SWEEP_INTERVAL_MS", "125");
        let config = load_config(Some(&config_path)).unwrap();
        std::env::remove_var("TORQ__DISPATCHER__SWEEP_INTERVAL_MS");

        assert_eq!(config.dispatcher.command_timeout_ms, 1000);
        assert_eq!(config.dispatcher.sweep_interval_ms, 125);
    }

    #[test]
    fn test_from_toml_str_and_expansion() {
        std::env::set_var("TORQ_TEST_DATA_ROOT", "/var/lib/torq");
        let mut config =
            EngineConfig::from_toml_str("[persistence]\ndata_dir = \"$TORQ_TEST_DATA_ROOT/engine\"\n")
                .unwrap();
        config.expand_env_vars().unwrap();
        assert_eq!(config.persistence.data_dir, PathBuf::from("/var/lib/torq/engine"));
    }
}
