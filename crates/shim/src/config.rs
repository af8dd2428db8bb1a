//! Configuration of the shim harness.
//!
//! The file carries the context settings under `[shim]` plus the harness'
//! own session and logging sections.

use serde::{Deserialize, Serialize};
use shim_core::ShimConfig;
use std::path::Path;
use tracing::info;

fn default_pump_interval_ms() -> u64 {
    16
}

fn default_resolve() -> Vec<String> {
    vec![
        "SteamClient020".to_string(),
        "SteamUser021".to_string(),
        "SteamFriends017".to_string(),
        "SteamUtils010".to_string(),
    ]
}

fn default_level() -> String {
    "info".to_string()
}

/// Harness configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Settings handed to the context
    #[serde(default)]
    pub shim: ShimConfig,
    /// How the harness drives its session
    #[serde(default)]
    pub session: SessionSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Delay between two pumps in milliseconds
    #[serde(default = "default_pump_interval_ms")]
    pub pump_interval_ms: u64,
    /// Version tokens resolved after the session starts
    #[serde(default = "default_resolve")]
    pub resolve: Vec<String>,
    #[serde(default)]
    pub server: bool,
    #[serde(default)]
    pub manual_dispatch: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            pump_interval_ms: default_pump_interval_ms(),
            resolve: default_resolve(),
            server: false,
            manual_dispatch: false,
        }
    }
}

/// Controls log output format and level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_level(),
            json_format: false,
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, writes the default configuration to `path`
    /// and returns it.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Checks the configuration for values the harness cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.session.pump_interval_ms == 0 {
            return Err("session.pump_interval_ms must be greater than zero".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        self.shim.validate().map_err(|e| e.to_string())
    }
}
