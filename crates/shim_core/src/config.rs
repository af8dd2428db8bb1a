//! Runtime settings of a [`ShimContext`](crate::ShimContext).

use crate::error::{Result, ShimError};
use crate::resolver::{Family, InterfaceTable};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

fn default_enabled() -> bool {
    true
}

fn default_grace_period_ms() -> u64 {
    1000
}

fn default_stall_bound_ms() -> u64 {
    200
}

/// Settings read by the keepalive thread.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepaliveSettings {
    /// Whether binding a client starts the keepalive thread at all
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Delay between thread start and the first stall check
    #[serde(default = "default_grace_period_ms")]
    pub grace_period_ms: u64,
    /// Longest time without a dispatch cycle before one is forced
    #[serde(default = "default_stall_bound_ms")]
    pub stall_bound_ms: u64,
}

impl Default for KeepaliveSettings {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            grace_period_ms: default_grace_period_ms(),
            stall_bound_ms: default_stall_bound_ms(),
        }
    }
}

impl KeepaliveSettings {
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn stall_bound(&self) -> Duration {
        Duration::from_millis(self.stall_bound_ms)
    }
}

/// Interface resolution settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceSettings {
    /// Family name to version token used by the legacy accessors,
    /// e.g. `SteamUser = "SteamUser017"`
    #[serde(default)]
    pub legacy_versions: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShimConfig {
    #[serde(default)]
    pub keepalive: KeepaliveSettings,
    #[serde(default)]
    pub interfaces: InterfaceSettings,
}

impl ShimConfig {
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: ShimConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }

    /// Checks the settings for values the context cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.keepalive.stall_bound_ms == 0 {
            return Err(ShimError::Config(
                "keepalive.stall_bound_ms must be greater than zero".to_string(),
            ));
        }

        let table = InterfaceTable::builtin();
        for (name, token) in &self.interfaces.legacy_versions {
            let Some(family) = Family::from_name(name) else {
                return Err(ShimError::Config(format!(
                    "Unknown interface family in legacy_versions: {name}"
                )));
            };
            match table.family_for(token) {
                Some(spec) if spec.family == family => {}
                _ => {
                    return Err(ShimError::Config(format!(
                        "Legacy version {token} does not belong to {name}"
                    )))
                }
            }
        }

        Ok(())
    }

    /// Legacy overrides keyed by family. Entries that fail validation are skipped.
    pub fn legacy_overrides(&self) -> BTreeMap<Family, String> {
        self.interfaces
            .legacy_versions
            .iter()
            .filter_map(|(name, token)| Some((Family::from_name(name)?, token.clone())))
            .collect()
    }
}
