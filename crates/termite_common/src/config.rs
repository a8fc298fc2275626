use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Top-level driver configuration (`termite.toml`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TermiteConfig {
    /// Prometheus listen address. Metrics are only exported when set.
    #[serde(default)]
    pub metrics_addr: Option<String>,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub driver: DriverConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite database file. `:memory:` opens a private in-memory database.
    pub path: String,
    /// How long SQLite's busy handler may wait for a lock before a step
    /// reports busy. 0 reports contention immediately.
    #[serde(default)]
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "termite.db".to_string(),
            busy_timeout_ms: 0,
        }
    }
}

/// Where statement stepping and encoding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecMode {
    /// Inline on the thread that received the command.
    #[default]
    Sync,
    /// On the connection's worker thread; dispatch returns immediately.
    Deferred,
}

impl FromStr for ExecMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sync" => Ok(ExecMode::Sync),
            "deferred" => Ok(ExecMode::Deferred),
            other => Err(format!(
                "unknown exec mode '{}' (expected sync or deferred)",
                other
            )),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverConfig {
    #[serde(default)]
    pub exec_mode: ExecMode,
    /// Commands that may wait for the deferred worker before dispatch blocks.
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
    /// Reply address stamped on every successful reply.
    #[serde(default)]
    pub destination: DestinationConfig,
}

fn default_queue_depth() -> usize {
    64
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            exec_mode: ExecMode::Sync,
            queue_depth: default_queue_depth(),
            destination: DestinationConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub node: String,
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub creation: u32,
}

impl Default for DestinationConfig {
    fn default() -> Self {
        Self {
            node: "nonode@nohost".to_string(),
            id: 0,
            creation: 0,
        }
    }
}

impl TermiteConfig {
    /// Read and validate a TOML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: TermiteConfig = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.database.path.trim().is_empty() {
            return Err(ConfigError::Invalid("database.path must not be empty".into()));
        }
        if self.driver.queue_depth == 0 {
            return Err(ConfigError::Invalid(
                "driver.queue_depth must be at least 1".into(),
            ));
        }
        if self.driver.destination.node.is_empty() {
            return Err(ConfigError::Invalid(
                "driver.destination.node must not be empty".into(),
            ));
        }
        Ok(())
    }
}
