//! Node configuration.

use crate::aggregation::StalenessPolicy;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Configuration for a paceboard node instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Path where the node stores its record collections.
    pub storage_path: PathBuf,
    /// Build/version tag handed to every real-time connection on connect.
    #[serde(default = "default_build_tag")]
    pub build_tag: String,
    /// Per-connection event queue bound for the real-time channel.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Activity window of the aggregation staleness guard, in minutes of
    /// allowed clock skew. `None` disables the guard.
    #[serde(default = "default_staleness_skew")]
    pub staleness_skew_minutes: Option<i64>,
}

fn default_build_tag() -> String {
    format!("paceboard/{}", env!("CARGO_PKG_VERSION"))
}

fn default_queue_capacity() -> usize {
    64
}

fn default_staleness_skew() -> Option<i64> {
    Some(5)
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from("data"),
            build_tag: default_build_tag(),
            queue_capacity: default_queue_capacity(),
            staleness_skew_minutes: default_staleness_skew(),
        }
    }
}

impl NodeConfig {
    /// Create a configuration with the specified storage path.
    pub fn new(storage_path: PathBuf) -> Self {
        Self {
            storage_path,
            ..Default::default()
        }
    }

    pub fn with_build_tag(mut self, build_tag: impl Into<String>) -> Self {
        self.build_tag = build_tag.into();
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Disable the aggregation staleness guard.
    pub fn without_staleness_guard(mut self) -> Self {
        self.staleness_skew_minutes = None;
        self
    }

    /// Load a configuration from a TOML file.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config: NodeConfig = toml::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if let Some(minutes) = self.staleness_skew_minutes {
            if minutes < 0 {
                return Err(ConfigError::Invalid(
                    "staleness_skew_minutes must be >= 0".into(),
                ));
            }
        }
        Ok(())
    }

    /// The staleness policy this configuration selects.
    pub fn staleness_policy(&self) -> StalenessPolicy {
        match self.staleness_skew_minutes {
            Some(minutes) => StalenessPolicy::ActiveSince {
                skew: Duration::minutes(minutes),
            },
            None => StalenessPolicy::Disabled,
        }
    }
}
