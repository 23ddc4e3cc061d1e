//! Operator configuration, read from TOML.
//!
//! Every field has a default, so an empty file (or no file at all) yields a
//! working configuration.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Top-level operator configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OperatorConfig {
    pub controller: ControllerSettings,
    pub backoff: BackoffSettings,
    pub logging: LoggingSettings,
}

/// `[controller]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSettings {
    /// Concurrent reconciliation workers per controller.
    pub workers: usize,
    /// List all watched objects on start.
    pub resync_on_start: bool,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            workers: 2,
            resync_on_start: true,
        }
    }
}

/// `[backoff]` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BackoffSettings {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_factor: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_delay_ms: 5,
            max_delay_ms: 60_000,
            jitter_factor: 0.1,
        }
    }
}

impl BackoffSettings {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Read, parse and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::file_read_failed(path, e.to_string()))?;
        let config: Self =
            toml::from_str(&contents).map_err(|e| Error::toml_parse_failed(path, e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the controllers can't run with.
    pub fn validate(&self) -> Result<()> {
        if self.controller.workers == 0 {
            return Err(Error::invalid_config("controller.workers must be at least 1"));
        }
        if self.backoff.base_delay_ms > self.backoff.max_delay_ms {
            return Err(Error::invalid_config(format!(
                "backoff.base_delay_ms ({}) exceeds backoff.max_delay_ms ({})",
                self.backoff.base_delay_ms, self.backoff.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.backoff.jitter_factor) {
            return Err(Error::invalid_config(format!(
                "backoff.jitter_factor must be within [0, 1], got {}",
                self.backoff.jitter_factor
            )));
        }
        Ok(())
    }
}
