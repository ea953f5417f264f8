#![forbid(unsafe_code)]

//! History configuration.
//!
//! ```toml
//! # history.toml
//! maximum_stack_length = 200
//! group_window_ms = 250
//!
//! # unknown keys are kept as pass-through options
//! track_selection = true
//! ```
//!
//! ```rust,ignore
//! let config = HistoryConfig::from_toml_file("history.toml")?;
//! let config = HistoryConfig::from_json_str(json)?;
//! ```

#[cfg(feature = "config-file")]
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Default bound on the number of stored records.
pub const DEFAULT_MAXIMUM_STACK_LENGTH: usize = 500;

/// Group windows at or above this are almost certainly seconds passed as
/// milliseconds.
const MAX_GROUP_WINDOW_MS: u64 = 60 * 60 * 1000;

/// Errors from loading or validating a [`HistoryConfig`].
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[cfg(feature = "config-file")]
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid {field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },
}

/// Configuration for an [`UndoManager`](crate::UndoManager).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// Maximum number of records kept; oldest evicted first (`0` = unbounded).
    pub maximum_stack_length: usize,
    /// Changes observed within this many milliseconds of the previous one
    /// share a group (`0` = disabled).
    pub group_window_ms: u64,
    /// Pass-through options, not interpreted by the engine.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            maximum_stack_length: DEFAULT_MAXIMUM_STACK_LENGTH,
            group_window_ms: 0,
            extra: Map::new(),
        }
    }
}

impl HistoryConfig {
    /// Create a configuration with a custom stack bound.
    #[must_use]
    pub fn new(maximum_stack_length: usize) -> Self {
        Self {
            maximum_stack_length,
            ..Self::default()
        }
    }

    /// Create unlimited configuration (for testing).
    #[must_use]
    pub fn unlimited() -> Self {
        Self::new(0)
    }

    /// Set the idle window for coalescing ungrouped changes.
    #[must_use]
    pub fn with_group_window(mut self, window: Duration) -> Self {
        self.group_window_ms = u64::try_from(window.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Idle window as a duration, if enabled.
    #[must_use]
    pub fn group_window(&self) -> Option<Duration> {
        (self.group_window_ms > 0).then(|| Duration::from_millis(self.group_window_ms))
    }

    /// Check parameter ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.group_window_ms >= MAX_GROUP_WINDOW_MS {
            return Err(ConfigError::Invalid {
                field: "group_window_ms",
                message: format!(
                    "{} ms is an hour or more; the window is in milliseconds",
                    self.group_window_ms
                ),
            });
        }
        Ok(())
    }

    /// Load from a JSON string.
    pub fn from_json_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML string.
    #[cfg(feature = "config-file")]
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file on disk.
    #[cfg(feature = "config-file")]
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&content)
    }
}
