//! Configuration management for extlife
//!
//! Handles loading and validation of `extlife.toml` configuration files.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::logging::LogConfig;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable output for interactive use
    #[default]
    Pretty,
    /// JSON lines for machine consumption
    Json,
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pretty => f.write_str("pretty"),
            Self::Json => f.write_str("json"),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown log format: {s}. Expected one of: pretty, json")),
        }
    }
}

/// What to do when keepalive claims are outstanding right after a context
/// was torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LateActivityPolicy {
    /// Create a fresh context so the late activity has somewhere to run.
    #[default]
    Recreate,
    /// Leave the context down; log and emit a `late_activity` event.
    Report,
}

impl LateActivityPolicy {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Recreate => "recreate",
            Self::Report => "report",
        }
    }
}

/// Lifecycle timing and policy knobs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Time a lazy context must stay idle before the suspend handshake starts
    pub idle_delay_ms: u64,

    /// Grace period after `Suspend` is sent before the context is torn down
    /// without an acknowledgement
    pub suspending_time_ms: u64,

    /// Reaction to claims that arrive while a context is torn down
    pub late_activity: LateActivityPolicy,

    /// Whether background contexts may be created at all
    pub background_contexts_allowed: bool,

    /// Defer persistent contexts normally created at startup until they are
    /// explicitly requested
    pub defer_startup_contexts: bool,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            idle_delay_ms: 10_000,
            suspending_time_ms: 5_000,
            late_activity: LateActivityPolicy::Recreate,
            background_contexts_allowed: true,
            defer_startup_contexts: false,
        }
    }
}

impl LifecycleConfig {
    #[must_use]
    pub const fn idle_delay(&self) -> Duration {
        Duration::from_millis(self.idle_delay_ms)
    }

    #[must_use]
    pub const fn suspending_time(&self) -> Duration {
        Duration::from_millis(self.suspending_time_ms)
    }

    /// Check timer values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.idle_delay_ms == 0 {
            return Err(ConfigError::ValidationError(
                "lifecycle.idle_delay_ms must be greater than 0".to_string(),
            ));
        }
        if self.suspending_time_ms == 0 {
            return Err(ConfigError::ValidationError(
                "lifecycle.suspending_time_ms must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Lifecycle settings
    #[serde(default)]
    pub lifecycle: LifecycleConfig,

    /// Logging settings
    #[serde(default)]
    pub logging: LogConfig,
}

impl Config {
    /// Parse and validate configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(text).map_err(|e| ConfigError::ParseFailed(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let shown = path.display().to_string();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(shown));
        }
        let text = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::ReadFailed(shown.clone(), e.to_string()))?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!(path = %shown, "loaded config");
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.lifecycle.validate()?;
        self.logging
            .level
            .parse::<crate::logging::LogLevel>()
            .map_err(ConfigError::ValidationError)?;
        Ok(())
    }

    /// Render as TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::SerializeFailed(e.to_string()))
    }
}
