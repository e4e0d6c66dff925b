//! Bridge configuration types and defaults.
//!
//! This module defines the configuration options for a script environment:
//! token retention, the host call budget, tracing and metrics naming.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// Default maximum host function calls per environment (0 = unlimited)
pub const DEFAULT_MAX_HOST_CALLS: u32 = 0;

/// Default Prometheus metric prefix
pub const DEFAULT_METRICS_PREFIX: &str = "nexus_bridge";

/// Configuration for one script environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Keep a spent marker for fired timer and loaded XHR tokens
    /// (default: true). When false the entry is evicted after use.
    #[serde(default = "default_true")]
    pub retain_fired_tokens: bool,

    /// Maximum foreign calls per environment (0 = unlimited)
    #[serde(default = "default_max_host_calls")]
    pub max_host_calls: u32,

    /// Emit a debug event for every foreign call (default: false)
    #[serde(default)]
    pub trace_host_calls: bool,

    /// Prefix for exported Prometheus metrics
    #[serde(default = "default_metrics_prefix")]
    pub metrics_prefix: String,

    /// Enable debug mode (default: false)
    #[serde(default)]
    pub debug: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            retain_fired_tokens: true,
            max_host_calls: DEFAULT_MAX_HOST_CALLS,
            trace_host_calls: false,
            metrics_prefix: DEFAULT_METRICS_PREFIX.to_string(),
            debug: false,
        }
    }
}

impl BridgeConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON configuration
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    /// Keep or evict spent tokens
    pub fn with_retained_tokens(mut self, retain: bool) -> Self {
        self.retain_fired_tokens = retain;
        self
    }

    /// Set the host call budget
    pub fn with_max_host_calls(mut self, max: u32) -> Self {
        self.max_host_calls = max;
        self
    }

    /// Enable or disable per-call tracing
    pub fn with_call_tracing(mut self, enable: bool) -> Self {
        self.trace_host_calls = enable;
        self
    }

    /// Set the metrics prefix
    pub fn with_metrics_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.metrics_prefix = prefix.into();
        self
    }

    /// Enable debug mode
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.metrics_prefix.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "metrics_prefix".into(),
                reason: "must not be empty".into(),
            });
        }

        let mut chars = self.metrics_prefix.chars();
        let valid_start = chars
            .next()
            .map(|c| c.is_ascii_alphabetic() || c == '_' || c == ':')
            .unwrap_or(false);
        let valid_rest = chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':');
        if !valid_start || !valid_rest {
            return Err(ConfigError::InvalidValue {
                field: "metrics_prefix".into(),
                reason: "must match [a-zA-Z_:][a-zA-Z0-9_:]*".into(),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Invalid configuration value
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue {
        /// The field name
        field: String,
        /// The reason it's invalid
        reason: String,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_max_host_calls() -> u32 {
    DEFAULT_MAX_HOST_CALLS
}

fn default_metrics_prefix() -> String {
    DEFAULT_METRICS_PREFIX.to_string()
}
