//! Configuration types for sqlguard.
//!
//! Configuration is loaded from a single optional YAML file (`sqlguard.yaml`). Every section and
//! field has a default, so an empty file (or no file at all) yields a working configuration that
//! targets `postgresql://postgres@localhost:5432/postgres`.

pub mod gateway;
pub mod harness;
pub mod upstream;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

pub use gateway::{ExecutorConfig, GatewayPolicyConfig};
pub use harness::{HarnessConfig, Scope, TargetSchema};
pub use upstream::{PoolConfig, UpstreamConfig};

/// Complete sqlguard configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Target Postgres connection and pool.
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Query executor settings.
    #[serde(default)]
    pub executor: ExecutorConfig,

    /// Gateway rules for RESTRICTED mode.
    #[serde(default)]
    pub gateway: GatewayPolicyConfig,

    /// Injection harness settings.
    #[serde(default)]
    pub harness: HarnessConfig,
}

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl GuardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from YAML content.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can honour.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let pool = &self.upstream.pool;
        if pool.max_connections == 0 {
            return Err(ConfigError::Config(
                "upstream.pool.max_connections must be at least 1".to_string(),
            ));
        }
        if pool.min_connections > pool.max_connections {
            return Err(ConfigError::Config(format!(
                "upstream.pool.min_connections ({}) exceeds max_connections ({})",
                pool.min_connections, pool.max_connections
            )));
        }
        if pool.connect_attempts == 0 {
            return Err(ConfigError::Config(
                "upstream.pool.connect_attempts must be at least 1".to_string(),
            ));
        }
        if self.executor.statement_timeout_ms == 0 {
            return Err(ConfigError::Config(
                "executor.statement_timeout_ms must be positive".to_string(),
            ));
        }
        let ratio = self.harness.delay_threshold_ratio;
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(ConfigError::Config(format!(
                "harness.delay_threshold_ratio must be in (0, 1], got {}",
                ratio
            )));
        }
        if self.harness.control_samples == 0 || self.harness.boolean_samples == 0 {
            return Err(ConfigError::Config(
                "harness sample counts must be at least 1".to_string(),
            ));
        }
        if self.harness.injected_delay_ms >= self.executor.statement_timeout_ms {
            return Err(ConfigError::Config(format!(
                "harness.injected_delay_ms ({}) must be below executor.statement_timeout_ms ({})",
                self.harness.injected_delay_ms, self.executor.statement_timeout_ms
            )));
        }
        Ok(())
    }
}
