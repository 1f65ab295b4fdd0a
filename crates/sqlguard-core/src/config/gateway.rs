//! Gateway policy and executor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configurable rules applied by the gateway in RESTRICTED mode.
///
/// Mutating and administrative functions are always denied; these switches cover the
/// read-only functions whose output or cost is itself a leak.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayPolicyConfig {
    /// Deny functions and catalogs that expose server configuration
    /// (`current_setting`, `version`, `pg_settings`, ...).
    #[serde(default = "default_true")]
    pub deny_config_introspection: bool,

    /// Deny functions whose only effect is to delay (`pg_sleep` family).
    #[serde(default = "default_true")]
    pub deny_delay_functions: bool,

    /// Additional function names to deny, matched case-insensitively without schema.
    #[serde(default)]
    pub extra_denied_functions: Vec<String>,
}

impl Default for GatewayPolicyConfig {
    fn default() -> Self {
        Self {
            deny_config_introspection: true,
            deny_delay_functions: true,
            extra_denied_functions: Vec::new(),
        }
    }
}

/// Query executor settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Server-side `statement_timeout` applied to every pooled connection.
    #[serde(default = "default_statement_timeout")]
    pub statement_timeout_ms: u64,

    /// Extra time the client waits past the statement timeout before abandoning the call
    /// and retiring its connection.
    #[serde(default = "default_timeout_grace")]
    pub timeout_grace_ms: u64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            statement_timeout_ms: default_statement_timeout(),
            timeout_grace_ms: default_timeout_grace(),
        }
    }
}

impl ExecutorConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// Client-side backstop deadline.
    pub fn client_deadline(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms.saturating_add(self.timeout_grace_ms))
    }
}

fn default_true() -> bool {
    true
}

fn default_statement_timeout() -> u64 {
    10_000
}

fn default_timeout_grace() -> u64 {
    2_000
}
