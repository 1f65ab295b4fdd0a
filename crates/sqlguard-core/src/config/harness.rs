//! Injection harness configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which part of the corpus a run exercises.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Critical and high severity cases only.
    Quick,
    /// The full corpus.
    #[default]
    Comprehensive,
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::Quick => f.write_str("quick"),
            Scope::Comprehensive => f.write_str("comprehensive"),
        }
    }
}

/// The provisioned schema attack payloads are rendered against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSchema {
    /// Users-like table created by the fixture.
    #[serde(default = "default_table")]
    pub table: String,

    /// Text column used in injected predicates.
    #[serde(default = "default_column")]
    pub column: String,

    /// Username of the seeded administrator row.
    #[serde(default = "default_admin")]
    pub admin_username: String,
}

impl Default for TargetSchema {
    fn default() -> Self {
        Self {
            table: default_table(),
            column: default_column(),
            admin_username: default_admin(),
        }
    }
}

/// Harness settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HarnessConfig {
    #[serde(default)]
    pub scope: Scope,

    #[serde(default)]
    pub target: TargetSchema,

    /// Delay injected by time-blind payloads.
    #[serde(default = "default_injected_delay")]
    pub injected_delay_ms: u64,

    /// Fraction of the injected delay the measured excess latency must reach.
    #[serde(default = "default_delay_threshold")]
    pub delay_threshold_ratio: f64,

    /// Control payload executions used to measure the latency baseline.
    #[serde(default = "default_control_samples")]
    pub control_samples: u32,

    /// Executions of each boolean-blind variant; repeats must agree.
    #[serde(default = "default_boolean_samples")]
    pub boolean_samples: u32,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            scope: Scope::default(),
            target: TargetSchema::default(),
            injected_delay_ms: default_injected_delay(),
            delay_threshold_ratio: default_delay_threshold(),
            control_samples: default_control_samples(),
            boolean_samples: default_boolean_samples(),
        }
    }
}

impl HarnessConfig {
    pub fn injected_delay(&self) -> Duration {
        Duration::from_millis(self.injected_delay_ms)
    }
}

fn default_table() -> String {
    "test_users".to_string()
}

fn default_column() -> String {
    "username".to_string()
}

fn default_admin() -> String {
    "admin".to_string()
}

fn default_injected_delay() -> u64 {
    2_000
}

fn default_delay_threshold() -> f64 {
    0.8
}

fn default_control_samples() -> u32 {
    3
}

fn default_boolean_samples() -> u32 {
    2
}
