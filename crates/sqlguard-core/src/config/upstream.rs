//! Upstream database configuration types.
//!
//! Three ways to name the target database, in order of precedence:
//! 1. `database_url_env` - reference an environment variable
//! 2. `database_url` - provide the URL directly
//! 3. Individual fields (host, port, database, username, password)

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, utf8_percent_encode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Everything but RFC 3986 unreserved characters is escaped in URL components.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Configuration for the target Postgres connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Environment variable name containing the PostgreSQL connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url_env: Option<String>,

    /// Full PostgreSQL connection URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,

    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_database")]
    pub database: String,

    #[serde(default = "default_username")]
    pub username: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Environment variable containing the password.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_env: Option<String>,

    /// Connection pool configuration.
    #[serde(default)]
    pub pool: PoolConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            database_url_env: None,
            database_url: None,
            host: default_host(),
            port: default_port(),
            database: default_database(),
            username: default_username(),
            password: None,
            password_env: None,
            pool: PoolConfig::default(),
        }
    }
}

impl UpstreamConfig {
    /// Build a PostgreSQL connection string from this configuration.
    pub fn connection_string(&self) -> String {
        if let Some(env_var) = &self.database_url_env
            && let Ok(url) = std::env::var(env_var)
        {
            return url;
        }

        if let Some(url) = &self.database_url {
            return url.clone();
        }

        let username = utf8_percent_encode(&self.username, COMPONENT);
        let database = utf8_percent_encode(&self.database, COMPONENT);
        match self.get_password() {
            Some(password) => format!(
                "postgresql://{}:{}@{}:{}/{}",
                username,
                utf8_percent_encode(&password, COMPONENT),
                self.host,
                self.port,
                database
            ),
            None => format!(
                "postgresql://{}@{}:{}/{}",
                username, self.host, self.port, database
            ),
        }
    }

    fn get_password(&self) -> Option<String> {
        if let Some(env_var) = &self.password_env
            && let Ok(password) = std::env::var(env_var)
        {
            return Some(password);
        }
        self.password.clone()
    }
}

/// Connection pool sizing and connect behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Minimum number of connections to maintain.
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Maximum number of connections, and the maximum number of concurrent acquisitions.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Timeout in seconds when acquiring a connection.
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_seconds: u64,

    /// Connect attempts before giving up on an unreachable target.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// First backoff delay between connect attempts, doubled after each failure.
    #[serde(default = "default_backoff_initial")]
    pub backoff_initial_ms: u64,

    /// Upper bound on a single backoff delay.
    #[serde(default = "default_backoff_max")]
    pub backoff_max_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: default_min_connections(),
            max_connections: default_max_connections(),
            acquire_timeout_seconds: default_acquire_timeout(),
            connect_attempts: default_connect_attempts(),
            backoff_initial_ms: default_backoff_initial(),
            backoff_max_ms: default_backoff_max(),
        }
    }
}

impl PoolConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_seconds)
    }

    /// Delay before retry number `attempt` (1-based): initial * 2^(attempt-1), capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.backoff_initial_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.backoff_max_ms))
    }
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_username() -> String {
    "postgres".to_string()
}

fn default_min_connections() -> u32 {
    1
}

fn default_max_connections() -> u32 {
    5
}

fn default_acquire_timeout() -> u64 {
    10
}

fn default_connect_attempts() -> u32 {
    5
}

fn default_backoff_initial() -> u64 {
    200
}

fn default_backoff_max() -> u64 {
    5_000
}
