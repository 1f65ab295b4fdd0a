//! # sqlguard-core
//!
//! Types shared by every sqlguard crate:
//!
//! - [`AccessMode`] and the process-wide [`AccessControl`] cell
//! - [`SqlParam`], [`Record`] and [`QueryResult`], the executor's wire-independent data model
//! - [`GuardConfig`] and its sections, loaded from YAML

pub mod access;
pub mod config;
pub mod record;

pub use access::{AccessControl, AccessMode};
pub use config::{
    ConfigError, ExecutorConfig, GatewayPolicyConfig, GuardConfig, HarnessConfig, PoolConfig,
    Scope, TargetSchema, UpstreamConfig,
};
pub use record::{QueryResult, Record, SqlParam};
