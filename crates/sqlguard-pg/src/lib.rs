//! # sqlguard-pg
//!
//! Postgres side of sqlguard:
//!
//! - [`ConnectionPool`]: one per process, connected on demand, closed idempotently
//! - [`QueryExecutor`]: protocol-level parameter binding, optional read-only transaction,
//!   typed errors
//! - [`GuardedExecutor`]: the gateway in front of the executor, mode read per call

mod decode;
pub mod error;
pub mod executor;
pub mod guarded;
pub mod pool;

pub use error::{ExecutorError, GuardError, PoolError};
pub use executor::QueryExecutor;
pub use guarded::GuardedExecutor;
pub use pool::{ConnectionPool, PoolState, PooledConnection};
