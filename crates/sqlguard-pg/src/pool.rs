//! Connection pool.
//!
//! Wraps a `sqlx` [`PgPool`] with an explicit lifecycle
//! (`Uninitialized -> Connecting -> Ready -> Closed`) and a FIFO semaphore bounding the number
//! of connections checked out at once. A pool is never reconnected in place: once it leaves
//! `Ready` (or a connect fails) it is `Closed`, and a new pool must be built.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use sqlguard_core::{ExecutorConfig, PoolConfig};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres};
use tokio::sync::{OnceCell, OwnedSemaphorePermit, Semaphore};

use crate::error::PoolError;

/// Pool lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    Uninitialized,
    Connecting,
    Ready,
    Closed,
}

impl fmt::Display for PoolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PoolState::Uninitialized => "uninitialized",
            PoolState::Connecting => "connecting",
            PoolState::Ready => "ready",
            PoolState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Process-wide Postgres connection pool.
pub struct ConnectionPool {
    options: PgConnectOptions,
    config: PoolConfig,
    state: Mutex<PoolState>,
    inner: OnceCell<PgPool>,
    permits: Arc<Semaphore>,
}

impl ConnectionPool {
    /// Build an unconnected pool. Every connection it opens carries the executor's
    /// `statement_timeout`.
    pub fn new(
        url: &str,
        config: &PoolConfig,
        executor: &ExecutorConfig,
    ) -> Result<Self, PoolError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| PoolError::InvalidUrl(e.to_string()))?
            .options([("statement_timeout", executor.statement_timeout_ms.to_string())]);

        Ok(Self {
            options,
            config: config.clone(),
            state: Mutex::new(PoolState::Uninitialized),
            inner: OnceCell::new(),
            permits: Arc::new(Semaphore::new(config.max_connections as usize)),
        })
    }

    pub fn state(&self) -> PoolState {
        *self.lock_state()
    }

    /// Connect, retrying an unreachable target with bounded exponential backoff.
    ///
    /// Idempotent: concurrent and repeated calls share one connect. A failed connect closes
    /// the pool for good.
    pub async fn connect(&self) -> Result<(), PoolError> {
        self.inner.get_or_try_init(|| self.open()).await.map(|_| ())
    }

    async fn open(&self) -> Result<PgPool, PoolError> {
        {
            let mut state = self.lock_state();
            match *state {
                PoolState::Uninitialized => *state = PoolState::Connecting,
                _ => return Err(PoolError::Closed),
            }
        }

        let attempts = self.config.connect_attempts.max(1);
        let mut last_error = String::new();

        for attempt in 1..=attempts {
            let result = PgPoolOptions::new()
                .min_connections(self.config.min_connections)
                .max_connections(self.config.max_connections)
                .acquire_timeout(self.config.acquire_timeout())
                .connect_with(self.options.clone())
                .await;

            match result {
                Ok(pool) => {
                    self.set_state(PoolState::Ready);
                    tracing::info!(
                        host = %self.options.get_host(),
                        database = self.options.get_database().unwrap_or_default(),
                        max_connections = self.config.max_connections,
                        "Connection pool ready"
                    );
                    return Ok(pool);
                }
                Err(e) => {
                    last_error = e.to_string();
                    if attempt < attempts {
                        let delay = self.config.backoff_delay(attempt);
                        tracing::warn!(
                            attempt,
                            attempts,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "Connect failed, retrying"
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.set_state(PoolState::Closed);
        self.permits.close();
        tracing::error!(attempts, error = %last_error, "Database unreachable");
        Err(PoolError::Unreachable {
            attempts,
            message: last_error,
        })
    }

    /// Check out a connection, connecting first if needed. Waiters are served FIFO.
    pub async fn acquire(&self) -> Result<PooledConnection, PoolError> {
        self.connect().await?;
        let pool = match (self.state(), self.inner.get()) {
            (PoolState::Ready, Some(pool)) => pool,
            _ => return Err(PoolError::Closed),
        };

        let timeout = self.config.acquire_timeout();
        let permit = tokio::time::timeout(timeout, self.permits.clone().acquire_owned())
            .await
            .map_err(|_| PoolError::AcquireTimeout(timeout))?
            .map_err(|_| PoolError::Closed)?;

        let conn = pool.acquire().await.map_err(|e| match e {
            sqlx::Error::PoolClosed => PoolError::Closed,
            sqlx::Error::PoolTimedOut => PoolError::AcquireTimeout(timeout),
            other => PoolError::Acquire(other.to_string()),
        })?;

        Ok(PooledConnection {
            conn,
            _permit: permit,
        })
    }

    /// Return a connection to the pool.
    pub fn release(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// Close the pool, waiting for checked-out connections to come back. Safe to call
    /// repeatedly.
    pub async fn close(&self) {
        let previous = {
            let mut state = self.lock_state();
            std::mem::replace(&mut *state, PoolState::Closed)
        };
        self.permits.close();
        if let Some(pool) = self.inner.get() {
            pool.close().await;
        }
        if previous != PoolState::Closed {
            tracing::info!(previous = %previous, "Connection pool closed");
        }
    }

    /// Connections currently open, idle or in use.
    pub fn size(&self) -> u32 {
        self.inner.get().map(|pool| pool.size()).unwrap_or(0)
    }

    fn set_state(&self, next: PoolState) {
        *self.lock_state() = next;
    }

    fn lock_state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// A checked-out connection. Dropping it releases it to the pool.
pub struct PooledConnection {
    conn: PoolConnection<Postgres>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.conn
    }

    /// Take the connection out of the pool and close it instead of reusing it.
    pub fn retire(self) {
        let Self { conn, _permit } = self;
        drop(conn.detach());
        tracing::debug!("Connection retired");
    }
}
