//! Error types for pooling and execution.

use sqlguard_gateway::Denial;
use std::time::Duration;
use thiserror::Error;

/// Connection pool errors. All of them are fatal to an assessment run.
#[derive(Debug, Error)]
pub enum PoolError {
    /// The connection string could not be parsed.
    #[error("invalid connection string: {0}")]
    InvalidUrl(String),

    /// Every connect attempt failed.
    #[error("database unreachable after {attempts} attempts: {message}")]
    Unreachable { attempts: u32, message: String },

    /// The pool was closed, or a previous connect failed.
    #[error("connection pool is closed")]
    Closed,

    /// No connection became free within the acquire timeout.
    #[error("timed out after {0:?} waiting for a connection")]
    AcquireTimeout(Duration),

    /// The pool could not hand out a connection.
    #[error("failed to acquire connection: {0}")]
    Acquire(String),
}

/// Executor errors, one variant per outcome the oracle branches on.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Pool(#[from] PoolError),

    /// SQLSTATE 42601, message as reported by the server.
    #[error("syntax error: {message}")]
    Syntax { message: String },

    /// A write was attempted inside a read-only transaction (SQLSTATE 25006).
    #[error("read-only violation: {message}")]
    ReadOnlyViolation { message: String },

    /// The server cancelled the statement, or the client deadline passed.
    #[error("statement timed out: {message}")]
    Timeout { message: String },

    /// The connection broke mid-call.
    #[error("connection lost: {message}")]
    ConnectionLost { message: String },

    /// Any other server-reported error.
    #[error("database error: {message}")]
    Database {
        code: Option<String>,
        message: String,
    },

    /// A returned value could not be decoded.
    #[error("failed to decode column '{column}': {message}")]
    Decode { column: String, message: String },
}

impl ExecutorError {
    /// Map a server error by SQLSTATE.
    pub fn from_sqlstate(code: Option<&str>, message: impl Into<String>) -> Self {
        let message = message.into();
        match code {
            Some("25006") => ExecutorError::ReadOnlyViolation { message },
            Some("42601") => ExecutorError::Syntax { message },
            Some("57014") => ExecutorError::Timeout { message },
            Some(c) if c.starts_with("08") || matches!(c, "57P01" | "57P02" | "57P03") => {
                ExecutorError::ConnectionLost { message }
            }
            _ => ExecutorError::Database {
                code: code.map(str::to_string),
                message,
            },
        }
    }

    /// Text an error-based oracle may search for leaked data.
    pub fn message(&self) -> String {
        match self {
            ExecutorError::Syntax { message }
            | ExecutorError::ReadOnlyViolation { message }
            | ExecutorError::Timeout { message }
            | ExecutorError::ConnectionLost { message }
            | ExecutorError::Database { message, .. }
            | ExecutorError::Decode { message, .. } => message.clone(),
            ExecutorError::Pool(e) => e.to_string(),
        }
    }

    /// Whether the error means the target itself is gone, which ends a run.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ExecutorError::Pool(
                PoolError::Closed | PoolError::Unreachable { .. } | PoolError::InvalidUrl(_)
            )
        )
    }

    /// Whether the connection that produced this error must be retired. A server-side
    /// cancel leaves the session usable once rolled back; the client deadline path retires
    /// on its own.
    pub(crate) fn poisons_connection(&self) -> bool {
        matches!(self, ExecutorError::ConnectionLost { .. })
    }
}

impl From<sqlx::Error> for ExecutorError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db) => {
                let code = db.code().map(|c| c.into_owned());
                let mut message = db.message().to_string();
                if let Some(detail) = db
                    .try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
                    .and_then(|pg| pg.detail())
                {
                    message = format!("{} ({})", message, detail);
                }
                ExecutorError::from_sqlstate(code.as_deref(), message)
            }
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::WorkerCrashed => ExecutorError::ConnectionLost {
                message: err.to_string(),
            },
            sqlx::Error::PoolClosed => ExecutorError::Pool(PoolError::Closed),
            sqlx::Error::PoolTimedOut => ExecutorError::Pool(PoolError::Acquire(err.to_string())),
            sqlx::Error::ColumnDecode { index, source } => ExecutorError::Decode {
                column: index,
                message: source.to_string(),
            },
            other => ExecutorError::Database {
                code: None,
                message: other.to_string(),
            },
        }
    }
}

/// Errors from guarded execution: the gateway's denial or the executor's failure.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("policy violation: {0}")]
    PolicyViolation(Denial),

    #[error(transparent)]
    Executor(#[from] ExecutorError),
}
