//! Error types for the harness.

use sqlguard_core::ConfigError;
use sqlguard_pg::{ExecutorError, PoolError};
use thiserror::Error;

/// Errors that end an assessment run. Individual case failures never surface here; they
/// become verdicts.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Corpus(#[from] CorpusError),

    /// The target could not be reached, or was lost mid-run.
    #[error("connection error: {0}")]
    Connection(#[from] PoolError),

    /// A fatal executor failure while running cases.
    #[error("target lost during run: {0}")]
    TargetLost(ExecutorError),

    /// The schema fixture could not be provisioned, reset or retired.
    #[error("fixture {operation} failed: {source}")]
    Fixture {
        operation: &'static str,
        #[source]
        source: ExecutorError,
    },
}

/// The compiled-in case catalog could not be loaded.
#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus catalog does not parse: {0}")]
    Parse(String),

    #[error("corpus case '{case}' is malformed: {reason}")]
    Malformed { case: String, reason: String },
}

impl HarnessError {
    pub(crate) fn fixture(operation: &'static str, source: ExecutorError) -> Self {
        match source {
            ExecutorError::Pool(pool) => HarnessError::Connection(pool),
            source => HarnessError::Fixture { operation, source },
        }
    }
}
