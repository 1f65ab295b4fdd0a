//! Gateway-checked execution.

use sqlguard_core::{AccessControl, AccessMode, QueryResult, SqlParam};
use sqlguard_gateway::{Decision, Gateway};

use crate::error::GuardError;
use crate::executor::QueryExecutor;

/// Runs SQL through the gateway, then the executor.
///
/// The access mode is read from the shared [`AccessControl`] on every call. RESTRICTED calls
/// additionally run in a read-only transaction, so a statement the classifier misjudged still
/// cannot write.
#[derive(Clone)]
pub struct GuardedExecutor {
    gateway: Gateway,
    executor: QueryExecutor,
    access: AccessControl,
}

impl GuardedExecutor {
    pub fn new(gateway: Gateway, executor: QueryExecutor, access: AccessControl) -> Self {
        Self {
            gateway,
            executor,
            access,
        }
    }

    pub fn access(&self) -> &AccessControl {
        &self.access
    }

    pub fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    /// Validate and run under the current mode.
    pub async fn execute(&self, sql: &str, params: &[SqlParam]) -> Result<QueryResult, GuardError> {
        let mode = self.access.mode();

        let kind = match self.gateway.validate(sql, mode) {
            Decision::Allow { kind } => kind,
            Decision::Deny(denial) => return Err(GuardError::PolicyViolation(denial)),
        };

        if mode == AccessMode::Unrestricted {
            tracing::warn!(
                target: "sqlguard::audit",
                kind = %kind,
                params = params.len(),
                sql = %sql,
                "Unrestricted execution"
            );
        }

        let force_readonly = mode == AccessMode::Restricted;
        let result = self.executor.execute(sql, params, force_readonly).await?;
        Ok(result)
    }
}
