//! Query executor.
//!
//! A thin I/O boundary: parameters are bound at the protocol level, results are decoded in
//! server order, and errors are mapped to [`ExecutorError`]. It does no statement splitting of
//! its own.
//!
//! Read-only calls always go over the extended protocol, which the server refuses to run more
//! than one statement through. Unrestricted text without parameters goes over the simple-query
//! protocol, so a stacked text reaches the server as written, and the session is rolled back
//! to idle afterwards.

use std::sync::Arc;
use std::time::Duration;

use futures::TryStreamExt;
use sqlguard_core::{ExecutorConfig, QueryResult, SqlParam};
use sqlx::postgres::PgArguments;
use sqlx::{Arguments, Connection, Either, Executor, PgConnection};

use crate::decode::decode_row;
use crate::error::{ExecutorError, PoolError};
use crate::pool::ConnectionPool;

fn args_add<T>(args: &mut PgArguments, v: T) -> Result<(), sqlx::Error>
where
    T: Send + Sync + 'static,
    for<'q> T: sqlx::Encode<'q, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    args.add(v).map_err(sqlx::Error::Encode)
}

fn bind_params(params: &[SqlParam]) -> Result<PgArguments, sqlx::Error> {
    let mut args = PgArguments::default();
    for param in params {
        match param {
            SqlParam::Null => args_add(&mut args, Option::<String>::None)?,
            SqlParam::Bool(b) => args_add(&mut args, *b)?,
            SqlParam::Int(n) => args_add(&mut args, *n)?,
            SqlParam::Float(f) => args_add(&mut args, *f)?,
            SqlParam::Text(s) => args_add(&mut args, s.clone())?,
        }
    }
    Ok(args)
}

/// Executes SQL on pooled connections.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: Arc<ConnectionPool>,
    deadline: Duration,
}

impl QueryExecutor {
    pub fn new(pool: Arc<ConnectionPool>, config: &ExecutorConfig) -> Self {
        Self {
            pool,
            deadline: config.client_deadline(),
        }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// Run `sql` with `params` bound positionally to `$1..$n`.
    ///
    /// With `force_readonly` the call runs inside a read-only transaction that is always rolled
    /// back, and a write inside it fails with [`ExecutorError::ReadOnlyViolation`].
    ///
    /// A lost connection is retried once, and only when no statement can have taken effect:
    /// the failure happened while acquiring, or the call was read-only.
    pub async fn execute(
        &self,
        sql: &str,
        params: &[SqlParam],
        force_readonly: bool,
    ) -> Result<QueryResult, ExecutorError> {
        match self.execute_once(sql, params, force_readonly).await {
            Err(e) if Self::retryable(&e, force_readonly) => {
                tracing::warn!(error = %e, "Connection lost, retrying once");
                self.execute_once(sql, params, force_readonly).await
            }
            other => other,
        }
    }

    fn retryable(err: &ExecutorError, force_readonly: bool) -> bool {
        match err {
            ExecutorError::Pool(PoolError::Acquire(_)) => true,
            ExecutorError::ConnectionLost { .. } => force_readonly,
            _ => false,
        }
    }

    async fn execute_once(
        &self,
        sql: &str,
        params: &[SqlParam],
        force_readonly: bool,
    ) -> Result<QueryResult, ExecutorError> {
        let mut conn = self.pool.acquire().await?;

        let outcome = tokio::time::timeout(
            self.deadline,
            run(conn.connection(), sql, params, force_readonly),
        )
        .await;

        match outcome {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(e)) => {
                if e.poisons_connection() {
                    conn.retire();
                }
                Err(e)
            }
            Err(_) => {
                // Transaction state is unknown after an abandoned call.
                conn.retire();
                tracing::warn!(
                    deadline_ms = self.deadline.as_millis() as u64,
                    "Client deadline passed, connection retired"
                );
                Err(ExecutorError::Timeout {
                    message: format!("no response within {:?}", self.deadline),
                })
            }
        }
    }
}

async fn run(
    conn: &mut PgConnection,
    sql: &str,
    params: &[SqlParam],
    force_readonly: bool,
) -> Result<QueryResult, ExecutorError> {
    if !force_readonly {
        let result = fetch(conn, sql, params, false).await;
        // The text may have left its own transaction open or aborted.
        if let Err(e) = (&mut *conn).execute(sqlx::raw_sql("ROLLBACK")).await {
            return Err(ExecutorError::ConnectionLost {
                message: format!("session reset failed: {}", e),
            });
        }
        return result;
    }

    let mut tx = conn.begin().await?;
    (&mut *tx)
        .execute(sqlx::raw_sql("SET TRANSACTION READ ONLY"))
        .await?;
    let result = fetch(&mut tx, sql, params, true).await;
    if let Err(e) = tx.rollback().await {
        return Err(ExecutorError::ConnectionLost {
            message: format!("rollback failed: {}", e),
        });
    }
    result
}

/// Run `sql` and drain every result set. `extended` forces the extended protocol even
/// without parameters.
async fn fetch(
    conn: &mut PgConnection,
    sql: &str,
    params: &[SqlParam],
    extended: bool,
) -> Result<QueryResult, ExecutorError> {
    let mut stream = if params.is_empty() && !extended {
        conn.fetch_many(sqlx::raw_sql(sql))
    } else {
        let query = sqlx::query_with(sql, bind_params(params)?).persistent(!params.is_empty());
        conn.fetch_many(query)
    };

    let mut result = QueryResult::default();
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(done) => result.rows_affected += done.rows_affected(),
            Either::Right(row) => result.rows.push(decode_row(&row)?),
        }
    }
    Ok(result)
}
