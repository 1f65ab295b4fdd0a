//! `sqlguard exec` - run one statement through the gateway.

use anyhow::{bail, Context, Result};
use sqlguard_core::{AccessControl, AccessMode, SqlParam};
use sqlguard_gateway::Gateway;
use sqlguard_pg::{ConnectionPool, GuardError, GuardedExecutor, QueryExecutor};
use std::path::Path;
use std::sync::Arc;

use super::{load_config, mask_password};

pub async fn run(
    config_path: Option<&Path>,
    database_url: Option<String>,
    mode: AccessMode,
    sql: &str,
    raw_params: &[String],
) -> Result<()> {
    let config = load_config(config_path, database_url)?;
    let params = parse_params(raw_params)?;

    let url = config.upstream.connection_string();
    let pool = Arc::new(
        ConnectionPool::new(&url, &config.upstream.pool, &config.executor)
            .context("Invalid database URL")?,
    );
    pool.connect()
        .await
        .with_context(|| format!("Failed to connect to {}", mask_password(&url)))?;

    let guarded = GuardedExecutor::new(
        Gateway::new(&config.gateway),
        QueryExecutor::new(pool.clone(), &config.executor),
        AccessControl::new(mode),
    );
    let outcome = guarded.execute(sql, &params).await;
    pool.close().await;

    match outcome {
        Ok(result) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&result).context("Failed to serialize rows")?
            );
            Ok(())
        }
        Err(GuardError::PolicyViolation(denial)) => bail!("{}", denial),
        Err(e) => Err(e).context("Execution failed"),
    }
}

/// Parse each `--param` as a JSON scalar. Text that is not valid JSON is taken literally.
fn parse_params(raw: &[String]) -> Result<Vec<SqlParam>> {
    raw.iter()
        .enumerate()
        .map(|(i, value)| match serde_json::from_str::<SqlParam>(value) {
            Ok(param) => Ok(param),
            Err(_) if serde_json::from_str::<serde_json::Value>(value).is_ok() => {
                bail!("parameter ${} must be a JSON scalar, got {}", i + 1, value)
            }
            Err(_) => Ok(SqlParam::Text(value.clone())),
        })
        .collect()
}
