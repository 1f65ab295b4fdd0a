//! Shared test infrastructure for sqlguard end-to-end tests.
//!
//! This module provides:
//! - Docker container management for PostgreSQL
//! - A connected pool, executor and fixture for the container
//! - Helpers for building guarded executors and testers per mode

use sqlguard_core::{AccessControl, AccessMode, GuardConfig, HarnessConfig};
use sqlguard_gateway::Gateway;
use sqlguard_harness::{InjectionTester, UsersFixture};
use sqlguard_pg::{ConnectionPool, GuardedExecutor, QueryExecutor};
use sqlx::PgPool;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

// =============================================================================
// DOCKER CONTAINER CONFIGURATION
// =============================================================================

pub const CONTAINER_NAME: &str = "sqlguard_test_postgres";
pub const POSTGRES_PORT: u16 = 5434;
pub const POSTGRES_PASSWORD: &str = "sqlguard_test_password";
pub const DATABASE_NAME: &str = "sqlguard_test";

pub fn database_url() -> String {
    format!(
        "postgres://postgres:{}@localhost:{}/{}",
        POSTGRES_PASSWORD, POSTGRES_PORT, DATABASE_NAME
    )
}

// =============================================================================
// DOCKER CONTAINER MANAGEMENT
// =============================================================================

/// Start a PostgreSQL container for testing
pub fn start_postgres_container() -> Result<(), String> {
    let output = Command::new("docker")
        .args(["ps", "-a", "-q", "-f", &format!("name={}", CONTAINER_NAME)])
        .output()
        .map_err(|e| format!("Failed to check existing container: {}", e))?;

    if !String::from_utf8_lossy(&output.stdout).trim().is_empty() {
        let _ = Command::new("docker")
            .args(["rm", "-f", CONTAINER_NAME])
            .output();
    }

    let status = Command::new("docker")
        .args([
            "run",
            "-d",
            "--name",
            CONTAINER_NAME,
            "-e",
            &format!("POSTGRES_PASSWORD={}", POSTGRES_PASSWORD),
            "-e",
            &format!("POSTGRES_DB={}", DATABASE_NAME),
            "-p",
            &format!("{}:5432", POSTGRES_PORT),
            "postgres:16-alpine",
        ])
        .status()
        .map_err(|e| format!("Failed to start container: {}", e))?;

    if !status.success() {
        return Err("Failed to start PostgreSQL container".to_string());
    }

    Ok(())
}

/// Stop and remove the PostgreSQL container
pub fn stop_postgres_container() {
    let _ = Command::new("docker")
        .args(["rm", "-f", CONTAINER_NAME])
        .output();
}

/// Wait for PostgreSQL to accept queries
pub async fn wait_for_postgres() -> Result<PgPool, String> {
    for attempt in 1..=30 {
        match PgPool::connect(&database_url()).await {
            Ok(pool) => {
                if sqlx::query("SELECT 1").fetch_one(&pool).await.is_ok() {
                    println!("✅ PostgreSQL ready after {} attempts", attempt);
                    return Ok(pool);
                }
            }
            Err(_) => {
                if attempt % 5 == 0 {
                    println!("⏳ Waiting for PostgreSQL... (attempt {})", attempt);
                }
            }
        }
        tokio::time::sleep(Duration::from_millis(500)).await;
    }
    Err("PostgreSQL did not become ready in time".to_string())
}

// =============================================================================
// TEST CONTEXT
// =============================================================================

pub struct TestContext {
    /// Plain sqlx pool for out-of-band checks.
    pub raw: PgPool,
    pub config: GuardConfig,
    pub pool: Arc<ConnectionPool>,
    pub executor: QueryExecutor,
}

impl TestContext {
    pub async fn setup() -> Result<Self, String> {
        start_postgres_container()?;
        let raw = wait_for_postgres().await?;

        let mut config = GuardConfig::default();
        config.upstream.database_url = Some(database_url());
        config.harness = HarnessConfig {
            injected_delay_ms: 1000,
            ..HarnessConfig::default()
        };

        let pool = Arc::new(
            ConnectionPool::new(&database_url(), &config.upstream.pool, &config.executor)
                .map_err(|e| format!("Failed to build pool: {}", e))?,
        );
        pool.connect()
            .await
            .map_err(|e| format!("Failed to connect pool: {}", e))?;
        let executor = QueryExecutor::new(pool.clone(), &config.executor);

        Ok(Self {
            raw,
            config,
            pool,
            executor,
        })
    }

    /// Guarded executor whose access mode starts at `mode`.
    pub fn guarded(&self, mode: AccessMode) -> GuardedExecutor {
        GuardedExecutor::new(
            Gateway::new(&self.config.gateway),
            self.executor.clone(),
            AccessControl::new(mode),
        )
    }

    pub fn fixture(&self) -> UsersFixture {
        UsersFixture::new(self.executor.clone(), self.config.harness.target.clone())
    }

    pub fn tester(&self) -> InjectionTester {
        InjectionTester::new(
            self.guarded(AccessMode::Restricted),
            Arc::new(self.fixture()),
            self.config.harness.clone(),
        )
    }

    /// Whether the fixture table currently exists.
    pub async fn table_exists(&self) -> bool {
        let table = &self.config.harness.target.table;
        sqlx::query_scalar::<_, bool>("SELECT to_regclass($1) IS NOT NULL")
            .bind(table)
            .fetch_one(&self.raw)
            .await
            .unwrap_or(false)
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        stop_postgres_container();
        println!("🧹 Cleaned up PostgreSQL container");
    }
}
