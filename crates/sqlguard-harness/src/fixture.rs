//! Test schema fixture.
//!
//! The tester calls a [`SchemaFixture`] to provision, reset and retire the schema attack
//! payloads run against, but owns none of its SQL.

use async_trait::async_trait;
use sqlguard_core::TargetSchema;
use sqlguard_pg::QueryExecutor;

use crate::error::HarnessError;

/// Provisions and retires the schema a run is executed against.
#[async_trait]
pub trait SchemaFixture: Send + Sync {
    /// Create the schema and seed data, replacing any previous copy.
    async fn provision(&self) -> Result<(), HarnessError>;

    /// Restore the freshly provisioned state after a case changed it.
    async fn reset(&self) -> Result<(), HarnessError>;

    /// Drop everything the fixture created.
    async fn retire(&self) -> Result<(), HarnessError>;
}

/// Users-like table: id, username, email, password hash, admin flag, timestamp, seeded with
/// one administrator and three regular users.
pub struct UsersFixture {
    executor: QueryExecutor,
    target: TargetSchema,
}

impl UsersFixture {
    pub fn new(executor: QueryExecutor, target: TargetSchema) -> Self {
        Self { executor, target }
    }

    /// DDL and seed statements for the target table.
    pub fn setup_sql(&self) -> String {
        let table = &self.target.table;
        let column = &self.target.column;
        let admin = self.target.admin_username.replace('\'', "''");
        format!(
            "DROP TABLE IF EXISTS {table} CASCADE;
CREATE TABLE {table} (
    id SERIAL PRIMARY KEY,
    {column} VARCHAR(50) NOT NULL,
    email VARCHAR(100),
    password_hash VARCHAR(255),
    is_admin BOOLEAN DEFAULT FALSE,
    created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
);
INSERT INTO {table} ({column}, email, password_hash, is_admin) VALUES
    ('{admin}', 'admin@test.com', 'hash123', TRUE),
    ('user1', 'user1@test.com', 'hash456', FALSE),
    ('user2', 'user2@test.com', 'hash789', FALSE),
    ('test_user', 'test@example.com', 'testhash', FALSE);"
        )
    }

    async fn run(&self, operation: &'static str, sql: &str) -> Result<(), HarnessError> {
        self.executor
            .execute(sql, &[], false)
            .await
            .map(|_| ())
            .map_err(|e| HarnessError::fixture(operation, e))
    }
}

#[async_trait]
impl SchemaFixture for UsersFixture {
    async fn provision(&self) -> Result<(), HarnessError> {
        self.run("provision", &self.setup_sql()).await?;
        tracing::info!(table = %self.target.table, "Test schema provisioned");
        Ok(())
    }

    async fn reset(&self) -> Result<(), HarnessError> {
        self.run("reset", &self.setup_sql()).await?;
        tracing::debug!(table = %self.target.table, "Test schema reset");
        Ok(())
    }

    async fn retire(&self) -> Result<(), HarnessError> {
        let sql = format!("DROP TABLE IF EXISTS {} CASCADE", self.target.table);
        self.run("retire", &sql).await?;
        tracing::info!(table = %self.target.table, "Test schema retired");
        Ok(())
    }
}
