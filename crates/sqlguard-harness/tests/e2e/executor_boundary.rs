//! Executor boundary tests.
//!
//! Parameter binding, read-only transactions, typed errors and row shape against a live server.

use super::common::*;
use serde_json::json;
use sqlguard_core::{ExecutorConfig, PoolConfig, SqlParam};
use sqlguard_pg::{ConnectionPool, ExecutorError, QueryExecutor};
use std::sync::Arc;

const HOSTILE: &str = "'; DROP TABLE test_users; --";

pub async fn test_bound_literal_round_trips(ctx: &TestContext) {
    println!("  🧪 test_bound_literal_round_trips");

    let result = ctx
        .executor
        .execute(
            "SELECT $1::text AS user_input",
            &[SqlParam::Text(HOSTILE.to_string())],
            false,
        )
        .await
        .expect("bound select");

    assert_eq!(result.len(), 1);
    assert_eq!(result.rows[0].get("user_input"), Some(&json!(HOSTILE)));
    assert!(ctx.table_exists().await);

    println!("     ✓ literal returned unchanged, table intact");
}

pub async fn test_mixed_params_echo_in_order(ctx: &TestContext) {
    println!("  🧪 test_mixed_params_echo_in_order");

    let params = vec![
        SqlParam::Text("Alice".to_string()),
        SqlParam::Int(25),
        SqlParam::Bool(false),
        SqlParam::Null,
    ];
    let result = ctx
        .executor
        .execute(
            "SELECT $1::text AS name, $2::bigint AS age, $3::boolean AS active, $4::text AS note",
            &params,
            false,
        )
        .await
        .expect("bound select");

    let row = &result.rows[0];
    let columns: Vec<&str> = row.columns().collect();
    assert_eq!(columns, vec!["name", "age", "active", "note"]);
    let values: Vec<_> = row.values().cloned().collect();
    assert_eq!(values, vec![json!("Alice"), json!(25), json!(false), json!(null)]);

    println!("     ✓ four typed parameters echoed in column order");
}

pub async fn test_column_order_follows_select_list(ctx: &TestContext) {
    println!("  🧪 test_column_order_follows_select_list");

    let result = ctx
        .executor
        .execute("SELECT 3 AS c, 1 AS a, 2 AS b", &[], false)
        .await
        .expect("select");

    let columns: Vec<&str> = result.rows[0].columns().collect();
    assert_eq!(columns, vec!["c", "a", "b"]);

    println!("     ✓ c, a, b");
}

pub async fn test_readonly_transaction_rejects_write(ctx: &TestContext) {
    println!("  🧪 test_readonly_transaction_rejects_write");

    let err = ctx
        .executor
        .execute(
            "INSERT INTO test_users (username) VALUES ('readonly_attempt')",
            &[],
            true,
        )
        .await
        .unwrap_err();
    assert!(
        matches!(err, ExecutorError::ReadOnlyViolation { .. }),
        "{:?}",
        err
    );

    let count = ctx
        .executor
        .execute(
            "SELECT count(*) AS n FROM test_users WHERE username = 'readonly_attempt'",
            &[],
            false,
        )
        .await
        .expect("count");
    assert_eq!(count.scalar(), Some(&json!(0)));

    println!("     ✓ ReadOnlyViolation, nothing written");
}

pub async fn test_syntax_error_is_typed(ctx: &TestContext) {
    println!("  🧪 test_syntax_error_is_typed");

    let err = ctx
        .executor
        .execute("SELEC 1", &[], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Syntax { .. }), "{:?}", err);

    println!("     ✓ Syntax");
}

pub async fn test_statement_timeout_is_typed(ctx: &TestContext) {
    println!("  🧪 test_statement_timeout_is_typed");

    let executor_config = ExecutorConfig {
        statement_timeout_ms: 200,
        ..ExecutorConfig::default()
    };
    let pool_config = PoolConfig {
        min_connections: 0,
        max_connections: 1,
        ..ctx.config.upstream.pool.clone()
    };
    let pool = Arc::new(
        ConnectionPool::new(&database_url(), &pool_config, &executor_config).expect("pool"),
    );
    pool.connect().await.expect("connect");
    let executor = QueryExecutor::new(pool.clone(), &executor_config);

    executor.execute("SELECT 1", &[], true).await.expect("warm up");
    let open = pool.size();
    assert_eq!(open, 1);

    let err = executor
        .execute("SELECT pg_sleep(2)", &[], true)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Timeout { .. }), "{:?}", err);

    // A server-side cancel rolls back and hands the connection back.
    assert_eq!(pool.size(), open, "cancelled connection was retired");

    let after = executor.execute("SELECT 1 AS one", &[], true).await.expect("select");
    assert_eq!(after.scalar(), Some(&json!(1)));
    assert_eq!(pool.size(), open);

    pool.close().await;
    println!("     ✓ Timeout, connection kept");
}

/// Executor over a one-connection pool, so consecutive calls share a session.
async fn single_connection(ctx: &TestContext) -> (Arc<ConnectionPool>, QueryExecutor) {
    let pool_config = PoolConfig {
        min_connections: 0,
        max_connections: 1,
        ..ctx.config.upstream.pool.clone()
    };
    let pool = Arc::new(
        ConnectionPool::new(&database_url(), &pool_config, &ctx.config.executor).expect("pool"),
    );
    pool.connect().await.expect("connect");
    let executor = QueryExecutor::new(pool.clone(), &ctx.config.executor);
    (pool, executor)
}

pub async fn test_unrestricted_cancel_keeps_connection(ctx: &TestContext) {
    println!("  🧪 test_unrestricted_cancel_keeps_connection");

    let executor_config = ExecutorConfig {
        statement_timeout_ms: 200,
        ..ExecutorConfig::default()
    };
    let pool_config = PoolConfig {
        min_connections: 0,
        max_connections: 1,
        ..ctx.config.upstream.pool.clone()
    };
    let pool = Arc::new(
        ConnectionPool::new(&database_url(), &pool_config, &executor_config).expect("pool"),
    );
    pool.connect().await.expect("connect");
    let executor = QueryExecutor::new(pool.clone(), &executor_config);

    let err = executor
        .execute("SELECT pg_sleep(2)", &[], false)
        .await
        .unwrap_err();
    assert!(matches!(err, ExecutorError::Timeout { .. }), "{:?}", err);
    assert_eq!(pool.size(), 1);

    pool.close().await;
    println!("     ✓ unrestricted cancel keeps its connection too");
}

pub async fn test_readonly_call_refuses_stacked_text(ctx: &TestContext) {
    println!("  🧪 test_readonly_call_refuses_stacked_text");

    let table = &ctx.config.harness.target.table;
    let sql = format!("SELECT 1; COMMIT; DROP TABLE {}", table);
    let err = ctx.executor.execute(&sql, &[], true).await.unwrap_err();
    assert!(matches!(err, ExecutorError::Syntax { .. }), "{:?}", err);
    assert!(ctx.table_exists().await, "stacked DROP ran in a read-only call");

    println!("     ✓ multi-statement text refused, table intact");
}

pub async fn test_open_transaction_is_rolled_back(ctx: &TestContext) {
    println!("  🧪 test_open_transaction_is_rolled_back");

    let (pool, executor) = single_connection(ctx).await;

    executor
        .execute(
            "SELECT 1; BEGIN; CREATE TABLE sqlguard_tx_leak (id int)",
            &[],
            false,
        )
        .await
        .expect("stacked begin");
    let leaked = executor
        .execute("SELECT to_regclass('sqlguard_tx_leak') IS NULL AS gone", &[], false)
        .await
        .expect("check");
    assert_eq!(leaked.scalar(), Some(&json!(true)), "open transaction survived the call");

    let err = executor
        .execute("BEGIN; SELECT 1/0", &[], false)
        .await
        .unwrap_err();
    assert!(!err.is_fatal(), "{:?}", err);
    let next = executor
        .execute("SELECT 2 AS two", &[], false)
        .await
        .expect("session usable after aborted transaction");
    assert_eq!(next.scalar(), Some(&json!(2)));
    assert_eq!(pool.size(), 1);

    pool.close().await;
    println!("     ✓ open and aborted transactions rolled back");
}

pub async fn run_all_tests(ctx: &TestContext) {
    println!("\n🔌 Running Executor Boundary Tests\n");

    test_bound_literal_round_trips(ctx).await;
    test_mixed_params_echo_in_order(ctx).await;
    test_column_order_follows_select_list(ctx).await;
    test_readonly_transaction_rejects_write(ctx).await;
    test_syntax_error_is_typed(ctx).await;
    test_statement_timeout_is_typed(ctx).await;
    test_unrestricted_cancel_keeps_connection(ctx).await;
    test_readonly_call_refuses_stacked_text(ctx).await;
    test_open_transaction_is_rolled_back(ctx).await;

    println!("\n✅ All executor boundary tests passed!\n");
}
