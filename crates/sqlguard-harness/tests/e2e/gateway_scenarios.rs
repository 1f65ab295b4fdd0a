//! Gateway scenarios against a live table.
//!
//! The same stacked payload is sent under both modes:
//! - RESTRICTED denies it before it reaches the server
//! - UNRESTRICTED lets it through and the table is dropped
//!
//! Also covers payloads that hide statements or delays from the lexer, and checks that the
//! tester leaves state it did not create alone.

use super::common::*;
use sqlguard_core::{AccessMode, TargetSchema};
use sqlguard_gateway::{DenyReason, StatementKind};
use sqlguard_harness::{AttackCategory, Corpus, SchemaFixture, Severity};
use sqlguard_pg::GuardError;
use std::time::{Duration, Instant};

fn corpus(ctx: &TestContext) -> Corpus {
    let target: &TargetSchema = &ctx.config.harness.target;
    Corpus::load(target, ctx.config.harness.injected_delay()).expect("corpus")
}

pub async fn test_restricted_denies_stacked_drop(ctx: &TestContext) {
    println!("  🧪 test_restricted_denies_stacked_drop");

    let guarded = ctx.guarded(AccessMode::Restricted);
    let err = guarded
        .execute("SELECT 1; DROP TABLE test_users;--", &[])
        .await
        .unwrap_err();

    match err {
        GuardError::PolicyViolation(denial) => {
            assert_eq!(denial.kind, StatementKind::Stacked);
            assert_eq!(denial.reason, DenyReason::Stacked);
        }
        other => panic!("expected a policy violation, got {:?}", other),
    }
    assert!(ctx.table_exists().await, "table must survive a denied payload");

    println!("     ✓ DENY(stacked), table intact");
}

pub async fn test_unrestricted_executes_stacked_drop(ctx: &TestContext) {
    println!("  🧪 test_unrestricted_executes_stacked_drop");

    let guarded = ctx.guarded(AccessMode::Unrestricted);
    guarded
        .execute("SELECT 1; DROP TABLE test_users;--", &[])
        .await
        .expect("UNRESTRICTED should run the stacked text as sent");
    assert!(!ctx.table_exists().await, "table should be gone");

    ctx.fixture().reset().await.expect("reset");
    assert!(ctx.table_exists().await);

    println!("     ✓ table dropped and restored");
}

pub async fn test_tester_judges_stacked_drop_per_mode(ctx: &TestContext) {
    println!("  🧪 test_tester_judges_stacked_drop_per_mode");

    let corpus = corpus(ctx);
    let case = corpus.get("stacked_drop_table").expect("case exists");
    let tester = ctx.tester();

    let restricted = tester.test(case, AccessMode::Restricted).await.expect("run");
    assert!(!restricted.vulnerable, "{:?}", restricted.verdict);
    assert!(restricted.observed.denied.is_some());

    let unrestricted = tester
        .test(case, AccessMode::Unrestricted)
        .await
        .expect("run");
    assert!(unrestricted.vulnerable, "{:?}", unrestricted.verdict);
    assert_eq!(unrestricted.category, AttackCategory::StackedQueries);
    assert_eq!(unrestricted.severity, Severity::Critical);

    assert!(
        ctx.table_exists().await,
        "fixture should be reset after an observed side effect"
    );

    println!("     ✓ RESTRICTED protected, UNRESTRICTED vulnerable (critical)");
}

pub async fn test_restricted_denies_delay(ctx: &TestContext) {
    println!("  🧪 test_restricted_denies_delay");

    let corpus = corpus(ctx);
    let case = corpus.get("time_sleep_subquery").expect("case exists");
    let result = ctx
        .tester()
        .test(case, AccessMode::Restricted)
        .await
        .expect("run");

    assert!(!result.vulnerable, "{:?}", result.verdict);
    assert!(Duration::from_millis(result.latency_ms) < ctx.config.harness.injected_delay());

    println!("     ✓ pg_sleep denied without waiting");
}

pub async fn test_restricted_denies_carriage_return_comment(ctx: &TestContext) {
    println!("  🧪 test_restricted_denies_carriage_return_comment");

    let guarded = ctx.guarded(AccessMode::Restricted);
    let err = guarded
        .execute("SELECT 1 -- harmless\r; COMMIT; DROP TABLE test_users", &[])
        .await
        .unwrap_err();

    match err {
        GuardError::PolicyViolation(denial) => {
            assert_eq!(denial.reason, DenyReason::Stacked);
        }
        other => panic!("expected a policy violation, got {:?}", other),
    }
    assert!(ctx.table_exists().await, "table must survive a hidden COMMIT");

    println!("     ✓ DENY(stacked), table intact");
}

pub async fn test_restricted_denies_sql_text_functions(ctx: &TestContext) {
    println!("  🧪 test_restricted_denies_sql_text_functions");

    let guarded = ctx.guarded(AccessMode::Restricted);
    for sql in [
        "SELECT count(*) FROM ts_stat('SELECT to_tsvector(pg_sleep(2)::text)')",
        "SELECT query_to_xml('SELECT pg_sleep(2)', true, false, '')",
        "SELECT pg_advisory_lock_shared(42)",
        "SELECT pg_stat_reset()",
    ] {
        let started = Instant::now();
        let err = guarded.execute(sql, &[]).await.unwrap_err();
        assert!(
            matches!(
                &err,
                GuardError::PolicyViolation(denial)
                    if matches!(denial.reason, DenyReason::DeniedFunction(_))
            ),
            "{}: {:?}",
            sql,
            err
        );
        assert!(started.elapsed() < Duration::from_secs(1), "{} reached the server", sql);
    }

    println!("     ✓ ts_stat, query_to_xml, shared advisory lock and stat reset denied");
}

pub async fn test_preexisting_state_survives(ctx: &TestContext) {
    println!("  🧪 test_preexisting_state_survives");

    sqlx::query("CREATE EXTENSION IF NOT EXISTS hstore")
        .execute(&ctx.raw)
        .await
        .expect("install hstore");
    sqlx::query("SELECT lo_from_bytea(515151, 'keep'::bytea)")
        .execute(&ctx.raw)
        .await
        .expect("create large object");

    let corpus = corpus(ctx);
    let tester = ctx.tester();

    let extension = corpus.get("extension_create").expect("case exists");
    let result = tester
        .test(extension, AccessMode::Unrestricted)
        .await
        .expect("run");
    assert!(result.inconclusive, "{:?}", result.verdict);
    let installed: i64 =
        sqlx::query_scalar("SELECT count(*) FROM pg_extension WHERE extname = 'hstore'")
            .fetch_one(&ctx.raw)
            .await
            .expect("count");
    assert_eq!(installed, 1, "an extension the database already had was dropped");

    let large_object = corpus.get("extension_large_object").expect("case exists");
    let result = tester
        .test(large_object, AccessMode::Unrestricted)
        .await
        .expect("run");
    assert!(result.vulnerable, "{:?}", result.verdict);
    let remaining: Vec<i64> = sqlx::query_scalar(
        "SELECT oid::bigint FROM pg_largeobject_metadata WHERE oid IN (424242, 515151) ORDER BY 1",
    )
    .fetch_all(&ctx.raw)
    .await
    .expect("large objects");
    assert_eq!(remaining, vec![515151], "cleanup must only unlink what the case created");

    sqlx::query("SELECT lo_unlink(515151)")
        .execute(&ctx.raw)
        .await
        .expect("unlink");
    sqlx::query("DROP EXTENSION IF EXISTS hstore")
        .execute(&ctx.raw)
        .await
        .expect("drop hstore");

    println!("     ✓ existing extension kept and judged inconclusive, foreign large object kept");
}

pub async fn run_all_tests(ctx: &TestContext) {
    println!("\n🛡️ Running Gateway Scenario Tests\n");

    ctx.fixture().provision().await.expect("provision fixture");

    test_restricted_denies_stacked_drop(ctx).await;
    test_unrestricted_executes_stacked_drop(ctx).await;
    test_tester_judges_stacked_drop_per_mode(ctx).await;
    test_restricted_denies_delay(ctx).await;
    test_restricted_denies_carriage_return_comment(ctx).await;
    test_restricted_denies_sql_text_functions(ctx).await;
    test_preexisting_state_survives(ctx).await;

    println!("\n✅ All gateway scenario tests passed!\n");
}
