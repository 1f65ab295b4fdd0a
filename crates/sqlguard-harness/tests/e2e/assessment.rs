//! Full assessment runs.
//!
//! Runs the whole corpus against the container twice and checks the report is stable,
//! RESTRICTED holds everywhere and bound parameters never leak.

use super::common::*;
use sqlguard_core::{AccessMode, Scope};
use sqlguard_harness::{run_assessment, AttackCategory, Corpus, SecurityReport};

fn scores(report: &SecurityReport) -> Vec<(AccessMode, f64)> {
    report
        .summary
        .iter()
        .map(|s| (s.mode, s.security_score))
        .collect()
}

pub async fn test_full_assessment(ctx: &TestContext) {
    println!("  🧪 test_full_assessment");

    let first = run_assessment(&ctx.config).await.expect("first run");
    let second = run_assessment(&ctx.config).await.expect("second run");

    let corpus = Corpus::load(&ctx.config.harness.target, ctx.config.harness.injected_delay())
        .expect("corpus");
    assert_eq!(first.results.len(), corpus.len() * AccessMode::ALL.len());
    assert_eq!(first.scope, Scope::Comprehensive);

    assert_eq!(scores(&first), scores(&second), "repeated runs must agree");
    assert_ne!(first.run_id, second.run_id);

    let restricted = first.mode(AccessMode::Restricted).expect("restricted exercised");
    let leaks: Vec<_> = first
        .results
        .iter()
        .filter(|r| r.mode == AccessMode::Restricted && !r.protected())
        .map(|r| (r.case, r.verdict.clone()))
        .collect();
    assert_eq!(restricted.security_score, 100.0, "{:?}", leaks);

    let unrestricted = first
        .mode(AccessMode::Unrestricted)
        .expect("unrestricted exercised");
    assert!(unrestricted.vulnerable > 0);
    assert!(first.security_score <= restricted.security_score);

    assert!(
        first
            .results
            .iter()
            .filter(|r| r.category == AttackCategory::ParameterBinding)
            .all(|r| !r.vulnerable),
        "bound parameters must never be injectable"
    );

    assert!(!ctx.table_exists().await, "assessment retires its fixture");

    println!(
        "     ✓ overall {:.2}, RESTRICTED {:.2}, UNRESTRICTED {:.2}",
        first.security_score, restricted.security_score, unrestricted.security_score
    );
}

pub async fn test_quick_scope_is_smaller(ctx: &TestContext) {
    println!("  🧪 test_quick_scope_is_smaller");

    let mut config = ctx.config.clone();
    config.harness.scope = Scope::Quick;
    let report = run_assessment(&config).await.expect("quick run");

    let corpus =
        Corpus::load(&config.harness.target, config.harness.injected_delay()).expect("corpus");
    assert!(report.results.len() < corpus.len() * AccessMode::ALL.len());
    assert!(
        report
            .results
            .iter()
            .all(|r| r.category != AttackCategory::TimeBlind)
    );

    println!("     ✓ {} results", report.results.len());
}

pub async fn run_all_tests(ctx: &TestContext) {
    println!("\n📊 Running Assessment Tests\n");

    test_full_assessment(ctx).await;
    test_quick_scope_is_smaller(ctx).await;

    println!("\n✅ All assessment tests passed!\n");
}
