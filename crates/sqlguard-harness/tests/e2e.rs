//! End-to-end tests using a Docker PostgreSQL container.
//!
//! Test modules are organized by feature area:
//! - `gateway_scenarios` - stacked payloads under each access mode
//! - `executor_boundary` - parameter binding, read-only transactions, typed errors
//! - `assessment` - full corpus runs and the resulting report
//!
//! Run with:
//!   cargo test -p sqlguard-harness --test e2e -- --nocapture --test-threads=1
//!
//! Requirements:
//!   - Docker must be running
//!   - Port 5434 must be available

#[path = "e2e/common/mod.rs"]
mod common;

#[path = "e2e/assessment.rs"]
mod assessment;

#[path = "e2e/executor_boundary.rs"]
mod executor_boundary;

#[path = "e2e/gateway_scenarios.rs"]
mod gateway_scenarios;

use common::TestContext;

/// Run all E2E tests sequentially against one container.
#[tokio::test]
async fn e2e_all_tests() {
    println!("\n🚀 Starting sqlguard End-to-End Tests\n");

    let ctx = match TestContext::setup().await {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("❌ Failed to setup test context: {}", e);
            eprintln!("   Make sure Docker is running and port 5434 is available");
            return;
        }
    };

    println!("\n📋 Running test modules...\n");

    gateway_scenarios::run_all_tests(&ctx).await;
    executor_boundary::run_all_tests(&ctx).await;
    // Retires the fixture table; keep last.
    assessment::run_all_tests(&ctx).await;

    ctx.pool.close().await;
    println!("\n🎉 All E2E test modules passed!\n");
}
