//! End-to-end assessment run.

use std::sync::Arc;

use sqlguard_core::{AccessControl, AccessMode, GuardConfig};
use sqlguard_gateway::Gateway;
use sqlguard_pg::{ConnectionPool, GuardedExecutor, QueryExecutor};

use crate::corpus::Corpus;
use crate::error::HarnessError;
use crate::fixture::{SchemaFixture, UsersFixture};
use crate::report::{self, SecurityReport};
use crate::tester::InjectionTester;

/// Connect to the configured target, run the scoped corpus under every mode and aggregate the
/// results.
///
/// The fixture is retired and the pool closed whether or not the run succeeds.
pub async fn run_assessment(config: &GuardConfig) -> Result<SecurityReport, HarnessError> {
    config.validate()?;

    let pool = Arc::new(ConnectionPool::new(
        &config.upstream.connection_string(),
        &config.upstream.pool,
        &config.executor,
    )?);
    if let Err(error) = pool.connect().await {
        pool.close().await;
        return Err(error.into());
    }

    let executor = QueryExecutor::new(pool.clone(), &config.executor);
    let guarded = GuardedExecutor::new(
        Gateway::new(&config.gateway),
        executor.clone(),
        AccessControl::new(AccessMode::Restricted),
    );
    let fixture: Arc<dyn SchemaFixture> = Arc::new(UsersFixture::new(
        executor,
        config.harness.target.clone(),
    ));

    let harness = &config.harness;
    let corpus = Corpus::load(&harness.target, harness.injected_delay())?.scoped(harness.scope);
    tracing::info!(
        scope = %harness.scope,
        cases = corpus.len(),
        corpus_version = corpus.version(),
        "Starting assessment"
    );

    let tester = InjectionTester::new(guarded, fixture.clone(), harness.clone());
    let outcome = match fixture.provision().await {
        Ok(()) => tester.run(&corpus, &AccessMode::ALL).await,
        Err(error) => Err(error),
    };

    if let Err(error) = fixture.retire().await {
        tracing::warn!(error = %error, "Failed to retire test schema");
    }
    pool.close().await;

    let results = outcome?;
    Ok(report::aggregate(results, harness.scope, corpus.version()))
}
