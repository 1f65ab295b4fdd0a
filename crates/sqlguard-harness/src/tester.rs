//! Injection tester.
//!
//! Sends each case through the gateway and executor under a given mode and hands what it
//! observed to the case's oracle rule. Cases run one at a time; a case that changed the schema
//! is cleaned up before the next one starts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use serde_json::Value;
use sqlguard_core::{AccessMode, HarnessConfig, SqlParam};
use sqlguard_pg::{GuardError, GuardedExecutor};

use crate::corpus::{
    AttackCategory, AttackTestCase, Corpus, Evidence, OracleRule, Payload, Severity,
};
use crate::error::HarnessError;
use crate::fixture::SchemaFixture;
use crate::oracle::{self, EffectCheck, Observation, Outcome, Verdict};

/// Summary of the primary observation of a case.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Observed {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rows: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub denied: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&Observation> for Observed {
    fn from(observation: &Observation) -> Self {
        match &observation.outcome {
            Outcome::Rows(result) => Self {
                rows: Some(result.len()),
                ..Self::default()
            },
            Outcome::Denied(denial) => Self {
                denied: Some(denial.to_string()),
                ..Self::default()
            },
            Outcome::Failed(error) => Self {
                error: Some(error.to_string()),
                ..Self::default()
            },
        }
    }
}

/// Outcome of one case under one mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InjectionResult {
    pub case: &'static str,
    pub category: AttackCategory,
    pub severity: Severity,
    pub mode: AccessMode,
    pub vulnerable: bool,
    pub inconclusive: bool,
    pub verdict: Verdict,
    pub observed: Observed,
    pub latency_ms: u64,
}

impl InjectionResult {
    pub fn new(
        case: &AttackTestCase,
        mode: AccessMode,
        verdict: Verdict,
        observed: Observed,
        latency: Duration,
    ) -> Self {
        Self {
            case: case.name,
            category: case.category,
            severity: case.severity,
            mode,
            vulnerable: verdict.is_vulnerable(),
            inconclusive: verdict.is_inconclusive(),
            verdict,
            observed,
            latency_ms: latency.as_millis() as u64,
        }
    }

    /// Counted as protected: neither vulnerable nor inconclusive.
    pub fn protected(&self) -> bool {
        !self.vulnerable && !self.inconclusive
    }
}

struct Evaluation {
    verdict: Verdict,
    primary: Observation,
    effect: Option<EffectCheck>,
}

impl Evaluation {
    fn new(verdict: Verdict, primary: Observation) -> Self {
        Self {
            verdict,
            primary,
            effect: None,
        }
    }
}

/// Runs attack cases.
pub struct InjectionTester {
    guarded: GuardedExecutor,
    fixture: Arc<dyn SchemaFixture>,
    config: HarnessConfig,
}

impl InjectionTester {
    pub fn new(
        guarded: GuardedExecutor,
        fixture: Arc<dyn SchemaFixture>,
        config: HarnessConfig,
    ) -> Self {
        Self {
            guarded,
            fixture,
            config,
        }
    }

    /// Run every case in `corpus` under each of `modes`, in order. The fixture is reset before
    /// each mode, and the access mode is left at RESTRICTED afterwards.
    pub async fn run(
        &self,
        corpus: &Corpus,
        modes: &[AccessMode],
    ) -> Result<Vec<InjectionResult>, HarnessError> {
        let outcome = self.run_modes(corpus, modes).await;
        self.guarded.access().set_mode(AccessMode::Restricted);
        outcome
    }

    async fn run_modes(
        &self,
        corpus: &Corpus,
        modes: &[AccessMode],
    ) -> Result<Vec<InjectionResult>, HarnessError> {
        let mut results = Vec::with_capacity(corpus.len() * modes.len());
        for &mode in modes {
            self.fixture.reset().await?;
            tracing::info!(mode = %mode, cases = corpus.len(), "Running corpus");
            for case in corpus.cases() {
                results.push(self.test(case, mode).await?);
            }
        }
        Ok(results)
    }

    /// Run one case under `mode`.
    ///
    /// Every attempted case yields exactly one result. Only a lost target is an error.
    pub async fn test(
        &self,
        case: &AttackTestCase,
        mode: AccessMode,
    ) -> Result<InjectionResult, HarnessError> {
        self.guarded.access().set_mode(mode);

        let evaluation = match case.category.rule() {
            OracleRule::Sentinel => self.sentinel_case(case).await?,
            OracleRule::Differential => self.differential_case(case).await?,
            OracleRule::Latency => self.latency_case(case).await?,
            OracleRule::SideEffect => self.side_effect_case(case).await?,
            OracleRule::SentinelOrSideEffect => match case.evidence {
                Evidence::Sentinel(_) => self.sentinel_case(case).await?,
                _ => self.side_effect_case(case).await?,
            },
            OracleRule::Binding => self.binding_case(case).await?,
        };

        self.clean_up(case, evaluation.effect.as_ref()).await?;

        let result = InjectionResult::new(
            case,
            mode,
            evaluation.verdict,
            Observed::from(&evaluation.primary),
            evaluation.primary.latency,
        );
        tracing::debug!(
            case = case.name,
            mode = %mode,
            vulnerable = result.vulnerable,
            inconclusive = result.inconclusive,
            detail = result.verdict.detail(),
            "Case judged"
        );
        Ok(result)
    }

    async fn sentinel_case(&self, case: &AttackTestCase) -> Result<Evaluation, HarnessError> {
        let (Payload::Single { sql }, Evidence::Sentinel(sentinel)) = (&case.payload, &case.evidence)
        else {
            return Ok(mismatched(case));
        };
        let observation = self.observe(sql, &[]).await?;
        let verdict = oracle::judge_sentinel(&observation, sentinel);
        Ok(Evaluation::new(verdict, observation))
    }

    async fn differential_case(&self, case: &AttackTestCase) -> Result<Evaluation, HarnessError> {
        let Payload::BooleanPair {
            when_true,
            when_false,
        } = &case.payload
        else {
            return Ok(mismatched(case));
        };

        let samples = self.config.boolean_samples.max(1);
        let mut true_runs = Vec::new();
        let mut false_runs = Vec::new();
        for _ in 0..samples {
            true_runs.push(self.observe(when_true, &[]).await?);
            false_runs.push(self.observe(when_false, &[]).await?);
        }

        let verdict = oracle::judge_boolean(&true_runs, &false_runs);
        let primary = true_runs.swap_remove(0);
        Ok(Evaluation::new(verdict, primary))
    }

    async fn latency_case(&self, case: &AttackTestCase) -> Result<Evaluation, HarnessError> {
        let Payload::Timed { delayed, control } = &case.payload else {
            return Ok(mismatched(case));
        };

        let mut controls = Vec::new();
        for _ in 0..self.config.control_samples.max(1) {
            controls.push(self.observe(control, &[]).await?);
        }
        let delayed = self.observe(delayed, &[]).await?;

        let verdict = oracle::judge_timing(
            &delayed,
            &controls,
            self.config.injected_delay(),
            self.config.delay_threshold_ratio,
        );
        Ok(Evaluation::new(verdict, delayed))
    }

    async fn side_effect_case(&self, case: &AttackTestCase) -> Result<Evaluation, HarnessError> {
        let (Payload::Single { sql }, Evidence::State { query, baseline }) =
            (&case.payload, &case.evidence)
        else {
            return Ok(mismatched(case));
        };

        let (observation, effect) = self
            .observe_with_state(sql, &[], query, baseline.as_ref())
            .await?;
        let verdict = oracle::judge_effect(&observation, &effect);
        Ok(Evaluation {
            verdict,
            primary: observation,
            effect: Some(effect),
        })
    }

    async fn binding_case(&self, case: &AttackTestCase) -> Result<Evaluation, HarnessError> {
        let Payload::Bound {
            sql,
            params,
            expect,
        } = &case.payload
        else {
            return Ok(mismatched(case));
        };

        let (observation, effect) = match &case.evidence {
            Evidence::State { query, baseline } => {
                let (observation, effect) = self
                    .observe_with_state(sql, params, query, baseline.as_ref())
                    .await?;
                (observation, Some(effect))
            }
            _ => (self.observe(sql, params).await?, None),
        };

        let verdict = oracle::judge_binding(&observation, params, *expect, effect.as_ref());
        Ok(Evaluation {
            verdict,
            primary: observation,
            effect,
        })
    }

    /// Run `sql` through the gateway and executor under the current mode.
    async fn observe(&self, sql: &str, params: &[SqlParam]) -> Result<Observation, HarnessError> {
        let started = Instant::now();
        let outcome = match self.guarded.execute(sql, params).await {
            Ok(result) => Outcome::Rows(result),
            Err(GuardError::PolicyViolation(denial)) => Outcome::Denied(denial),
            Err(GuardError::Executor(error)) if error.is_fatal() => {
                return Err(HarnessError::TargetLost(error));
            }
            Err(GuardError::Executor(error)) => Outcome::Failed(error),
        };
        Ok(Observation {
            outcome,
            latency: started.elapsed(),
        })
    }

    async fn observe_with_state(
        &self,
        sql: &str,
        params: &[SqlParam],
        query: &str,
        baseline: Option<&Value>,
    ) -> Result<(Observation, EffectCheck), HarnessError> {
        let before = self.read_state(query).await?;
        let observation = self.observe(sql, params).await?;
        let after = self.read_state(query).await?;

        Ok((observation, EffectCheck::compare(before, after, baseline)))
    }

    /// Scalar state query run directly on the executor, outside the gateway.
    async fn read_state(&self, sql: &str) -> Result<Result<Value, String>, HarnessError> {
        match self.guarded.executor().execute(sql, &[], false).await {
            Ok(result) => Ok(result
                .scalar()
                .cloned()
                .ok_or_else(|| "state query returned no rows".to_string())),
            Err(error) if error.is_fatal() => Err(HarnessError::TargetLost(error)),
            Err(error) => Ok(Err(error.to_string())),
        }
    }

    /// Undo what a case was observed to change before the next case runs. State that was
    /// already there, or that the case never touched, is left alone.
    async fn clean_up(
        &self,
        case: &AttackTestCase,
        effect: Option<&EffectCheck>,
    ) -> Result<(), HarnessError> {
        let Some(effect) = effect else {
            return Ok(());
        };

        let statements: &[String] = if effect.needs_cleanup() {
            case.cleanup.as_slice()
        } else {
            &[]
        };
        for sql in statements {
            if let Err(error) = self.guarded.executor().execute(sql, &[], false).await {
                if error.is_fatal() {
                    return Err(HarnessError::TargetLost(error));
                }
                tracing::warn!(case = case.name, error = %error, "Cleanup statement failed");
            }
        }

        if effect.needs_fixture_reset() {
            tracing::debug!(case = case.name, "Resetting fixture after side effect");
            self.fixture.reset().await?;
        }
        Ok(())
    }
}

fn mismatched(case: &AttackTestCase) -> Evaluation {
    Evaluation::new(
        Verdict::Inconclusive(format!(
            "case shape does not fit the {} rule",
            case.category
        )),
        Observation {
            outcome: Outcome::Rows(Default::default()),
            latency: Duration::ZERO,
        },
    )
}
