//! Oracle rules.
//!
//! Pure functions from observed outcomes to a [`Verdict`]. A case is vulnerable only when the
//! rule for its category positively observes the attacker's effect; a denial or an executor
//! error counts as blocked, except where the error text itself carries a sentinel.

use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use sqlguard_core::{QueryResult, SqlParam};
use sqlguard_gateway::Denial;
use sqlguard_pg::ExecutorError;

use crate::corpus::BindingExpectation;

/// What one payload execution produced.
#[derive(Debug)]
pub enum Outcome {
    Rows(QueryResult),
    Denied(Denial),
    Failed(ExecutorError),
}

/// One payload execution and how long it took.
#[derive(Debug)]
pub struct Observation {
    pub outcome: Outcome,
    pub latency: Duration,
}

impl Observation {
    pub fn rows(&self) -> Option<&QueryResult> {
        match &self.outcome {
            Outcome::Rows(result) => Some(result),
            _ => None,
        }
    }

    /// Short description of why the payload did not run to completion, if it did not.
    pub fn blocked_reason(&self) -> Option<String> {
        match &self.outcome {
            Outcome::Rows(_) => None,
            Outcome::Denied(denial) => Some(format!("denied: {}", denial)),
            Outcome::Failed(error) => Some(format!("executor error: {}", error)),
        }
    }
}

/// Result of comparing a state query before and after a payload.
#[derive(Debug, Clone, PartialEq)]
pub enum EffectCheck {
    Unchanged,
    Changed { before: Value, after: Value },
    /// The state the payload would create was already there.
    Preexisting(Value),
    /// The state query itself failed before or after the payload.
    Unreadable(String),
}

impl EffectCheck {
    /// Compare two state readings. With a `baseline`, a first reading that differs from it
    /// means the payload cannot be told apart from what was already there.
    pub fn compare(
        before: Result<Value, String>,
        after: Result<Value, String>,
        baseline: Option<&Value>,
    ) -> Self {
        match (before, after) {
            (Err(reason), _) | (_, Err(reason)) => EffectCheck::Unreadable(reason),
            (Ok(before), _) if baseline.is_some_and(|b| *b != before) => {
                EffectCheck::Preexisting(before)
            }
            (Ok(before), Ok(after)) if before == after => EffectCheck::Unchanged,
            (Ok(before), Ok(after)) => EffectCheck::Changed { before, after },
        }
    }

    /// Whether the case's own cleanup statements are due.
    pub fn needs_cleanup(&self) -> bool {
        matches!(self, EffectCheck::Changed { .. })
    }

    /// Whether the fixture table may be dirty.
    pub fn needs_fixture_reset(&self) -> bool {
        matches!(self, EffectCheck::Changed { .. } | EffectCheck::Unreadable(_))
    }
}

/// Oracle verdict.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", content = "detail", rename_all = "snake_case")]
pub enum Verdict {
    Vulnerable(String),
    Protected(String),
    Inconclusive(String),
}

impl Verdict {
    pub fn is_vulnerable(&self) -> bool {
        matches!(self, Verdict::Vulnerable(_))
    }

    pub fn is_inconclusive(&self) -> bool {
        matches!(self, Verdict::Inconclusive(_))
    }

    pub fn detail(&self) -> &str {
        match self {
            Verdict::Vulnerable(d) | Verdict::Protected(d) | Verdict::Inconclusive(d) => d,
        }
    }
}

fn blocked(observation: &Observation) -> Verdict {
    Verdict::Protected(
        observation
            .blocked_reason()
            .unwrap_or_else(|| "no attacker effect observed".to_string()),
    )
}

/// Union-based, error-based and sentinel-carrying extension cases.
pub fn judge_sentinel(observation: &Observation, sentinel: &str) -> Verdict {
    match &observation.outcome {
        Outcome::Rows(result) if result.contains_text(sentinel) => {
            Verdict::Vulnerable(format!("sentinel '{}' returned in rows", sentinel))
        }
        Outcome::Rows(_) => Verdict::Protected("rows carry no sentinel".to_string()),
        Outcome::Failed(error) if error.message().contains(sentinel) => {
            Verdict::Vulnerable(format!("sentinel '{}' leaked in error text", sentinel))
        }
        Outcome::Denied(_) | Outcome::Failed(_) => blocked(observation),
    }
}

/// Boolean-blind: the true and false variants must both run, each must be stable across its
/// repeats, and the two must differ.
pub fn judge_boolean(when_true: &[Observation], when_false: &[Observation]) -> Verdict {
    if let Some(obs) = when_true
        .iter()
        .chain(when_false)
        .find(|obs| obs.rows().is_none())
    {
        return blocked(obs);
    }

    let (Some(t), Some(f)) = (stable_rows(when_true), stable_rows(when_false)) else {
        if when_true.is_empty() || when_false.is_empty() {
            return Verdict::Inconclusive("a variant was never executed".to_string());
        }
        return Verdict::Inconclusive("repeated runs of a variant disagree".to_string());
    };

    if t != f {
        Verdict::Vulnerable(format!(
            "true variant returned {} row(s), false variant {}; results differ",
            t.len(),
            f.len()
        ))
    } else {
        Verdict::Protected("true and false variants are indistinguishable".to_string())
    }
}

/// The common result of all samples, if they all agree.
fn stable_rows(samples: &[Observation]) -> Option<&QueryResult> {
    let first = samples.first()?.rows()?;
    samples
        .iter()
        .all(|obs| obs.rows() == Some(first))
        .then_some(first)
}

/// Time-blind: the delayed variant's latency must exceed the control median by at least
/// `ratio` of the injected delay.
///
/// A delayed run cut off by the statement timeout still ran for as long as it took to be
/// cancelled, so its latency is judged like a completed run's. One cut off short of the
/// threshold is inconclusive rather than blocked.
pub fn judge_timing(
    delayed: &Observation,
    controls: &[Observation],
    injected: Duration,
    ratio: f64,
) -> Verdict {
    let cut_off = matches!(
        &delayed.outcome,
        Outcome::Failed(ExecutorError::Timeout { .. })
    );
    if delayed.rows().is_none() && !cut_off {
        return blocked(delayed);
    }

    let mut baseline: Vec<Duration> = controls
        .iter()
        .filter(|obs| obs.rows().is_some())
        .map(|obs| obs.latency)
        .collect();
    if baseline.is_empty() {
        return Verdict::Inconclusive("no successful control run to compare against".to_string());
    }
    baseline.sort();
    let median = baseline[baseline.len() / 2];

    let excess = delayed.latency.saturating_sub(median);
    let threshold = injected.mul_f64(ratio);
    if excess >= threshold {
        Verdict::Vulnerable(format!(
            "latency {}ms exceeds control median {}ms by {}ms (threshold {}ms){}",
            delayed.latency.as_millis(),
            median.as_millis(),
            excess.as_millis(),
            threshold.as_millis(),
            if cut_off { ", cut off by statement timeout" } else { "" }
        ))
    } else if cut_off {
        Verdict::Inconclusive(format!(
            "statement timed out after {}ms, short of the {}ms threshold",
            delayed.latency.as_millis(),
            threshold.as_millis()
        ))
    } else {
        Verdict::Protected(format!(
            "latency {}ms within {}ms of control median {}ms",
            delayed.latency.as_millis(),
            threshold.as_millis(),
            median.as_millis()
        ))
    }
}

/// Stacked-queries, bypass and state-checked extension cases.
///
/// An observed side effect is conclusive even when the payload also reported an error: the
/// error can come from a later statement after an earlier one already took effect.
pub fn judge_effect(observation: &Observation, effect: &EffectCheck) -> Verdict {
    match effect {
        EffectCheck::Changed { before, after } => Verdict::Vulnerable(format!(
            "side effect observed: state changed from {} to {}",
            before, after
        )),
        EffectCheck::Preexisting(value) => Verdict::Inconclusive(format!(
            "state already {} before the payload ran",
            value
        )),
        EffectCheck::Unreadable(reason) => {
            Verdict::Inconclusive(format!("state query failed: {}", reason))
        }
        EffectCheck::Unchanged => blocked(observation),
    }
}

/// Parameter-binding control.
pub fn judge_binding(
    observation: &Observation,
    params: &[SqlParam],
    expect: BindingExpectation,
    effect: Option<&EffectCheck>,
) -> Verdict {
    match effect {
        Some(EffectCheck::Unchanged) | None => {}
        Some(check) => return judge_effect(observation, check),
    }

    let Some(result) = observation.rows() else {
        return blocked(observation);
    };

    match expect {
        BindingExpectation::NoRows if !result.is_empty() => Verdict::Vulnerable(format!(
            "bound value matched {} row(s) as if it were SQL",
            result.len()
        )),
        BindingExpectation::NoRows => {
            Verdict::Protected("bound value compared as a literal".to_string())
        }
        BindingExpectation::Echo => {
            let expected: Vec<Value> = params.iter().map(SqlParam::to_json).collect();
            let echoed: Option<Vec<Value>> = result
                .rows
                .first()
                .map(|row| row.values().cloned().collect());
            if echoed.as_ref() == Some(&expected) {
                Verdict::Protected("bound values returned unchanged".to_string())
            } else {
                Verdict::Inconclusive(format!(
                    "bound values did not round-trip: expected {:?}, got {:?}",
                    expected, echoed
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use sqlguard_core::Record;
    use sqlguard_gateway::{DenyReason, StatementKind};

    fn rows(values: &[Value]) -> Observation {
        latency_rows(values, 5)
    }

    fn latency_rows(values: &[Value], ms: u64) -> Observation {
        let rows = values
            .iter()
            .map(|v| {
                let mut record = Record::new();
                record.push("v", v.clone());
                record
            })
            .collect();
        Observation {
            outcome: Outcome::Rows(QueryResult::from_rows(rows)),
            latency: Duration::from_millis(ms),
        }
    }

    fn denied() -> Observation {
        Observation {
            outcome: Outcome::Denied(Denial {
                kind: StatementKind::Stacked,
                reason: DenyReason::Stacked,
            }),
            latency: Duration::ZERO,
        }
    }

    fn failed(message: &str) -> Observation {
        Observation {
            outcome: Outcome::Failed(ExecutorError::from_sqlstate(Some("22P02"), message)),
            latency: Duration::from_millis(3),
        }
    }

    #[test]
    fn test_sentinel_in_rows_or_error() {
        assert!(judge_sentinel(&rows(&[json!("sqlguard_u1 16.4")]), "sqlguard_u1").is_vulnerable());
        assert!(
            judge_sentinel(
                &failed("invalid input syntax for type integer: \"sqlguard_e1PostgreSQL\""),
                "sqlguard_e1"
            )
            .is_vulnerable()
        );
    }

    #[test]
    fn test_sentinel_absent_is_protected() {
        assert!(!judge_sentinel(&rows(&[json!("admin")]), "sqlguard_u1").is_vulnerable());
        assert!(!judge_sentinel(&denied(), "sqlguard_u1").is_vulnerable());
        assert!(!judge_sentinel(&failed("permission denied"), "sqlguard_u1").is_vulnerable());
    }

    #[test]
    fn test_boolean_differential() {
        let verdict = judge_boolean(&[rows(&[json!(1)]), rows(&[json!(1)])], &[rows(&[json!(0)]), rows(&[json!(0)])]);
        assert!(verdict.is_vulnerable());

        let same = judge_boolean(&[rows(&[json!(1)])], &[rows(&[json!(1)])]);
        assert_eq!(
            same,
            Verdict::Protected("true and false variants are indistinguishable".to_string())
        );
    }

    #[test]
    fn test_boolean_unstable_is_inconclusive() {
        let verdict = judge_boolean(&[rows(&[json!(1)]), rows(&[json!(2)])], &[rows(&[json!(0)])]);
        assert!(verdict.is_inconclusive());
    }

    #[test]
    fn test_boolean_blocked_variant() {
        let verdict = judge_boolean(&[denied()], &[denied()]);
        assert!(matches!(verdict, Verdict::Protected(_)));
    }

    #[test]
    fn test_timing_against_control_median() {
        let controls = [latency_rows(&[], 10), latency_rows(&[], 400), latency_rows(&[], 12)];
        let injected = Duration::from_millis(2000);

        assert!(judge_timing(&latency_rows(&[], 2050), &controls, injected, 0.8).is_vulnerable());
        // Jitter alone does not count.
        assert!(!judge_timing(&latency_rows(&[], 450), &controls, injected, 0.8).is_vulnerable());
    }

    fn timed_out(ms: u64) -> Observation {
        Observation {
            outcome: Outcome::Failed(ExecutorError::from_sqlstate(
                Some("57014"),
                "canceling statement due to statement timeout",
            )),
            latency: Duration::from_millis(ms),
        }
    }

    #[test]
    fn test_timing_cut_off_by_statement_timeout_still_counts() {
        let controls = [latency_rows(&[], 10), latency_rows(&[], 12), latency_rows(&[], 11)];
        let injected = Duration::from_millis(2000);

        let verdict = judge_timing(&timed_out(2500), &controls, injected, 0.8);
        assert!(verdict.is_vulnerable());
        assert!(verdict.detail().contains("cut off"));

        assert!(judge_timing(&timed_out(300), &controls, injected, 0.8).is_inconclusive());
        assert!(matches!(
            judge_timing(&failed("division by zero"), &controls, injected, 0.8),
            Verdict::Protected(_)
        ));
    }

    #[test]
    fn test_timing_without_baseline_is_inconclusive() {
        let verdict = judge_timing(
            &latency_rows(&[], 2050),
            &[denied()],
            Duration::from_millis(2000),
            0.8,
        );
        assert!(verdict.is_inconclusive());
        assert!(!judge_timing(&denied(), &[denied()], Duration::from_secs(2), 0.8).is_vulnerable());
    }

    #[test]
    fn test_effect_rules() {
        let changed = EffectCheck::Changed {
            before: json!(true),
            after: json!(false),
        };
        assert!(judge_effect(&rows(&[]), &changed).is_vulnerable());
        assert!(judge_effect(&failed("later statement failed"), &changed).is_vulnerable());
        assert!(!judge_effect(&rows(&[json!(1)]), &EffectCheck::Unchanged).is_vulnerable());
        assert!(judge_effect(&rows(&[]), &EffectCheck::Unreadable("gone".into())).is_inconclusive());
    }

    #[test]
    fn test_preexisting_state_is_inconclusive() {
        let effect = EffectCheck::compare(Ok(json!(1)), Ok(json!(1)), Some(&json!(0)));
        assert_eq!(effect, EffectCheck::Preexisting(json!(1)));
        assert!(!effect.needs_cleanup());
        assert!(!effect.needs_fixture_reset());

        let verdict = judge_effect(&rows(&[]), &effect);
        assert_eq!(
            verdict,
            Verdict::Inconclusive("state already 1 before the payload ran".to_string())
        );
    }

    #[test]
    fn test_state_comparison_against_baseline() {
        let created = EffectCheck::compare(Ok(json!(0)), Ok(json!(1)), Some(&json!(0)));
        assert_eq!(
            created,
            EffectCheck::Changed {
                before: json!(0),
                after: json!(1)
            }
        );
        assert!(created.needs_cleanup());

        let untouched = EffectCheck::compare(Ok(json!(0)), Ok(json!(0)), Some(&json!(0)));
        assert_eq!(untouched, EffectCheck::Unchanged);
        assert!(!untouched.needs_cleanup());

        let no_baseline = EffectCheck::compare(Ok(json!(5)), Ok(json!(4)), None);
        assert!(matches!(no_baseline, EffectCheck::Changed { .. }));

        let unreadable = EffectCheck::compare(Ok(json!(0)), Err("relation gone".into()), None);
        assert_eq!(unreadable, EffectCheck::Unreadable("relation gone".to_string()));
        assert!(!unreadable.needs_cleanup());
        assert!(unreadable.needs_fixture_reset());
    }

    #[test]
    fn test_binding_echo_and_no_rows() {
        let hostile = "'; DROP TABLE x; --";
        let params = vec![SqlParam::Text(hostile.to_string())];

        let echoed = judge_binding(
            &rows(&[json!(hostile)]),
            &params,
            BindingExpectation::Echo,
            Some(&EffectCheck::Unchanged),
        );
        assert_eq!(
            echoed,
            Verdict::Protected("bound values returned unchanged".to_string())
        );

        let matched = judge_binding(&rows(&[json!(1)]), &params, BindingExpectation::NoRows, None);
        assert!(matched.is_vulnerable());

        let empty = judge_binding(&rows(&[]), &params, BindingExpectation::NoRows, None);
        assert!(matches!(empty, Verdict::Protected(_)));

        let mangled = judge_binding(&rows(&[json!("x")]), &params, BindingExpectation::Echo, None);
        assert!(mangled.is_inconclusive());
    }
}
