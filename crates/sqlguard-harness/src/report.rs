//! Security report.
//!
//! [`aggregate`] folds per-mode injection results into a [`SecurityReport`]. Scores and
//! recommendations are derived deterministically: the same results always give the same report
//! apart from its run id and timestamp.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlguard_core::{AccessMode, Scope};
use uuid::Uuid;

use crate::corpus::{AttackCategory, Severity};
use crate::tester::InjectionResult;

/// Default pass threshold for [`SecurityReport::passes`].
pub const PASS_THRESHOLD: f64 = 70.0;

/// Recommendation priority, most urgent first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Critical,
    High,
    Medium,
    Info,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Critical => "CRITICAL",
            Priority::High => "HIGH",
            Priority::Medium => "MEDIUM",
            Priority::Info => "INFO",
        };
        f.write_str(s)
    }
}

/// A fixed-text recommendation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Recommendation {
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<AccessMode>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<AttackCategory>,
    pub issue: String,
    pub solution: &'static str,
}

/// Vulnerable results per severity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SeverityBreakdown {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityBreakdown {
    fn add(&mut self, severity: Severity) {
        match severity {
            Severity::Critical => self.critical += 1,
            Severity::High => self.high += 1,
            Severity::Medium => self.medium += 1,
            Severity::Low => self.low += 1,
        }
    }
}

/// Counts for one category within one mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategorySummary {
    pub category: AttackCategory,
    pub total: usize,
    pub vulnerable: usize,
    pub protected: usize,
    pub inconclusive: usize,
}

/// Summary of one mode.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModeSummary {
    pub mode: AccessMode,
    pub total_tests: usize,
    pub vulnerable: usize,
    pub protected: usize,
    pub inconclusive: usize,
    /// 100 * protected / total. Inconclusive results count toward the total only.
    pub security_score: f64,
    pub vulnerabilities_by_severity: SeverityBreakdown,
    pub categories: Vec<CategorySummary>,
}

impl ModeSummary {
    fn from_results(mode: AccessMode, results: &[&InjectionResult]) -> Self {
        let mut severity = SeverityBreakdown::default();
        for result in results.iter().filter(|r| r.vulnerable) {
            severity.add(result.severity);
        }

        let categories = AttackCategory::ALL
            .iter()
            .filter_map(|&category| {
                let in_category: Vec<_> =
                    results.iter().filter(|r| r.category == category).collect();
                (!in_category.is_empty()).then(|| CategorySummary {
                    category,
                    total: in_category.len(),
                    vulnerable: in_category.iter().filter(|r| r.vulnerable).count(),
                    protected: in_category.iter().filter(|r| r.protected()).count(),
                    inconclusive: in_category.iter().filter(|r| r.inconclusive).count(),
                })
            })
            .collect();

        let total = results.len();
        let protected = results.iter().filter(|r| r.protected()).count();
        Self {
            mode,
            total_tests: total,
            vulnerable: results.iter().filter(|r| r.vulnerable).count(),
            protected,
            inconclusive: results.iter().filter(|r| r.inconclusive).count(),
            security_score: score(protected, total),
            vulnerabilities_by_severity: severity,
            categories,
        }
    }
}

/// Result of one assessment run.
#[derive(Debug, Clone, Serialize)]
pub struct SecurityReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub scope: Scope,
    pub corpus_version: String,
    /// Overall score: the most permissive exercised mode's score, never above any other
    /// exercised mode's score.
    pub security_score: f64,
    /// One summary per exercised mode, most permissive first.
    pub summary: Vec<ModeSummary>,
    pub recommendations: Vec<Recommendation>,
    pub results: Vec<InjectionResult>,
}

impl SecurityReport {
    pub fn mode(&self, mode: AccessMode) -> Option<&ModeSummary> {
        self.summary.iter().find(|s| s.mode == mode)
    }

    pub fn total_vulnerable(&self) -> usize {
        self.summary.iter().map(|s| s.vulnerable).sum()
    }

    pub fn total_inconclusive(&self) -> usize {
        self.summary.iter().map(|s| s.inconclusive).sum()
    }

    /// Whether the overall score reaches `threshold`.
    pub fn passes(&self, threshold: f64) -> bool {
        self.security_score >= threshold
    }
}

/// Build a report from all results of a run.
pub fn aggregate(
    results: Vec<InjectionResult>,
    scope: Scope,
    corpus_version: &str,
) -> SecurityReport {
    let summary: Vec<ModeSummary> = AccessMode::ALL
        .iter()
        .filter_map(|&mode| {
            let in_mode: Vec<&InjectionResult> =
                results.iter().filter(|r| r.mode == mode).collect();
            (!in_mode.is_empty()).then(|| ModeSummary::from_results(mode, &in_mode))
        })
        .collect();

    let security_score = summary
        .iter()
        .map(|s| s.security_score)
        .reduce(f64::min)
        .unwrap_or(100.0);

    let recommendations = recommend(&summary);

    let report = SecurityReport {
        run_id: Uuid::new_v4(),
        generated_at: Utc::now(),
        scope,
        corpus_version: corpus_version.to_string(),
        security_score,
        summary,
        recommendations,
        results,
    };

    tracing::info!(
        run_id = %report.run_id,
        score = report.security_score,
        vulnerable = report.total_vulnerable(),
        inconclusive = report.total_inconclusive(),
        "Assessment aggregated"
    );
    report
}

fn score(protected: usize, total: usize) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let raw = 100.0 * protected as f64 / total as f64;
    (raw * 100.0).round() / 100.0
}

fn priority_for(mode: AccessMode, category: AttackCategory) -> Priority {
    match mode {
        AccessMode::Unrestricted if category.exfiltrates() => Priority::Critical,
        AccessMode::Restricted => Priority::High,
        AccessMode::Unrestricted => Priority::Medium,
    }
}

fn solution_for(category: AttackCategory) -> &'static str {
    match category {
        AttackCategory::UnionBased => {
            "Keep agent traffic in RESTRICTED mode, deny credential catalogs, configuration views and file functions, and grant the agent role SELECT only on the tables it needs."
        }
        AttackCategory::BooleanBlind => {
            "Deny catalog and configuration lookups in RESTRICTED mode and revoke pg_authid and pg_shadow access from the agent role."
        }
        AttackCategory::TimeBlind => {
            "Keep delay functions denied and set a short statement_timeout for agent sessions."
        }
        AttackCategory::ErrorBased => {
            "Deny configuration introspection and dynamic-query functions, and do not return raw server error text to untrusted callers."
        }
        AttackCategory::StackedQueries => {
            "Reject multi-statement text before execution; RESTRICTED mode does this for every call."
        }
        AttackCategory::Bypass => {
            "Classify normalized statements rather than raw text, and run RESTRICTED calls inside read-only transactions."
        }
        AttackCategory::ExtensionAbuse => {
            "Connect with a role that is not a superuser and not a member of pg_read_server_files or pg_execute_server_program, and deny extension and function creation."
        }
        AttackCategory::ParameterBinding => {
            "Pass every caller-supplied value as a bound parameter and never interpolate it into SQL text."
        }
    }
}

const SOLUTION_KEEP_RESTRICTED: &str =
    "Keep agents in RESTRICTED mode and reserve UNRESTRICTED for trusted administrative tooling.";
const SOLUTION_RERUN: &str =
    "Re-run the assessment against an idle server; inconclusive cases are neither safe nor vulnerable.";
const SOLUTION_ALL_CLEAR: &str =
    "Re-run the assessment after any change to the gateway policy or the database role.";

fn recommend(summary: &[ModeSummary]) -> Vec<Recommendation> {
    let mut recommendations = Vec::new();

    for mode_summary in summary {
        for category in mode_summary.categories.iter().filter(|c| c.vulnerable > 0) {
            recommendations.push(Recommendation {
                priority: priority_for(mode_summary.mode, category.category),
                mode: Some(mode_summary.mode),
                category: Some(category.category),
                issue: format!(
                    "{} of {} {} payloads succeeded in {} mode",
                    category.vulnerable,
                    category.total,
                    category.category,
                    mode_summary.mode.as_str().to_uppercase()
                ),
                solution: solution_for(category.category),
            });
        }
    }

    let unrestricted_vulnerable = summary
        .iter()
        .find(|s| s.mode == AccessMode::Unrestricted)
        .map(|s| s.vulnerable)
        .unwrap_or(0);
    if unrestricted_vulnerable > 0 {
        recommendations.push(Recommendation {
            priority: Priority::Info,
            mode: Some(AccessMode::Unrestricted),
            category: None,
            issue: format!(
                "UNRESTRICTED mode let {} attack payloads through",
                unrestricted_vulnerable
            ),
            solution: SOLUTION_KEEP_RESTRICTED,
        });
    }

    let inconclusive: usize = summary.iter().map(|s| s.inconclusive).sum();
    if inconclusive > 0 {
        recommendations.push(Recommendation {
            priority: Priority::Info,
            mode: None,
            category: None,
            issue: format!("{} cases could not be judged conclusively", inconclusive),
            solution: SOLUTION_RERUN,
        });
    }

    let vulnerable: usize = summary.iter().map(|s| s.vulnerable).sum();
    if vulnerable == 0 && inconclusive == 0 {
        recommendations.push(Recommendation {
            priority: Priority::Info,
            mode: None,
            category: None,
            issue: "No vulnerabilities detected".to_string(),
            solution: SOLUTION_ALL_CLEAR,
        });
    }

    recommendations.sort_by_key(|r| (r.priority, r.mode, r.category));
    recommendations
}
