//! Attack corpus.
//!
//! A static, versioned catalog of attack payloads, kept as data in `corpus/cases.yaml` and
//! compiled into the binary. Templates are rendered once against the provisioned
//! [`TargetSchema`] when the corpus is loaded; the rendered cases are never modified
//! afterwards.
//!
//! Sentinels are written into payloads as split literals (`'sqlg' || 'uard_u1'`), so the joined
//! value `sqlguard_u1` can only show up in a result or an error message if the server actually
//! evaluated the injected expression.

use std::collections::HashSet;
use std::fmt;
use std::sync::LazyLock;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlguard_core::{Scope, SqlParam, TargetSchema};

use crate::error::CorpusError;

/// Version of the case catalog. Bump when cases are added, removed or changed.
pub const CORPUS_VERSION: &str = "2026.11";

const CASES_YAML: &str = include_str!("../corpus/cases.yaml");

/// Attack category. Each one maps to exactly one oracle rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AttackCategory {
    #[serde(rename = "union-based")]
    UnionBased,
    #[serde(rename = "boolean-blind")]
    BooleanBlind,
    #[serde(rename = "time-blind")]
    TimeBlind,
    #[serde(rename = "error-based")]
    ErrorBased,
    #[serde(rename = "stacked-queries")]
    StackedQueries,
    #[serde(rename = "bypass-obfuscation")]
    Bypass,
    #[serde(rename = "extension-abuse")]
    ExtensionAbuse,
    #[serde(rename = "parameter-binding-control")]
    ParameterBinding,
}

impl AttackCategory {
    /// All categories in report order.
    pub const ALL: [AttackCategory; 8] = [
        AttackCategory::UnionBased,
        AttackCategory::BooleanBlind,
        AttackCategory::TimeBlind,
        AttackCategory::ErrorBased,
        AttackCategory::StackedQueries,
        AttackCategory::Bypass,
        AttackCategory::ExtensionAbuse,
        AttackCategory::ParameterBinding,
    ];

    /// Worst-case impact of a successful attack in this category.
    pub fn severity(self) -> Severity {
        match self {
            AttackCategory::UnionBased
            | AttackCategory::StackedQueries
            | AttackCategory::ExtensionAbuse => Severity::Critical,
            AttackCategory::ErrorBased | AttackCategory::BooleanBlind | AttackCategory::Bypass => {
                Severity::High
            }
            AttackCategory::TimeBlind => Severity::Medium,
            AttackCategory::ParameterBinding => Severity::Low,
        }
    }

    /// Whether success in this category reads data the caller should not see.
    pub fn exfiltrates(self) -> bool {
        matches!(
            self,
            AttackCategory::UnionBased
                | AttackCategory::ErrorBased
                | AttackCategory::BooleanBlind
                | AttackCategory::TimeBlind
                | AttackCategory::ExtensionAbuse
        )
    }

    /// The oracle rule that judges cases in this category.
    pub fn rule(self) -> OracleRule {
        match self {
            AttackCategory::UnionBased | AttackCategory::ErrorBased => OracleRule::Sentinel,
            AttackCategory::BooleanBlind => OracleRule::Differential,
            AttackCategory::TimeBlind => OracleRule::Latency,
            AttackCategory::StackedQueries | AttackCategory::Bypass => OracleRule::SideEffect,
            AttackCategory::ExtensionAbuse => OracleRule::SentinelOrSideEffect,
            AttackCategory::ParameterBinding => OracleRule::Binding,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AttackCategory::UnionBased => "union-based",
            AttackCategory::BooleanBlind => "boolean-blind",
            AttackCategory::TimeBlind => "time-blind",
            AttackCategory::ErrorBased => "error-based",
            AttackCategory::StackedQueries => "stacked-queries",
            AttackCategory::Bypass => "bypass-obfuscation",
            AttackCategory::ExtensionAbuse => "extension-abuse",
            AttackCategory::ParameterBinding => "parameter-binding-control",
        }
    }
}

impl fmt::Display for AttackCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How an outcome is judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OracleRule {
    /// A sentinel shows up in rows or error text.
    Sentinel,
    /// True and false variants give different, stable results.
    Differential,
    /// Latency exceeds the control baseline by the injected delay.
    Latency,
    /// A state query observes a change.
    SideEffect,
    /// Sentinel when the case carries one, side effect otherwise.
    SentinelOrSideEffect,
    /// Bound values come back as data and change nothing.
    Binding,
}

/// Case severity, most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
}

impl Severity {
    /// Whether a case of this severity runs in `scope`.
    pub fn in_scope(self, scope: Scope) -> bool {
        match scope {
            Scope::Comprehensive => true,
            Scope::Quick => matches!(self, Severity::Critical | Severity::High),
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
        };
        f.write_str(s)
    }
}

/// What a bound-parameter case expects back when binding holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingExpectation {
    /// The first row echoes every parameter back, in order.
    Echo,
    /// The parameter is compared as data and matches nothing.
    NoRows,
}

/// Rendered payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "shape", rename_all = "snake_case")]
pub enum Payload {
    /// One text.
    Single { sql: String },
    /// Same query with a true and a false injected condition.
    BooleanPair { when_true: String, when_false: String },
    /// Same query with and without an injected delay.
    Timed { delayed: String, control: String },
    /// Fixed text with caller-supplied values bound as parameters.
    Bound {
        sql: String,
        params: Vec<SqlParam>,
        expect: BindingExpectation,
    },
}

/// Evidence the oracle looks for.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum Evidence {
    /// Judged from the payload's own outcome alone.
    None,
    /// Joined sentinel value that must not appear in rows or error text.
    Sentinel(String),
    /// Scalar query run outside the gateway before and after the payload; a changed value is
    /// an observed side effect.
    State {
        query: String,
        /// Value the query must return before the payload for a change to be attributable.
        #[serde(skip_serializing_if = "Option::is_none")]
        baseline: Option<Value>,
    },
}

/// One rendered attack case.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttackTestCase {
    pub name: &'static str,
    pub category: AttackCategory,
    pub severity: Severity,
    pub description: &'static str,
    pub payload: Payload,
    pub evidence: Evidence,
    /// Statements that undo the case's own effect, run only after a change was observed.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub cleanup: Vec<String>,
}

impl AttackTestCase {
    /// Whether the case can change database state when it succeeds.
    pub fn may_mutate(&self) -> bool {
        matches!(self.evidence, Evidence::State { .. }) || !self.cleanup.is_empty()
    }
}

/// The loaded corpus.
#[derive(Debug, Clone)]
pub struct Corpus {
    cases: Vec<AttackTestCase>,
}

impl Corpus {
    /// Render every case against `target`. `delay` is the delay time-blind payloads inject.
    pub fn load(target: &TargetSchema, delay: Duration) -> Result<Self, CorpusError> {
        let catalog = CATALOG
            .as_ref()
            .map_err(|e| CorpusError::Parse(e.clone()))?;
        let vars = Vars::new(target, delay);

        let mut seen = HashSet::new();
        let mut cases = Vec::with_capacity(catalog.cases.len());
        for template in &catalog.cases {
            if !seen.insert(template.name.as_str()) {
                return Err(template.malformed("duplicate case name"));
            }
            cases.push(template.render(&vars)?);
        }
        Ok(Self { cases })
    }

    /// Cases in `scope`, in catalog order.
    pub fn scoped(&self, scope: Scope) -> Self {
        Self {
            cases: self
                .cases
                .iter()
                .filter(|case| case.severity.in_scope(scope))
                .cloned()
                .collect(),
        }
    }

    pub fn version(&self) -> &'static str {
        CORPUS_VERSION
    }

    pub fn cases(&self) -> &[AttackTestCase] {
        &self.cases
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&AttackTestCase> {
        self.cases.iter().find(|case| case.name == name)
    }

    pub fn in_category(&self, category: AttackCategory) -> impl Iterator<Item = &AttackTestCase> {
        self.cases.iter().filter(move |case| case.category == category)
    }
}

// =============================================================================
// TEMPLATES
// =============================================================================

static CATALOG: LazyLock<Result<Catalog, String>> =
    LazyLock::new(|| serde_yaml::from_str(CASES_YAML).map_err(|e| e.to_string()));

#[derive(Deserialize)]
struct Catalog {
    cases: Vec<CaseTemplate>,
}

/// One catalog entry. Exactly one payload shape is set, and at most one kind of evidence.
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct CaseTemplate {
    name: String,
    category: AttackCategory,
    description: String,
    sql: Option<String>,
    when_true: Option<String>,
    when_false: Option<String>,
    delayed: Option<String>,
    control: Option<String>,
    params: Option<Vec<SqlParam>>,
    expect: Option<BindingExpectation>,
    sentinel: Option<String>,
    state: Option<String>,
    baseline: Option<Value>,
    #[serde(default)]
    cleanup: Vec<String>,
}

impl CaseTemplate {
    fn malformed(&self, reason: &str) -> CorpusError {
        CorpusError::Malformed {
            case: self.name.clone(),
            reason: reason.to_string(),
        }
    }

    fn render(&'static self, vars: &Vars) -> Result<AttackTestCase, CorpusError> {
        let tag = self.sentinel.as_deref();
        let r = |template: &str| vars.render(template, tag);

        let payload = match (
            &self.sql,
            &self.when_true,
            &self.when_false,
            &self.delayed,
            &self.control,
            &self.params,
        ) {
            (Some(sql), None, None, None, None, None) if self.expect.is_none() => {
                Payload::Single { sql: r(sql) }
            }
            (None, Some(t), Some(f), None, None, None) => Payload::BooleanPair {
                when_true: r(t),
                when_false: r(f),
            },
            (None, None, None, Some(delayed), Some(control), None) => Payload::Timed {
                delayed: r(delayed),
                control: r(control),
            },
            (Some(sql), None, None, None, None, Some(params)) => Payload::Bound {
                sql: r(sql),
                params: params
                    .iter()
                    .map(|p| match p {
                        SqlParam::Text(s) => SqlParam::Text(r(s)),
                        other => other.clone(),
                    })
                    .collect(),
                expect: self
                    .expect
                    .ok_or_else(|| self.malformed("bound parameters need an expect value"))?,
            },
            _ => return Err(self.malformed("expected exactly one payload shape")),
        };

        let evidence = match (&self.sentinel, &self.state) {
            (None, None) => Evidence::None,
            (Some(tag), None) => Evidence::Sentinel(sentinel_value(tag)),
            (None, Some(query)) => Evidence::State {
                query: r(query),
                baseline: self.baseline.clone(),
            },
            (Some(_), Some(_)) => {
                return Err(self.malformed("a sentinel and a state query are exclusive"));
            }
        };
        if self.baseline.is_some() && self.state.is_none() {
            return Err(self.malformed("baseline without a state query"));
        }

        Ok(AttackTestCase {
            name: self.name.as_str(),
            category: self.category,
            severity: self.category.severity(),
            description: self.description.as_str(),
            payload,
            evidence,
            cleanup: self.cleanup.iter().map(|sql| r(sql)).collect(),
        })
    }
}

struct Vars {
    table: String,
    column: String,
    admin: String,
    delay: String,
}

impl Vars {
    fn new(target: &TargetSchema, delay: Duration) -> Self {
        Self {
            table: target.table.clone(),
            column: target.column.clone(),
            admin: target.admin_username.replace('\'', "''"),
            delay: format!("{:.3}", delay.as_secs_f64()),
        }
    }

    fn render(&self, template: &str, sentinel: Option<&str>) -> String {
        let mut out = template
            .replace("{table_u}", &unicode_ident(&self.table))
            .replace("{table}", &self.table)
            .replace("{column}", &self.column)
            .replace("{admin}", &self.admin)
            .replace("{delay}", &self.delay);
        if let Some(tag) = sentinel {
            out = out.replace("{sentinel}", &sentinel_literal(tag));
        }
        out
    }
}

/// Split literal that evaluates to `sqlguard_<tag>`.
fn sentinel_literal(tag: &str) -> String {
    format!("('sqlg' || 'uard_{}')", tag)
}

/// Joined sentinel value for `tag`.
pub fn sentinel_value(tag: &str) -> String {
    format!("sqlguard_{}", tag)
}

/// `U&"..."` identifier with its first character written as a Unicode escape.
fn unicode_ident(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => format!("U&\"\\{:04x}{}\"", first as u32, chars.as_str()),
        None => "\"\"".to_string(),
    }
}
