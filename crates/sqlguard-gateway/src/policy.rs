//! Access-mode policy.
//!
//! [`Gateway::validate`] turns a [`Classification`] and the caller's [`AccessMode`] into an
//! allow or deny decision. It never touches the network.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use sqlguard_core::{AccessMode, GatewayPolicyConfig};

use crate::classify::{
    CONFIG_FUNCTIONS, CONFIG_RELATIONS, CREDENTIAL_RELATIONS, Classification,
    DELAY_FUNCTIONS, DENIED_FUNCTION_PREFIXES, MUTATING_FUNCTIONS, SQL_TEXT_FUNCTIONS,
    SqlClassifier, StatementKind,
};

/// Why a statement was denied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "name", rename_all = "snake_case")]
pub enum DenyReason {
    /// More than one top-level statement.
    Stacked,
    /// The statement is not a read-only query.
    NotReadOnly,
    /// A denied function is called.
    DeniedFunction(String),
    /// A denied catalog or view is referenced.
    DeniedRelation(String),
    /// The text could not be classified.
    Unclassifiable,
    /// No statement at all.
    Empty,
}

impl fmt::Display for DenyReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DenyReason::Stacked => f.write_str("multiple statements"),
            DenyReason::NotReadOnly => f.write_str("statement is not read-only"),
            DenyReason::DeniedFunction(name) => write!(f, "function '{}' is not allowed", name),
            DenyReason::DeniedRelation(name) => write!(f, "relation '{}' is not allowed", name),
            DenyReason::Unclassifiable => f.write_str("statement could not be classified"),
            DenyReason::Empty => f.write_str("no statement"),
        }
    }
}

/// A denied statement: the rejected kind and the rule that rejected it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Denial {
    pub kind: StatementKind,
    pub reason: DenyReason,
}

impl fmt::Display for Denial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} statement denied: {}", self.kind, self.reason)
    }
}

/// Gateway decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum Decision {
    Allow { kind: StatementKind },
    Deny(Denial),
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }

    pub fn kind(&self) -> StatementKind {
        match self {
            Decision::Allow { kind } => *kind,
            Decision::Deny(denial) => denial.kind,
        }
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allow { .. } => None,
            Decision::Deny(denial) => Some(denial),
        }
    }
}

/// Access-mode gateway.
///
/// Name lists are fixed at construction. The mode is passed on every call and never cached.
#[derive(Clone)]
pub struct Gateway {
    classifier: SqlClassifier,
    denied_functions: BTreeSet<String>,
    denied_prefixes: Vec<&'static str>,
    denied_relations: BTreeSet<String>,
}

impl Default for Gateway {
    fn default() -> Self {
        Self::new(&GatewayPolicyConfig::default())
    }
}

impl Gateway {
    pub fn new(config: &GatewayPolicyConfig) -> Self {
        let mut denied_functions: BTreeSet<String> = MUTATING_FUNCTIONS
            .iter()
            .chain(SQL_TEXT_FUNCTIONS)
            .map(|s| s.to_string())
            .collect();
        let mut denied_relations: BTreeSet<String> =
            CREDENTIAL_RELATIONS.iter().map(|s| s.to_string()).collect();

        if config.deny_delay_functions {
            denied_functions.extend(DELAY_FUNCTIONS.iter().map(|s| s.to_string()));
        }
        if config.deny_config_introspection {
            denied_functions.extend(CONFIG_FUNCTIONS.iter().map(|s| s.to_string()));
            denied_relations.extend(CONFIG_RELATIONS.iter().map(|s| s.to_string()));
        }
        denied_functions.extend(
            config
                .extra_denied_functions
                .iter()
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty()),
        );

        Self {
            classifier: SqlClassifier::new(),
            denied_functions,
            denied_prefixes: DENIED_FUNCTION_PREFIXES.to_vec(),
            denied_relations,
        }
    }

    fn function_denied(&self, name: &str) -> bool {
        self.denied_functions.contains(name)
            || self.denied_prefixes.iter().any(|prefix| name.starts_with(prefix))
    }

    /// Classify without deciding.
    pub fn classify(&self, sql: &str) -> Classification {
        self.classifier.classify(sql)
    }

    /// Decide whether `sql` may run under `mode`.
    pub fn validate(&self, sql: &str, mode: AccessMode) -> Decision {
        let classification = self.classifier.classify(sql);
        let decision = self.decide(&classification, mode);

        match &decision {
            Decision::Allow { kind } => {
                tracing::debug!(mode = %mode, kind = %kind, "Statement allowed");
            }
            Decision::Deny(denial) => {
                tracing::info!(
                    mode = %mode,
                    kind = %denial.kind,
                    reason = %denial.reason,
                    "Statement denied"
                );
            }
        }
        decision
    }

    fn decide(&self, classification: &Classification, mode: AccessMode) -> Decision {
        if mode == AccessMode::Unrestricted {
            return Decision::Allow {
                kind: classification.kind,
            };
        }

        let deny = |kind, reason| Decision::Deny(Denial { kind, reason });

        match classification.kind {
            StatementKind::Stacked => return deny(StatementKind::Stacked, DenyReason::Stacked),
            StatementKind::Unknown if classification.statements.is_empty() => {
                let reason = if classification.error.is_some() {
                    DenyReason::Unclassifiable
                } else {
                    DenyReason::Empty
                };
                return deny(StatementKind::Unknown, reason);
            }
            StatementKind::Unknown => {
                return deny(StatementKind::Unknown, DenyReason::Unclassifiable);
            }
            StatementKind::Write | StatementKind::Ddl | StatementKind::Administrative => {
                return deny(classification.kind, DenyReason::NotReadOnly);
            }
            StatementKind::Select => {}
        }

        // A read-only shape calling a side-effecting function resolves to Administrative.
        if let Some(name) = classification
            .functions()
            .find(|name| self.function_denied(name))
        {
            return deny(
                StatementKind::Administrative,
                DenyReason::DeniedFunction(name.to_string()),
            );
        }
        if let Some(name) = classification
            .identifiers()
            .find(|name| self.denied_relations.contains(*name))
        {
            return deny(
                StatementKind::Administrative,
                DenyReason::DeniedRelation(name.to_string()),
            );
        }

        Decision::Allow {
            kind: StatementKind::Select,
        }
    }
}
