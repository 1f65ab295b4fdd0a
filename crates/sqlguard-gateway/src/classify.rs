//! Statement classification.
//!
//! Each normalized statement is parsed with `sqlparser` and tagged with a [`StatementKind`].
//! The AST decides the statement's kind; a token scan over the same normalized text then
//! collects every function call and identifier so the policy can check them against name
//! lists, and escalates Select-shaped statements that carry write clauses.
//!
//! Classification never guesses in the permissive direction: text that does not parse is
//! [`StatementKind::Unknown`] unless its leading keyword already names a more restrictive kind.

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use sqlparser::ast::Statement;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::error::NormalizeError;
use crate::normalize::{NormalizedStatement, TokenKind, normalize};

/// Statement-kind tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    /// Read-only query: SELECT, read-only CTE, VALUES, TABLE, EXPLAIN of one of these.
    Select,
    /// Data modification.
    Write,
    /// Schema change.
    Ddl,
    /// Session, transaction, privilege, extension and server control.
    Administrative,
    /// More than one top-level statement.
    Stacked,
    /// Could not be classified.
    Unknown,
}

impl StatementKind {
    /// Restrictiveness rank, used to resolve ambiguity toward the stricter kind.
    fn rank(self) -> u8 {
        match self {
            StatementKind::Select => 0,
            StatementKind::Write => 1,
            StatementKind::Ddl => 2,
            StatementKind::Administrative => 3,
            StatementKind::Unknown => 4,
            StatementKind::Stacked => 5,
        }
    }

    /// The stricter of two kinds.
    pub fn escalate(self, other: StatementKind) -> StatementKind {
        if other.rank() > self.rank() { other } else { self }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StatementKind::Select => "select",
            StatementKind::Write => "write",
            StatementKind::Ddl => "ddl",
            StatementKind::Administrative => "administrative",
            StatementKind::Stacked => "stacked",
            StatementKind::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Functions that mutate state, touch the filesystem or network, or control the server.
/// Denied in RESTRICTED mode regardless of configuration.
pub const MUTATING_FUNCTIONS: &[&str] = &[
    "set_config",
    "pg_reload_conf",
    "pg_terminate_backend",
    "pg_cancel_backend",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_stat_file",
    "loread",
    "lowrite",
    "nextval",
    "setval",
    "pg_notify",
    "pg_backup_start",
    "pg_backup_stop",
    "pg_start_backup",
    "pg_stop_backup",
    "pg_switch_wal",
    "pg_create_restore_point",
    "pg_promote",
    "pg_rotate_logfile",
    "pg_logical_emit_message",
    "pg_create_logical_replication_slot",
    "pg_create_physical_replication_slot",
    "pg_drop_replication_slot",
    "pg_copy_logical_replication_slot",
    "pg_copy_physical_replication_slot",
    "pg_log_backend_memory_contexts",
    "pg_import_system_collations",
    "pg_file_write",
    "pg_file_rename",
    "pg_file_unlink",
];

/// Functions that run their text argument as a query. Anything denied elsewhere could be
/// wrapped inside them, so they are denied in RESTRICTED mode regardless of configuration.
pub const SQL_TEXT_FUNCTIONS: &[&str] = &["ts_stat", "ts_rewrite"];

/// Name prefixes of denied function families. `query_to_xml` also covers
/// `query_to_xmlschema` and `query_to_xml_and_xmlschema`, and likewise for the other
/// `*_to_xml` families.
pub const DENIED_FUNCTION_PREFIXES: &[&str] = &[
    "pg_advisory_",
    "pg_try_advisory_",
    "pg_stat_reset",
    "pg_replication_origin_",
    "pg_wal_replay_",
    "pg_ls_",
    "lo_",
    "dblink",
    "query_to_xml",
    "cursor_to_xml",
    "table_to_xml",
    "schema_to_xml",
    "database_to_xml",
];

/// Catalogs holding credentials or raw large-object data.
pub const CREDENTIAL_RELATIONS: &[&str] = &[
    "pg_authid",
    "pg_shadow",
    "pg_user_mapping",
    "pg_user_mappings",
    "pg_largeobject",
];

/// Functions whose only effect is delaying the session.
pub const DELAY_FUNCTIONS: &[&str] = &["pg_sleep", "pg_sleep_for", "pg_sleep_until"];

/// Functions exposing server configuration or environment.
pub const CONFIG_FUNCTIONS: &[&str] = &[
    "current_setting",
    "pg_show_all_settings",
    "version",
    "inet_server_addr",
    "inet_server_port",
    "pg_postmaster_start_time",
    "pg_conf_load_time",
    "pg_current_logfile",
];

/// Views exposing server configuration or other sessions.
pub const CONFIG_RELATIONS: &[&str] = &[
    "pg_settings",
    "pg_file_settings",
    "pg_hba_file_rules",
    "pg_stat_activity",
];

/// Words that turn a Select-shaped statement into a write (data-modifying CTEs,
/// `SELECT ... INTO`, row locks).
const WRITE_WORDS: &[&str] = &["insert", "update", "delete", "merge", "truncate", "into"];

/// Shape of one normalized statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatementShape {
    pub kind: StatementKind,
    /// Whether `sqlparser` accepted the normalized text.
    pub parsed: bool,
    /// Called function names, lowercased, without schema.
    pub functions: BTreeSet<String>,
    /// Other identifiers (tables, columns, schemas), lowercased.
    pub identifiers: BTreeSet<String>,
    /// Why the kind was escalated past what the AST alone said, if it was.
    pub note: Option<String>,
}

/// Classification of a whole SQL text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Classification {
    /// Overall kind: `Stacked` for more than one statement, otherwise the statement's kind.
    pub kind: StatementKind,
    pub statements: Vec<StatementShape>,
    /// Set when the text could not be lexed at all.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Classification {
    fn unclassifiable(error: NormalizeError) -> Self {
        Self {
            kind: StatementKind::Unknown,
            statements: Vec::new(),
            error: Some(error.to_string()),
        }
    }

    pub fn statement_count(&self) -> usize {
        self.statements.len()
    }

    /// All function names across statements.
    pub fn functions(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .flat_map(|s| s.functions.iter().map(String::as_str))
    }

    /// All identifiers across statements.
    pub fn identifiers(&self) -> impl Iterator<Item = &str> {
        self.statements
            .iter()
            .flat_map(|s| s.identifiers.iter().map(String::as_str))
    }
}

/// Classifies SQL text into statement shapes.
pub struct SqlClassifier {
    dialect: PostgreSqlDialect,
}

impl Clone for SqlClassifier {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for SqlClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SqlClassifier {
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Classify raw SQL text.
    pub fn classify(&self, sql: &str) -> Classification {
        let normalized = match normalize(sql) {
            Ok(normalized) => normalized,
            Err(e) => return Classification::unclassifiable(e),
        };

        let statements: Vec<StatementShape> = normalized
            .statements
            .iter()
            .map(|stmt| self.classify_statement(stmt))
            .collect();

        let kind = match statements.as_slice() {
            [] => StatementKind::Unknown,
            [single] => single.kind,
            _ => StatementKind::Stacked,
        };

        Classification {
            kind,
            statements,
            error: None,
        }
    }

    fn classify_statement(&self, stmt: &NormalizedStatement) -> StatementShape {
        let (functions, identifiers) = collect_names(stmt);
        let keyword_kind = keyword_shape(stmt);

        let (mut kind, parsed, mut note) = match Parser::parse_sql(&self.dialect, &stmt.text) {
            Ok(parsed) if parsed.len() == 1 => (ast_kind(&parsed[0], keyword_kind), true, None),
            Ok(parsed) => (
                StatementKind::Stacked,
                true,
                Some(format!("parser found {} statements", parsed.len())),
            ),
            Err(e) => {
                let kind = match keyword_kind {
                    StatementKind::Select => StatementKind::Unknown,
                    other => other,
                };
                (kind, false, Some(format!("unparsed: {}", e)))
            }
        };

        let select_shaped = kind == StatementKind::Select
            || (kind == StatementKind::Unknown && keyword_kind == StatementKind::Select);
        if select_shaped
            && let Some(reason) = write_clause(stmt)
        {
            kind = StatementKind::Write;
            note = Some(reason);
        }

        StatementShape {
            kind,
            parsed,
            functions,
            identifiers,
            note,
        }
    }
}

/// Kind from the parsed AST. Variants not named here fall back to the keyword shape, and a
/// Select keyword shape on an unrecognised variant is not trusted.
fn ast_kind(statement: &Statement, keyword_kind: StatementKind) -> StatementKind {
    match statement {
        Statement::Query { .. } => StatementKind::Select,
        Statement::Explain { statement, .. } => {
            ast_kind(statement, keyword_kind).escalate(StatementKind::Select)
        }
        Statement::Insert { .. }
        | Statement::Update { .. }
        | Statement::Delete { .. }
        | Statement::Merge { .. }
        | Statement::Copy { .. }
        | Statement::Truncate { .. } => StatementKind::Write,
        Statement::CreateTable { .. }
        | Statement::CreateView { .. }
        | Statement::CreateIndex { .. }
        | Statement::CreateFunction { .. }
        | Statement::AlterTable { .. }
        | Statement::Drop { .. } => StatementKind::Ddl,
        Statement::CreateExtension { .. } | Statement::Grant { .. } | Statement::Revoke { .. } => {
            StatementKind::Administrative
        }
        _ => match keyword_kind {
            StatementKind::Select => StatementKind::Unknown,
            other => other,
        },
    }
}

/// Kind implied by the leading keyword alone.
fn keyword_shape(stmt: &NormalizedStatement) -> StatementKind {
    let Some(word) = stmt.leading_word() else {
        return StatementKind::Unknown;
    };
    match word {
        "select" | "with" | "values" | "table" | "explain" => StatementKind::Select,
        "insert" | "update" | "delete" | "merge" | "copy" | "truncate" | "upsert" => {
            StatementKind::Write
        }
        "create" | "alter" | "drop" | "comment" | "security" | "import" => StatementKind::Ddl,
        "set" | "reset" | "show" | "begin" | "start" | "commit" | "end" | "rollback" | "abort"
        | "savepoint" | "release" | "prepare" | "execute" | "deallocate" | "discard" | "listen"
        | "unlisten" | "notify" | "load" | "lock" | "vacuum" | "analyze" | "analyse"
        | "checkpoint" | "do" | "call" | "fetch" | "move" | "close" | "declare" | "grant"
        | "revoke" | "reassign" | "refresh" | "cluster" | "reindex" => {
            StatementKind::Administrative
        }
        _ => StatementKind::Unknown,
    }
}

/// Write clause hidden inside a Select-shaped statement, if any.
fn write_clause(stmt: &NormalizedStatement) -> Option<String> {
    let tokens = &stmt.tokens;
    for (i, token) in tokens.iter().enumerate() {
        if token.kind != TokenKind::Word {
            continue;
        }
        if WRITE_WORDS.contains(&token.text.as_str()) {
            return Some(format!("select-shaped statement contains '{}'", token.text));
        }
        if token.is_keyword("for")
            && tokens
                .get(i + 1)
                .is_some_and(|next| next.is_keyword("share") || next.is_keyword("no") || next.is_keyword("key"))
        {
            return Some("select-shaped statement takes row locks".to_string());
        }
    }
    None
}

/// Function names (identifier followed by `(`) and all other identifiers.
fn collect_names(stmt: &NormalizedStatement) -> (BTreeSet<String>, BTreeSet<String>) {
    let mut functions = BTreeSet::new();
    let mut identifiers = BTreeSet::new();
    let tokens = &stmt.tokens;

    for (i, token) in tokens.iter().enumerate() {
        let Some(name) = token.ident_lower() else {
            continue;
        };
        let called = tokens
            .get(i + 1)
            .is_some_and(|next| next.kind == TokenKind::LParen);
        if called {
            functions.insert(name);
        } else {
            identifiers.insert(name);
        }
    }

    (functions, identifiers)
}
