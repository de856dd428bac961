//! Static admission check for learner queries.
//!
//! The filter is a first pass only. Isolation comes from schema scoping, the
//! read-only session and a least-privilege database role; this module never
//! claims a query is safe, only that it is not obviously unsafe.

use crate::admission::lexer::split_statements;
use crate::config::types::DEFAULT_MAX_QUERY_LENGTH;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use thiserror::Error;

static SELECT_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*SELECT\b").unwrap());

static LEADING_WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*([^\s(]+)").unwrap());

/// Dangerous constructs, checked in order; the first match is reported.
const BLOCKED_PATTERNS: &[&str] = &[
    // mutation and definition verbs
    r"\bDROP\b",
    r"\bDELETE\b",
    r"\bTRUNCATE\b",
    r"\bALTER\b",
    r"\bUPDATE\b",
    r"\bINSERT\b",
    r"\bCREATE\b",
    r"\bGRANT\b",
    r"\bREVOKE\b",
    r"\bEXEC(?:UTE)?\b",
    r"\bxp_",
    // bulk copy
    r"\bCOPY\b",
    r"\\copy",
    // catalog introspection
    r"\binformation_schema\b",
    r"\bpg_catalog\b",
    // privileged functions and session escapes
    r"\bpg_sleep\w*",
    r"\bpg_read_file\b",
    r"\bpg_read_binary_file\b",
    r"\bpg_ls_dir\b",
    r"\bpg_stat_file\b",
    r"\blo_import\b",
    r"\blo_export\b",
    r"\bdblink\w*",
    r"\bset_config\b",
    r"\bcurrent_setting\b",
    r"\bpg_terminate_backend\b",
    r"\bpg_cancel_backend\b",
    r"\bpg_reload_conf\b",
    r"\bpg_advisory\w*",
];

static BLOCKLIST: Lazy<Vec<Regex>> = Lazy::new(|| {
    BLOCKED_PATTERNS
        .iter()
        .map(|pattern| Regex::new(&format!("(?i){}", pattern)).unwrap())
        .collect()
});

/// Why a query was not admitted. The display text is user-facing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("Query must be a non-empty string.")]
    Empty,

    #[error("Query exceeds maximum allowed length of {max} characters.")]
    TooLong { max: usize, actual: usize },

    #[error("Query contains an unterminated comment or quoted section.")]
    Malformed,

    #[error("Query is empty after stripping comments.")]
    EmptyAfterComments,

    #[error("Only one SQL statement is allowed per execution.")]
    MultipleStatements { count: usize },

    #[error("Only SELECT statements are allowed (found \"{found}\").")]
    NotSelect { found: String },

    #[error("Query contains a disallowed keyword: \"{0}\".")]
    BlockedKeyword(String),
}

/// Query text that passed admission. Only [`QueryValidator`] constructs it,
/// so holding one is proof the text was checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmittedQuery {
    statement: String,
}

impl AdmittedQuery {
    /// The single statement to run: comments stripped, trimmed, no separator
    pub fn statement(&self) -> &str {
        &self.statement
    }
}

/// Serializable admit/reject summary for callers that only need the decision
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationVerdict {
    pub admitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
}

impl From<&std::result::Result<AdmittedQuery, Rejection>> for ValidationVerdict {
    fn from(result: &std::result::Result<AdmittedQuery, Rejection>) -> Self {
        match result {
            Ok(_) => Self {
                admitted: true,
                rejection_reason: None,
            },
            Err(rejection) => Self {
                admitted: false,
                rejection_reason: Some(rejection.to_string()),
            },
        }
    }
}

/// Pure, deterministic admission check
#[derive(Debug, Clone)]
pub struct QueryValidator {
    max_query_length: usize,
}

impl Default for QueryValidator {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_QUERY_LENGTH)
    }
}

impl QueryValidator {
    pub fn new(max_query_length: usize) -> Self {
        Self { max_query_length }
    }

    pub fn max_query_length(&self) -> usize {
        self.max_query_length
    }

    /// Decide admit/reject. Checks run in order and the first failure wins.
    pub fn admit(&self, text: &str) -> std::result::Result<AdmittedQuery, Rejection> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(Rejection::Empty);
        }

        let length = trimmed.chars().count();
        if length > self.max_query_length {
            return Err(Rejection::TooLong {
                max: self.max_query_length,
                actual: length,
            });
        }

        let mut statements = split_statements(trimmed).map_err(|_| Rejection::Malformed)?;
        if statements.is_empty() {
            return Err(Rejection::EmptyAfterComments);
        }
        if statements.len() > 1 {
            return Err(Rejection::MultipleStatements {
                count: statements.len(),
            });
        }
        let statement = statements.remove(0);

        if !SELECT_PREFIX.is_match(&statement) {
            let found = LEADING_WORD
                .captures(&statement)
                .and_then(|caps| caps.get(1))
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            return Err(Rejection::NotSelect { found });
        }

        if let Some(found) = BLOCKLIST.iter().find_map(|re| re.find(&statement)) {
            return Err(Rejection::BlockedKeyword(found.as_str().to_string()));
        }

        Ok(AdmittedQuery { statement })
    }

    /// Admit/reject summary without the admitted payload
    pub fn validate(&self, text: &str) -> ValidationVerdict {
        ValidationVerdict::from(&self.admit(text))
    }
}
