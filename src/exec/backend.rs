use crate::config::types::ExecutionLimits;
use crate::core::types::RawExecutionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Engine failure category, derived from the SQLSTATE class
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Timeout,
    Syntax,
    PermissionDenied,
    ReadOnlyViolation,
    ResourceLimit,
    Runtime,
}

impl FailureKind {
    pub fn from_sqlstate(code: Option<&str>) -> Self {
        let code = match code {
            Some(code) => code,
            None => return FailureKind::Runtime,
        };
        match code {
            // query_canceled, raised by statement_timeout
            "57014" => FailureKind::Timeout,
            "42501" => FailureKind::PermissionDenied,
            "25006" => FailureKind::ReadOnlyViolation,
            _ if code.starts_with("42") => FailureKind::Syntax,
            _ if code.starts_with("53") || code.starts_with("54") => FailureKind::ResourceLimit,
            _ => FailureKind::Runtime,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Timeout => "timeout",
            FailureKind::Syntax => "syntax",
            FailureKind::PermissionDenied => "permission_denied",
            FailureKind::ReadOnlyViolation => "read_only_violation",
            FailureKind::ResourceLimit => "resource_limit",
            FailureKind::Runtime => "runtime",
        }
    }
}

/// Errors at the database driver boundary
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("no connection available after {waited_ms} ms")]
    PoolExhausted { waited_ms: u64 },

    #[error("engine error [{}]: {message}", code.as_deref().unwrap_or("-----"))]
    Engine {
        code: Option<String>,
        message: String,
    },

    #[error("connection error: {0}")]
    Connection(String),
}

impl BackendError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            BackendError::Engine { code, .. } => FailureKind::from_sqlstate(code.as_deref()),
            _ => FailureKind::Runtime,
        }
    }
}

/// Source of sandbox sessions (a bounded connection pool in production)
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Wait for a free session, up to the configured acquire timeout
    async fn acquire(&self) -> Result<Box<dyn SandboxSession>, BackendError>;
}

/// One checked-out connection.
///
/// Dropping a session without [`SandboxSession::reset`] succeeding must not
/// return dirty state to the pool; implementations discard in that case.
#[async_trait]
pub trait SandboxSession: Send {
    /// Open the read-only scope: search path and limits, local to this use
    async fn enter(&mut self, search_path: &str, limits: &ExecutionLimits) -> Result<(), BackendError>;

    /// Run one statement, keeping at most `row_limit` rows and counting the rest
    async fn execute(&mut self, sql: &str, row_limit: usize) -> Result<RawExecutionResult, BackendError>;

    /// Undo everything `enter` and `execute` changed so the session can be reused
    async fn reset(&mut self) -> Result<(), BackendError>;

    /// Close the underlying connection instead of returning it
    async fn discard(self: Box<Self>);
}
