/// Core configuration types for the querybox engine
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default per-statement timeout (milliseconds)
pub const DEFAULT_STATEMENT_TIMEOUT_MS: u64 = 5_000;
/// Default per-operation working memory cap (bytes)
pub const DEFAULT_WORK_MEM_BYTES: u64 = 4 * 1024 * 1024;
/// Default maximum rows returned to the caller
pub const DEFAULT_ROW_LIMIT: usize = 500;
/// Default maximum query length (characters, after trimming)
pub const DEFAULT_MAX_QUERY_LENGTH: usize = 2_000;

/// Per-execution caps applied to every sandbox session before the
/// admitted statement runs.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ExecutionLimits {
    /// Engine-enforced statement timeout (milliseconds)
    pub statement_timeout_ms: u64,
    /// Working memory for sorts and hashes (bytes)
    pub work_mem_bytes: u64,
    /// Rows kept in the result; anything beyond is counted and dropped
    pub row_limit: usize,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            statement_timeout_ms: DEFAULT_STATEMENT_TIMEOUT_MS,
            work_mem_bytes: DEFAULT_WORK_MEM_BYTES,
            row_limit: DEFAULT_ROW_LIMIT,
        }
    }
}

impl ExecutionLimits {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_millis(self.statement_timeout_ms)
    }

    /// `statement_timeout` setting value (milliseconds is the engine default unit)
    pub fn statement_timeout_setting(&self) -> String {
        self.statement_timeout_ms.to_string()
    }

    /// `work_mem` setting value, rounded down to whole kilobytes
    pub fn work_mem_setting(&self) -> String {
        format!("{}kB", self.work_mem_bytes / 1024)
    }
}

/// Connection settings for the shared database.
///
/// Either `url` is set, or the discrete host/port/database/user/password
/// fields describe the connection.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub host: String,
    pub port: u16,
    pub database: Option<String>,
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Upper bound on pooled connections
    pub max_connections: u32,
    /// How long a submission waits for a free connection (milliseconds)
    pub acquire_timeout_ms: u64,
    /// Idle connections are closed after this long (milliseconds)
    pub idle_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            host: "localhost".to_string(),
            port: 5432,
            database: None,
            user: None,
            password: None,
            max_connections: 20,
            acquire_timeout_ms: 5_000,
            idle_timeout_ms: 30_000,
        }
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("url", &self.url.as_ref().map(|_| "<redacted>"))
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout_ms", &self.acquire_timeout_ms)
            .field("idle_timeout_ms", &self.idle_timeout_ms)
            .finish()
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    /// True when enough is configured to open a connection
    pub fn is_configured(&self) -> bool {
        self.url.is_some() || (self.database.is_some() && self.user.is_some())
    }
}

/// Static admission settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdmissionConfig {
    pub max_query_length: usize,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            max_query_length: DEFAULT_MAX_QUERY_LENGTH,
        }
    }
}

/// Per-user submission throttling
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub window_ms: u64,
    pub max_requests: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            window_ms: 60_000,
            max_requests: 30,
        }
    }
}

/// Submission audit trail settings
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// JSON-lines audit file; records go to the log when unset
    pub path: Option<PathBuf>,
    /// Records buffered ahead of the writer before new ones are dropped
    pub queue_capacity: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            path: None,
            queue_capacity: 1024,
        }
    }
}

/// Top-level engine configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    pub database: DatabaseConfig,
    pub limits: ExecutionLimits,
    pub admission: AdmissionConfig,
    pub rate_limit: RateLimitConfig,
    pub audit: AuditConfig,
    /// Shared namespace appended after the assignment schema in `search_path`
    pub fallback_schema: String,
    /// Extra time past the statement timeout before the client gives up
    /// on the engine and discards the session (milliseconds)
    pub cancel_grace_ms: u64,
    /// Assignment catalog loaded at startup
    pub assignments_path: Option<PathBuf>,
    /// Strict mode: configuration errors are fatal at startup
    pub strict_mode: bool,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig::default(),
            limits: ExecutionLimits::default(),
            admission: AdmissionConfig::default(),
            rate_limit: RateLimitConfig::default(),
            audit: AuditConfig::default(),
            fallback_schema: "public".to_string(),
            cancel_grace_ms: 1_000,
            assignments_path: None,
            strict_mode: true,
        }
    }
}

impl SandboxConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

static SCHEMA_IDENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]{0,62}$").expect("static schema pattern"));

/// Returns true for names that can be embedded in `search_path` verbatim
pub fn is_valid_schema_name(name: &str) -> bool {
    SCHEMA_IDENT.is_match(name)
}

/// Isolated namespace a submission is scoped to (one per assignment).
///
/// Construction validates the identifier, so a `SchemaContext` can always be
/// rendered into a `search_path` value without escaping concerns.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SchemaContext(String);

impl SchemaContext {
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        if is_valid_schema_name(&name) {
            Ok(Self(name))
        } else {
            Err(QueryboxError::InvalidSchema(name))
        }
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// `search_path` value: this schema first, then the fallback namespace
    pub fn search_path(&self, fallback: &str) -> String {
        if fallback.is_empty() || fallback == self.0 {
            format!("\"{}\"", self.0)
        } else {
            format!("\"{}\", \"{}\"", self.0, fallback)
        }
    }
}

impl TryFrom<String> for SchemaContext {
    type Error = QueryboxError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<SchemaContext> for String {
    fn from(value: SchemaContext) -> Self {
        value.0
    }
}

impl std::fmt::Display for SchemaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Crate-level error type for configuration, catalog and I/O failures
#[derive(Error, Debug)]
pub enum QueryboxError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid schema name: {0:?}")]
    InvalidSchema(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(String),
}

pub type Result<T> = std::result::Result<T, QueryboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_limits() {
        let limits = ExecutionLimits::default();
        assert_eq!(limits.statement_timeout_ms, 5_000);
        assert_eq!(limits.work_mem_bytes, 4 * 1024 * 1024);
        assert_eq!(limits.row_limit, 500);
        assert_eq!(limits.work_mem_setting(), "4096kB");
        assert_eq!(limits.statement_timeout_setting(), "5000");
    }

    #[test]
    fn test_schema_context_validation() {
        assert!(SchemaContext::new("assignment_1_schema").is_ok());
        assert!(SchemaContext::new("_private").is_ok());
        assert!(SchemaContext::new("").is_err());
        assert!(SchemaContext::new("Mixed").is_err());
        assert!(SchemaContext::new("a; DROP SCHEMA public").is_err());
        assert!(SchemaContext::new("1abc").is_err());
        assert!(SchemaContext::new("x".repeat(64)).is_err());
    }

    #[test]
    fn test_search_path_rendering() {
        let schema = SchemaContext::new("assignment_1_schema").unwrap();
        assert_eq!(
            schema.search_path("public"),
            "\"assignment_1_schema\", \"public\""
        );
        assert_eq!(schema.search_path(""), "\"assignment_1_schema\"");
    }

    #[test]
    fn test_schema_context_deserialize_rejects_invalid() {
        let ok: std::result::Result<SchemaContext, _> = serde_json::from_str("\"abc\"");
        assert!(ok.is_ok());
        let bad: std::result::Result<SchemaContext, _> = serde_json::from_str("\"a\\\"b\"");
        assert!(bad.is_err());
    }

    #[test]
    fn test_config_partial_json_uses_defaults() {
        let config: SandboxConfig =
            serde_json::from_str(r#"{"limits": {"row_limit": 100}}"#).unwrap();
        assert_eq!(config.limits.row_limit, 100);
        assert_eq!(config.limits.statement_timeout_ms, 5_000);
        assert_eq!(config.database.max_connections, 20);
        assert_eq!(config.fallback_schema, "public");
        assert!(config.rate_limit.enabled);
    }

    #[test]
    fn test_database_debug_redacts_secrets() {
        let mut db = DatabaseConfig::default();
        db.url = Some("postgres://u:secret@h/db".to_string());
        db.password = Some("secret".to_string());
        let rendered = format!("{:?}", db);
        assert!(!rendered.contains("secret"));
    }
}
