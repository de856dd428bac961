// Startup config validation.
// Strict mode validates at startup and fails fast with actionable errors.

use crate::config::types::{is_valid_schema_name, QueryboxError, Result, SandboxConfig};

/// Smallest `work_mem` the engine accepts
const MIN_WORK_MEM_BYTES: u64 = 64 * 1024;

/// Validation result with detailed errors
#[derive(Debug)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self {
            valid: true,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn add_error(&mut self, error: String) {
        self.valid = false;
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: String) {
        self.warnings.push(warning);
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

/// Validate config at startup. In strict mode any error is fatal.
pub fn validate_config(config: &SandboxConfig) -> Result<ValidationResult> {
    let mut result = ValidationResult::new();

    validate_limits(config, &mut result);
    validate_database(config, &mut result);
    validate_admission(config, &mut result);

    if config.strict_mode && !result.is_valid() {
        let error_msg = format!(
            "Config validation failed in strict mode:\n{}",
            result.errors.join("\n")
        );
        return Err(QueryboxError::Config(error_msg));
    }

    Ok(result)
}

fn validate_limits(config: &SandboxConfig, result: &mut ValidationResult) {
    let limits = &config.limits;

    if limits.statement_timeout_ms == 0 {
        // 0 disables the engine timeout entirely
        result.add_error("limits.statement_timeout_ms cannot be zero".to_string());
    } else if limits.statement_timeout_ms > 30_000 {
        result.add_warning(format!(
            "limits.statement_timeout_ms {} is high; one slow query holds a pooled connection that long",
            limits.statement_timeout_ms
        ));
    }

    if limits.work_mem_bytes < MIN_WORK_MEM_BYTES {
        result.add_error(format!(
            "limits.work_mem_bytes {} is below the engine minimum of {}",
            limits.work_mem_bytes, MIN_WORK_MEM_BYTES
        ));
    }

    if limits.row_limit == 0 {
        result.add_error("limits.row_limit cannot be zero".to_string());
    } else if limits.row_limit > 10_000 {
        result.add_warning(format!(
            "limits.row_limit {} is large for interactive responses",
            limits.row_limit
        ));
    }

    if config.cancel_grace_ms == 0 {
        result.add_warning(
            "cancel_grace_ms is zero; sessions may be discarded before the engine reports its own timeout"
                .to_string(),
        );
    }
}

fn validate_database(config: &SandboxConfig, result: &mut ValidationResult) {
    let db = &config.database;

    if !db.is_configured() {
        result.add_error(
            "database connection is not configured (set database.url or PG_DATABASE and PG_USER)"
                .to_string(),
        );
    }

    if db.max_connections == 0 {
        result.add_error("database.max_connections cannot be zero".to_string());
    }

    if db.acquire_timeout_ms == 0 {
        result.add_error("database.acquire_timeout_ms cannot be zero".to_string());
    }

    if !config.fallback_schema.is_empty() && !is_valid_schema_name(&config.fallback_schema) {
        result.add_error(format!(
            "fallback_schema {:?} is not a valid schema name",
            config.fallback_schema
        ));
    }
}

fn validate_admission(config: &SandboxConfig, result: &mut ValidationResult) {
    if config.admission.max_query_length == 0 {
        result.add_error("admission.max_query_length cannot be zero".to_string());
    }

    if config.rate_limit.enabled {
        if config.rate_limit.max_requests == 0 {
            result.add_error("rate_limit.max_requests cannot be zero when enabled".to_string());
        }
        if config.rate_limit.window_ms == 0 {
            result.add_error("rate_limit.window_ms cannot be zero when enabled".to_string());
        }
    }

    if config.audit.queue_capacity == 0 {
        result.add_error("audit.queue_capacity cannot be zero".to_string());
    }
}
