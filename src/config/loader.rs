/// Configuration loading from querybox.json plus environment overrides
use crate::config::types::{QueryboxError, Result, SandboxConfig};
use log::{debug, warn};
use std::path::{Path, PathBuf};

/// Default configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "querybox.json";

impl SandboxConfig {
    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            QueryboxError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        let config: SandboxConfig = serde_json::from_str(&content)
            .map_err(|e| QueryboxError::Config(format!("Failed to parse config JSON: {}", e)))?;

        Ok(config)
    }

    /// Resolve the effective configuration.
    ///
    /// An explicit path must exist. Without one, `./querybox.json` is used if
    /// present, otherwise built-in defaults. Environment overrides are applied
    /// last in both cases.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load_from_file(path)?,
            None => {
                let candidate = std::env::current_dir()
                    .map(|dir| dir.join(DEFAULT_CONFIG_FILE))
                    .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_FILE));
                if candidate.exists() {
                    Self::load_from_file(&candidate)?
                } else {
                    debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                    Self::default()
                }
            }
        };

        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply deployment environment variables on top of file values
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(url) = get("QUERYBOX_DATABASE_URL") {
            self.database.url = Some(url);
        }
        if let Some(host) = get("PG_HOST") {
            self.database.host = host;
        }
        if let Some(port) = get("PG_PORT") {
            self.database.port = parse_env("PG_PORT", &port)?;
        }
        if let Some(database) = get("PG_DATABASE") {
            self.database.database = Some(database);
        }
        if let Some(user) = get("PG_USER") {
            self.database.user = Some(user);
        }
        if let Some(password) = lookup("PG_PASSWORD") {
            self.database.password = Some(password);
        }
        if let Some(window) = get("QUERY_RATE_LIMIT_WINDOW_MS") {
            self.rate_limit.window_ms = parse_env("QUERY_RATE_LIMIT_WINDOW_MS", &window)?;
        }
        if let Some(max) = get("QUERY_RATE_LIMIT_MAX") {
            self.rate_limit.max_requests = parse_env("QUERY_RATE_LIMIT_MAX", &max)?;
        }
        if let Some(path) = get("QUERYBOX_AUDIT_LOG") {
            self.audit.path = Some(PathBuf::from(path));
        }

        if self.database.url.is_some() && self.database.database.is_some() {
            warn!("Both a database URL and PG_* settings are present; the URL wins");
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| QueryboxError::Config(format!("{} has an invalid value: {:?}", key, value)))
}
