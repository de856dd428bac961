use crate::admission::AdmittedQuery;
use crate::config::types::{ExecutionLimits, SandboxConfig, SchemaContext};
use crate::core::types::{NormalizedResult, RawExecutionResult};
use crate::exec::backend::{BackendError, FailureKind, SandboxBackend, SandboxSession};
use crate::exec::sanitize::sanitize_engine_message;
use crate::observability::metrics::{get_metrics, MetricsRegistry};
use crate::verdict::normalize::normalize;
use log::{debug, error, warn};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Message reported when the client-side guard gives up on the engine
pub const GUARD_TIMEOUT_MESSAGE: &str = "canceling statement due to statement timeout";

/// Sandbox failures, split by who can act on them
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The learner's statement failed; message is already sanitized
    #[error("{message}")]
    Execution {
        kind: FailureKind,
        message: String,
        elapsed_ms: u64,
    },

    /// No connection within the acquire timeout; retryable
    #[error("sandbox busy: no connection available after {waited_ms} ms")]
    PoolExhausted { waited_ms: u64 },

    /// Infrastructure failure; detail is for logs only
    #[error("internal sandbox failure: {0}")]
    Internal(String),
}

impl SandboxError {
    pub fn elapsed_ms(&self) -> Option<u64> {
        match self {
            SandboxError::Execution { elapsed_ms, .. } => Some(*elapsed_ms),
            _ => None,
        }
    }
}

/// Static settings a runner applies to every execution
#[derive(Clone, Debug)]
pub struct RunnerSettings {
    pub limits: ExecutionLimits,
    pub fallback_schema: String,
    /// Slack past the statement timeout before the session is abandoned
    pub cancel_grace: Duration,
}

impl RunnerSettings {
    pub fn from_config(config: &SandboxConfig) -> Self {
        Self {
            limits: config.limits.clone(),
            fallback_schema: config.fallback_schema.clone(),
            cancel_grace: config.cancel_grace(),
        }
    }

    fn guard_timeout(&self) -> Duration {
        self.limits.statement_timeout() + self.cancel_grace
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&SandboxConfig::default())
    }
}

enum StageError {
    Setup(BackendError),
    Execute { source: BackendError, elapsed_ms: u64 },
}

/// Decrements the active gauge however the run ends, cancellation included
struct ActiveGuard<'a>(&'a MetricsRegistry);

impl<'a> ActiveGuard<'a> {
    fn enter(metrics: &'a MetricsRegistry) -> Self {
        metrics.active_executions.inc();
        Self(metrics)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active_executions.dec();
    }
}

/// Runs admitted queries on pooled sessions under the configured limits
pub struct SandboxRunner {
    backend: Arc<dyn SandboxBackend>,
    settings: RunnerSettings,
    metrics: Arc<MetricsRegistry>,
}

impl SandboxRunner {
    pub fn new(backend: Arc<dyn SandboxBackend>, settings: RunnerSettings) -> Self {
        Self {
            backend,
            settings,
            metrics: get_metrics(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    /// Execute one admitted statement scoped to `schema`.
    ///
    /// The session is reset and returned, or discarded, on every path.
    pub async fn run(
        &self,
        query: &AdmittedQuery,
        schema: &SchemaContext,
    ) -> Result<NormalizedResult, SandboxError> {
        let acquire_started = Instant::now();
        let mut session = match self.backend.acquire().await {
            Ok(session) => session,
            Err(BackendError::PoolExhausted { .. }) => {
                let waited_ms = acquire_started.elapsed().as_millis() as u64;
                self.metrics.pool_exhausted.inc();
                warn!("Sandbox pool exhausted after {} ms", waited_ms);
                return Err(SandboxError::PoolExhausted { waited_ms });
            }
            Err(e) => {
                self.metrics.failures_internal.inc();
                error!("Failed to acquire sandbox session: {}", e);
                return Err(SandboxError::Internal(e.to_string()));
            }
        };
        self.metrics.acquire_wait.observe(acquire_started.elapsed());

        let _active = ActiveGuard::enter(&self.metrics);
        let search_path = schema.search_path(&self.settings.fallback_schema);
        let started = Instant::now();
        let outcome = tokio::time::timeout(
            self.settings.guard_timeout(),
            drive(
                session.as_mut(),
                &search_path,
                &self.settings.limits,
                query.statement(),
            ),
        )
        .await;
        self.metrics.execution_duration.observe(started.elapsed());

        match outcome {
            Ok(Ok(mut raw)) => {
                self.release(session).await;
                raw.enforce_row_limit(self.settings.limits.row_limit);
                let result = normalize(raw);
                if result.truncated {
                    self.metrics.truncated_results.inc();
                }
                debug!(
                    "Query on {} returned {} rows in {} ms",
                    schema, result.row_count, result.elapsed_ms
                );
                Ok(result)
            }
            Ok(Err(StageError::Execute { source, elapsed_ms })) => match source {
                BackendError::Engine { .. } => {
                    let kind = source.failure_kind();
                    self.metrics.record_failure(kind);
                    debug!("Query on {} failed ({}): {}", schema, kind.as_str(), source);
                    self.release(session).await;
                    Err(self.execution_error(kind, &source, elapsed_ms))
                }
                other => {
                    self.metrics.failures_internal.inc();
                    error!("Sandbox connection failed during execution: {}", other);
                    self.discard(session).await;
                    Err(SandboxError::Internal(other.to_string()))
                }
            },
            Ok(Err(StageError::Setup(source))) => {
                self.metrics.failures_internal.inc();
                error!("Failed to scope sandbox session to {}: {}", schema, source);
                self.discard(session).await;
                Err(SandboxError::Internal(source.to_string()))
            }
            Err(_) => {
                let elapsed_ms = started.elapsed().as_millis() as u64;
                self.metrics.record_failure(FailureKind::Timeout);
                warn!(
                    "Engine did not answer within {:?}; abandoning session",
                    self.settings.guard_timeout()
                );
                self.discard(session).await;
                Err(SandboxError::Execution {
                    kind: FailureKind::Timeout,
                    message: GUARD_TIMEOUT_MESSAGE.to_string(),
                    elapsed_ms,
                })
            }
        }
    }

    fn execution_error(&self, kind: FailureKind, source: &BackendError, elapsed_ms: u64) -> SandboxError {
        let raw_message = match source {
            BackendError::Engine { message, .. } => message.as_str(),
            _ => "",
        };
        SandboxError::Execution {
            kind,
            message: sanitize_engine_message(raw_message),
            elapsed_ms,
        }
    }

    async fn release(&self, mut session: Box<dyn SandboxSession>) {
        match session.reset().await {
            Ok(()) => self.metrics.sessions_reset.inc(),
            Err(e) => {
                warn!("Session reset failed, discarding connection: {}", e);
                self.discard(session).await;
            }
        }
    }

    async fn discard(&self, session: Box<dyn SandboxSession>) {
        self.metrics.sessions_discarded.inc();
        session.discard().await;
    }
}

async fn drive(
    session: &mut dyn SandboxSession,
    search_path: &str,
    limits: &ExecutionLimits,
    statement: &str,
) -> Result<RawExecutionResult, StageError> {
    session
        .enter(search_path, limits)
        .await
        .map_err(StageError::Setup)?;

    let started = Instant::now();
    session
        .execute(statement, limits.row_limit)
        .await
        .map(|mut raw| {
            raw.elapsed_ms = started.elapsed().as_millis() as u64;
            raw
        })
        .map_err(|source| StageError::Execute {
            source,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
}
