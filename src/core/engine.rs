//! Submission engine
//!
//! Drives one learner submission through admission, assignment lookup,
//! sandboxed execution and grading, and hands the outcome to the recorder.
//! The engine is shared behind `Arc` across request tasks.

use crate::admission::{QueryValidator, Rejection};
use crate::config::types::SandboxConfig;
use crate::core::assignments::AssignmentStore;
use crate::exec::backend::SandboxBackend;
use crate::exec::runner::{RunnerSettings, SandboxError, SandboxRunner};
use crate::observability::audit::{LogRecorder, SubmissionRecord, SubmissionRecorder};
use crate::observability::metrics::{get_metrics, MetricsRegistry};
use crate::safety::rate_limit::RateLimiter;
use crate::utils::json_schema::{ErrorPayload, ExecuteResponse};
use crate::verdict::comparator::ExpectedOutput;
use crate::verdict::verdict::{
    OutcomeClassifier, SubmissionOutcome, INTERNAL_ERROR_MESSAGE, SANDBOX_BUSY_MESSAGE,
};
use chrono::Utc;
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use uuid::Uuid;

/// One learner submission
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionRequest {
    pub user_id: String,
    pub assignment_id: String,
    pub query: String,
}

impl SubmissionRequest {
    pub fn new(
        user_id: impl Into<String>,
        assignment_id: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            assignment_id: assignment_id.into(),
            query: query.into(),
        }
    }
}

/// Why a submission produced no result. Display text is caller-facing.
#[derive(Debug, Error)]
pub enum SubmissionError {
    #[error("{0}")]
    InvalidRequest(String),

    #[error("Query rate limit exceeded. Please slow down.")]
    RateLimited { retry_after_ms: u64 },

    #[error("Query blocked: {0}")]
    Blocked(Rejection),

    #[error("Assignment not found.")]
    AssignmentNotFound,

    #[error("{message}")]
    Execution { message: String, elapsed_ms: u64 },

    #[error("{}", SANDBOX_BUSY_MESSAGE)]
    PoolExhausted { waited_ms: u64 },

    /// Detail is logged, never shown
    #[error("{}", INTERNAL_ERROR_MESSAGE)]
    Internal(String),
}

impl SubmissionError {
    /// HTTP-style status for boundary mapping
    pub fn status_code(&self) -> u16 {
        match self {
            SubmissionError::InvalidRequest(_) => 400,
            SubmissionError::RateLimited { .. } => 429,
            SubmissionError::Blocked(_) => 400,
            SubmissionError::AssignmentNotFound => 404,
            SubmissionError::Execution { .. } => 422,
            SubmissionError::PoolExhausted { .. } => 503,
            SubmissionError::Internal(_) => 500,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            SubmissionError::InvalidRequest(_) => "ERR_INVALID_REQUEST",
            SubmissionError::RateLimited { .. } => "ERR_RATE_LIMITED",
            SubmissionError::Blocked(_) => "ERR_QUERY_BLOCKED",
            SubmissionError::AssignmentNotFound => "ERR_ASSIGNMENT_NOT_FOUND",
            SubmissionError::Execution { .. } => "ERR_EXECUTION",
            SubmissionError::PoolExhausted { .. } => "ERR_SANDBOX_BUSY",
            SubmissionError::Internal(_) => "ERR_INTERNAL",
        }
    }

    /// Whether resubmitting the same request later can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SubmissionError::RateLimited { .. } | SubmissionError::PoolExhausted { .. }
        )
    }

    pub fn to_payload(&self) -> ErrorPayload {
        let execution_time_ms = match self {
            SubmissionError::Execution { elapsed_ms, .. } => Some(*elapsed_ms),
            _ => None,
        };
        ErrorPayload {
            error: self.to_string(),
            code: Some(self.code().to_string()),
            execution_time_ms,
        }
    }
}

impl From<SandboxError> for SubmissionError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::Execution {
                message, elapsed_ms, ..
            } => SubmissionError::Execution {
                message,
                elapsed_ms,
            },
            SandboxError::PoolExhausted { waited_ms } => {
                SubmissionError::PoolExhausted { waited_ms }
            }
            SandboxError::Internal(detail) => SubmissionError::Internal(detail),
        }
    }
}

/// Orchestrates submissions end to end
pub struct SubmissionEngine {
    validator: QueryValidator,
    runner: SandboxRunner,
    assignments: Arc<dyn AssignmentStore>,
    recorder: Arc<dyn SubmissionRecorder>,
    rate_limiter: Option<RateLimiter>,
    metrics: Arc<MetricsRegistry>,
    sequence: AtomicU64,
    /// Recorded attempts per (user, assignment)
    attempts: Mutex<HashMap<(String, String), u32>>,
}

impl SubmissionEngine {
    pub fn new(runner: SandboxRunner, assignments: Arc<dyn AssignmentStore>) -> Self {
        Self {
            validator: QueryValidator::default(),
            runner,
            assignments,
            recorder: Arc::new(LogRecorder),
            rate_limiter: None,
            metrics: get_metrics(),
            sequence: AtomicU64::new(0),
            attempts: Mutex::new(HashMap::new()),
        }
    }

    /// Wire an engine from configuration
    pub fn from_config(
        config: &SandboxConfig,
        backend: Arc<dyn SandboxBackend>,
        assignments: Arc<dyn AssignmentStore>,
        recorder: Arc<dyn SubmissionRecorder>,
    ) -> Self {
        let runner = SandboxRunner::new(backend, RunnerSettings::from_config(config));
        let mut engine = Self::new(runner, assignments)
            .with_validator(QueryValidator::new(config.admission.max_query_length))
            .with_recorder(recorder);
        engine.rate_limiter = RateLimiter::from_config(&config.rate_limit);
        engine
    }

    pub fn with_validator(mut self, validator: QueryValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn SubmissionRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_rate_limiter(mut self, rate_limiter: RateLimiter) -> Self {
        self.rate_limiter = Some(rate_limiter);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn validator(&self) -> &QueryValidator {
        &self.validator
    }

    /// Handle one submission
    pub async fn submit(
        &self,
        request: &SubmissionRequest,
    ) -> Result<ExecuteResponse, SubmissionError> {
        if request.query.trim().is_empty() || request.assignment_id.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest(
                "Both query and assignmentId are required.".to_string(),
            ));
        }
        if request.user_id.trim().is_empty() {
            return Err(SubmissionError::InvalidRequest(
                "A userId is required.".to_string(),
            ));
        }

        if let Some(limiter) = &self.rate_limiter {
            if let Err(retry_after) = limiter.check(&request.user_id) {
                self.metrics.rate_limited.inc();
                debug!("Rate limited user {}", request.user_id);
                return Err(SubmissionError::RateLimited {
                    retry_after_ms: retry_after.as_millis() as u64,
                });
            }
        }

        let stamp = Stamp::new(self.sequence.fetch_add(1, Ordering::SeqCst) + 1);

        let admitted = match self.validator.admit(&request.query) {
            Ok(admitted) => admitted,
            Err(rejection) => {
                warn!(
                    target: "querybox::security",
                    "Blocked query from user {} on assignment {}: {}",
                    request.user_id, request.assignment_id, rejection
                );
                let attempt = self.next_attempt(request);
                self.record(request, &stamp, attempt, OutcomeClassifier::blocked(&rejection));
                return Err(SubmissionError::Blocked(rejection));
            }
        };

        let assignment = match self.assignments.lookup(&request.assignment_id).await {
            Ok(Some(assignment)) => assignment,
            Ok(None) => return Err(SubmissionError::AssignmentNotFound),
            Err(e) => {
                error!(
                    "Assignment lookup failed for {}: {}",
                    request.assignment_id, e
                );
                return Err(SubmissionError::Internal(e.to_string()));
            }
        };

        // numbered on arrival, before the run can be overtaken by a faster one
        let attempt = self.next_attempt(request);
        let execution = self.runner.run(&admitted, &assignment.schema).await;
        let expected = assignment
            .expected_output
            .as_ref()
            .and_then(|document| match ExpectedOutput::parse(document) {
                Ok(expected) => Some(expected),
                Err(e) => {
                    warn!(
                        "Unreadable expected output on assignment {}: {}",
                        assignment.id, e
                    );
                    None
                }
            });

        let outcome = OutcomeClassifier::classify(&execution, expected.as_ref());
        let is_correct = outcome.is_correct;
        self.record(request, &stamp, attempt, outcome);

        match execution {
            Ok(result) => {
                info!(
                    "User {} ran assignment {}: {} ({} rows, {} ms)",
                    request.user_id,
                    request.assignment_id,
                    if is_correct { "correct" } else { "incorrect" },
                    result.row_count,
                    result.elapsed_ms
                );
                Ok(ExecuteResponse::new(result, is_correct))
            }
            Err(e) => {
                if let SandboxError::Internal(detail) = &e {
                    error!(
                        "Submission {} failed internally: {}",
                        stamp.submission_id, detail
                    );
                }
                Err(e.into())
            }
        }
    }

    fn next_attempt(&self, request: &SubmissionRequest) -> u32 {
        let mut attempts = self
            .attempts
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let attempt = attempts
            .entry((request.user_id.clone(), request.assignment_id.clone()))
            .or_insert(0);
        *attempt += 1;
        *attempt
    }

    fn record(
        &self,
        request: &SubmissionRequest,
        stamp: &Stamp,
        attempt_number: u32,
        outcome: SubmissionOutcome,
    ) {
        self.metrics.record_outcome(outcome.status);
        self.recorder.record(SubmissionRecord {
            submission_id: stamp.submission_id,
            sequence: stamp.sequence,
            attempt_number,
            user_id: request.user_id.clone(),
            assignment_id: request.assignment_id.clone(),
            query: request.query.clone(),
            received_at: stamp.received_at,
            outcome,
        });
    }
}

/// Identity assigned to a submission when it is accepted for processing
struct Stamp {
    submission_id: Uuid,
    sequence: u64,
    received_at: chrono::DateTime<Utc>,
}

impl Stamp {
    fn new(sequence: u64) -> Self {
        Self {
            submission_id: Uuid::new_v4(),
            sequence,
            received_at: Utc::now(),
        }
    }
}
