/// Submission outcome classification.
/// Pure mapping from pipeline stage results to the recorded outcome.
use crate::admission::Rejection;
use crate::core::types::NormalizedResult;
use crate::exec::runner::SandboxError;
use crate::verdict::comparator::{compare, ExpectedOutput};
use serde::{Deserialize, Serialize};

/// Message recorded and returned for failures the learner cannot act on
pub const INTERNAL_ERROR_MESSAGE: &str = "An internal server error occurred.";

/// Message recorded when no sandbox connection was free
pub const SANDBOX_BUSY_MESSAGE: &str = "The query sandbox is busy. Please try again shortly.";

/// Final status of one attempt (closed taxonomy)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubmissionStatus {
    Correct,
    Incorrect,
    Error,
    Blocked,
}

impl SubmissionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubmissionStatus::Correct => "correct",
            SubmissionStatus::Incorrect => "incorrect",
            SubmissionStatus::Error => "error",
            SubmissionStatus::Blocked => "blocked",
        }
    }
}

/// Immutable record of how one attempt ended
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionOutcome {
    pub status: SubmissionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub row_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elapsed_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub is_correct: bool,
}

/// Outcome classifier - pure functions over stage results
pub struct OutcomeClassifier;

impl OutcomeClassifier {
    pub fn blocked(rejection: &Rejection) -> SubmissionOutcome {
        SubmissionOutcome {
            status: SubmissionStatus::Blocked,
            row_count: None,
            elapsed_ms: None,
            error_message: Some(rejection.to_string()),
            is_correct: false,
        }
    }

    /// Grade a successful execution
    pub fn graded(result: &NormalizedResult, expected: Option<&ExpectedOutput>) -> SubmissionOutcome {
        let is_correct = compare(result, expected);
        SubmissionOutcome {
            status: if is_correct {
                SubmissionStatus::Correct
            } else {
                SubmissionStatus::Incorrect
            },
            row_count: Some(result.row_count),
            elapsed_ms: Some(result.elapsed_ms),
            error_message: None,
            is_correct,
        }
    }

    /// Outcome for a failed execution; internal detail never reaches the record
    pub fn failed(error: &SandboxError) -> SubmissionOutcome {
        let (message, elapsed_ms) = match error {
            SandboxError::Execution {
                message, elapsed_ms, ..
            } => (message.clone(), Some(*elapsed_ms)),
            SandboxError::PoolExhausted { .. } => (SANDBOX_BUSY_MESSAGE.to_string(), None),
            SandboxError::Internal(_) => (INTERNAL_ERROR_MESSAGE.to_string(), None),
        };
        SubmissionOutcome {
            status: SubmissionStatus::Error,
            row_count: None,
            elapsed_ms,
            error_message: Some(message),
            is_correct: false,
        }
    }

    /// Classify the runner's result in one step
    pub fn classify(
        execution: &Result<NormalizedResult, SandboxError>,
        expected: Option<&ExpectedOutput>,
    ) -> SubmissionOutcome {
        match execution {
            Ok(result) => Self::graded(result, expected),
            Err(error) => Self::failed(error),
        }
    }
}
