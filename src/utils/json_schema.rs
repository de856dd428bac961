/// Stable JSON shapes returned to submission callers
use crate::config::types::{QueryboxError, Result};
use crate::core::types::NormalizedResult;
use serde::{Deserialize, Serialize};

/// Successful submission: the normalized result plus the grading verdict
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteResponse {
    #[serde(flatten)]
    pub result: NormalizedResult,
    pub is_correct: bool,
}

impl ExecuteResponse {
    pub fn new(result: NormalizedResult, is_correct: bool) -> Self {
        Self { result, is_correct }
    }

    /// Serialize to JSON string
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            QueryboxError::Config(format!("Failed to serialize response to JSON: {}", e))
        })
    }

    /// Deserialize from JSON string
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| {
            QueryboxError::Config(format!("Failed to deserialize response from JSON: {}", e))
        })
    }
}

/// Error body; `code` and `executionTimeMs` are omitted when absent
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
}

impl ErrorPayload {
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| {
            QueryboxError::Config(format!("Failed to serialize error to JSON: {}", e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::CellValue;

    fn create_test_response() -> ExecuteResponse {
        ExecuteResponse::new(
            NormalizedResult {
                columns: vec!["first_name".to_string(), "salary".to_string()],
                rows: vec![
                    vec![CellValue::from("Alice"), CellValue::from_i64(72000)],
                    vec![CellValue::from("Dave"), CellValue::Null],
                ],
                row_count: 2,
                elapsed_ms: 12,
                truncated: false,
            },
            true,
        )
    }

    #[test]
    fn test_response_is_flat() {
        let value = serde_json::to_value(create_test_response()).unwrap();
        assert_eq!(value["columns"], serde_json::json!(["first_name", "salary"]));
        assert_eq!(value["rows"][0], serde_json::json!(["Alice", 72000]));
        assert_eq!(value["rows"][1][1], serde_json::Value::Null);
        assert_eq!(value["rowCount"], 2);
        assert_eq!(value["isCorrect"], true);
        assert!(value.get("result").is_none());
    }

    #[test]
    fn test_response_json_roundtrip() {
        let response = create_test_response();
        let json = response.to_json().unwrap();
        assert_eq!(ExecuteResponse::from_json(&json).unwrap(), response);
    }

    #[test]
    fn test_error_payload_omits_absent_fields() {
        let payload = ErrorPayload {
            error: "Assignment not found.".to_string(),
            code: Some("ERR_ASSIGNMENT_NOT_FOUND".to_string()),
            execution_time_ms: None,
        };
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "error": "Assignment not found.",
                "code": "ERR_ASSIGNMENT_NOT_FOUND"
            })
        );
    }
}
