use serde::{Deserialize, Serialize};

/// A single result cell, collapsed to a JSON-safe scalar.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CellValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl CellValue {
    /// Floats that JSON cannot carry (NaN, infinities) become text
    pub fn from_f64(value: f64) -> Self {
        match serde_json::Number::from_f64(value) {
            Some(n) => CellValue::Number(n),
            None => CellValue::Text(value.to_string()),
        }
    }

    pub fn from_i64(value: i64) -> Self {
        CellValue::Number(value.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    /// Numeric view used by loose comparison
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => n.as_f64(),
            CellValue::Bool(true) => Some(1.0),
            CellValue::Bool(false) => Some(0.0),
            CellValue::Text(s) => {
                let s = s.trim();
                if s.is_empty() {
                    None
                } else {
                    s.parse::<f64>().ok().filter(|v| v.is_finite())
                }
            }
            CellValue::Null => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

impl From<String> for CellValue {
    fn from(value: String) -> Self {
        CellValue::Text(value)
    }
}

impl From<i64> for CellValue {
    fn from(value: i64) -> Self {
        CellValue::from_i64(value)
    }
}

impl From<bool> for CellValue {
    fn from(value: bool) -> Self {
        CellValue::Bool(value)
    }
}

/// One engine row as an ordered column-name → value association.
///
/// A list rather than a map so that duplicate column names survive.
pub type RawRow = Vec<(String, CellValue)>;

/// Engine-native output of one execution, before normalization.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawExecutionResult {
    /// Column names in engine-declared order
    pub column_names: Vec<String>,
    /// Rows kept, at most the row limit
    pub rows: Vec<RawRow>,
    /// Rows the engine produced, including any beyond the limit
    pub row_count_before_truncation: usize,
    pub elapsed_ms: u64,
}

impl RawExecutionResult {
    /// Drop rows beyond `row_limit`, keeping the pre-truncation count
    pub fn enforce_row_limit(&mut self, row_limit: usize) {
        self.row_count_before_truncation = self.row_count_before_truncation.max(self.rows.len());
        self.rows.truncate(row_limit);
    }
}

/// Column-ordered, JSON-safe result handed to callers and the comparator.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
    /// Rows returned, after truncation
    pub row_count: usize,
    pub elapsed_ms: u64,
    pub truncated: bool,
}

impl NormalizedResult {
    /// Index of the first column named `name`
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_duplicate_columns(&self) -> bool {
        let mut seen = std::collections::HashSet::new();
        !self.columns.iter().all(|c| seen.insert(c.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_value_serialization() {
        let row = vec![
            CellValue::Null,
            CellValue::Bool(true),
            CellValue::from_i64(42),
            CellValue::from_f64(1.5),
            CellValue::from("Alice"),
        ];
        let json = serde_json::to_string(&row).unwrap();
        assert_eq!(json, r#"[null,true,42,1.5,"Alice"]"#);

        let parsed: Vec<CellValue> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, row);
    }

    #[test]
    fn test_non_finite_float_becomes_text() {
        assert_eq!(CellValue::from_f64(f64::NAN), CellValue::Text("NaN".to_string()));
        assert_eq!(
            CellValue::from_f64(f64::INFINITY),
            CellValue::Text("inf".to_string())
        );
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(CellValue::from("72000.00").as_f64(), Some(72000.0));
        assert_eq!(CellValue::from(" 3 ").as_f64(), Some(3.0));
        assert_eq!(CellValue::from("").as_f64(), None);
        assert_eq!(CellValue::from("abc").as_f64(), None);
        assert_eq!(CellValue::Bool(true).as_f64(), Some(1.0));
        assert_eq!(CellValue::Null.as_f64(), None);
    }

    #[test]
    fn test_enforce_row_limit() {
        let mut raw = RawExecutionResult {
            column_names: vec!["n".to_string()],
            rows: (0..5)
                .map(|i| vec![("n".to_string(), CellValue::from_i64(i))])
                .collect(),
            row_count_before_truncation: 5,
            elapsed_ms: 1,
        };
        raw.enforce_row_limit(3);
        assert_eq!(raw.rows.len(), 3);
        assert_eq!(raw.row_count_before_truncation, 5);
    }

    #[test]
    fn test_normalized_result_json_shape() {
        let result = NormalizedResult {
            columns: vec!["id".to_string()],
            rows: vec![vec![CellValue::from_i64(1)]],
            row_count: 1,
            elapsed_ms: 7,
            truncated: false,
        };
        let value = serde_json::to_value(&result).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "columns": ["id"],
                "rows": [[1]],
                "rowCount": 1,
                "elapsedMs": 7,
                "truncated": false
            })
        );
    }
}
