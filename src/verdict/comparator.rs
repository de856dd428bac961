/// Correctness comparison of a normalized result against an authored
/// expected-output descriptor. Never fails: anything it cannot make sense of
/// is simply not correct.
use crate::core::types::{CellValue, NormalizedResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Relative tolerance for numeric cell comparison
const FLOAT_EPSILON: f64 = 1e-9;

/// Expected row for `row` descriptors: by column name, or by position
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedRow {
    Named(BTreeMap<String, CellValue>),
    Positional(Vec<CellValue>),
}

/// Authored expected output for an assignment, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExpectedOutput {
    Count {
        value: u64,
    },
    SingleValue {
        value: CellValue,
    },
    Column {
        value: Vec<CellValue>,
        #[serde(default)]
        ordered: bool,
    },
    Row {
        value: ExpectedRow,
    },
    Table {
        value: Vec<BTreeMap<String, CellValue>>,
        #[serde(default)]
        ordered: bool,
    },
}

impl ExpectedOutput {
    /// Interpret a stored descriptor document
    pub fn parse(document: &serde_json::Value) -> Result<Self, serde_json::Error> {
        ExpectedOutput::deserialize(document)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ExpectedOutput::Count { .. } => "count",
            ExpectedOutput::SingleValue { .. } => "single_value",
            ExpectedOutput::Column { .. } => "column",
            ExpectedOutput::Row { .. } => "row",
            ExpectedOutput::Table { .. } => "table",
        }
    }

    pub fn matches(&self, result: &NormalizedResult) -> bool {
        match self {
            ExpectedOutput::SingleValue { value } => result
                .rows
                .first()
                .and_then(|row| row.first())
                .map_or(false, |cell| loosely_equal(cell, value)),
            // incomplete data cannot be verified against anything below
            _ if result.truncated => false,
            ExpectedOutput::Count { value } => result.row_count as u64 == *value,
            ExpectedOutput::Column { value, ordered } => match_column(result, value, *ordered),
            ExpectedOutput::Row { value } => match_row(result, value),
            ExpectedOutput::Table { value, ordered } => match_table(result, value, *ordered),
        }
    }
}

/// Verdict for a result; a missing descriptor is never correct
pub fn compare(result: &NormalizedResult, expected: Option<&ExpectedOutput>) -> bool {
    expected.map_or(false, |descriptor| descriptor.matches(result))
}

/// Equality tolerant of engine-vs-author representation differences:
/// `"72000.00"` equals `72000`, `true` equals `1`. Null equals only null.
pub fn loosely_equal(actual: &CellValue, expected: &CellValue) -> bool {
    match (actual, expected) {
        (CellValue::Null, CellValue::Null) => true,
        (CellValue::Null, _) | (_, CellValue::Null) => false,
        (CellValue::Bool(a), CellValue::Bool(b)) => a == b,
        (CellValue::Text(a), CellValue::Text(b)) if a == b => true,
        _ => match (actual.as_f64(), expected.as_f64()) {
            (Some(a), Some(b)) => numbers_equal(a, b),
            _ => false,
        },
    }
}

fn numbers_equal(a: f64, b: f64) -> bool {
    let scale = a.abs().max(b.abs()).max(1.0);
    (a - b).abs() <= FLOAT_EPSILON * scale
}

fn match_column(result: &NormalizedResult, expected: &[CellValue], ordered: bool) -> bool {
    if result.columns.len() != 1 || result.row_count != expected.len() {
        return false;
    }

    let actual: Vec<&CellValue> = result.rows.iter().filter_map(|row| row.first()).collect();
    if actual.len() != expected.len() {
        return false;
    }

    if ordered {
        actual
            .iter()
            .zip(expected)
            .all(|(a, e)| loosely_equal(a, e))
    } else {
        multiset_match(&actual, expected, |a, e| loosely_equal(a, e))
    }
}

fn match_row(result: &NormalizedResult, expected: &ExpectedRow) -> bool {
    if result.row_count != 1 {
        return false;
    }
    let row = match result.rows.first() {
        Some(row) => row,
        None => return false,
    };

    match expected {
        ExpectedRow::Positional(values) => {
            row.len() == values.len() && row.iter().zip(values).all(|(a, e)| loosely_equal(a, e))
        }
        ExpectedRow::Named(values) => {
            let keys: BTreeSet<&str> = values.keys().map(String::as_str).collect();
            match projection(result, &keys) {
                Some(indices) => indices
                    .iter()
                    .zip(values.values())
                    .all(|(&idx, e)| row.get(idx).map_or(false, |a| loosely_equal(a, e))),
                None => false,
            }
        }
    }
}

fn match_table(
    result: &NormalizedResult,
    expected: &[BTreeMap<String, CellValue>],
    ordered: bool,
) -> bool {
    if result.row_count != expected.len() {
        return false;
    }
    let first = match expected.first() {
        Some(first) => first,
        None => return result.rows.is_empty(),
    };

    let keys: BTreeSet<&str> = first.keys().map(String::as_str).collect();
    if expected
        .iter()
        .any(|row| row.len() != keys.len() || !row.keys().all(|k| keys.contains(k.as_str())))
    {
        // rows with differing key sets make the descriptor malformed
        return false;
    }

    let indices = match projection(result, &keys) {
        Some(indices) => indices,
        None => return false,
    };

    // BTreeMap values iterate in key order, matching `indices`
    let actual: Vec<Vec<&CellValue>> = result
        .rows
        .iter()
        .map(|row| indices.iter().filter_map(|&idx| row.get(idx)).collect())
        .collect();
    let expected_rows: Vec<Vec<&CellValue>> = expected.iter().map(|row| row.values().collect()).collect();

    let rows_equal = |a: &Vec<&CellValue>, e: &Vec<&CellValue>| {
        a.len() == e.len() && a.iter().zip(e).all(|(x, y)| loosely_equal(x, y))
    };

    if ordered {
        actual.iter().zip(&expected_rows).all(|(a, e)| rows_equal(a, e))
    } else {
        multiset_match(&actual, &expected_rows, |a, e| rows_equal(a, e))
    }
}

/// Column indices for `keys` (in key order) when the result's column set is
/// exactly `keys` with no duplicates
fn projection(result: &NormalizedResult, keys: &BTreeSet<&str>) -> Option<Vec<usize>> {
    if result.has_duplicate_columns() || result.columns.len() != keys.len() {
        return None;
    }
    keys.iter().map(|key| result.column_index(key)).collect()
}

/// Every expected item is paired with a distinct actual item
fn multiset_match<A, E, F>(actual: &[A], expected: &[E], eq: F) -> bool
where
    F: Fn(&A, &E) -> bool,
{
    if actual.len() != expected.len() {
        return false;
    }
    let mut used = vec![false; actual.len()];
    expected.iter().all(|e| {
        match actual
            .iter()
            .enumerate()
            .position(|(i, a)| !used[i] && eq(a, e))
        {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Vec<CellValue>>) -> NormalizedResult {
        NormalizedResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            row_count: rows.len(),
            rows,
            elapsed_ms: 3,
            truncated: false,
        }
    }

    fn n(v: i64) -> CellValue {
        CellValue::from_i64(v)
    }

    fn t(v: &str) -> CellValue {
        CellValue::from(v)
    }

    fn descriptor(value: serde_json::Value) -> ExpectedOutput {
        ExpectedOutput::parse(&value).unwrap()
    }

    #[test]
    fn test_count_descriptor() {
        let expected = descriptor(json!({"type": "count", "value": 3}));
        let three = result(&["id"], vec![vec![n(1)], vec![n(2)], vec![n(3)]]);
        let two = result(&["id"], vec![vec![n(1)], vec![n(2)]]);
        assert!(compare(&three, Some(&expected)));
        assert!(!compare(&two, Some(&expected)));
    }

    #[test]
    fn test_missing_descriptor_is_false() {
        let r = result(&["id"], vec![vec![n(1)]]);
        assert!(!compare(&r, None));
    }

    #[test]
    fn test_malformed_descriptor_does_not_parse() {
        assert!(ExpectedOutput::parse(&json!({"type": "histogram", "value": 1})).is_err());
        assert!(ExpectedOutput::parse(&json!({"value": 1})).is_err());
        assert!(ExpectedOutput::parse(&json!("count")).is_err());
    }

    #[test]
    fn test_single_value_loose_equality() {
        let r = result(&["avg"], vec![vec![t("72000.00")]]);
        assert!(compare(&r, Some(&descriptor(json!({"type": "single_value", "value": 72000})))));
        assert!(!compare(&r, Some(&descriptor(json!({"type": "single_value", "value": 72001})))));
    }

    #[test]
    fn test_single_value_zero_and_false_are_real_values() {
        let zero = result(&["count"], vec![vec![n(0)]]);
        assert!(compare(&zero, Some(&descriptor(json!({"type": "single_value", "value": 0})))));

        let no = result(&["flag"], vec![vec![CellValue::Bool(false)]]);
        assert!(compare(&no, Some(&descriptor(json!({"type": "single_value", "value": false})))));
    }

    #[test]
    fn test_single_value_on_empty_result() {
        let empty = result(&["x"], vec![]);
        assert!(!compare(&empty, Some(&descriptor(json!({"type": "single_value", "value": null})))));
    }

    #[test]
    fn test_null_only_equals_null() {
        assert!(loosely_equal(&CellValue::Null, &CellValue::Null));
        assert!(!loosely_equal(&CellValue::Null, &n(0)));
        assert!(!loosely_equal(&t(""), &CellValue::Null));
        assert!(!loosely_equal(&t(""), &n(0)));
    }

    #[test]
    fn test_loose_equality_coercions() {
        assert!(loosely_equal(&CellValue::Bool(true), &n(1)));
        assert!(loosely_equal(&CellValue::from_f64(0.1 + 0.2), &CellValue::from_f64(0.3)));
        assert!(loosely_equal(&t("2020-03-15"), &t("2020-03-15")));
        assert!(!loosely_equal(&t("Alice"), &t("alice")));
        assert!(!loosely_equal(&CellValue::Bool(true), &t("yes")));
    }

    #[test]
    fn test_column_unordered_and_ordered() {
        let r = result(&["name"], vec![vec![t("b")], vec![t("a")], vec![t("c")]]);
        let unordered = descriptor(json!({"type": "column", "value": ["a", "b", "c"]}));
        let ordered = descriptor(json!({"type": "column", "value": ["a", "b", "c"], "ordered": true}));
        assert!(compare(&r, Some(&unordered)));
        assert!(!compare(&r, Some(&ordered)));
    }

    #[test]
    fn test_column_respects_multiplicity() {
        let r = result(&["name"], vec![vec![t("a")], vec![t("a")], vec![t("b")]]);
        let expected = descriptor(json!({"type": "column", "value": ["a", "b", "b"]}));
        assert!(!compare(&r, Some(&expected)));
    }

    #[test]
    fn test_column_requires_single_column() {
        let r = result(&["name", "id"], vec![vec![t("a"), n(1)]]);
        assert!(!compare(&r, Some(&descriptor(json!({"type": "column", "value": ["a"]})))));
    }

    #[test]
    fn test_row_named_and_positional() {
        let r = result(&["first_name", "salary"], vec![vec![t("Alice"), t("72000.00")]]);
        let named = descriptor(json!({"type": "row", "value": {"salary": 72000, "first_name": "Alice"}}));
        let positional = descriptor(json!({"type": "row", "value": ["Alice", 72000]}));
        let wrong_cols = descriptor(json!({"type": "row", "value": {"name": "Alice", "salary": 72000}}));
        assert!(compare(&r, Some(&named)));
        assert!(compare(&r, Some(&positional)));
        assert!(!compare(&r, Some(&wrong_cols)));

        let two_rows = result(&["first_name", "salary"], vec![
            vec![t("Alice"), n(1)],
            vec![t("Bob"), n(2)],
        ]);
        assert!(!compare(&two_rows, Some(&named)));
    }

    #[test]
    fn test_table_structural_comparison() {
        let r = result(&["id", "name"], vec![
            vec![n(2), t("Bob")],
            vec![n(1), t("Alice")],
        ]);
        let expected = descriptor(json!({"type": "table", "value": [
            {"id": 1, "name": "Alice"},
            {"id": 2, "name": "Bob"}
        ]}));
        assert!(compare(&r, Some(&expected)));

        let ordered = descriptor(json!({"type": "table", "ordered": true, "value": [
            {"id": 1, "name": "Alice"},
            {"id": 2, "name": "Bob"}
        ]}));
        assert!(!compare(&r, Some(&ordered)));

        // same cardinality, different content
        let different = descriptor(json!({"type": "table", "value": [
            {"id": 1, "name": "Alice"},
            {"id": 3, "name": "Carol"}
        ]}));
        assert!(!compare(&r, Some(&different)));
    }

    #[test]
    fn test_table_column_set_must_match() {
        let r = result(&["id", "name", "extra"], vec![vec![n(1), t("Alice"), n(0)]]);
        let expected = descriptor(json!({"type": "table", "value": [{"id": 1, "name": "Alice"}]}));
        assert!(!compare(&r, Some(&expected)));
    }

    #[test]
    fn test_table_with_inconsistent_keys_is_false() {
        let r = result(&["id"], vec![vec![n(1)], vec![n(2)]]);
        let expected = descriptor(json!({"type": "table", "value": [{"id": 1}, {"other": 2}]}));
        assert!(!compare(&r, Some(&expected)));
    }

    #[test]
    fn test_empty_table() {
        let empty = result(&["id"], vec![]);
        let expected = descriptor(json!({"type": "table", "value": []}));
        assert!(compare(&empty, Some(&expected)));
    }

    #[test]
    fn test_truncated_results_fail_structural_descriptors() {
        let mut r = result(&["id"], vec![vec![n(1)], vec![n(2)]]);
        r.truncated = true;
        assert!(!compare(&r, Some(&descriptor(json!({"type": "count", "value": 2})))));
        assert!(!compare(&r, Some(&descriptor(json!({"type": "column", "value": [1, 2]})))));
        assert!(compare(&r, Some(&descriptor(json!({"type": "single_value", "value": 1})))));
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(descriptor(json!({"type": "count", "value": 1})).kind(), "count");
        assert_eq!(
            descriptor(json!({"type": "single_value", "value": "x"})).kind(),
            "single_value"
        );
    }
}
