use crate::core::types::{CellValue, NormalizedResult, RawExecutionResult};
use std::collections::HashMap;

/// Reorder raw rows into declared column order.
///
/// Total over any raw result: missing cells become null, row order is kept,
/// and the n-th column named `x` takes the n-th `x` entry of each row.
pub fn normalize(raw: RawExecutionResult) -> NormalizedResult {
    let RawExecutionResult {
        column_names,
        rows,
        row_count_before_truncation,
        elapsed_ms,
    } = raw;

    // occurrence index of each column among same-named columns
    let mut seen: HashMap<&str, usize> = HashMap::new();
    let occurrences: Vec<usize> = column_names
        .iter()
        .map(|name| {
            let slot = seen.entry(name.as_str()).or_insert(0);
            let occurrence = *slot;
            *slot += 1;
            occurrence
        })
        .collect();

    let normalized_rows: Vec<Vec<CellValue>> = rows
        .into_iter()
        .map(|row| order_row(row, &column_names, &occurrences))
        .collect();

    let row_count = normalized_rows.len();
    NormalizedResult {
        columns: column_names,
        rows: normalized_rows,
        row_count,
        elapsed_ms,
        truncated: row_count_before_truncation > row_count,
    }
}

fn order_row(row: Vec<(String, CellValue)>, columns: &[String], occurrences: &[usize]) -> Vec<CellValue> {
    let mut by_name: HashMap<String, Vec<Option<CellValue>>> = HashMap::new();
    for (name, value) in row {
        by_name.entry(name).or_default().push(Some(value));
    }

    columns
        .iter()
        .zip(occurrences)
        .map(|(name, &occurrence)| {
            by_name
                .get_mut(name)
                .and_then(|values| values.get_mut(occurrence))
                .and_then(Option::take)
                .unwrap_or(CellValue::Null)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(name: &str, value: CellValue) -> (String, CellValue) {
        (name.to_string(), value)
    }

    fn raw(columns: &[&str], rows: Vec<Vec<(String, CellValue)>>, before: usize) -> RawExecutionResult {
        RawExecutionResult {
            column_names: columns.iter().map(|c| c.to_string()).collect(),
            rows,
            row_count_before_truncation: before,
            elapsed_ms: 12,
        }
    }

    #[test]
    fn test_reorders_into_declared_order() {
        let result = normalize(raw(
            &["id", "name"],
            vec![vec![cell("name", "Alice".into()), cell("id", 1i64.into())]],
            1,
        ));
        assert_eq!(result.columns, vec!["id", "name"]);
        assert_eq!(
            result.rows,
            vec![vec![CellValue::from(1i64), CellValue::from("Alice")]]
        );
        assert_eq!(result.row_count, 1);
        assert_eq!(result.elapsed_ms, 12);
        assert!(!result.truncated);
    }

    #[test]
    fn test_missing_cells_become_null() {
        let result = normalize(raw(&["a", "b"], vec![vec![cell("a", 1i64.into())]], 1));
        assert_eq!(result.rows[0], vec![CellValue::from(1i64), CellValue::Null]);
    }

    #[test]
    fn test_duplicate_column_names_resolved_positionally() {
        let result = normalize(raw(
            &["id", "id"],
            vec![vec![cell("id", 1i64.into()), cell("id", 2i64.into())]],
            1,
        ));
        assert_eq!(result.rows[0], vec![CellValue::from(1i64), CellValue::from(2i64)]);
    }

    #[test]
    fn test_empty_result_keeps_columns() {
        let result = normalize(raw(&["first_name"], vec![], 0));
        assert_eq!(result.columns, vec!["first_name"]);
        assert!(result.rows.is_empty());
        assert_eq!(result.row_count, 0);
        assert!(!result.truncated);
    }

    #[test]
    fn test_truncation_flag() {
        let rows: Vec<_> = (0..3).map(|i| vec![cell("n", CellValue::from_i64(i))]).collect();

        let exact = normalize(raw(&["n"], rows.clone(), 3));
        assert!(!exact.truncated);

        let over = normalize(raw(&["n"], rows, 4));
        assert!(over.truncated);
        assert_eq!(over.row_count, 3);
    }

    #[test]
    fn test_preserves_row_order() {
        let rows: Vec<_> = (0..50).rev().map(|i| vec![cell("n", CellValue::from_i64(i))]).collect();
        let result = normalize(raw(&["n"], rows, 50));
        let values: Vec<i64> = result
            .rows
            .iter()
            .map(|r| match &r[0] {
                CellValue::Number(n) => n.as_i64().unwrap(),
                other => panic!("unexpected {:?}", other),
            })
            .collect();
        let expected: Vec<i64> = (0..50).rev().collect();
        assert_eq!(values, expected);
    }
}
