//! Value conversion helpers for Gherkin data tables
//!
//! Converts string values from feature files to engine Value types.

use regelrecht_machine::{Row, Value};
use std::collections::BTreeMap;

/// Convert a Gherkin table cell value to an engine Value.
///
/// Supports:
/// - `true` / `false` -> Bool
/// - `null` -> Null
/// - Integer literals -> Int
/// - Float literals -> Float
/// - Everything else -> String
pub fn convert_gherkin_value(val: &str) -> Value {
    let trimmed = val.trim();

    if trimmed == "true" {
        return Value::Bool(true);
    }
    if trimmed == "false" {
        return Value::Bool(false);
    }
    if trimmed == "null" || trimmed.is_empty() {
        return Value::Null;
    }

    // Try integer first
    if let Ok(i) = trimmed.parse::<i64>() {
        return Value::Int(i);
    }
    if let Ok(f) = trimmed.parse::<f64>() {
        return Value::Float(f);
    }

    Value::String(trimmed.to_string())
}

/// Parse a two-column Gherkin table into parameters.
///
/// The table format is:
/// ```text
/// | key1 | value1 |
/// | key2 | value2 |
/// ```
pub fn parse_table_to_params(table: &cucumber::gherkin::Table) -> BTreeMap<String, Value> {
    table
        .rows
        .iter()
        .filter(|row| row.len() >= 2)
        .map(|row| (row[0].trim().to_string(), convert_gherkin_value(&row[1])))
        .collect()
}

/// Parse a Gherkin table with a header row into records.
///
/// ```text
/// | bsn       | field1 | field2 |
/// | 999993653 | value1 | value2 |
/// ```
pub fn parse_table_to_rows(table: &cucumber::gherkin::Table) -> Vec<Row> {
    let Some((headers, rows)) = table.rows.split_first() else {
        return Vec::new();
    };
    rows.iter()
        .map(|row| {
            headers
                .iter()
                .zip(row)
                .map(|(header, cell)| (header.trim().to_string(), convert_gherkin_value(cell)))
                .collect()
        })
        .collect()
}

/// Compare two Values with floating-point tolerance.
///
/// For Float values, uses a tolerance of 1e-9.
/// For Int values, exact equality is required.
pub fn values_equal_with_tolerance(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Float(fa), Value::Float(fb)) => (fa - fb).abs() < 1e-9,
        (Value::Int(ia), Value::Float(fb)) => ((*ia as f64) - fb).abs() < 1e-9,
        (Value::Float(fa), Value::Int(ib)) => (fa - (*ib as f64)).abs() < 1e-9,
        _ => a == b,
    }
}

/// Convert euro string to eurocent for comparison.
///
/// "1358.93" euro -> 135893 eurocent
pub fn parse_euro_to_eurocent(val: &str) -> Option<i64> {
    let trimmed = val.trim();
    let f: f64 = trimmed.parse().ok()?;
    Some((f * 100.0).round() as i64)
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::panic, clippy::unwrap_used)]
mod tests {
    use super::{convert_gherkin_value, parse_euro_to_eurocent, values_equal_with_tolerance};
    use regelrecht_machine::Value;

    #[test]
    fn test_convert_scalars() {
        assert_eq!(convert_gherkin_value(" true "), Value::Bool(true));
        assert_eq!(convert_gherkin_value("null"), Value::Null);
        assert_eq!(convert_gherkin_value(""), Value::Null);
        assert_eq!(convert_gherkin_value("-10"), Value::Int(-10));
        assert_eq!(convert_gherkin_value("0.5"), Value::Float(0.5));
        assert_eq!(
            convert_gherkin_value("GM0384"),
            Value::String("GM0384".to_string())
        );
    }

    #[test]
    fn test_values_equal_with_tolerance() {
        assert!(values_equal_with_tolerance(
            &Value::Float(1.0),
            &Value::Float(1.0 + 1e-10)
        ));
        assert!(values_equal_with_tolerance(
            &Value::Int(100),
            &Value::Float(100.0)
        ));
        assert!(!values_equal_with_tolerance(
            &Value::Int(100),
            &Value::Int(101)
        ));
    }

    #[test]
    fn test_parse_euro_to_eurocent() {
        assert_eq!(parse_euro_to_eurocent("1358.93"), Some(135893));
        assert_eq!(parse_euro_to_eurocent("0.50"), Some(50));
    }
}
