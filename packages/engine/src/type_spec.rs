//! Output type specifications
//!
//! A [`TypeSpec`] declares the expected primitive type, unit, precision and
//! bounds of a law output. It is applied once, after the output's action has
//! produced its raw value.
//!
//! # Enforcement order
//!
//! 1. NaN is replaced by a neutral value for the declared unit/type
//! 2. `type: string` converts the value to its string form and stops
//! 3. Numeric strings are parsed
//! 4. Clamp to `min` / `max`
//! 5. Round to `precision` (ties to even)
//! 6. `unit: eurocent` truncates to an integer
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::{TypeSpec, Value};
//!
//! let spec = TypeSpec::new().with_unit("eurocent").with_precision(0);
//! assert_eq!(spec.enforce(Value::Float(1234.6)), Value::Int(1235));
//! ```

use serde::{Deserialize, Serialize};

use crate::types::Value;

/// Type, unit and bounds of a value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeSpec {
    /// Expected value type (e.g. "number", "string", "boolean", "amount")
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub value_type: Option<String>,

    /// Unit for the value (e.g. "eurocent", "years")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,

    /// Number of decimal places for rounding
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<i32>,

    /// Minimum allowed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    /// Maximum allowed value
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

impl TypeSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_type(mut self, value_type: impl Into<String>) -> Self {
        self.value_type = Some(value_type.into());
        self
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    pub fn with_precision(mut self, precision: i32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn with_max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    /// Fill unset fields from `other`. The output's own `type` is merged into
    /// its `type_spec` this way.
    pub fn merged_with(mut self, other: &TypeSpec) -> Self {
        if self.value_type.is_none() {
            self.value_type = other.value_type.clone();
        }
        if self.unit.is_none() {
            self.unit = other.unit.clone();
        }
        if self.precision.is_none() {
            self.precision = other.precision;
        }
        if self.min.is_none() {
            self.min = other.min;
        }
        if self.max.is_none() {
            self.max = other.max;
        }
        self
    }

    /// Check if this TypeSpec changes values at all.
    pub fn has_constraints(&self) -> bool {
        self.precision.is_some()
            || self.min.is_some()
            || self.max.is_some()
            || self.unit.is_some()
            || self.value_type.is_some()
    }

    fn is_eurocent(&self) -> bool {
        self.unit.as_deref() == Some("eurocent")
    }

    /// Enforce the type specification on a value.
    pub fn enforce(&self, value: Value) -> Value {
        let value = self.clean_nan(value);
        if value.is_null() {
            return value;
        }

        if self.value_type.as_deref() == Some("string") {
            return Value::String(to_display_string(&value));
        }

        let value = match value {
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Value::Float(f),
                Err(_) => return Value::String(s),
            },
            other => other,
        };

        match value {
            Value::Int(i) => self.enforce_numeric(Number::Int(i)),
            Value::Float(f) => self.enforce_numeric(Number::Float(f)),
            other => other,
        }
    }

    /// Replace NaN (recursively inside lists and objects) with the neutral
    /// value for the declared unit or type.
    fn clean_nan(&self, value: Value) -> Value {
        match value {
            Value::Float(f) if f.is_nan() => {
                match self.unit.as_deref().or(self.value_type.as_deref()) {
                    Some("int") | Some("eurocent") => Value::Int(0),
                    Some("bool") => Value::Bool(false),
                    Some("str") => Value::String(String::new()),
                    Some("list") => Value::Array(Vec::new()),
                    _ => Value::Null,
                }
            }
            Value::Array(items) => {
                Value::Array(items.into_iter().map(|v| self.clean_nan(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.into_iter()
                    .map(|(k, v)| (k, self.clean_nan(v)))
                    .collect(),
            ),
            other => other,
        }
    }

    fn enforce_numeric(&self, value: Number) -> Value {
        let mut result = value;

        if let Some(min) = self.min {
            if result.as_f64() < min {
                result = Number::from_bound(min);
            }
        }
        if let Some(max) = self.max {
            if result.as_f64() > max {
                result = Number::from_bound(max);
            }
        }

        if let Some(precision) = self.precision {
            result = match result {
                Number::Float(f) => {
                    let factor = 10_f64.powi(precision);
                    Number::Float((f * factor).round_ties_even() / factor)
                }
                Number::Int(i) if precision < 0 => Number::Int(round_int(i, precision)),
                int => int,
            };
        }

        if self.is_eurocent() {
            return match result {
                Number::Int(i) => Value::Int(i),
                Number::Float(f) if f.is_finite() => Value::Int(f.trunc() as i64),
                Number::Float(f) => Value::Float(f),
            };
        }

        match result {
            Number::Int(i) => Value::Int(i),
            Number::Float(f) => Value::Float(f),
        }
    }
}

/// Round an integer to a negative number of decimals, ties to even
/// (`1250` at `-2` gives `1200`).
fn round_int(value: i64, precision: i32) -> i64 {
    let Some(step) = 10_i64.checked_pow(precision.unsigned_abs()) else {
        return 0;
    };
    let quotient = value.div_euclid(step);
    let twice_rest = 2 * i128::from(value.rem_euclid(step));
    let rounded = match twice_rest.cmp(&i128::from(step)) {
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal if quotient % 2 != 0 => quotient + 1,
        _ => quotient,
    };
    rounded.saturating_mul(step)
}

/// Numeric value that remembers whether it was an integer.
#[derive(Debug, Clone, Copy)]
enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    fn from_bound(bound: f64) -> Self {
        if bound.fract() == 0.0 && bound.abs() < i64::MAX as f64 {
            Number::Int(bound as i64)
        } else {
            Number::Float(bound)
        }
    }
}

/// String form of a value, as used by `type: string` outputs.
fn to_display_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Date(d) => d.to_string(),
        Value::Null => String::new(),
        other => other.canonical(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eurocent_rounds_then_truncates() {
        let spec = TypeSpec::new().with_unit("eurocent").with_precision(0);
        assert_eq!(spec.enforce(Value::Float(1234.6)), Value::Int(1235));
        assert_eq!(spec.enforce(Value::Float(1234.4)), Value::Int(1234));
    }

    #[test]
    fn test_eurocent_without_precision_truncates() {
        let spec = TypeSpec::new().with_unit("eurocent");
        assert_eq!(spec.enforce(Value::Float(1234.6)), Value::Int(1234));
    }

    #[test]
    fn test_rounding_ties_to_even() {
        let spec = TypeSpec::new().with_precision(0);
        assert_eq!(spec.enforce(Value::Float(2.5)), Value::Float(2.0));
        assert_eq!(spec.enforce(Value::Float(3.5)), Value::Float(4.0));
    }

    #[test]
    fn test_clamp_min_max() {
        let spec = TypeSpec::new()
            .with_unit("eurocent")
            .with_precision(0)
            .with_min(0.0)
            .with_max(1000.0);
        assert_eq!(spec.enforce(Value::Float(1234.6)), Value::Int(1000));
        assert_eq!(spec.enforce(Value::Int(-5)), Value::Int(0));
        assert_eq!(spec.enforce(Value::Int(500)), Value::Int(500));
    }

    #[test]
    fn test_int_stays_int() {
        let spec = TypeSpec::new().with_precision(2);
        assert_eq!(spec.enforce(Value::Int(7)), Value::Int(7));
    }

    #[test]
    fn test_negative_precision_rounds_int() {
        let spec = TypeSpec::new().with_precision(-2);
        assert_eq!(spec.enforce(Value::Int(1234)), Value::Int(1200));
        assert_eq!(spec.enforce(Value::Int(1250)), Value::Int(1200));
        assert_eq!(spec.enforce(Value::Int(1350)), Value::Int(1400));
        assert_eq!(spec.enforce(Value::Int(-1260)), Value::Int(-1300));
        assert_eq!(
            TypeSpec::new().with_precision(-30).enforce(Value::Int(987)),
            Value::Int(0)
        );
    }

    #[test]
    fn test_string_type_converts() {
        let spec = TypeSpec::new().with_type("string");
        assert_eq!(spec.enforce(Value::Int(42)), Value::from("42"));
        assert_eq!(spec.enforce(Value::Bool(true)), Value::from("true"));
    }

    #[test]
    fn test_numeric_string_parsed() {
        let spec = TypeSpec::new().with_unit("eurocent").with_precision(0);
        assert_eq!(spec.enforce(Value::from("99.5")), Value::Int(100));
        assert_eq!(spec.enforce(Value::from("n/a")), Value::from("n/a"));
    }

    #[test]
    fn test_nan_cleaned_by_unit() {
        let spec = TypeSpec::new().with_unit("eurocent");
        assert_eq!(spec.enforce(Value::Float(f64::NAN)), Value::Int(0));

        let spec = TypeSpec::new();
        assert_eq!(spec.enforce(Value::Float(f64::NAN)), Value::Null);
    }

    #[test]
    fn test_null_passes_through() {
        let spec = TypeSpec::new().with_min(0.0);
        assert_eq!(spec.enforce(Value::Null), Value::Null);
    }

    #[test]
    fn test_non_numeric_passes_through() {
        let spec = TypeSpec::new().with_min(0.0);
        assert_eq!(spec.enforce(Value::Bool(true)), Value::Bool(true));
    }

    #[test]
    fn test_deserialize_from_yaml() {
        let spec: TypeSpec =
            serde_yaml_ng::from_str("unit: eurocent\nprecision: 0\nmin: 0\n").unwrap();
        assert_eq!(spec.unit.as_deref(), Some("eurocent"));
        assert_eq!(spec.precision, Some(0));
        assert_eq!(spec.min, Some(0.0));
    }

    #[test]
    fn test_merged_with_keeps_own_fields() {
        let spec = TypeSpec::new()
            .with_unit("eurocent")
            .merged_with(&TypeSpec::new().with_type("amount").with_unit("euro"));
        assert_eq!(spec.unit.as_deref(), Some("eurocent"));
        assert_eq!(spec.value_type.as_deref(), Some("amount"));
    }
}
