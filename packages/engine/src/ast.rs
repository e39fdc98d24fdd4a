//! Operation tree of a rule specification
//!
//! Specification files describe computations as nested maps
//! (`{operation: ADD, values: [...]}`). They are converted once, at load time,
//! into the closed [`Expr`] / [`Operation`] types below. Unknown operations,
//! missing operands and unknown units are rejected during deserialization, so
//! the evaluator can match exhaustively.
//!
//! Strings starting with `$` are references and become [`Expr::Reference`];
//! every other scalar is a literal.

use serde::{Deserialize, Deserializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::types::Value;

/// An expression: literal, reference, list, or operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// `$name` or `$name.field`, stored without the `$`
    Reference(String),
    List(Vec<Expr>),
    Operation(Box<Operation>),
}

/// Comparison operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

/// Operators that fold a list of operands into one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateOp {
    And,
    Or,
    Min,
    Max,
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
}

/// Unit of a `SUBTRACT_DATE` result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DateUnit {
    #[default]
    Days,
    Months,
    Years,
}

/// One `{test, then}` clause of an IF
#[derive(Debug, Clone, PartialEq)]
pub struct IfClause {
    pub test: Expr,
    pub then: Expr,
}

/// The closed set of operations.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    If {
        clauses: Vec<IfClause>,
        otherwise: Option<Expr>,
    },
    ForEach {
        subject: Expr,
        value: Expr,
        combine: Option<AggregateOp>,
    },
    Compare {
        op: CompareOp,
        left: Expr,
        right: Expr,
    },
    Aggregate {
        op: AggregateOp,
        values: Expr,
    },
    Membership {
        negated: bool,
        subject: Expr,
        values: Expr,
    },
    NullCheck {
        negated: bool,
        subject: Expr,
    },
    Get {
        subject: Expr,
        key: Expr,
    },
    SubtractDate {
        unit: DateUnit,
        values: Vec<Expr>,
    },
    /// `{value: ...}` without an operation
    Value(Expr),
}

// =============================================================================
// Names
// =============================================================================

impl CompareOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "EQUALS" => CompareOp::Equals,
            "NOT_EQUALS" => CompareOp::NotEquals,
            "GREATER_THAN" => CompareOp::GreaterThan,
            "LESS_THAN" => CompareOp::LessThan,
            "GREATER_THAN_OR_EQUAL" | "GREATER_OR_EQUAL" => CompareOp::GreaterThanOrEqual,
            "LESS_THAN_OR_EQUAL" | "LESS_OR_EQUAL" => CompareOp::LessThanOrEqual,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Equals => "EQUALS",
            CompareOp::NotEquals => "NOT_EQUALS",
            CompareOp::GreaterThan => "GREATER_THAN",
            CompareOp::LessThan => "LESS_THAN",
            CompareOp::GreaterThanOrEqual => "GREATER_THAN_OR_EQUAL",
            CompareOp::LessThanOrEqual => "LESS_THAN_OR_EQUAL",
        }
    }
}

impl AggregateOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "AND" => AggregateOp::And,
            "OR" => AggregateOp::Or,
            "MIN" => AggregateOp::Min,
            "MAX" => AggregateOp::Max,
            "ADD" => AggregateOp::Add,
            "SUBTRACT" => AggregateOp::Subtract,
            "MULTIPLY" => AggregateOp::Multiply,
            "DIVIDE" => AggregateOp::Divide,
            "CONCAT" => AggregateOp::Concat,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AggregateOp::And => "AND",
            AggregateOp::Or => "OR",
            AggregateOp::Min => "MIN",
            AggregateOp::Max => "MAX",
            AggregateOp::Add => "ADD",
            AggregateOp::Subtract => "SUBTRACT",
            AggregateOp::Multiply => "MULTIPLY",
            AggregateOp::Divide => "DIVIDE",
            AggregateOp::Concat => "CONCAT",
        }
    }
}

impl DateUnit {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "days" => DateUnit::Days,
            "months" => DateUnit::Months,
            "years" => DateUnit::Years,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DateUnit::Days => "days",
            DateUnit::Months => "months",
            DateUnit::Years => "years",
        }
    }
}

impl Operation {
    /// Operation name as written in specification files.
    pub fn name(&self) -> &'static str {
        match self {
            Operation::If { .. } => "IF",
            Operation::ForEach { .. } => "FOREACH",
            Operation::Compare { op, .. } => op.as_str(),
            Operation::Aggregate { op, .. } => op.as_str(),
            Operation::Membership { negated: false, .. } => "IN",
            Operation::Membership { negated: true, .. } => "NOT_IN",
            Operation::NullCheck { negated: false, .. } => "IS_NULL",
            Operation::NullCheck { negated: true, .. } => "NOT_NULL",
            Operation::Get { .. } => "GET",
            Operation::SubtractDate { .. } => "SUBTRACT_DATE",
            Operation::Value(_) => "VALUE",
        }
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(v) => write!(f, "{}", v.canonical()),
            Expr::Reference(r) => write!(f, "${}", r),
            Expr::List(items) => write!(f, "[{} items]", items.len()),
            Expr::Operation(op) => write!(f, "{}", op.name()),
        }
    }
}

// =============================================================================
// Conversion from raw values
// =============================================================================

impl Expr {
    /// Build an expression from a raw document value.
    pub fn from_value(value: Value) -> Result<Self, String> {
        match value {
            Value::String(s) => match s.strip_prefix('$') {
                Some(name) if !name.is_empty() => Ok(Expr::Reference(name.to_string())),
                _ => Ok(Expr::Literal(Value::String(s))),
            },
            Value::Array(items) => items
                .into_iter()
                .map(Expr::from_value)
                .collect::<Result<Vec<_>, _>>()
                .map(Expr::List),
            Value::Object(map) if map.contains_key("operation") => {
                Operation::from_map(map).map(|op| Expr::Operation(Box::new(op)))
            }
            // `{value: x}` (optionally annotated) is a direct value assignment
            Value::Object(mut map)
                if map.contains_key("value")
                    && map
                        .keys()
                        .all(|k| matches!(k.as_str(), "value" | "description" | "legal_basis")) =>
            {
                let inner = map.remove("value").unwrap_or_default();
                let inner = Expr::from_value(inner)?;
                Ok(Expr::Operation(Box::new(Operation::Value(inner))))
            }
            other => Ok(Expr::Literal(other)),
        }
    }

    /// Collect the root names of every reference in this expression.
    ///
    /// `$person.age` contributes `person`.
    pub fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Reference(name) => {
                let root = name.split('.').next().unwrap_or(name);
                out.insert(root.to_string());
            }
            Expr::List(items) => items.iter().for_each(|e| e.collect_references(out)),
            Expr::Operation(op) => op.collect_references(out),
        }
    }
}

impl Operation {
    fn from_map(mut map: BTreeMap<String, Value>) -> Result<Self, String> {
        let name = match map.remove("operation") {
            Some(Value::String(name)) => name,
            other => return Err(format!("operation name must be a string, got {:?}", other)),
        };

        if let Some(op) = CompareOp::from_name(&name) {
            let subject = take(&mut map, &name, "subject");
            let value = take(&mut map, &name, "value");
            let (left, right) = match (subject, value) {
                (Ok(left), Ok(right)) => (left, right),
                _ => match take(&mut map, &name, "values")? {
                    Expr::List(mut items) if items.len() == 2 => {
                        let right = items.pop().ok_or("missing operand")?;
                        let left = items.pop().ok_or("missing operand")?;
                        (left, right)
                    }
                    _ => return Err(format!("{} requires subject/value or two values", name)),
                },
            };
            return Ok(Operation::Compare { op, left, right });
        }

        if let Some(op) = AggregateOp::from_name(&name) {
            return Ok(Operation::Aggregate {
                op,
                values: take(&mut map, &name, "values")?,
            });
        }

        match name.as_str() {
            "IF" => {
                let conditions = take(&mut map, &name, "conditions")?;
                let Expr::List(entries) = conditions else {
                    return Err("IF conditions must be a list".to_string());
                };
                let mut otherwise = match map.remove("else") {
                    Some(v) => Some(Expr::from_value(v)?),
                    None => None,
                };
                let mut clauses = Vec::new();
                for entry in entries {
                    match entry {
                        Expr::Literal(Value::Object(mut clause)) => {
                            if let Some(else_value) = clause.remove("else") {
                                otherwise = Some(Expr::from_value(else_value)?);
                                continue;
                            }
                            let test = clause.remove("test").ok_or("IF clause requires 'test'")?;
                            let then = clause.remove("then").ok_or("IF clause requires 'then'")?;
                            clauses.push(IfClause {
                                test: Expr::from_value(test)?,
                                then: Expr::from_value(then)?,
                            });
                        }
                        other => return Err(format!("invalid IF clause: {}", other)),
                    }
                }
                Ok(Operation::If { clauses, otherwise })
            }
            "FOREACH" => {
                let subject = take(&mut map, &name, "subject")?;
                let value = match take(&mut map, &name, "value")? {
                    Expr::List(mut items) if !items.is_empty() => items.swap_remove(0),
                    other => other,
                };
                let combine = match map.remove("combine") {
                    Some(Value::String(c)) => Some(
                        AggregateOp::from_name(&c)
                            .ok_or_else(|| format!("unknown FOREACH combine '{}'", c))?,
                    ),
                    Some(Value::Null) | None => None,
                    Some(other) => return Err(format!("invalid FOREACH combine: {:?}", other)),
                };
                Ok(Operation::ForEach {
                    subject,
                    value,
                    combine,
                })
            }
            "IN" | "NOT_IN" => Ok(Operation::Membership {
                negated: name == "NOT_IN",
                subject: take(&mut map, &name, "subject")?,
                values: take(&mut map, &name, "values")?,
            }),
            "IS_NULL" | "NOT_NULL" => Ok(Operation::NullCheck {
                negated: name == "NOT_NULL",
                subject: take(&mut map, &name, "subject")?,
            }),
            "GET" => {
                let subject = take(&mut map, &name, "subject")?;
                let key = take(&mut map, &name, "value")
                    .or_else(|_| take(&mut map, &name, "key"))?;
                Ok(Operation::Get { subject, key })
            }
            "SUBTRACT_DATE" => {
                let values = match take(&mut map, &name, "values")? {
                    Expr::List(items) if items.len() == 2 => items,
                    _ => return Err("SUBTRACT_DATE requires exactly two values".to_string()),
                };
                let unit = match map.remove("unit") {
                    Some(Value::String(u)) => DateUnit::from_name(&u)
                        .ok_or_else(|| format!("unknown SUBTRACT_DATE unit '{}'", u))?,
                    _ => DateUnit::Days,
                };
                Ok(Operation::SubtractDate { unit, values })
            }
            _ => Err(format!("unknown operation '{}'", name)),
        }
    }

    fn collect_references(&self, out: &mut BTreeSet<String>) {
        match self {
            Operation::If { clauses, otherwise } => {
                for clause in clauses {
                    clause.test.collect_references(out);
                    clause.then.collect_references(out);
                }
                if let Some(e) = otherwise {
                    e.collect_references(out);
                }
            }
            Operation::ForEach { subject, value, .. } => {
                subject.collect_references(out);
                value.collect_references(out);
            }
            Operation::Compare { left, right, .. } => {
                left.collect_references(out);
                right.collect_references(out);
            }
            Operation::Aggregate { values, .. } => values.collect_references(out),
            Operation::Membership {
                subject, values, ..
            } => {
                subject.collect_references(out);
                values.collect_references(out);
            }
            Operation::NullCheck { subject, .. } => subject.collect_references(out),
            Operation::Get { subject, key } => {
                subject.collect_references(out);
                key.collect_references(out);
            }
            Operation::SubtractDate { values, .. } => {
                values.iter().for_each(|e| e.collect_references(out))
            }
            Operation::Value(e) => e.collect_references(out),
        }
    }
}

/// Remove `key` from an operation map and convert it.
fn take(map: &mut BTreeMap<String, Value>, op: &str, key: &str) -> Result<Expr, String> {
    match map.remove(key) {
        Some(v) => Expr::from_value(v),
        None => Err(format!("{} requires '{}'", op, key)),
    }
}

impl<'de> Deserialize<'de> for Expr {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Expr::from_value(raw).map_err(serde::de::Error::custom)
    }
}
