//! NRML expressions, conditions and arguments
//!
//! Parsed once from the raw document. The shapes accepted:
//!
//! - argument: `{"$ref": ...}`, `{"value": ...}`, a nested expression
//!   (`{"type": ...}`), a path `[{"$ref": fact}, {"$ref": item}]` (only
//!   meaningful inside an aggregation), or a bare literal
//! - expression: `conditional`, `arithmetic`, `aggregation` (`count`)
//! - condition: `comparison` or `exists`

use std::collections::BTreeSet;

use super::{ref_of, Raw};
use crate::ast::{AggregateOp, CompareOp};
use crate::types::Value;

type ParseResult<T> = std::result::Result<T, String>;

#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    Ref(String),
    /// Keys walked into the active item of an aggregation
    Path(Vec<String>),
    Value(Value),
    Expression(Box<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    In,
    Compare(CompareOp),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    Comparison {
        operator: ComparisonOp,
        left: Argument,
        right: Argument,
    },
    /// A characteristic is present on the active item
    Exists {
        characteristic: Argument,
        /// Key of the characteristic item (second path element)
        item: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Conditional {
        condition: Condition,
        then: Option<Argument>,
        otherwise: Option<Argument>,
    },
    Arithmetic {
        operator: ArithmeticOp,
        arguments: Vec<Argument>,
    },
    /// `aggregation` with function `count`
    Count {
        collection: Argument,
        condition: Option<Condition>,
    },
}

// =============================================================================
// Names
// =============================================================================

impl ArithmeticOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "add" => ArithmeticOp::Add,
            "subtract" => ArithmeticOp::Subtract,
            "multiply" => ArithmeticOp::Multiply,
            "divide" => ArithmeticOp::Divide,
            "min" => ArithmeticOp::Min,
            "max" => ArithmeticOp::Max,
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArithmeticOp::Add => "add",
            ArithmeticOp::Subtract => "subtract",
            ArithmeticOp::Multiply => "multiply",
            ArithmeticOp::Divide => "divide",
            ArithmeticOp::Min => "min",
            ArithmeticOp::Max => "max",
        }
    }

    /// The rule-dialect fold with the same left-to-right semantics.
    pub fn fold_op(&self) -> AggregateOp {
        match self {
            ArithmeticOp::Add => AggregateOp::Add,
            ArithmeticOp::Subtract => AggregateOp::Subtract,
            ArithmeticOp::Multiply => AggregateOp::Multiply,
            ArithmeticOp::Divide => AggregateOp::Divide,
            ArithmeticOp::Min => AggregateOp::Min,
            ArithmeticOp::Max => AggregateOp::Max,
        }
    }
}

impl ComparisonOp {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "in" => ComparisonOp::In,
            "equals" => ComparisonOp::Compare(CompareOp::Equals),
            "notEquals" => ComparisonOp::Compare(CompareOp::NotEquals),
            "lessThan" => ComparisonOp::Compare(CompareOp::LessThan),
            "lessThanOrEqual" => ComparisonOp::Compare(CompareOp::LessThanOrEqual),
            "greaterThan" => ComparisonOp::Compare(CompareOp::GreaterThan),
            "greaterThanOrEqual" => ComparisonOp::Compare(CompareOp::GreaterThanOrEqual),
            _ => return None,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOp::In => "in",
            ComparisonOp::Compare(CompareOp::Equals) => "equals",
            ComparisonOp::Compare(CompareOp::NotEquals) => "notEquals",
            ComparisonOp::Compare(CompareOp::LessThan) => "lessThan",
            ComparisonOp::Compare(CompareOp::LessThanOrEqual) => "lessThanOrEqual",
            ComparisonOp::Compare(CompareOp::GreaterThan) => "greaterThan",
            ComparisonOp::Compare(CompareOp::GreaterThanOrEqual) => "greaterThanOrEqual",
        }
    }
}

// =============================================================================
// Parsing
// =============================================================================

impl Argument {
    pub fn from_raw(raw: &Raw) -> ParseResult<Self> {
        match raw {
            Raw::Array(items) => {
                let keys: Vec<String> = items.iter().filter_map(ref_of).map(str::to_string).collect();
                if keys.is_empty() {
                    return Err("path argument without $ref entries".to_string());
                }
                Ok(Argument::Path(keys))
            }
            Raw::Object(map) => {
                if let Some(reference) = ref_of(raw) {
                    Ok(Argument::Ref(reference.to_string()))
                } else if let Some(value) = map.get("value") {
                    Ok(Argument::Value(Value::from(value.clone())))
                } else if map.contains_key("type") {
                    Expression::from_raw(raw).map(|e| Argument::Expression(Box::new(e)))
                } else {
                    Err(format!("cannot resolve argument {}", raw))
                }
            }
            literal => Ok(Argument::Value(Value::from(literal.clone()))),
        }
    }
}

fn field<'a>(raw: &'a Raw, key: &str, context: &str) -> ParseResult<&'a Raw> {
    raw.get(key)
        .ok_or_else(|| format!("{} requires '{}'", context, key))
}

fn name<'a>(raw: &'a Raw, key: &str, context: &str) -> ParseResult<&'a str> {
    field(raw, key, context)?
        .as_str()
        .ok_or_else(|| format!("{} '{}' must be a string", context, key))
}

fn two_arguments(raw: &Raw, context: &str) -> ParseResult<(Argument, Argument)> {
    match field(raw, "arguments", context)? {
        Raw::Array(args) if args.len() == 2 => {
            Ok((Argument::from_raw(&args[0])?, Argument::from_raw(&args[1])?))
        }
        other => Err(format!("{} expects 2 arguments, got {}", context, other)),
    }
}

impl Condition {
    pub fn from_raw(raw: &Raw) -> ParseResult<Self> {
        match name(raw, "type", "condition")? {
            "comparison" => {
                let operator_name = name(raw, "operator", "comparison")?;
                let operator = ComparisonOp::from_name(operator_name)
                    .ok_or_else(|| format!("unsupported comparison operator '{}'", operator_name))?;
                let (left, right) = two_arguments(raw, operator_name)?;
                Ok(Condition::Comparison {
                    operator,
                    left,
                    right,
                })
            }
            "exists" => {
                let raw_characteristic = field(raw, "characteristic", "exists")?;
                let item = match raw_characteristic {
                    Raw::Array(path) => path.get(1).and_then(ref_of).map(str::to_string),
                    _ => None,
                };
                Ok(Condition::Exists {
                    characteristic: Argument::from_raw(raw_characteristic)?,
                    item,
                })
            }
            other => Err(format!("unsupported condition type '{}'", other)),
        }
    }

    pub fn collect_refs(&self, out: &mut BTreeSet<String>) {
        match self {
            Condition::Comparison { left, right, .. } => {
                left.collect_refs(out);
                right.collect_refs(out);
            }
            // the characteristic item leads to the conditional characteristic
            // that assigns it, whose own references must be evaluated first
            Condition::Exists { item, .. } => out.extend(item.iter().cloned()),
        }
    }
}

impl Expression {
    pub fn from_raw(raw: &Raw) -> ParseResult<Self> {
        match name(raw, "type", "expression")? {
            "conditional" => {
                let condition = Condition::from_raw(field(raw, "condition", "conditional")?)?;
                let clause = |key: &str| raw.get(key).map(Argument::from_raw).transpose();
                Ok(Expression::Conditional {
                    condition,
                    then: clause("then")?,
                    otherwise: clause("else")?,
                })
            }
            "arithmetic" => {
                let operator_name = name(raw, "operator", "arithmetic")?;
                let operator = ArithmeticOp::from_name(operator_name)
                    .ok_or_else(|| format!("unsupported arithmetic operator '{}'", operator_name))?;
                let arguments = match field(raw, "arguments", "arithmetic")? {
                    Raw::Array(args) if !args.is_empty() => args
                        .iter()
                        .map(Argument::from_raw)
                        .collect::<ParseResult<Vec<_>>>()?,
                    _ => {
                        return Err(format!(
                            "arithmetic operator '{}' requires at least 1 argument",
                            operator_name
                        ))
                    }
                };
                Ok(Expression::Arithmetic {
                    operator,
                    arguments,
                })
            }
            "aggregation" => {
                let function = name(raw, "function", "aggregation")?;
                if function != "count" {
                    return Err(format!("aggregation function '{}' is not supported", function));
                }
                let collection = match field(raw, "expression", "aggregation")? {
                    Raw::Array(list) => list
                        .first()
                        .ok_or("aggregation expression list is empty")?,
                    single => single,
                };
                let condition = raw.get("condition").map(Condition::from_raw).transpose()?;
                Ok(Expression::Count {
                    collection: Argument::from_raw(collection)?,
                    condition,
                })
            }
            other => Err(format!("unsupported expression type '{}'", other)),
        }
    }

    pub fn collect_refs(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Conditional {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_refs(out);
                then.iter().chain(otherwise).for_each(|a| a.collect_refs(out));
            }
            Expression::Arithmetic { arguments, .. } => {
                arguments.iter().for_each(|a| a.collect_refs(out))
            }
            Expression::Count {
                collection,
                condition,
            } => {
                collection.collect_refs(out);
                if let Some(c) = condition {
                    c.collect_refs(out);
                }
            }
        }
    }
}

impl Argument {
    /// Item references this argument needs evaluated first.
    ///
    /// Path arguments read the active aggregation item and add nothing.
    pub fn collect_refs(&self, out: &mut BTreeSet<String>) {
        match self {
            Argument::Ref(r) => {
                out.insert(r.clone());
            }
            Argument::Expression(e) => e.collect_refs(out),
            Argument::Path(_) | Argument::Value(_) => {}
        }
    }
}
