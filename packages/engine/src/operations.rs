//! Operation evaluation
//!
//! Interprets an [`Expr`] tree against a [`ValueResolver`]. Operator families:
//! - **Conditional:** IF (ordered `test`/`then` clauses, optional `else`)
//! - **Iteration:** FOREACH with an optional aggregate `combine`
//! - **Comparison (6):** EQUALS, NOT_EQUALS, GREATER_THAN, LESS_THAN,
//!   GREATER_THAN_OR_EQUAL, LESS_THAN_OR_EQUAL
//! - **Aggregate (9):** AND, OR, MIN, MAX, ADD, SUBTRACT, MULTIPLY, DIVIDE, CONCAT
//! - **Membership / null tests / lookup:** IN, NOT_IN, IS_NULL, NOT_NULL, GET
//! - **Date arithmetic:** SUBTRACT_DATE in days, months or years
//!
//! Bad data never raises: incompatible comparisons yield `Null`, `None`
//! aggregate operands are dropped, unparsable dates flag the evaluation as
//! missing required data. Only depth limits and the deadline produce errors.
//!
//! Every operation opens a trace node before evaluating its operands and
//! closes it on every exit path through [`TraceScope`].

use chrono::Datelike;
use std::cmp::Ordering;
use std::collections::BTreeMap;

use crate::ast::{AggregateOp, CompareOp, DateUnit, Expr, IfClause, Operation};
use crate::config;
use crate::error::{EngineError, Result};
use crate::trace::{TraceScope, Traced};
use crate::types::{parse_date, PathNodeType, Value};

/// Source of values for references (`$name`) during evaluation.
///
/// Implemented by the evaluation context; tests use a plain map.
pub trait ValueResolver: Traced {
    /// Resolve a reference name (without `$`). Unresolvable names yield
    /// `Ok(Value::Null)`; errors are reserved for structural failures.
    fn resolve(&mut self, name: &str) -> Result<Value>;

    /// Fail when the evaluation ran out of time or was cancelled.
    fn check_deadline(&self) -> Result<()>;

    /// Set the sticky missing-required flag.
    fn mark_missing_required(&mut self);

    /// Loop-scope bindings, replaced per FOREACH iteration.
    fn local_scope(&mut self) -> &mut BTreeMap<String, Value>;
}

/// Recursion bookkeeping for one evaluation.
#[derive(Debug, Clone, Copy, Default)]
struct Frame {
    depth: usize,
    loops: usize,
}

impl Frame {
    fn enter(self) -> Result<Self> {
        if self.depth >= config::MAX_OPERATION_DEPTH {
            return Err(EngineError::MaxDepthExceeded(format!(
                "operation nesting exceeds {}",
                config::MAX_OPERATION_DEPTH
            )));
        }
        Ok(Frame {
            depth: self.depth + 1,
            ..self
        })
    }
}

/// Evaluate an expression to a concrete value.
pub fn evaluate<R: ValueResolver + ?Sized>(expr: &Expr, ctx: &mut R) -> Result<Value> {
    eval(expr, ctx, Frame::default())
}

fn eval<R: ValueResolver + ?Sized>(expr: &Expr, ctx: &mut R, frame: Frame) -> Result<Value> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Reference(name) => ctx.resolve(name),
        Expr::List(items) => items
            .iter()
            .map(|item| eval(item, ctx, frame))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Expr::Operation(op) => execute(op, ctx, frame.enter()?),
    }
}

fn execute<R: ValueResolver + ?Sized>(op: &Operation, ctx: &mut R, frame: Frame) -> Result<Value> {
    ctx.check_deadline()?;

    let mut scope = TraceScope::enter(ctx, op.name(), PathNodeType::Operation);
    let ctx = &mut *scope;

    let result = match op {
        Operation::If { clauses, otherwise } => execute_if(clauses, otherwise.as_ref(), ctx, frame)?,
        Operation::ForEach {
            subject,
            value,
            combine,
        } => execute_foreach(subject, value, *combine, ctx, frame)?,
        Operation::Compare { op: cmp, left, right } => {
            let left = eval(left, ctx, frame)?;
            let right = eval(right, ctx, frame)?;
            let trace = ctx.trace_mut();
            trace.set_detail("subject_value", left.clone());
            trace.set_detail("comparison_value", right.clone());
            compare(*cmp, &left, &right)
        }
        Operation::Aggregate { op: agg, values } => execute_aggregate(*agg, values, ctx, frame)?,
        Operation::Membership {
            negated,
            subject,
            values,
        } => {
            let subject = eval(subject, ctx, frame)?;
            let allowed = eval(values, ctx, frame)?;
            let found = match &allowed {
                Value::Array(items) => items.iter().any(|v| loosely_equal(&subject, v)),
                single => loosely_equal(&subject, single),
            };
            ctx.trace_mut().set_detail("subject_value", subject);
            Value::Bool(found != *negated)
        }
        Operation::NullCheck { negated, subject } => {
            let subject = eval(subject, ctx, frame)?;
            Value::Bool(subject.is_null() != *negated)
        }
        Operation::Get { subject, key } => {
            let subject = eval(subject, ctx, frame)?;
            let key = eval(key, ctx, frame)?;
            lookup(&subject, &key)
        }
        Operation::SubtractDate { unit, values } => {
            let mut operands = Vec::with_capacity(values.len());
            for value in values {
                operands.push(eval(value, ctx, frame)?);
            }
            ctx.trace_mut().set_detail("unit", unit.as_str());
            match subtract_dates(*unit, &operands) {
                Some(diff) => Value::Int(diff),
                None => {
                    tracing::warn!(
                        operands = ?operands,
                        "SUBTRACT_DATE operands are not valid dates, treating as missing required"
                    );
                    ctx.mark_missing_required();
                    Value::Null
                }
            }
        }
        Operation::Value(inner) => eval(inner, ctx, frame)?,
    };

    tracing::debug!(operation = op.name(), result = %result.canonical(), "Operation evaluated");
    ctx.trace_mut().set_result(result.clone());
    Ok(result)
}

// =============================================================================
// IF / FOREACH
// =============================================================================

fn execute_if<R: ValueResolver + ?Sized>(
    clauses: &[IfClause],
    otherwise: Option<&Expr>,
    ctx: &mut R,
    frame: Frame,
) -> Result<Value> {
    for (index, clause) in clauses.iter().enumerate() {
        let test = eval(&clause.test, ctx, frame)?;
        if test.to_bool() {
            ctx.trace_mut().set_detail("condition_index", index as i64);
            return eval(&clause.then, ctx, frame);
        }
    }
    match otherwise {
        Some(expr) => {
            ctx.trace_mut().set_detail("condition_index", "else");
            eval(expr, ctx, frame)
        }
        None => Ok(Value::Int(0)),
    }
}

fn execute_foreach<R: ValueResolver + ?Sized>(
    subject: &Expr,
    value: &Expr,
    combine: Option<AggregateOp>,
    ctx: &mut R,
    frame: Frame,
) -> Result<Value> {
    let items = match eval(subject, ctx, frame)? {
        Value::Null => Vec::new(),
        Value::Array(items) => items,
        single => vec![single],
    };
    if items.is_empty() {
        tracing::warn!("No data found to run FOREACH on");
        return Ok(Value::Int(0));
    }
    if items.len() > config::MAX_ARRAY_SIZE {
        return Err(EngineError::InvalidOperation(format!(
            "FOREACH over {} elements exceeds maximum of {}",
            items.len(),
            config::MAX_ARRAY_SIZE
        )));
    }

    let inner = Frame {
        loops: frame.loops + 1,
        ..frame
    };
    let slot = format!("current_{}", frame.loops);
    let mut results = Vec::new();

    for item in items {
        ctx.check_deadline()?;

        // Outer loop slots stay visible inside nested loops
        let mut scope: BTreeMap<String, Value> = ctx
            .local_scope()
            .iter()
            .filter(|(k, _)| k.starts_with("current_"))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        match &item {
            Value::Object(fields) => scope.extend(fields.clone()),
            scalar => {
                scope.insert("value".to_string(), scalar.clone());
            }
        }
        scope.insert(slot.clone(), item);

        let saved = std::mem::replace(ctx.local_scope(), scope);
        let outcome = eval(value, ctx, inner);
        *ctx.local_scope() = saved;

        match outcome? {
            Value::Array(values) => results.extend(values),
            single => results.push(single),
        }
    }

    Ok(match combine {
        Some(op) => fold(op, results),
        None => Value::Array(results),
    })
}

// =============================================================================
// Comparison and membership
// =============================================================================

/// Compare two values. `Null` means the operands are not comparable.
pub fn compare(op: CompareOp, left: &Value, right: &Value) -> Value {
    let ordering = order(left, right);
    let result = match op {
        CompareOp::Equals => Some(ordering == Some(Ordering::Equal) || left == right),
        CompareOp::NotEquals => Some(!(ordering == Some(Ordering::Equal) || left == right)),
        CompareOp::GreaterThan => ordering.map(Ordering::is_gt),
        CompareOp::LessThan => ordering.map(Ordering::is_lt),
        CompareOp::GreaterThanOrEqual => ordering.map(Ordering::is_ge),
        CompareOp::LessThanOrEqual => ordering.map(Ordering::is_le),
    };

    match result {
        Some(b) => Value::Bool(b),
        None => {
            tracing::warn!(
                operation = op.as_str(),
                left = left.type_name(),
                right = right.type_name(),
                "Cannot compare values of these types"
            );
            Value::Null
        }
    }
}

/// Ordering between two values, if they are comparable.
///
/// Integers and floats compare numerically; a date compared with a string
/// parses the string first.
fn order(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (a, b) if a.is_number() && b.is_number() => {
            a.as_float().zip(b.as_float()).and_then(|(a, b)| a.partial_cmp(&b))
        }
        (Value::Date(a), Value::Date(b)) => Some(a.cmp(b)),
        (Value::Date(a), Value::String(s)) => parse_date(s).map(|b| a.cmp(&b)),
        (Value::String(s), Value::Date(b)) => parse_date(s).map(|a| a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// Equality with numeric coercion (`42 == 42.0`) and date/string coercion.
pub fn loosely_equal(a: &Value, b: &Value) -> bool {
    a == b || order(a, b) == Some(Ordering::Equal)
}

fn lookup(subject: &Value, key: &Value) -> Value {
    match (subject, key) {
        (Value::Object(map), Value::String(k)) => map.get(k).cloned().unwrap_or_default(),
        (Value::Object(map), other) => map.get(&display(other)).cloned().unwrap_or_default(),
        (Value::Array(items), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .unwrap_or_default(),
        (Value::Null, _) => Value::Null,
        (other, _) => {
            tracing::warn!(subject = other.type_name(), "GET on a value without keys");
            Value::Null
        }
    }
}

// =============================================================================
// Aggregates
// =============================================================================

fn execute_aggregate<R: ValueResolver + ?Sized>(
    op: AggregateOp,
    values: &Expr,
    ctx: &mut R,
    frame: Frame,
) -> Result<Value> {
    // AND / OR over an inline list short-circuit
    if let (AggregateOp::And | AggregateOp::Or, Expr::List(items)) = (op, values) {
        let stop_on = op == AggregateOp::Or;
        for item in items {
            if eval(item, ctx, frame)?.to_bool() == stop_on {
                return Ok(Value::Bool(stop_on));
            }
        }
        return Ok(Value::Bool(!stop_on));
    }

    let operands = match eval(values, ctx, frame)? {
        Value::Array(items) => items,
        single => vec![single],
    };
    ctx.trace_mut()
        .set_detail("evaluated_values", Value::Array(operands.clone()));
    Ok(fold(op, operands))
}

/// Fold a list of operands. `Null` operands are dropped; no operands left
/// yields `0`.
pub fn fold(op: AggregateOp, values: Vec<Value>) -> Value {
    let total = values.len();
    let values: Vec<Value> = values.into_iter().filter(|v| !v.is_null()).collect();
    if values.is_empty() {
        tracing::warn!(operation = op.as_str(), "No values found (or they were None), returning 0");
        return Value::Int(0);
    }
    if values.len() < total {
        tracing::warn!(
            operation = op.as_str(),
            dropped = total - values.len(),
            "Dropped values because they were None"
        );
    }

    match op {
        AggregateOp::And => Value::Bool(values.iter().all(Value::to_bool)),
        AggregateOp::Or => Value::Bool(values.iter().any(Value::to_bool)),
        AggregateOp::Concat => Value::String(values.iter().map(display).collect()),
        AggregateOp::Min => extreme(op, &values, Ordering::Less),
        AggregateOp::Max => extreme(op, &values, Ordering::Greater),
        AggregateOp::Add => arithmetic(op, &values, i64::checked_add, |a, b| a + b),
        AggregateOp::Subtract => arithmetic(op, &values, i64::checked_sub, |a, b| a - b),
        AggregateOp::Multiply => arithmetic(op, &values, i64::checked_mul, |a, b| a * b),
        AggregateOp::Divide => divide(&values),
    }
}

/// Numeric operands, skipping (and logging) anything non-numeric.
fn numbers(op: AggregateOp, values: &[Value]) -> Vec<Value> {
    values
        .iter()
        .filter_map(|v| match v {
            Value::Int(_) | Value::Float(_) => Some(v.clone()),
            Value::String(s) => match s.trim().parse::<f64>() {
                Ok(f) => Some(Value::Float(f)),
                Err(_) => {
                    tracing::warn!(operation = op.as_str(), value = %s, "Skipping non-numeric operand");
                    None
                }
            },
            other => {
                tracing::warn!(operation = op.as_str(), value = other.type_name(), "Skipping non-numeric operand");
                None
            }
        })
        .collect()
}

/// Left fold that stays integer while every operand is an integer.
fn arithmetic(
    op: AggregateOp,
    values: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    let operands = numbers(op, values);
    let Some((first, rest)) = operands.split_first() else {
        return Value::Int(0);
    };

    let mut acc = first.clone();
    for next in rest {
        acc = match (&acc, next) {
            (Value::Int(a), Value::Int(b)) => match int_op(*a, *b) {
                Some(r) => Value::Int(r),
                None => Value::Float(float_op(*a as f64, *b as f64)),
            },
            (a, b) => Value::Float(float_op(
                a.as_float().unwrap_or_default(),
                b.as_float().unwrap_or_default(),
            )),
        };
    }
    acc
}

fn divide(values: &[Value]) -> Value {
    let operands = numbers(AggregateOp::Divide, values);
    let Some((first, rest)) = operands.split_first() else {
        return Value::Int(0);
    };

    let mut acc = first.as_float().unwrap_or_default();
    for divisor in rest {
        let divisor = divisor.as_float().unwrap_or_default();
        if divisor == 0.0 {
            tracing::warn!("Division by zero, returning 0");
            return Value::Int(0);
        }
        acc /= divisor;
    }
    Value::Float(acc)
}

/// MIN / MAX keep the winning operand's own type.
fn extreme(op: AggregateOp, values: &[Value], want: Ordering) -> Value {
    let mut best: Option<Value> = None;
    for value in numbers(op, values) {
        best = match best {
            Some(current) if order(&value, &current) != Some(want) => Some(current),
            _ => Some(value),
        };
    }
    best.unwrap_or(Value::Int(0))
}

/// Plain text form used by CONCAT and GET keys.
fn display(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Date(d) => d.format(config::DATE_FORMAT).to_string(),
        Value::Null => String::new(),
        other => other.canonical(),
    }
}

// =============================================================================
// Date arithmetic
// =============================================================================

/// `values[0] - values[1]` in whole units, or None when an operand is not a date.
fn subtract_dates(unit: DateUnit, values: &[Value]) -> Option<i64> {
    let [end, start] = values else {
        return None;
    };
    let end = end.as_date()?;
    let start = start.as_date()?;

    let year_diff = i64::from(end.year() - start.year());
    Some(match unit {
        DateUnit::Days => (end - start).num_days(),
        DateUnit::Months => year_diff * 12 + i64::from(end.month()) - i64::from(start.month()),
        DateUnit::Years => {
            if (end.month(), end.day()) < (start.month(), start.day()) {
                year_diff - 1
            } else {
                year_diff
            }
        }
    })
}
