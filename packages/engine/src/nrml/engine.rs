//! NRML evaluation
//!
//! Items are scheduled per evaluation: the active version of every item is
//! picked for the reference date, the dependency graph is built from those
//! versions, and the items the requested outputs need are evaluated in
//! topological order. Failed items are not errors; they only surface when an
//! output depends on them.
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::{EvaluationRequest, NrmlEngine, Specification};
//!
//! let Specification::Nrml(doc) = Specification::from_yaml_str(yaml)? else { unreachable!() };
//! let engine = NrmlEngine::new(doc);
//! let request = EvaluationRequest::new("kinderbijslag", date)
//!     .with_parameter("kinderen", children);
//! let result = engine.evaluate(&request, env)?;
//! ```

use std::collections::BTreeMap;

use super::document::{NrmlDocument, NrmlInput};
use super::expression::{ArithmeticOp, Argument, ComparisonOp, Condition, Expression};
use super::item::{Item, ItemKind, ItemVersion};
use super::result::ItemResult;
use crate::config;
use crate::context::EvaluationEnv;
use crate::error::{EngineError, Result};
use crate::graph::DependencyGraph;
use crate::operations;
use crate::service::{EvaluationRequest, EvaluationResult};
use crate::trace::{TraceBuilder, TraceScope, Traced};
use crate::types::{PathNodeType, Value};

/// Evaluates one NRML document.
#[derive(Debug)]
pub struct NrmlEngine {
    doc: NrmlDocument,
    items: BTreeMap<String, Item>,
}

impl NrmlEngine {
    pub fn new(doc: NrmlDocument) -> Self {
        let items = doc.items().map(|(key, item)| (key, item.clone())).collect();
        Self { doc, items }
    }

    pub fn document(&self) -> &NrmlDocument {
        &self.doc
    }

    pub fn evaluate(&self, request: &EvaluationRequest, env: EvaluationEnv<'_>) -> Result<EvaluationResult> {
        let doc = &self.doc;
        let outputs: Vec<(&str, &str)> = match request.requested_output.as_deref() {
            Some(name) => {
                let output = doc.outputs.get(name).ok_or_else(|| EngineError::OutputNotFound {
                    law: doc.law.clone(),
                    output: name.to_string(),
                })?;
                vec![(name, output.source.reference.as_str())]
            }
            None => doc
                .outputs
                .iter()
                .map(|(name, output)| (name.as_str(), output.source.reference.as_str()))
                .collect(),
        };

        let (graph, target_sources) = self.plan(request);
        let needed = graph.closure(outputs.iter().map(|(_, key)| *key));
        let order = graph.subgraph(&needed).topological_order()?;
        tracing::debug!(law = %doc.law, items = order.len(), "Evaluating NRML items");

        let mut evaluation = Evaluation {
            engine: self,
            request,
            env,
            target_sources,
            results: BTreeMap::new(),
            input: BTreeMap::new(),
            active: None,
            depth: 0,
            trace: TraceBuilder::new(),
        };
        {
            let mut scope = TraceScope::enter(&mut evaluation, doc.law.as_str(), PathNodeType::Evaluation);
            scope.trace.set_detail("reference_date", Value::Date(request.reference_date));
            if !doc.uuid.is_empty() {
                scope.trace.set_detail("uuid", doc.uuid.as_str());
            }
            for key in &order {
                scope.evaluate_item(key)?;
            }
        }

        let mut output = BTreeMap::new();
        let mut missing_required = false;
        for (name, key) in outputs {
            match evaluation.results.get(key) {
                Some(result) if result.success => {
                    output.insert(name.to_string(), result.value.clone());
                }
                other => {
                    let error = other.and_then(|r| r.error.as_deref()).unwrap_or("not evaluated");
                    tracing::warn!(law = %doc.law, output = name, error, "Output could not be determined");
                    missing_required = true;
                }
            }
        }
        if missing_required {
            output.clear();
        }

        Ok(EvaluationResult {
            output,
            requirements_met: !missing_required,
            missing_required,
            input: evaluation.input,
            trace: evaluation.trace.build(),
            rulespec_uuid: doc.uuid.clone(),
            law: doc.law.clone(),
            reference_date: request.reference_date,
        })
    }

    /// Dependency graph over the versions active at the reference date, and
    /// the map from assigned item to the item assigning it.
    fn plan(&self, request: &EvaluationRequest) -> (DependencyGraph, BTreeMap<String, String>) {
        let date = request.reference_date;
        let active: Vec<(&String, Option<&ItemVersion>)> = self
            .items
            .iter()
            .map(|(key, item)| (key, item.active_version(date)))
            .collect();

        let mut target_sources = BTreeMap::new();
        for (key, version) in &active {
            if let Some(target) = version.and_then(|v| v.target.as_ref()) {
                target_sources.insert(target.clone(), (*key).clone());
            }
        }

        let mut graph = DependencyGraph::new();
        for (key, version) in active {
            let mut dependencies: Vec<String> = version
                .map(|v| v.references.iter().cloned().collect())
                .unwrap_or_default();
            dependencies.extend(target_sources.get(key).cloned());
            graph.add_node(key.clone(), dependencies);
        }
        (graph, target_sources)
    }
}

/// State of one NRML evaluation.
struct Evaluation<'a> {
    engine: &'a NrmlEngine,
    request: &'a EvaluationRequest,
    env: EvaluationEnv<'a>,
    target_sources: BTreeMap<String, String>,
    results: BTreeMap<String, ItemResult>,
    input: BTreeMap<String, Value>,
    /// Element of the collection being aggregated
    active: Option<Value>,
    depth: usize,
    trace: TraceBuilder,
}

impl Traced for Evaluation<'_> {
    fn trace_mut(&mut self) -> &mut TraceBuilder {
        &mut self.trace
    }
}

impl Evaluation<'_> {
    fn evaluate_item(&mut self, key: &str) -> Result<()> {
        self.request.deadline.check()?;
        let engine = self.engine;
        let Some(item) = engine.items.get(key) else {
            return Ok(());
        };

        let result = {
            let mut scope = TraceScope::enter(&mut *self, key, PathNodeType::Item);
            let result = scope.item_result(key, item)?;
            scope.trace.set_result(result.value.clone());
            scope.trace.set_detail("success", result.success);
            scope.trace.set_detail("action", result.action.as_str());
            if let Some(error) = &result.error {
                scope.trace.set_detail("error", error.as_str());
            }
            for dependency in &result.dependencies {
                scope.trace.attach(dependency.to_path_node());
            }
            result
        };

        tracing::debug!(item = key, success = result.success, value = %result.value.canonical(), "Item evaluated");
        self.results.insert(key.to_string(), result);
        Ok(())
    }

    fn item_result(&mut self, key: &str, item: &Item) -> Result<ItemResult> {
        let date = self.request.reference_date;
        let Some(version) = item.active_version(date) else {
            return Ok(ItemResult::failed(
                "ItemEvaluator",
                format!("no version of {} is valid on {}", key, date),
            ));
        };

        Ok(match &version.kind {
            ItemKind::Relation { arguments } => self.relation(key, arguments),
            ItemKind::TypeDefinition { value, .. } => self.type_definition(key, value.as_ref())?,
            ItemKind::CalculatedValue { expression } => {
                let result = self.expression(expression);
                ItemResult::nested(result, "CalculatedValue", format!("calculated {}", key))
            }
            ItemKind::ConditionalCalculatedValue {
                expression,
                condition,
            } => self.when(condition, "ConditionalCalculatedValue", |this| {
                this.expression(expression)
            }),
            ItemKind::ConditionalValue { value, condition } => {
                self.when(condition, "ConditionalValue", |this| this.argument(value))
            }
            ItemKind::ConditionalCharacteristic { condition } => {
                let result = self.condition(condition);
                if result.success {
                    let holds = result.value.to_bool();
                    ItemResult::ok(
                        Value::Bool(holds),
                        "ConditionalCharacteristic",
                        format!("characteristic {}", if holds { "holds" } else { "does not hold" }),
                    )
                    .with_dependencies(vec![result])
                } else {
                    ItemResult::nested(result, "ConditionalCharacteristic", "condition failed")
                }
            }
            ItemKind::ValueInitialization { value } => {
                let result = self.argument(value);
                ItemResult::nested(result, "ValueInitialization", format!("initialized {}", key))
            }
        })
    }

    /// Value of `then` when the condition holds, otherwise `Null`.
    fn when(
        &mut self,
        condition: &Condition,
        source: &'static str,
        then: impl FnOnce(&mut Self) -> ItemResult,
    ) -> ItemResult {
        let verdict = self.condition(condition);
        if !verdict.success {
            return ItemResult::nested(verdict, source, "condition failed");
        }
        if !verdict.value.to_bool() {
            return ItemResult::ok(Value::Null, source, "condition not met").with_dependencies(vec![verdict]);
        }
        let mut result = ItemResult::nested(then(self), source, "condition met");
        result.dependencies.insert(0, verdict);
        result
    }

    // -------------------------------------------------------------------------
    // Type definitions
    // -------------------------------------------------------------------------

    /// Resolution order: include, own value, assigning item, input
    /// parameter, input data source.
    fn type_definition(&mut self, key: &str, value: Option<&Argument>) -> Result<ItemResult> {
        const SOURCE: &str = "TypeDefinition";
        let engine = self.engine;

        if let Some(include) = engine.doc.includes.iter().find(|i| i.target.reference == key) {
            return self.include(&include.law, &include.output);
        }

        if let Some(value) = value {
            let result = self.argument(value);
            return Ok(ItemResult::nested(result, SOURCE, "definition value"));
        }

        if let Some(source) = self.target_sources.get(key) {
            let result = match self.results.get(source) {
                Some(result) => ItemResult::nested(shallow(result), SOURCE, format!("assigned by {}", source)),
                None => ItemResult::failed(SOURCE, format!("{} was not evaluated", source)),
            };
            return Ok(result);
        }

        for (name, input) in &engine.doc.inputs {
            if input.target.as_ref().map(|t| t.reference.as_str()) != Some(key) {
                continue;
            }
            if let Some(value) = self.request.parameters.get(name) {
                self.input.insert(name.clone(), value.clone());
                return Ok(ItemResult::ok(value.clone(), SOURCE, format!("input parameter {}", name)));
            }
            if let Some(result) = self.provide(name, input) {
                return Ok(result);
            }
        }

        Ok(ItemResult::failed(SOURCE, format!("no value available for {}", key)))
    }

    fn include(&mut self, law: &str, output: &str) -> Result<ItemResult> {
        const SOURCE: &str = "Include";
        let request = self
            .request
            .sub_request(law, self.request.reference_date, self.request.parameters.clone(), output);

        let mut scope = TraceScope::enter(&mut *self, format!("{}.{}", law, output), PathNodeType::CrossLaw);
        scope.trace.set_detail("law", law);
        let result = match scope.env.laws.evaluate_law(&request) {
            Ok(result) => result,
            Err(e) if e.is_not_found() => {
                tracing::warn!(law, output, error = %e, "Included law not available");
                return Ok(ItemResult::failed(SOURCE, e.to_string()));
            }
            Err(e) => return Err(e),
        };
        if let Some(trace) = result.trace {
            scope.trace.attach(trace);
        }

        Ok(match result.output.get(output) {
            Some(value) => {
                scope.trace.set_result(value.clone());
                scope.input.insert(format!("{}.{}", law, output), value.clone());
                ItemResult::ok(value.clone(), SOURCE, format!("included {}.{}", law, output))
            }
            None => ItemResult::failed(SOURCE, format!("{} did not produce {}", law, output)),
        })
    }

    /// Look the input up in its data source table.
    fn provide(&mut self, name: &str, input: &NrmlInput) -> Option<ItemResult> {
        const SOURCE: &str = "TableValueProvider";
        let reference = input.source_reference.as_ref()?;
        let Some(table) = self.env.sources.table(&reference.table) else {
            return Some(ItemResult::failed(
                SOURCE,
                format!("table '{}' not found in any data source", reference.table),
            ));
        };

        let parameters = &self.request.parameters;
        let row = table.rows.iter().find(|row| {
            reference.select_on.iter().all(|select| {
                match (row.get(&select.name), parameters.get(&select.value)) {
                    (Some(cell), Some(wanted)) => operations::loosely_equal(cell, wanted),
                    _ => false,
                }
            })
        });
        let Some(row) = row else {
            return Some(ItemResult::failed(
                SOURCE,
                format!("no rows in '{}' match the selection", reference.table),
            ));
        };

        let value = row
            .iter()
            .find(|(column, _)| column.eq_ignore_ascii_case(&reference.field))
            .map(|(_, value)| value.clone())
            .unwrap_or_default();
        tracing::debug!(table = %reference.table, field = %reference.field, source = table.source_name, "Input from data source");
        self.input.insert(name.to_string(), value.clone());
        Some(ItemResult::ok(
            value,
            SOURCE,
            format!("{}.{} from {}", reference.table, reference.field, table.source_name),
        ))
    }

    // -------------------------------------------------------------------------
    // Relations
    // -------------------------------------------------------------------------

    /// Every pairing of the objects supplied for the two fact types.
    fn relation(&mut self, key: &str, arguments: &[String; 2]) -> ItemResult {
        let [first, second] = arguments;
        let left = self.objects_of(first);
        let right = self.objects_of(second);

        let pairs: Vec<Value> = left
            .iter()
            .flat_map(|l| {
                right.iter().map(move |r| {
                    Value::Object(BTreeMap::from([(first.clone(), l.clone()), (second.clone(), r.clone())]))
                })
            })
            .collect();
        let count = pairs.len();
        ItemResult::ok(
            Value::Array(pairs),
            "RelationDefinition",
            format!("relation {} resolved with {} pairs", key, count),
        )
    }

    /// Objects of a fact type from the input declared for it, with their
    /// properties renamed to item references.
    fn objects_of(&mut self, fact: &str) -> Vec<Value> {
        let engine = self.engine;
        let Some((name, input)) = engine.doc.inputs.iter().find(|(_, i)| i.object_type() == Some(fact)) else {
            tracing::debug!(fact, "No input supplies objects of this type");
            return Vec::new();
        };
        let Some(supplied) = self.request.parameters.get(name) else {
            return Vec::new();
        };
        self.input.insert(name.clone(), supplied.clone());

        let objects: &[Value] = match supplied {
            Value::Array(list) => list,
            Value::Null => &[],
            single => std::slice::from_ref(single),
        };
        objects
            .iter()
            .map(|object| {
                let mapped = input
                    .properties
                    .iter()
                    .map(|(property, item)| {
                        let value = object
                            .as_object()
                            .and_then(|o| o.get(property))
                            .cloned()
                            .unwrap_or_else(|| Value::Object(BTreeMap::new()));
                        (item.clone(), value)
                    })
                    .collect();
                Value::Object(mapped)
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Arguments and expressions
    // -------------------------------------------------------------------------

    fn argument(&mut self, argument: &Argument) -> ItemResult {
        const SOURCE: &str = "ArgumentResolver";
        match argument {
            Argument::Value(value) => ItemResult::ok(value.clone(), SOURCE, "literal value"),
            Argument::Path(keys) => match &self.active {
                Some(active) => ItemResult::ok(walk(active, keys), SOURCE, format!("path {}", keys.join(" / "))),
                None => ItemResult::failed(SOURCE, "path argument outside an aggregation"),
            },
            Argument::Ref(reference) => {
                if let Some(Value::Object(active)) = &self.active {
                    if let Some(value) = active.get(reference) {
                        return ItemResult::ok(value.clone(), SOURCE, format!("{} from aggregated item", reference));
                    }
                }
                match self.results.get(reference) {
                    Some(result) => ItemResult::nested(shallow(result), SOURCE, format!("resolved {}", reference)),
                    None => ItemResult::failed(SOURCE, format!("no value for {}", reference)),
                }
            }
            Argument::Expression(expression) => {
                let result = self.expression(expression);
                ItemResult::nested(result, SOURCE, "nested expression")
            }
        }
    }

    fn expression(&mut self, expression: &Expression) -> ItemResult {
        if self.depth >= config::MAX_OPERATION_DEPTH {
            return ItemResult::failed("ExpressionEvaluator", "maximum expression depth exceeded");
        }
        self.depth += 1;
        let result = match expression {
            Expression::Conditional {
                condition,
                then,
                otherwise,
            } => self.conditional(condition, then.as_ref(), otherwise.as_ref()),
            Expression::Arithmetic {
                operator,
                arguments,
            } => self.arithmetic(*operator, arguments),
            Expression::Count {
                collection,
                condition,
            } => self.count(collection, condition.as_ref()),
        };
        self.depth -= 1;
        result
    }

    fn conditional(
        &mut self,
        condition: &Condition,
        then: Option<&Argument>,
        otherwise: Option<&Argument>,
    ) -> ItemResult {
        const SOURCE: &str = "ConditionalExpression";
        let verdict = self.condition(condition);
        if !verdict.success {
            return ItemResult::nested(verdict, SOURCE, "condition failed");
        }
        let holds = verdict.value.to_bool();
        let clause = if holds { then } else { otherwise };
        match clause {
            Some(argument) => {
                let mut result = ItemResult::nested(
                    self.argument(argument),
                    SOURCE,
                    if holds { "then clause" } else { "else clause" },
                );
                result.dependencies.insert(0, verdict);
                result
            }
            None => ItemResult::ok(verdict.value.clone(), SOURCE, "no clause, condition value")
                .with_dependencies(vec![verdict]),
        }
    }

    fn arithmetic(&mut self, operator: ArithmeticOp, arguments: &[Argument]) -> ItemResult {
        const SOURCE: &str = "ArithmeticExpression";
        let results: Vec<ItemResult> = arguments.iter().map(|a| self.argument(a)).collect();
        if results.iter().any(|r| !r.success) {
            return ItemResult::failed(SOURCE, "Unable to resolve all arguments").with_dependencies(results);
        }

        let values: Vec<Value> = results.iter().map(|r| r.value.clone()).collect();
        if operator == ArithmeticOp::Divide && values.iter().skip(1).any(is_zero) {
            return ItemResult::failed(SOURCE, "Division by zero").with_dependencies(results);
        }
        let value = operations::fold(operator.fold_op(), values);
        ItemResult::ok(value, SOURCE, operator.as_str()).with_dependencies(results)
    }

    fn count(&mut self, collection: &Argument, condition: Option<&Condition>) -> ItemResult {
        const SOURCE: &str = "AggregationExpression";
        let resolved = self.argument(collection);
        if !resolved.success {
            return ItemResult::failed(SOURCE, "Failed to resolve collection reference")
                .with_dependencies(vec![resolved]);
        }
        let elements = match &resolved.value {
            Value::Array(list) => list.clone(),
            Value::Null => Vec::new(),
            single => vec![single.clone()],
        };

        let count = match condition {
            None => elements.len(),
            Some(condition) => {
                let outer = self.active.take();
                let mut count = 0;
                for element in elements {
                    self.active = Some(element);
                    let verdict = self.condition(condition);
                    if verdict.success && verdict.value.to_bool() {
                        count += 1;
                    }
                }
                self.active = outer;
                count
            }
        };
        ItemResult::ok(
            Value::Int(i64::try_from(count).unwrap_or(i64::MAX)),
            SOURCE,
            format!("counted {} items matching condition", count),
        )
        .with_dependencies(vec![resolved])
    }

    // -------------------------------------------------------------------------
    // Conditions
    // -------------------------------------------------------------------------

    fn condition(&mut self, condition: &Condition) -> ItemResult {
        match condition {
            Condition::Comparison {
                operator,
                left,
                right,
            } => self.comparison(*operator, left, right),
            Condition::Exists {
                characteristic,
                item,
            } => self.exists(characteristic, item.as_deref()),
        }
    }

    fn comparison(&mut self, operator: ComparisonOp, left: &Argument, right: &Argument) -> ItemResult {
        const SOURCE: &str = "ComparisonCondition";
        let left = self.argument(left);
        let right = self.argument(right);
        if !(left.success && right.success) {
            return ItemResult::failed(SOURCE, "Unable to resolve all arguments").with_dependencies(vec![left, right]);
        }

        let value = match operator {
            ComparisonOp::In => {
                let Value::Array(options) = &right.value else {
                    return ItemResult::failed(SOURCE, "'in' requires a list on the right")
                        .with_dependencies(vec![left, right]);
                };
                let member = |v: &Value| options.iter().any(|o| operations::loosely_equal(v, o));
                Value::Bool(match &left.value {
                    Value::Array(items) => items.iter().any(member),
                    single => member(single),
                })
            }
            ComparisonOp::Compare(op) => operations::compare(op, &left.value, &right.value),
        };
        if value.is_null() {
            return ItemResult::failed(
                SOURCE,
                format!(
                    "cannot compare {} with {}",
                    left.value.type_name(),
                    right.value.type_name()
                ),
            )
            .with_dependencies(vec![left, right]);
        }
        ItemResult::ok(value, SOURCE, operator.as_str()).with_dependencies(vec![left, right])
    }

    /// Whether the aggregated item has a characteristic: set on the item
    /// itself, or assigned by a conditional characteristic that holds for it.
    fn exists(&mut self, characteristic: &Argument, item: Option<&str>) -> ItemResult {
        const SOURCE: &str = "ExistsCondition";
        if self.active.is_none() {
            return ItemResult::failed(SOURCE, "Exists condition requires an aggregation context");
        }

        let direct = self.argument(characteristic);
        if direct.success && direct.value.to_bool() {
            return ItemResult::ok(Value::Bool(true), SOURCE, "characteristic set on item")
                .with_dependencies(vec![direct]);
        }

        let engine = self.engine;
        let date = self.request.reference_date;
        let assigning = item
            .and_then(|i| self.target_sources.get(i))
            .and_then(|source| engine.items.get(source))
            .and_then(|source| source.active_version(date));
        if let Some(ItemVersion {
            kind: ItemKind::ConditionalCharacteristic { condition },
            ..
        }) = assigning
        {
            let verdict = self.condition(condition);
            let holds = verdict.success && verdict.value.to_bool();
            return ItemResult::ok(Value::Bool(holds), SOURCE, "evaluated conditional characteristic")
                .with_dependencies(vec![verdict]);
        }

        ItemResult::ok(Value::Bool(false), SOURCE, "characteristic does not exist")
    }
}

/// Result without its dependency tree, for re-use as an argument.
fn shallow(result: &ItemResult) -> ItemResult {
    ItemResult {
        dependencies: Vec::new(),
        ..result.clone()
    }
}

fn walk(value: &Value, keys: &[String]) -> Value {
    let mut current = value;
    for key in keys {
        match current.as_object().and_then(|o| o.get(key)) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Int(i) => *i == 0,
        Value::Float(f) => *f == 0.0,
        _ => false,
    }
}
