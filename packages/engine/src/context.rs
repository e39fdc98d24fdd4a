//! Value resolution context for one law evaluation
//!
//! Turns a symbolic reference into a concrete value through an ordered
//! fallback chain, recording every step in the trace.
//!
//! # Resolution Priority
//!
//! References are resolved in the following order (first match wins):
//! 1. **Date macros** - `calculation_date`, `year`, `january_first`,
//!    `prev_january_first`
//! 2. **Dot notation** - `root.field.sub` resolves `root`, then walks fields
//! 3. **Claims** - approved (or pending) claims for the subject's BSN
//! 4. **Local scope** - FOREACH bindings
//! 5. **Overwrite definitions** - caller-supplied definition overrides
//! 6. **Definitions** - law-level constants
//! 7. **Parameters** - caller inputs (e.g. BSN)
//! 8. **Outputs** - earlier outputs of this evaluation
//! 9. **Overwrite input** - injected values for cross-law inputs
//! 10. **Sources** - source overrides, then tabular lookups
//! 11. **Cross-law** - evaluation of another law (memoized)
//!
//! Anything unresolved yields `Null`; a declared `required` property that stays
//! unresolved sets the sticky missing-required flag.
//!
//! A context is owned by exactly one evaluation. Its cross-law cache lives and
//! dies with it.

use chrono::{Datelike, NaiveDate};
use std::collections::BTreeMap;

use crate::claims::{Claim, ClaimProvider};
use crate::config;
use crate::data_source::{DataSourceRegistry, Row};
use crate::error::Result;
use crate::operations::{self, ValueResolver};
use crate::rule_spec::{InputSpec, LawReference, Predicate, RuleSpec, SourceReference};
use crate::service::{EvaluationRequest, LawEvaluator};
use crate::trace::{PathNode, TraceBuilder, TraceScope, Traced};
use crate::types::{PathNodeType, ResolveType, Value};

/// Collaborators shared by every evaluation of one service call.
#[derive(Clone, Copy)]
pub struct EvaluationEnv<'a> {
    pub sources: &'a DataSourceRegistry,
    pub claims: Option<&'a dyn ClaimProvider>,
    pub laws: &'a dyn LawEvaluator,
}

/// Memoization key of a cross-law lookup.
///
/// Parameters are stored in canonical text form and sorted by name, so two
/// lookups with the same bindings share an entry regardless of insertion order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey {
    pub law: String,
    pub field: String,
    pub parameters: BTreeMap<String, String>,
    pub reference_date: NaiveDate,
}

impl CacheKey {
    pub fn new(
        law: &str,
        field: &str,
        parameters: &BTreeMap<String, Value>,
        reference_date: NaiveDate,
    ) -> Self {
        Self {
            law: law.to_string(),
            field: field.to_string(),
            parameters: parameters
                .iter()
                .map(|(k, v)| (k.clone(), v.canonical()))
                .collect(),
            reference_date,
        }
    }
}

/// What an evaluation leaves behind once its context is dropped.
#[derive(Debug)]
pub struct ContextOutcome {
    pub outputs: BTreeMap<String, Value>,
    pub resolved_paths: BTreeMap<String, Value>,
    pub missing_required: bool,
    pub trace: Option<PathNode>,
}

/// Per-evaluation mutable state.
pub struct EvaluationContext<'a> {
    spec: &'a RuleSpec,
    request: &'a EvaluationRequest,
    env: EvaluationEnv<'a>,
    /// FOREACH bindings
    local: BTreeMap<String, Value>,
    outputs: BTreeMap<String, Value>,
    claims: BTreeMap<String, Claim>,
    values_cache: BTreeMap<CacheKey, Value>,
    resolved_paths: BTreeMap<String, Value>,
    missing_required: bool,
    trace: TraceBuilder,
}

impl<'a> EvaluationContext<'a> {
    pub fn new(spec: &'a RuleSpec, request: &'a EvaluationRequest, env: EvaluationEnv<'a>) -> Self {
        let claims = match (env.claims, request.parameters.get("BSN").and_then(Value::as_str)) {
            (Some(provider), Some(bsn)) => {
                provider.claims_for(bsn, &spec.service, &spec.law, request.claim_mode)
            }
            _ => BTreeMap::new(),
        };
        if !claims.is_empty() {
            tracing::debug!(law = %spec.law, count = claims.len(), "Claims apply to this evaluation");
        }

        Self {
            spec,
            request,
            env,
            local: BTreeMap::new(),
            outputs: BTreeMap::new(),
            claims,
            values_cache: BTreeMap::new(),
            resolved_paths: BTreeMap::new(),
            missing_required: false,
            trace: TraceBuilder::new(),
        }
    }

    pub fn reference_date(&self) -> NaiveDate {
        self.request.reference_date
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: Value) {
        self.outputs.insert(name.into(), value);
    }

    pub fn outputs(&self) -> &BTreeMap<String, Value> {
        &self.outputs
    }

    pub fn missing_required(&self) -> bool {
        self.missing_required
    }

    pub fn resolved_paths(&self) -> &BTreeMap<String, Value> {
        &self.resolved_paths
    }

    pub fn finish(self) -> ContextOutcome {
        ContextOutcome {
            outputs: self.outputs,
            resolved_paths: self.resolved_paths,
            missing_required: self.missing_required,
            trace: self.trace.build(),
        }
    }

    // -------------------------------------------------------------------------
    // Resolution chain
    // -------------------------------------------------------------------------

    fn resolve_step(&mut self, path: &str) -> Result<(Value, ResolveType)> {
        if let Some(value) = self.date_macro(path) {
            return Ok((value, ResolveType::Context));
        }

        if let Some((root, rest)) = path.split_once('.') {
            let root_value = self.resolve(root)?;
            return Ok((walk_fields(root_value, rest, path), ResolveType::Local));
        }

        if let Some(claim) = self.claims.get(path) {
            tracing::debug!(path = %path, "Resolving from CLAIM");
            return Ok((claim.new_value.clone(), ResolveType::Claim));
        }

        if let Some(value) = self.local.get(path) {
            return Ok((value.clone(), ResolveType::Local));
        }

        if let Some(value) = self.request.overwrite_definitions.get(path) {
            return Ok((value.clone(), ResolveType::OverwriteDefinition));
        }

        if let Some(definition) = self.spec.properties.definitions.get(path) {
            return Ok((definition.value.clone(), ResolveType::Definition));
        }

        if let Some(value) = self.request.parameters.get(path) {
            return Ok((value.clone(), ResolveType::Parameter));
        }

        if let Some(value) = self.outputs.get(path) {
            return Ok((value.clone(), ResolveType::Output));
        }

        let spec = self.spec;
        let input = spec.input(path);

        if let Some(value) = input.and_then(|i| self.overwritten_input(i)) {
            tracing::debug!(path = %path, "Resolving from OVERWRITE");
            return Ok((value, ResolveType::Overwrite));
        }

        if let Some(reference) = spec.source(path).and_then(|s| s.source_reference.as_ref()) {
            if let Some(value) = reference
                .source_type
                .as_ref()
                .and_then(|t| self.request.overwrite_input.get(t))
                .and_then(|fields| fields.get(path))
            {
                tracing::debug!(path = %path, "Resolving from SOURCE OVERRIDE");
                return Ok((value.clone(), ResolveType::SourceOverride));
            }
            if let Some(value) = self.resolve_from_source(path, reference)? {
                if value.is_null() && spec.is_required(path) {
                    tracing::warn!(law = %spec.law, path = %path, "Required source lookup matched no rows");
                    self.missing_required = true;
                }
                return Ok((value, ResolveType::Source));
            }
        }

        if let Some((input, reference)) = input.and_then(|i| i.reference().map(|r| (i, r))) {
            let value = self.resolve_from_law(input, reference)?;
            return Ok((value, ResolveType::Service));
        }

        tracing::warn!(law = %spec.law, path = %path, "Could not resolve value");
        if spec.is_required(path) {
            tracing::warn!(law = %spec.law, path = %path, "This is a missing required value");
            self.missing_required = true;
        }
        Ok((Value::Null, ResolveType::None))
    }

    fn date_macro(&self, path: &str) -> Option<Value> {
        let date = self.reference_date();
        match path {
            "calculation_date" => Some(Value::Date(date)),
            "year" => Some(Value::Int(i64::from(date.year()))),
            "january_first" => NaiveDate::from_ymd_opt(date.year(), 1, 1).map(Value::Date),
            "prev_january_first" => NaiveDate::from_ymd_opt(date.year() - 1, 1, 1).map(Value::Date),
            _ => None,
        }
    }

    fn overwritten_input(&self, input: &InputSpec) -> Option<Value> {
        let key = input.overwrite_key()?;
        let field = &input.reference()?.field;
        self.request.overwrite_input.get(key)?.get(field).cloned()
    }

    // -------------------------------------------------------------------------
    // Sources
    // -------------------------------------------------------------------------

    /// Filter and project a source table. `Ok(None)` when no source carries
    /// the table.
    fn resolve_from_source(&mut self, path: &str, reference: &SourceReference) -> Result<Option<Value>> {
        let Some(table) = reference.table.as_deref() else {
            tracing::warn!(path = %path, "Source reference without table");
            return Ok(None);
        };
        let sources = self.env.sources;
        let Some(found) = sources.table(table) else {
            tracing::warn!(path = %path, table = %table, "Table not found in any data source");
            return Ok(None);
        };

        let mut rows: Vec<&Row> = found.rows.iter().collect();
        for select in &reference.select_on {
            let (expr, membership) = match &select.value {
                Predicate::Equals(expr) => (expr, false),
                Predicate::In(expr) => (expr, true),
            };
            let wanted = operations::evaluate(expr, self)?;
            rows.retain(|row| {
                let cell = row.get(&select.name).unwrap_or(&Value::Null);
                match (&wanted, membership) {
                    (Value::Array(allowed), true) => allowed.iter().any(|a| operations::loosely_equal(cell, a)),
                    (single, _) => operations::loosely_equal(cell, single),
                }
            });
        }

        let projected: Vec<Value> = if let Some(fields) = &reference.fields {
            let missing: Vec<&String> = fields
                .iter()
                .filter(|f| !found.rows.iter().any(|r| r.contains_key(*f)))
                .collect();
            if !missing.is_empty() {
                tracing::warn!(table = %table, fields = ?missing, "Fields not found in source");
            }
            rows.iter()
                .map(|row| {
                    Value::Object(
                        fields
                            .iter()
                            .filter_map(|f| row.get(f).map(|v| (f.clone(), v.clone())))
                            .collect(),
                    )
                })
                .collect()
        } else if let Some(field) = &reference.field {
            if !found.rows.iter().any(|r| r.contains_key(field)) {
                tracing::warn!(table = %table, field = %field, "Field not found in source");
                return Ok(Some(Value::Null));
            }
            rows.iter()
                .map(|row| row.get(field).cloned().unwrap_or_default())
                .collect()
        } else {
            rows.iter().map(|row| Value::Object((*row).clone())).collect()
        };

        tracing::debug!(path = %path, table = %table, rows = projected.len(), "Resolving from SOURCE");
        Ok(Some(collapse(projected)))
    }

    // -------------------------------------------------------------------------
    // Cross-law
    // -------------------------------------------------------------------------

    fn resolve_from_law(&mut self, input: &InputSpec, reference: &LawReference) -> Result<Value> {
        self.check_deadline()?;

        let mut parameters = self.request.parameters.clone();
        for parameter in &reference.parameters {
            let value = operations::evaluate(&parameter.reference, self)?;
            parameters.insert(parameter.name.clone(), value);
        }

        let mut reference_date = self.reference_date();
        if let Some(expr) = input.temporal.as_ref().and_then(|t| t.reference.as_ref()) {
            match operations::evaluate(expr, self)?.as_date() {
                Some(date) => reference_date = date,
                None => tracing::warn!(
                    input = %input.name,
                    "Temporal reference is not a date, using the calculation date"
                ),
            }
        }

        let key = CacheKey::new(&reference.law, &reference.field, &parameters, reference_date);
        if let Some(value) = self.values_cache.get(&key) {
            tracing::debug!(law = %reference.law, field = %reference.field, "Resolving from CACHE");
            return Ok(value.clone());
        }

        let request = self.request;
        let laws = self.env.laws;
        let sub_request = request.sub_request(&reference.law, reference_date, parameters, &reference.field);

        let mut scope = TraceScope::enter(
            self,
            format!("{}.{}", reference.law, reference.field),
            PathNodeType::CrossLaw,
        );
        scope.trace.set_detail("law", reference.law.as_str());
        scope.trace.set_detail("reference_date", Value::Date(reference_date));

        tracing::debug!(law = %reference.law, field = %reference.field, "Evaluating referenced law");
        let value = match laws.evaluate_law(&sub_request) {
            Ok(result) => {
                let value = result.output.get(&reference.field).cloned().unwrap_or_default();
                scope.missing_required |= result.missing_required;
                if let Some(trace) = result.trace {
                    scope.trace.attach(trace);
                }
                value
            }
            Err(e) if e.is_not_found() => {
                tracing::warn!(law = %reference.law, error = %e, "Referenced law not available");
                Value::Null
            }
            Err(e) => return Err(e),
        };

        scope.trace.set_result(value.clone());
        scope.values_cache.insert(key, value.clone());
        Ok(value)
    }
}

impl Traced for EvaluationContext<'_> {
    fn trace_mut(&mut self) -> &mut TraceBuilder {
        &mut self.trace
    }
}

impl ValueResolver for EvaluationContext<'_> {
    fn resolve(&mut self, path: &str) -> Result<Value> {
        let value = {
            let mut scope = TraceScope::enter(self, path, PathNodeType::Resolve);
            let (value, resolve_type) = scope.resolve_step(path)?;
            tracing::debug!(path = %path, source = resolve_type.as_str(), value = %value.canonical(), "Resolved");
            scope.trace.set_result(value.clone());
            scope.trace.set_resolve_type(resolve_type);
            value
        };
        self.resolved_paths.insert(path.to_string(), value.clone());
        Ok(value)
    }

    fn check_deadline(&self) -> Result<()> {
        self.request.deadline.check()
    }

    fn mark_missing_required(&mut self) {
        self.missing_required = true;
    }

    fn local_scope(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.local
    }
}

/// Walk `rest` (dot separated) into `value`. A `Null` anywhere aborts the walk.
fn walk_fields(mut value: Value, rest: &str, path: &str) -> Value {
    for (depth, field) in rest.split('.').enumerate() {
        if depth >= config::MAX_PROPERTY_DEPTH {
            tracing::warn!(path = %path, "Property path too deep");
            return Value::Null;
        }
        value = match value {
            Value::Null => {
                tracing::warn!(path = %path, "Value is None, could not resolve");
                return Value::Null;
            }
            Value::Object(mut map) => map.remove(field).unwrap_or_default(),
            Value::Date(date) => match field {
                "year" => Value::Int(i64::from(date.year())),
                "month" => Value::Int(i64::from(date.month())),
                "day" => Value::Int(i64::from(date.day())),
                _ => Value::Null,
            },
            Value::Array(mut items) => match field.parse::<usize>() {
                Ok(i) if i < items.len() => items.swap_remove(i),
                _ => Value::Null,
            },
            other => {
                tracing::warn!(path = %path, value = other.type_name(), "Value has no fields");
                return Value::Null;
            }
        };
    }
    value
}

/// Rows -> result: none gives `Null`, one gives the row, identical scalars
/// collapse to one, otherwise a list.
fn collapse(mut values: Vec<Value>) -> Value {
    match values.len() {
        0 => Value::Null,
        1 => values.swap_remove(0),
        _ => {
            let scalar = |v: &Value| !matches!(v, Value::Array(_) | Value::Object(_));
            if values.iter().all(scalar) && values.iter().all(|v| v == &values[0]) {
                values.swap_remove(0)
            } else {
                Value::Array(values)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::claims::{ClaimMode, ClaimStatus, InMemoryClaims};
    use crate::data_source::TableDataSource;
    use crate::error::EngineError;
    use crate::rule_spec::Specification;
    use crate::service::EvaluationResult;
    use std::cell::RefCell;

    /// Law evaluator double: answers every request with fixed outputs and
    /// records the requests it saw.
    struct StubLaws {
        output: BTreeMap<String, Value>,
        calls: RefCell<Vec<EvaluationRequest>>,
    }

    impl StubLaws {
        fn new(pairs: &[(&str, Value)]) -> Self {
            Self {
                output: pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
                calls: RefCell::new(Vec::new()),
            }
        }
    }

    impl LawEvaluator for StubLaws {
        fn evaluate_law(&self, request: &EvaluationRequest) -> Result<EvaluationResult> {
            self.calls.borrow_mut().push(request.clone());
            if request.law == "unknown_law" {
                return Err(EngineError::NoRulesForLaw {
                    law: request.law.clone(),
                    service: None,
                });
            }
            Ok(EvaluationResult {
                output: self.output.clone(),
                requirements_met: true,
                missing_required: false,
                input: BTreeMap::new(),
                trace: None,
                rulespec_uuid: "stub".to_string(),
                law: request.law.clone(),
                reference_date: request.reference_date,
            })
        }
    }

    const SPEC: &str = r#"
uuid: ctx-test
law: test_law
valid_from: 2023-01-01
service: TOESLAGEN
properties:
  parameters:
    - name: BSN
      type: string
      required: true
  sources:
    - name: income
      type: amount
      required: true
      source_reference:
        source_type: belastingdienst
        table: personen
        field: income
        select_on:
          - name: bsn
            value: $BSN
    - name: children
      source_reference:
        table: kinderen
        fields: [name, age]
        select_on:
          - name: parent
            value: $BSN
    - name: country
      source_reference:
        table: personen
        field: country
  input:
    - name: premie
      type: amount
      external_reference:
        law: regeling_standaardpremie
        field: standaardpremie
    - name: partner_premie
      external_reference:
        law: regeling_standaardpremie
        field: standaardpremie
        parameters:
          - name: BSN
            reference: $partner_bsn
    - name: missing_law_value
      external_reference:
        law: unknown_law
        field: x
  definitions:
    percentage: 0.05
    grens:
      value: 100
      legal_basis: {article: '1'}
  output:
    - name: result
"#;

    fn spec() -> RuleSpec {
        match Specification::from_yaml_str(SPEC).unwrap() {
            Specification::Rule(spec) => spec,
            Specification::Nrml(_) => panic!("expected rule spec"),
        }
    }

    fn registry() -> DataSourceRegistry {
        let json = serde_json::json!({
            "personen": [
                {"bsn": "111", "income": 1800000},
                {"bsn": "222", "income": 2500000}
            ],
            "kinderen": [
                {"parent": "111", "name": "Anna", "age": 4},
                {"parent": "111", "name": "Bram", "age": 9},
                {"parent": "222", "name": "Cas", "age": 2}
            ]
        });
        let mut registry = DataSourceRegistry::new();
        registry.add_source(Box::new(
            TableDataSource::from_json("belastingdienst", 0, &json).unwrap(),
        ));
        registry
    }

    fn request(bsn: &str) -> EvaluationRequest {
        EvaluationRequest::new("test_law", NaiveDate::from_ymd_opt(2023, 5, 17).unwrap())
            .with_parameter("BSN", bsn)
    }

    fn env<'a>(sources: &'a DataSourceRegistry, laws: &'a StubLaws) -> EvaluationEnv<'a> {
        EvaluationEnv {
            sources,
            claims: None,
            laws,
        }
    }

    #[test]
    fn test_date_macros() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("111");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));

        assert_eq!(ctx.resolve("year").unwrap(), Value::Int(2023));
        assert_eq!(
            ctx.resolve("january_first").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2023, 1, 1).unwrap())
        );
        assert_eq!(
            ctx.resolve("prev_january_first").unwrap(),
            Value::Date(NaiveDate::from_ymd_opt(2022, 1, 1).unwrap())
        );
        assert_eq!(ctx.resolve("calculation_date.month").unwrap(), Value::Int(5));
    }

    #[test]
    fn test_definitions_parameters_and_overrides() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("111").with_overwrite_definitions(
            [("percentage".to_string(), Value::Float(0.07))].into_iter().collect(),
        );
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));

        assert_eq!(ctx.resolve("percentage").unwrap(), Value::Float(0.07));
        assert_eq!(ctx.resolve("grens").unwrap(), Value::Int(100));
        assert_eq!(ctx.resolve("BSN").unwrap(), Value::from("111"));
    }

    #[test]
    fn test_local_scope_wins_over_parameters() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("111");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        ctx.local_scope().insert("BSN".to_string(), Value::from("local"));
        assert_eq!(ctx.resolve("BSN").unwrap(), Value::from("local"));
    }

    #[test]
    fn test_source_field_lookup() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("222");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        assert_eq!(ctx.resolve("income").unwrap(), Value::Int(2_500_000));
        assert!(!ctx.missing_required());
        assert_eq!(ctx.resolved_paths()["income"], Value::Int(2_500_000));
    }

    #[test]
    fn test_source_fields_projection() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("111");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        let Value::Array(children) = ctx.resolve("children").unwrap() else {
            panic!("expected a list of records");
        };
        assert_eq!(children.len(), 2);
        assert_eq!(ctx.resolve("children.0.name").unwrap(), Value::from("Anna"));
    }

    #[test]
    fn test_missing_row_sets_missing_required() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("999");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        // Optional source: no matching row yields None without the flag
        assert_eq!(ctx.resolve("country").unwrap(), Value::Null);
        assert!(!ctx.missing_required());

        // Required source: no matching row marks the evaluation incomplete
        assert_eq!(ctx.resolve("income").unwrap(), Value::Null);
        assert!(ctx.missing_required());
    }

    #[test]
    fn test_unresolved_required_sets_flag() {
        let (spec, laws) = (spec(), StubLaws::new(&[]));
        let sources = DataSourceRegistry::new();
        let request = request("111");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        assert_eq!(ctx.resolve("income").unwrap(), Value::Null);
        assert!(ctx.missing_required());
    }

    #[test]
    fn test_source_override() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "belastingdienst".to_string(),
            [("income".to_string(), Value::Int(42))].into_iter().collect(),
        );
        let request = request("111").with_overwrite_input(overrides);
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        assert_eq!(ctx.resolve("income").unwrap(), Value::Int(42));
    }

    #[test]
    fn test_input_overwrite_skips_law_call() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "regeling_standaardpremie".to_string(),
            [("standaardpremie".to_string(), Value::Int(200_000))].into_iter().collect(),
        );
        let request = request("111").with_overwrite_input(overrides);
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        assert_eq!(ctx.resolve("premie").unwrap(), Value::Int(200_000));
        assert!(laws.calls.borrow().is_empty());
    }

    #[test]
    fn test_cross_law_memoized() {
        let (spec, sources) = (spec(), registry());
        let laws = StubLaws::new(&[("standaardpremie", Value::Int(188_900))]);
        let request = request("111");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));

        assert_eq!(ctx.resolve("premie").unwrap(), Value::Int(188_900));
        assert_eq!(ctx.resolve("premie").unwrap(), Value::Int(188_900));
        assert_eq!(laws.calls.borrow().len(), 1);

        let call = &laws.calls.borrow()[0];
        assert_eq!(call.law, "regeling_standaardpremie");
        assert_eq!(call.requested_output.as_deref(), Some("standaardpremie"));
        assert_eq!(call.call_chain, vec!["test_law#*".to_string()]);
    }

    #[test]
    fn test_cross_law_parameters_change_cache_key() {
        let (spec, sources) = (spec(), registry());
        let laws = StubLaws::new(&[("standaardpremie", Value::Int(1))]);
        let request = request("111").with_parameter("partner_bsn", "222");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));

        ctx.resolve("premie").unwrap();
        ctx.resolve("partner_premie").unwrap();
        let calls = laws.calls.borrow();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[1].parameters["BSN"], Value::from("222"));
    }

    #[test]
    fn test_unknown_law_degrades_to_null() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("111");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        assert_eq!(ctx.resolve("missing_law_value").unwrap(), Value::Null);
    }

    #[test]
    fn test_claims_take_precedence() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let claims: InMemoryClaims = vec![Claim {
            bsn: "111".to_string(),
            service: "TOESLAGEN".to_string(),
            law: "test_law".to_string(),
            key: "income".to_string(),
            new_value: Value::Int(1),
            old_value: None,
            status: ClaimStatus::Pending,
            reason: None,
        }]
        .into_iter()
        .collect();
        let env = EvaluationEnv {
            sources: &sources,
            claims: Some(&claims),
            laws: &laws,
        };

        let approved_only = request("111");
        let mut ctx = EvaluationContext::new(&spec, &approved_only, env);
        assert_eq!(ctx.resolve("income").unwrap(), Value::Int(1_800_000));

        let with_pending = request("111").with_claim_mode(ClaimMode::IncludePending);
        let mut ctx = EvaluationContext::new(&spec, &with_pending, env);
        assert_eq!(ctx.resolve("income").unwrap(), Value::Int(1));
    }

    #[test]
    fn test_trace_records_resolve_type() {
        let (spec, sources, laws) = (spec(), registry(), StubLaws::new(&[]));
        let request = request("111");
        let mut ctx = EvaluationContext::new(&spec, &request, env(&sources, &laws));
        ctx.resolve("income").unwrap();
        let trace = ctx.finish().trace.unwrap();
        assert_eq!(trace.name, "income");
        assert_eq!(trace.resolve_type, Some(ResolveType::Source));
        // The select_on reference is a child resolution
        assert_eq!(trace.children[0].name, "BSN");
    }

    #[test]
    fn test_collapse() {
        assert_eq!(collapse(vec![]), Value::Null);
        assert_eq!(collapse(vec![Value::Int(1)]), Value::Int(1));
        assert_eq!(collapse(vec![Value::Int(5), Value::Int(5)]), Value::Int(5));
        assert_eq!(
            collapse(vec![Value::Int(5), Value::Int(6)]),
            Value::Array(vec![Value::Int(5), Value::Int(6)])
        );
    }
}
