//! Law evaluation engine
//!
//! Evaluates one rule-dialect law version: checks its requirements, then runs
//! its actions in dependency order, producing outputs, the resolved inputs and
//! an audit trace.
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::{EvaluationRequest, RulesEngine, Specification};
//!
//! let spec = Specification::from_yaml_str(yaml)?;
//! let engine = RulesEngine::new(spec.as_rule().unwrap().clone());
//!
//! let request = EvaluationRequest::new("zorgtoeslagwet", date).with_parameter("BSN", "999993653");
//! let result = engine.evaluate(&request, env)?;
//! println!("Output: {:?}", result.output);
//! ```

use std::collections::BTreeSet;

use crate::context::{EvaluationContext, EvaluationEnv};
use crate::error::{EngineError, Result};
use crate::graph::DependencyGraph;
use crate::operations::{self, ValueResolver};
use crate::rule_spec::{Action, Requirement, RuleSpec};
use crate::service::{EvaluationRequest, EvaluationResult};
use crate::trace::{TraceScope, Traced};
use crate::types::{PathNodeType, Value};

/// Executes a single law version.
///
/// The engine is immutable after construction and can be shared between
/// evaluations; all per-evaluation state lives in [`EvaluationContext`].
#[derive(Debug)]
pub struct RulesEngine {
    spec: RuleSpec,
    /// Action outputs and the outputs each action references
    actions: DependencyGraph,
}

impl RulesEngine {
    pub fn new(spec: RuleSpec) -> Self {
        let mut actions = DependencyGraph::new();
        for action in spec.actions() {
            let mut references = BTreeSet::new();
            action.expr.collect_references(&mut references);
            references.remove(&action.output);
            actions.add_node(action.output.clone(), references);
        }
        Self { spec, actions }
    }

    pub fn spec(&self) -> &RuleSpec {
        &self.spec
    }

    /// Evaluate the law for one request.
    ///
    /// # Returns
    /// * `Ok(EvaluationResult)` - also when requirements are not met or data is
    ///   missing; `requirements_met` and `missing_required` carry the verdict
    /// * `Err(EngineError)` - on action cycles, unknown requested output,
    ///   depth limits or an expired deadline
    pub fn evaluate(&self, request: &EvaluationRequest, env: EvaluationEnv<'_>) -> Result<EvaluationResult> {
        let spec = &self.spec;
        for parameter in spec.properties.parameters.iter().filter(|p| p.required) {
            if !request.parameters.contains_key(&parameter.name) {
                tracing::warn!(law = %spec.law, parameter = %parameter.name, "Required parameter not provided");
            }
        }

        let order = self.action_order(request.requested_output.as_deref())?;

        let mut context = EvaluationContext::new(spec, request, env);
        let requirements_met = {
            let mut scope = TraceScope::enter(&mut context, spec.law.as_str(), PathNodeType::Evaluation);
            scope.trace_mut().set_detail("reference_date", Value::Date(request.reference_date));
            if !spec.uuid.is_empty() {
                scope.trace_mut().set_detail("uuid", spec.uuid.as_str());
            }

            let requirements_met = self.check_requirements(&mut scope)?;
            if requirements_met {
                self.execute_actions(&order, request, &mut scope)?;
            }
            requirements_met
        };

        let outcome = context.finish();
        let mut output = outcome.outputs;
        let missing_required = outcome.missing_required;
        if missing_required {
            tracing::warn!(law = %spec.law, "Missing required values, outputs cleared");
            output.clear();
        }

        Ok(EvaluationResult {
            output,
            requirements_met: requirements_met && !missing_required,
            missing_required,
            input: outcome.resolved_paths,
            trace: outcome.trace,
            rulespec_uuid: spec.uuid.clone(),
            law: spec.law.clone(),
            reference_date: request.reference_date,
        })
    }

    // -------------------------------------------------------------------------
    // Requirements
    // -------------------------------------------------------------------------

    fn check_requirements(&self, ctx: &mut EvaluationContext<'_>) -> Result<bool> {
        if self.spec.requirements.is_empty() {
            return Ok(true);
        }
        let mut scope = TraceScope::enter(ctx, "requirements", PathNodeType::Requirement);
        let met = check_all(&self.spec.requirements, &mut scope)?;
        scope.trace_mut().set_result(Value::Bool(met));
        tracing::debug!(law = %self.spec.law, met, "Requirements evaluated");
        Ok(met)
    }

    // -------------------------------------------------------------------------
    // Actions
    // -------------------------------------------------------------------------

    fn action_order(&self, requested_output: Option<&str>) -> Result<Vec<String>> {
        match requested_output {
            None => self.actions.topological_order(),
            Some(output) => {
                if !self.actions.contains(output) {
                    return Err(EngineError::OutputNotFound {
                        law: self.spec.law.clone(),
                        output: output.to_string(),
                    });
                }
                let needed = self.actions.closure([output]);
                self.actions.subgraph(&needed).topological_order()
            }
        }
    }

    fn execute_actions(
        &self,
        order: &[String],
        request: &EvaluationRequest,
        ctx: &mut EvaluationContext<'_>,
    ) -> Result<()> {
        for output in order {
            let Some(action) = self.find_action(output) else {
                continue;
            };
            ctx.check_deadline()?;

            let value = {
                let mut scope = TraceScope::enter(&mut *ctx, output.as_str(), PathNodeType::Action);
                let value = self.evaluate_action(action, request, &mut scope)?;
                scope.trace_mut().set_result(value.clone());
                value
            };
            tracing::debug!(law = %self.spec.law, output = %output, value = %value.canonical(), "Action evaluated");
            ctx.set_output(output.clone(), value);

            if ctx.missing_required() {
                tracing::warn!(law = %self.spec.law, output = %output, "Stopping after missing required value");
                break;
            }
        }
        Ok(())
    }

    fn evaluate_action(
        &self,
        action: &Action,
        request: &EvaluationRequest,
        ctx: &mut EvaluationContext<'_>,
    ) -> Result<Value> {
        let overwritten = request
            .overwrite_input
            .get(&self.spec.service)
            .and_then(|fields| fields.get(&action.output));
        let raw = match overwritten {
            Some(value) => {
                tracing::debug!(output = %action.output, "Action output overwritten");
                value.clone()
            }
            None => operations::evaluate(&action.expr, ctx)?,
        };

        let type_spec = self.spec.output(&action.output).and_then(|o| o.effective_type_spec());
        Ok(match type_spec {
            Some(type_spec) => type_spec.enforce(raw),
            None => raw,
        })
    }

    fn find_action(&self, output: &str) -> Option<&Action> {
        self.spec.actions().iter().find(|a| a.output == output)
    }
}

/// Every requirement holds; stops at the first failure or missing value.
fn check_all(requirements: &[Requirement], ctx: &mut EvaluationContext<'_>) -> Result<bool> {
    for requirement in requirements {
        if !check_requirement(requirement, ctx)? || ctx.missing_required() {
            return Ok(false);
        }
    }
    Ok(true)
}

fn check_requirement(requirement: &Requirement, ctx: &mut EvaluationContext<'_>) -> Result<bool> {
    match requirement {
        Requirement::All(children) => check_all(children, ctx),
        Requirement::Or(children) => {
            for child in children {
                if check_requirement(child, ctx)? {
                    return Ok(true);
                }
                if ctx.missing_required() {
                    break;
                }
            }
            Ok(false)
        }
        Requirement::Check(expr) => Ok(holds(&operations::evaluate(expr, ctx)?)),
    }
}

/// Requirement truthiness: true, non-zero or any other non-null value.
fn holds(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(i) => *i != 0,
        Value::Float(f) => *f != 0.0,
        _ => true,
    }
}
