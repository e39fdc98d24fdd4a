//! Rule specification documents
//!
//! Handles parsing of law specification files. A document is either an
//! operation-tree [`RuleSpec`] or, when it carries a top-level `facts` key, a
//! graph-based [`NrmlDocument`]. Both are wrapped in [`Specification`].
//!
//! Operation trees inside a `RuleSpec` are converted into the closed
//! [`Expr`] AST while deserializing, so a malformed document is rejected at
//! load time instead of halfway through an evaluation.
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::Specification;
//!
//! let spec = Specification::from_yaml_str(yaml)?;
//! assert_eq!(spec.law(), "zorgtoeslagwet");
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer};
use std::collections::BTreeMap;
use std::path::Path;

use crate::ast::Expr;
use crate::config;
use crate::error::{EngineError, Result};
use crate::nrml::NrmlDocument;
use crate::type_spec::TypeSpec;
use crate::types::Value;

// =============================================================================
// Specification
// =============================================================================

/// A loaded specification in either dialect.
#[derive(Debug, Clone)]
pub enum Specification {
    Rule(RuleSpec),
    Nrml(NrmlDocument),
}

impl Specification {
    /// Parse a raw (possibly patched) document.
    pub fn from_json(raw: serde_json::Value) -> Result<Self> {
        if raw.get("facts").is_some() {
            let doc: NrmlDocument = serde_json::from_value(raw)?;
            doc.validate()?;
            return Ok(Specification::Nrml(doc));
        }
        let spec: RuleSpec = serde_json::from_value(raw)?;
        Ok(Specification::Rule(spec.normalized()))
    }

    /// Parse a YAML document, enforcing the document size limit.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Self::from_json(raw_from_yaml(yaml)?)
    }

    pub fn law(&self) -> &str {
        match self {
            Specification::Rule(s) => &s.law,
            Specification::Nrml(d) => &d.law,
        }
    }

    pub fn uuid(&self) -> &str {
        match self {
            Specification::Rule(s) => &s.uuid,
            Specification::Nrml(d) => &d.uuid,
        }
    }

    pub fn service(&self) -> &str {
        match self {
            Specification::Rule(s) => &s.service,
            Specification::Nrml(d) => &d.service,
        }
    }

    pub fn valid_from(&self) -> NaiveDate {
        match self {
            Specification::Rule(s) => s.valid_from,
            Specification::Nrml(d) => d.valid_from,
        }
    }

    pub fn discoverable(&self) -> Option<&str> {
        match self {
            Specification::Rule(s) => s.discoverable.as_deref(),
            Specification::Nrml(d) => d.discoverable.as_deref(),
        }
    }

    pub fn discovery(&self) -> &[Discovery] {
        match self {
            Specification::Rule(s) => &s.discovery,
            Specification::Nrml(d) => &d.discovery,
        }
    }

    /// Public output names.
    pub fn output_names(&self) -> Vec<String> {
        match self {
            Specification::Rule(s) => s.properties.output.iter().map(|o| o.name.clone()).collect(),
            Specification::Nrml(d) => d.outputs.keys().cloned().collect(),
        }
    }

    pub fn as_rule(&self) -> Option<&RuleSpec> {
        match self {
            Specification::Rule(s) => Some(s),
            Specification::Nrml(_) => None,
        }
    }
}

/// Read a YAML document into a generic JSON tree (the form patches operate on).
pub fn raw_from_yaml(yaml: &str) -> Result<serde_json::Value> {
    if yaml.len() > config::MAX_YAML_SIZE {
        return Err(EngineError::LoadError(format!(
            "Document exceeds maximum size of {} bytes",
            config::MAX_YAML_SIZE
        )));
    }
    Ok(serde_yaml_ng::from_str(yaml)?)
}

/// Read a YAML or JSON file into a generic JSON tree.
pub fn raw_from_file(path: &Path) -> Result<serde_json::Value> {
    let content = std::fs::read_to_string(path)?;
    if path.extension().is_some_and(|ext| ext == "json") {
        if content.len() > config::MAX_YAML_SIZE {
            return Err(EngineError::LoadError(format!(
                "{} exceeds maximum size of {} bytes",
                path.display(),
                config::MAX_YAML_SIZE
            )));
        }
        return Ok(serde_json::from_str(&content)?);
    }
    raw_from_yaml(&content)
}

// =============================================================================
// RuleSpec
// =============================================================================

/// An operation-tree law specification, valid from a given date.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleSpec {
    #[serde(default)]
    pub uuid: String,
    #[serde(default)]
    pub name: String,
    pub law: String,
    #[serde(default)]
    pub law_type: Option<String>,
    #[serde(default)]
    pub legal_character: Option<String>,
    #[serde(default)]
    pub decision_type: Option<String>,
    pub valid_from: NaiveDate,
    #[serde(default)]
    pub service: String,
    #[serde(default)]
    pub discoverable: Option<String>,
    #[serde(default)]
    pub discovery: Vec<Discovery>,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub requirements: Vec<Requirement>,
    /// Top-level actions; merged into `properties.actions` after parsing
    #[serde(default)]
    actions: Vec<Action>,
}

impl RuleSpec {
    fn normalized(mut self) -> Self {
        let top_level = std::mem::take(&mut self.actions);
        self.properties.actions.extend(top_level);
        self
    }

    pub fn actions(&self) -> &[Action] {
        &self.properties.actions
    }

    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.properties.output.iter().find(|o| o.name == name)
    }

    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.properties.input.iter().find(|i| i.name == name)
    }

    pub fn source(&self, name: &str) -> Option<&SourceSpec> {
        self.properties.sources.iter().find(|s| s.name == name)
    }

    pub fn parameter(&self, name: &str) -> Option<&ParameterSpec> {
        self.properties.parameters.iter().find(|p| p.name == name)
    }

    /// Whether `name` is a declared property marked `required`.
    pub fn is_required(&self, name: &str) -> bool {
        self.parameter(name).is_some_and(|p| p.required)
            || self.source(name).is_some_and(|s| s.required)
            || self.input(name).is_some_and(|i| i.required)
    }
}

/// Discovery metadata used by authorization lookups.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Discovery {
    pub purpose: String,
    pub target_type: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub legal_basis: Option<String>,
    #[serde(default)]
    pub actor_param: Option<String>,
    #[serde(default)]
    pub target_param: Option<String>,
    #[serde(default)]
    pub output_field: Option<String>,
    #[serde(default)]
    pub scope_field: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Properties {
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    #[serde(default)]
    pub sources: Vec<SourceSpec>,
    #[serde(default)]
    pub input: Vec<InputSpec>,
    #[serde(default)]
    pub output: Vec<OutputSpec>,
    #[serde(default)]
    pub definitions: BTreeMap<String, Definition>,
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// Caller-supplied parameter
#[derive(Debug, Clone, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
}

/// Tabular source lookup
#[derive(Debug, Clone, Deserialize)]
pub struct SourceSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub source_reference: Option<SourceReference>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SourceReference {
    /// Key into `overwrite_input` for source overrides
    #[serde(default)]
    pub source_type: Option<String>,
    #[serde(default)]
    pub table: Option<String>,
    #[serde(default)]
    pub field: Option<String>,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    #[serde(default)]
    pub select_on: Vec<SelectOn>,
}

/// Row filter of a source lookup.
#[derive(Debug, Clone, Deserialize)]
pub struct SelectOn {
    /// Column to filter on
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    pub value: Predicate,
}

/// Comparator of a [`SelectOn`] filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    /// Column equals the resolved value
    Equals(Expr),
    /// Column is one of the resolved values (`{operation: IN, values: ...}`)
    In(Expr),
}

impl<'de> Deserialize<'de> for Predicate {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        if let Value::Object(map) = &raw {
            if map.get("operation").and_then(Value::as_str) == Some("IN") {
                let values = map
                    .get("values")
                    .cloned()
                    .ok_or_else(|| serde::de::Error::custom("IN filter requires 'values'"))?;
                return Expr::from_value(values)
                    .map(Predicate::In)
                    .map_err(serde::de::Error::custom);
            }
        }
        Expr::from_value(raw)
            .map(Predicate::Equals)
            .map_err(serde::de::Error::custom)
    }
}

/// Value obtained by evaluating another law
#[derive(Debug, Clone, Deserialize)]
pub struct InputSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub external_reference: Option<LawReference>,
    /// Older form of `external_reference`; its `service` only keys overrides
    #[serde(default)]
    pub service_reference: Option<LawReference>,
    #[serde(default)]
    pub temporal: Option<Temporal>,
}

impl InputSpec {
    pub fn reference(&self) -> Option<&LawReference> {
        self.external_reference
            .as_ref()
            .or(self.service_reference.as_ref())
    }

    /// Outer key of `overwrite_input` for this input.
    pub fn overwrite_key(&self) -> Option<&str> {
        match (&self.external_reference, &self.service_reference) {
            (Some(ext), _) => Some(&ext.law),
            (None, Some(svc)) => svc.service.as_deref().or(Some(&svc.law)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LawReference {
    #[serde(default)]
    pub service: Option<String>,
    pub law: String,
    pub field: String,
    #[serde(default)]
    pub parameters: Vec<ReferenceParameter>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReferenceParameter {
    pub name: String,
    pub reference: Expr,
}

/// Temporal qualifier of an input or output.
#[derive(Debug, Clone, Deserialize)]
pub struct Temporal {
    #[serde(default, rename = "type")]
    pub kind: Option<String>,
    #[serde(default)]
    pub period_type: Option<String>,
    /// Date at which the referenced law is evaluated
    #[serde(default)]
    pub reference: Option<Expr>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OutputSpec {
    pub name: String,
    #[serde(default, rename = "type")]
    pub value_type: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub type_spec: Option<TypeSpec>,
    #[serde(default)]
    pub temporal: Option<Temporal>,
}

impl OutputSpec {
    /// `type_spec` with the output's own `type` filled in.
    pub fn effective_type_spec(&self) -> Option<TypeSpec> {
        let own = TypeSpec {
            value_type: self.value_type.clone(),
            ..TypeSpec::default()
        };
        match &self.type_spec {
            Some(spec) => Some(spec.clone().merged_with(&own)),
            None if own.has_constraints() => Some(own),
            None => None,
        }
    }
}

// =============================================================================
// Definitions, requirements and actions
// =============================================================================

/// Law-level constant. `{value, legal_basis}` is unwrapped to its value.
#[derive(Debug, Clone, PartialEq)]
pub struct Definition {
    pub value: Value,
    pub legal_basis: Option<Value>,
}

impl<'de> Deserialize<'de> for Definition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        match raw {
            Value::Object(mut map) if map.contains_key("value") && map.contains_key("legal_basis") => {
                Ok(Definition {
                    value: map.remove("value").unwrap_or_default(),
                    legal_basis: map.remove("legal_basis"),
                })
            }
            other => Ok(Definition {
                value: other,
                legal_basis: None,
            }),
        }
    }
}

/// Requirement tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Requirement {
    All(Vec<Requirement>),
    Or(Vec<Requirement>),
    Check(Expr),
}

impl Requirement {
    fn from_value(raw: Value) -> std::result::Result<Self, String> {
        if let Value::Object(map) = &raw {
            if map.len() == 1 {
                let kinds: [(&str, fn(Vec<Requirement>) -> Requirement); 2] =
                    [("all", Requirement::All), ("or", Requirement::Or)];
                for (key, wrap) in kinds {
                    if let Some(children) = map.get(key) {
                        let Value::Array(items) = children else {
                            return Err(format!("'{}' requirement must be a list", key));
                        };
                        return items
                            .iter()
                            .cloned()
                            .map(Requirement::from_value)
                            .collect::<std::result::Result<Vec<_>, _>>()
                            .map(wrap);
                    }
                }
            }
        }
        Expr::from_value(raw).map(Requirement::Check)
    }
}

impl<'de> Deserialize<'de> for Requirement {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = Value::deserialize(deserializer)?;
        Requirement::from_value(raw).map_err(serde::de::Error::custom)
    }
}

/// Computation of one output: `{output, value}` or `{output, operation, ...}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Action {
    pub output: String,
    pub expr: Expr,
    pub legal_basis: Option<Value>,
}

impl<'de> Deserialize<'de> for Action {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error;

        let raw = Value::deserialize(deserializer)?;
        let Value::Object(mut map) = raw else {
            return Err(D::Error::custom("action must be a map"));
        };
        let output = match map.remove("output") {
            Some(Value::String(s)) => s,
            _ => return Err(D::Error::custom("action requires an 'output' name")),
        };
        let legal_basis = map.remove("legal_basis");

        let expr = if map.contains_key("operation") {
            Expr::from_value(Value::Object(map))
        } else if let Some(value) = map.remove("value") {
            Expr::from_value(value)
        } else {
            Err(format!("action '{}' has neither value nor operation", output))
        }
        .map_err(D::Error::custom)?;

        Ok(Action {
            output,
            expr,
            legal_basis,
        })
    }
}
