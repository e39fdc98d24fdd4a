//! Service layer for law evaluation
//!
//! Provides the [`LawEvaluator`] contract used for cross-law composition and
//! the [`LawExecutionService`] implementation that ties the resolver, data
//! sources, claims and a per-version engine cache together.
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::{EvaluationRequest, LawExecutionService};
//!
//! let mut service = LawExecutionService::new();
//! service.load_law(zorgtoeslagwet_yaml)?;
//! service.load_law(regeling_standaardpremie_yaml)?;
//!
//! // Cross-law references are resolved through the service itself
//! let request = EvaluationRequest::new("zorgtoeslagwet", date).with_parameter("BSN", "999993653");
//! let result = service.evaluate(&request)?;
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::claims::{ClaimMode, ClaimProvider};
use crate::config;
use crate::context::EvaluationEnv;
use crate::data_source::{DataSource, DataSourceRegistry};
use crate::deadline::Deadline;
use crate::engine::RulesEngine;
use crate::error::{EngineError, Result};
use crate::nrml::NrmlEngine;
use crate::resolver::RuleResolver;
use crate::rule_spec::Specification;
use crate::trace::PathNode;
use crate::types::Value;

// =============================================================================
// Request and result
// =============================================================================

/// One evaluation of one law at one reference date.
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluationRequest {
    pub law: String,
    pub reference_date: NaiveDate,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    /// Injected values: `service or source type -> field -> value`
    #[serde(default)]
    pub overwrite_input: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(default)]
    pub overwrite_definitions: BTreeMap<String, Value>,
    /// Evaluate only this output (and what it depends on)
    #[serde(default)]
    pub requested_output: Option<String>,
    /// Disambiguates laws that share a name across services
    #[serde(default)]
    pub service: Option<String>,
    #[serde(default)]
    pub claim_mode: ClaimMode,
    #[serde(skip)]
    pub deadline: Deadline,
    /// `law#output` keys of the evaluations this one is nested in
    #[serde(skip)]
    pub call_chain: Vec<String>,
}

impl EvaluationRequest {
    pub fn new(law: impl Into<String>, reference_date: NaiveDate) -> Self {
        Self {
            law: law.into(),
            reference_date,
            parameters: BTreeMap::new(),
            overwrite_input: BTreeMap::new(),
            overwrite_definitions: BTreeMap::new(),
            requested_output: None,
            service: None,
            claim_mode: ClaimMode::default(),
            deadline: Deadline::none(),
            call_chain: Vec::new(),
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_parameters(mut self, parameters: BTreeMap<String, Value>) -> Self {
        self.parameters.extend(parameters);
        self
    }

    pub fn with_overwrite_input(mut self, overwrite: BTreeMap<String, BTreeMap<String, Value>>) -> Self {
        self.overwrite_input = overwrite;
        self
    }

    pub fn with_overwrite_definitions(mut self, definitions: BTreeMap<String, Value>) -> Self {
        self.overwrite_definitions = definitions;
        self
    }

    pub fn with_requested_output(mut self, output: impl Into<String>) -> Self {
        self.requested_output = Some(output.into());
        self
    }

    pub fn with_service(mut self, service: impl Into<String>) -> Self {
        self.service = Some(service.into());
        self
    }

    pub fn with_claim_mode(mut self, mode: ClaimMode) -> Self {
        self.claim_mode = mode;
        self
    }

    pub fn with_deadline(mut self, deadline: Deadline) -> Self {
        self.deadline = deadline;
        self
    }

    /// Cycle detection key: `law#output`, `*` for a full evaluation.
    pub fn chain_key(&self) -> String {
        format!(
            "{}#{}",
            self.law,
            self.requested_output.as_deref().unwrap_or("*")
        )
    }

    /// Request for a nested evaluation of `law.field`.
    ///
    /// Overwrites, claim mode and deadline carry over; definitions overrides
    /// are law-specific and do not.
    pub fn sub_request(
        &self,
        law: &str,
        reference_date: NaiveDate,
        parameters: BTreeMap<String, Value>,
        field: &str,
    ) -> Self {
        let mut call_chain = self.call_chain.clone();
        call_chain.push(self.chain_key());
        Self {
            law: law.to_string(),
            reference_date,
            parameters,
            overwrite_input: self.overwrite_input.clone(),
            overwrite_definitions: BTreeMap::new(),
            requested_output: Some(field.to_string()),
            service: None,
            claim_mode: self.claim_mode,
            deadline: self.deadline.clone(),
            call_chain,
        }
    }
}

/// Outcome of one law evaluation.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    /// Computed outputs; empty when required data was missing
    pub output: BTreeMap<String, Value>,
    pub requirements_met: bool,
    pub missing_required: bool,
    /// Every reference resolved at the top level of the evaluation
    pub input: BTreeMap<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<PathNode>,
    pub rulespec_uuid: String,
    pub law: String,
    pub reference_date: NaiveDate,
}

/// Contract for evaluating another law from inside an evaluation.
///
/// [`LawExecutionService`] is the production implementation; tests use
/// call-counting doubles.
pub trait LawEvaluator {
    fn evaluate_law(&self, request: &EvaluationRequest) -> Result<EvaluationResult>;
}

// =============================================================================
// Service
// =============================================================================

/// A built engine for one law version.
#[derive(Debug)]
pub enum Engine {
    Rules(RulesEngine),
    Nrml(NrmlEngine),
}

impl Engine {
    pub fn from_spec(spec: &Specification) -> Self {
        match spec {
            Specification::Rule(rule) => Engine::Rules(RulesEngine::new(rule.clone())),
            Specification::Nrml(doc) => Engine::Nrml(NrmlEngine::new(doc.clone())),
        }
    }

    pub fn evaluate(&self, request: &EvaluationRequest, env: EvaluationEnv<'_>) -> Result<EvaluationResult> {
        match self {
            Engine::Rules(engine) => engine.evaluate(request, env),
            Engine::Nrml(engine) => engine.evaluate(request, env),
        }
    }
}

type EngineKey = (String, NaiveDate, Option<String>);

/// Law evaluation service.
///
/// Engines are built on first use per `(law, reference_date, service)` and
/// shared read-only afterwards. Loading or unloading laws drops the cache.
/// Amendment files are read when an engine is built, so a cached engine is a
/// snapshot: call [`LawExecutionService::reload_amendments`] after adding or
/// editing amendment files on disk.
pub struct LawExecutionService {
    resolver: RuleResolver,
    sources: DataSourceRegistry,
    claims: Option<Box<dyn ClaimProvider>>,
    engines: RwLock<HashMap<EngineKey, Arc<Engine>>>,
}

impl Default for LawExecutionService {
    fn default() -> Self {
        Self::new()
    }
}

impl LawExecutionService {
    pub fn new() -> Self {
        Self {
            resolver: RuleResolver::new(),
            sources: DataSourceRegistry::new(),
            claims: None,
            engines: RwLock::new(HashMap::new()),
        }
    }

    /// Create a service with every specification under `dir` loaded.
    pub fn from_directory(dir: impl AsRef<Path>) -> Result<Self> {
        let mut service = Self::new();
        let count = service.resolver.load_from_directory(dir)?;
        tracing::info!(count, "Loaded law specifications");
        Ok(service)
    }

    /// Load a specification from YAML; returns the law name.
    pub fn load_law(&mut self, yaml: &str) -> Result<String> {
        let law = self.resolver.load_from_yaml(yaml)?;
        self.clear_engines();
        Ok(law)
    }

    /// Load a specification file; amendments next to it apply on lookup.
    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<String> {
        let law = self.resolver.load_file(path)?;
        self.clear_engines();
        Ok(law)
    }

    pub fn unload_law(&mut self, law: &str) -> bool {
        let removed = self.resolver.unload_law(law);
        if removed {
            self.clear_engines();
        }
        removed
    }

    pub fn list_laws(&self) -> Vec<&str> {
        self.resolver.list_laws()
    }

    pub fn law_count(&self) -> usize {
        self.resolver.law_count()
    }

    pub fn has_law(&self, law: &str) -> bool {
        self.resolver.has_law(law)
    }

    pub fn resolver(&self) -> &RuleResolver {
        &self.resolver
    }

    // -------------------------------------------------------------------------
    // Data sources and claims
    // -------------------------------------------------------------------------

    pub fn add_data_source(&mut self, source: Box<dyn DataSource>) {
        tracing::debug!(source = %source.name(), priority = source.priority(), "Adding data source");
        self.sources.add_source(source);
    }

    pub fn remove_data_source(&mut self, name: &str) -> bool {
        self.sources.remove_source(name)
    }

    pub fn clear_data_sources(&mut self) {
        self.sources.clear();
    }

    pub fn data_source_count(&self) -> usize {
        self.sources.source_count()
    }

    pub fn list_data_sources(&self) -> Vec<&str> {
        self.sources.list_sources()
    }

    pub fn data_registry(&self) -> &DataSourceRegistry {
        &self.sources
    }

    pub fn set_claim_provider(&mut self, claims: Box<dyn ClaimProvider>) {
        self.claims = Some(claims);
    }

    // -------------------------------------------------------------------------
    // Evaluation
    // -------------------------------------------------------------------------

    /// Evaluate a law for a request.
    ///
    /// # Returns
    /// * `Ok(EvaluationResult)` - including "requirements not met" verdicts
    /// * `Err(EngineError)` - when no version of the law applies, on cycles,
    ///   depth limits or an expired deadline
    pub fn evaluate(&self, request: &EvaluationRequest) -> Result<EvaluationResult> {
        self.evaluate_law(request)
    }

    /// Number of cached engines.
    pub fn engine_count(&self) -> usize {
        match self.engines.read() {
            Ok(engines) => engines.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Drop every cached engine so amendment files are read again on the
    /// next evaluation.
    pub fn reload_amendments(&self) {
        let mut engines = match self.engines.write() {
            Ok(engines) => engines,
            Err(poisoned) => poisoned.into_inner(),
        };
        tracing::debug!(engines = engines.len(), "Reloading amendments");
        engines.clear();
    }

    fn clear_engines(&mut self) {
        match self.engines.get_mut() {
            Ok(engines) => engines.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    fn engine_for(&self, request: &EvaluationRequest) -> Result<Arc<Engine>> {
        let key: EngineKey = (
            request.law.clone(),
            request.reference_date,
            request.service.clone(),
        );

        let cached = match self.engines.read() {
            Ok(engines) => engines.get(&key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
        };
        if let Some(engine) = cached {
            return Ok(engine);
        }

        let spec = self.resolver.get_rule_spec(
            &request.law,
            request.reference_date,
            request.service.as_deref(),
        )?;
        tracing::debug!(
            law = %request.law,
            reference_date = %request.reference_date,
            valid_from = %spec.valid_from(),
            "Building engine"
        );
        let engine = Arc::new(Engine::from_spec(&spec));

        let mut engines = match self.engines.write() {
            Ok(engines) => engines,
            Err(poisoned) => poisoned.into_inner(),
        };
        Ok(Arc::clone(engines.entry(key).or_insert(engine)))
    }
}

impl LawEvaluator for LawExecutionService {
    fn evaluate_law(&self, request: &EvaluationRequest) -> Result<EvaluationResult> {
        let key = request.chain_key();
        if request.call_chain.contains(&key) {
            let mut chain = request.call_chain.clone();
            chain.push(key);
            tracing::warn!(chain = ?chain, "Circular cross-law reference");
            return Err(EngineError::CircularReference(chain.join(" -> ")));
        }
        if request.call_chain.len() >= config::MAX_CROSS_LAW_DEPTH {
            return Err(EngineError::MaxDepthExceeded(format!(
                "cross-law depth {} reached at {}",
                config::MAX_CROSS_LAW_DEPTH,
                key
            )));
        }
        request.deadline.check()?;

        let engine = self.engine_for(request)?;
        let env = EvaluationEnv {
            sources: &self.sources,
            claims: self.claims.as_deref(),
            laws: self,
        };
        engine.evaluate(request, env)
    }
}

impl std::fmt::Debug for LawExecutionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LawExecutionService")
            .field("law_count", &self.resolver.law_count())
            .field("sources", &self.sources)
            .field("has_claims", &self.claims.is_some())
            .field("engine_count", &self.engine_count())
            .finish()
    }
}
