//! RegelRecht Machine
//!
//! A rule engine for machine-readable Dutch law specifications.
//! This library provides functionality for:
//! - Loading law specifications (YAML) with temporal versions and amendments
//! - Evaluating rule-dialect laws: requirements, actions and operation trees
//! - Evaluating NRML laws: dependency-ordered fact items
//! - Cross-law references, data sources, claims and audit traces
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::{EvaluationRequest, LawExecutionService, Value};
//!
//! let service = LawExecutionService::from_directory("./regulation/nl")?;
//! let request = EvaluationRequest::new("zorgtoeslagwet", date)
//!     .with_parameter("BSN", "999993653")
//!     .with_requested_output("hoogte_toeslag");
//!
//! let result = service.evaluate(&request)?;
//! println!("{:?}", result.output);
//! ```

pub mod ast;
pub mod claims;
pub mod config;
pub mod context;
pub mod data_source;
pub mod deadline;
pub mod engine;
pub mod error;
pub mod graph;
pub mod nrml;
pub mod operations;
pub mod patch;
pub mod resolver;
pub mod rule_spec;
pub mod service;
pub mod trace;
pub mod type_spec;
pub mod types;

// Re-export commonly used items
pub use ast::{AggregateOp, CompareOp, Expr};
pub use claims::{Claim, ClaimMode, ClaimProvider, ClaimStatus, InMemoryClaims};
pub use context::{EvaluationContext, EvaluationEnv};
pub use data_source::{DataSource, DataSourceRegistry, Row, TableDataSource};
pub use deadline::Deadline;
pub use engine::RulesEngine;
pub use error::{EngineError, Result};
pub use graph::DependencyGraph;
pub use nrml::{NrmlDocument, NrmlEngine};
pub use operations::ValueResolver;
pub use patch::{Patch, PatchOp, PatchOperation};
pub use resolver::RuleResolver;
pub use rule_spec::{RuleSpec, Specification};
pub use service::{
    Engine, EvaluationRequest, EvaluationResult, LawEvaluator, LawExecutionService,
};
pub use trace::{PathNode, TraceBuilder};
pub use type_spec::TypeSpec;
pub use types::{PathNodeType, ResolveType, Value};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
