//! Error types for the rule evaluation engine
//!
//! Only structural problems surface as errors: an unknown law or version at the
//! top-level call, a malformed specification, a dependency cycle, an exhausted
//! depth or time budget. Missing data during evaluation is never an error; it
//! degrades to `None` or to the sticky missing-required flag instead.

use chrono::NaiveDate;
use thiserror::Error;

/// Main error type for engine operations
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to load a specification file or directory
    #[error("Failed to load rule specification: {0}")]
    LoadError(String),

    /// The resolver already holds the maximum number of specifications
    #[error("Maximum number of laws exceeded ({max} laws)")]
    TooManyLaws { max: usize },

    /// YAML parsing error
    #[error("YAML parse error: {0}")]
    YamlError(#[from] serde_yaml_ng::Error),

    /// JSON serialization error
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// No loaded specification carries this law (and service) name
    #[error("No rules found for law '{law}'{}", service_suffix(.service))]
    NoRulesForLaw {
        law: String,
        service: Option<String>,
    },

    /// Specifications exist, but none is valid at the reference date
    #[error("No valid version of law '{law}' at {reference_date}")]
    NoValidVersion {
        law: String,
        reference_date: NaiveDate,
    },

    /// Specification is structurally invalid
    #[error("Invalid specification: {0}")]
    InvalidSpec(String),

    /// Operation tree is malformed
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// Invalid date format
    #[error("Invalid date format: {0}")]
    InvalidDate(String),

    /// Amendment patch could not be applied
    #[error("Invalid patch: {0}")]
    InvalidPatch(String),

    /// Dependency cycle between actions or graph items
    #[error("Circular dependency between: {}", .0.join(", "))]
    CircularDependency(Vec<String>),

    /// A law (transitively) requested its own output
    #[error("Circular reference detected: {0}")]
    CircularReference(String),

    /// Recursion limit reached
    #[error("Maximum depth exceeded: {0}")]
    MaxDepthExceeded(String),

    /// Evaluation deadline passed
    #[error("Evaluation deadline exceeded")]
    DeadlineExceeded,

    /// Evaluation cancelled through its token
    #[error("Evaluation cancelled")]
    Cancelled,

    /// Requested output is not declared by the law
    #[error("Output '{output}' not found in law '{law}'")]
    OutputNotFound { law: String, output: String },

    /// Graph-dialect document error
    #[error("NRML error: {0}")]
    Nrml(String),
}

fn service_suffix(service: &Option<String>) -> String {
    service
        .as_ref()
        .map(|s| format!(" (service '{}')", s))
        .unwrap_or_default()
}

impl EngineError {
    /// Whether the error means "this law/version does not exist".
    ///
    /// Cross-law lookups downgrade these to an unresolved value; everything
    /// else keeps propagating.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            EngineError::NoRulesForLaw { .. }
                | EngineError::NoValidVersion { .. }
                | EngineError::OutputNotFound { .. }
        )
    }
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;
