//! Configuration constants for the rule evaluation engine
//!
//! Centralized limits used throughout the engine for:
//! - Resource constraints on loaded specifications
//! - Recursion depth limits (prevent stack overflow)
//! - File naming conventions for amendments
//!
//! Per-evaluation options (deadline, overrides, claim handling) live on
//! [`crate::service::EvaluationRequest`] instead.

/// Maximum number of specification files that can be indexed at once.
///
/// A full regulation tree holds a few hundred law versions; this leaves
/// ample room while still bounding memory use.
pub const MAX_LOADED_LAWS: usize = 1_000;

/// Maximum specification document size in bytes (1 MB).
///
/// Guards against YAML bombs. Typical law documents are 10-100 KB.
pub const MAX_YAML_SIZE: usize = 1_000_000;

/// Maximum number of elements a FOREACH may iterate over.
pub const MAX_ARRAY_SIZE: usize = 10_000;

/// Maximum nesting depth for operations during evaluation.
pub const MAX_OPERATION_DEPTH: usize = 100;

/// Maximum depth for cross-law evaluation chains.
///
/// Dutch regulations typically nest 3-5 levels
/// (Wet -> AMvB -> Ministeriele Regeling -> Gemeentelijke Verordening).
pub const MAX_CROSS_LAW_DEPTH: usize = 20;

/// Maximum recursion depth for dot notation property access.
pub const MAX_PROPERTY_DEPTH: usize = 32;

/// Maximum number of structural edits in a single amendment patch.
pub const MAX_PATCH_OPERATIONS: usize = 500;

/// Infix that marks a file as an amendment of `<stem>.yaml`:
/// `<stem>.amendment.<label>.yaml`.
pub const AMENDMENT_INFIX: &str = ".amendment.";

/// Date format used by specification files and parameters.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
