//! Amendment patches
//!
//! Retroactive corrections (for example from case law) are stored next to the
//! base specification as `<stem>.amendment.<label>.yaml`. Each file holds an
//! ordered list of structural edits addressed by JSON Pointer:
//!
//! ```yaml
//! operations:
//!   - op: replace
//!     path: /properties/definitions/DREMPELINKOMEN
//!     value: 2600000
//!   - op: remove
//!     path: /properties/actions/1
//! ```
//!
//! Patches are applied in lexicographic file name order. A patch is atomic:
//! it is applied to a copy of the document and only kept when every edit
//! succeeded. A failing patch is logged and skipped.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::config;
use crate::error::{EngineError, Result};
use crate::rule_spec::raw_from_file;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchOp {
    Add,
    Replace,
    Remove,
}

/// One structural edit.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PatchOperation {
    pub op: PatchOp,
    pub path: String,
    #[serde(default)]
    pub value: Option<serde_json::Value>,
}

/// An ordered, atomically applied list of edits.
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub label: String,
    pub operations: Vec<PatchOperation>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PatchDocument {
    Wrapped { operations: Vec<PatchOperation> },
    Bare(Vec<PatchOperation>),
}

impl Patch {
    /// Parse a patch document (`{operations: [...]}` or a bare list).
    pub fn from_raw(label: impl Into<String>, raw: serde_json::Value) -> Result<Self> {
        let label = label.into();
        let operations = match serde_json::from_value(raw)
            .map_err(|e| EngineError::InvalidPatch(format!("{}: {}", label, e)))?
        {
            PatchDocument::Wrapped { operations } | PatchDocument::Bare(operations) => operations,
        };
        if operations.len() > config::MAX_PATCH_OPERATIONS {
            return Err(EngineError::InvalidPatch(format!(
                "{}: {} operations exceeds maximum of {}",
                label,
                operations.len(),
                config::MAX_PATCH_OPERATIONS
            )));
        }
        Ok(Self { label, operations })
    }

    /// Load a patch file. The label is the part after the amendment infix.
    pub fn from_file(path: &Path) -> Result<Self> {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let label = file_name
            .split_once(config::AMENDMENT_INFIX)
            .map(|(_, rest)| rest.rsplit_once('.').map_or(rest, |(l, _)| l).to_string())
            .unwrap_or(file_name);
        Self::from_raw(label, raw_from_file(path)?)
    }

    /// Apply every edit to a copy of `doc`. Either all edits apply or `doc`
    /// is left untouched and an error is returned.
    pub fn apply(&self, doc: &serde_json::Value) -> Result<serde_json::Value> {
        let mut patched = doc.clone();
        for (index, operation) in self.operations.iter().enumerate() {
            apply_operation(&mut patched, operation).map_err(|reason| {
                EngineError::InvalidPatch(format!(
                    "{} operation {} ({:?} {}): {}",
                    self.label, index, operation.op, operation.path, reason
                ))
            })?;
        }
        Ok(patched)
    }
}

fn apply_operation(
    doc: &mut serde_json::Value,
    operation: &PatchOperation,
) -> std::result::Result<(), String> {
    let Some((parent_pointer, last)) = split_pointer(&operation.path)? else {
        return match operation.op {
            PatchOp::Remove => Err("cannot remove the document root".to_string()),
            PatchOp::Add | PatchOp::Replace => {
                *doc = required_value(operation)?;
                Ok(())
            }
        };
    };

    let parent = doc
        .pointer_mut(parent_pointer)
        .ok_or_else(|| format!("parent '{}' does not exist", parent_pointer))?;
    match (operation.op, parent) {
        (PatchOp::Add, serde_json::Value::Object(map)) => {
            map.insert(last, required_value(operation)?);
        }
        (PatchOp::Add, serde_json::Value::Array(items)) => {
            let index = if last == "-" {
                items.len()
            } else {
                array_index(&last, items.len() + 1)?
            };
            items.insert(index, required_value(operation)?);
        }
        (PatchOp::Replace, serde_json::Value::Object(map)) => {
            let slot = map
                .get_mut(&last)
                .ok_or_else(|| format!("key '{}' does not exist", last))?;
            *slot = required_value(operation)?;
        }
        (PatchOp::Replace, serde_json::Value::Array(items)) => {
            let index = array_index(&last, items.len())?;
            items[index] = required_value(operation)?;
        }
        (PatchOp::Remove, serde_json::Value::Object(map)) => {
            map.remove(&last)
                .ok_or_else(|| format!("key '{}' does not exist", last))?;
        }
        (PatchOp::Remove, serde_json::Value::Array(items)) => {
            let index = array_index(&last, items.len())?;
            items.remove(index);
        }
        (_, other) => {
            return Err(format!("parent is not a container but {}", type_name(other)));
        }
    }
    Ok(())
}

fn required_value(operation: &PatchOperation) -> std::result::Result<serde_json::Value, String> {
    operation
        .value
        .clone()
        .ok_or_else(|| "operation requires a value".to_string())
}

/// Split a JSON Pointer into the pointer of its parent and the unescaped last
/// token. `None` addresses the document root.
fn split_pointer(pointer: &str) -> std::result::Result<Option<(&str, String)>, String> {
    if pointer.is_empty() {
        return Ok(None);
    }
    if !pointer.starts_with('/') {
        return Err(format!("pointer '{}' must start with '/'", pointer));
    }
    let (parent, last) = pointer.rsplit_once('/').unwrap_or(("", pointer));
    Ok(Some((parent, last.replace("~1", "/").replace("~0", "~"))))
}

/// Parse an array index that must be below `bound`.
fn array_index(token: &str, bound: usize) -> std::result::Result<usize, String> {
    // Leading zeros are not valid array indices
    if token.len() > 1 && token.starts_with('0') {
        return Err(format!("invalid array index '{}'", token));
    }
    let index: usize = token
        .parse()
        .map_err(|_| format!("invalid array index '{}'", token))?;
    if index >= bound {
        return Err(format!("array index {} out of bounds", index));
    }
    Ok(index)
}

fn type_name(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}

// =============================================================================
// Discovery and application
// =============================================================================

/// Whether a file name marks an amendment rather than a base specification.
pub fn is_amendment_file(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| name.to_string_lossy().contains(config::AMENDMENT_INFIX))
}

/// Amendment files for `base`, in lexicographic file name order.
pub fn discover_amendments(base: &Path) -> Vec<PathBuf> {
    let (Some(dir), Some(stem)) = (base.parent(), base.file_stem()) else {
        return Vec::new();
    };
    let prefix = format!("{}{}", stem.to_string_lossy(), config::AMENDMENT_INFIX);

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            tracing::warn!(dir = %dir.display(), error = %e, "Cannot list amendment directory");
            return Vec::new();
        }
    };

    let mut found: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.file_name().is_some_and(|n| n.to_string_lossy().starts_with(&prefix))
                && path
                    .extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml" || ext == "json")
        })
        .collect();
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    found
}

/// Apply patches in order, skipping (and logging) every patch that fails.
///
/// `validate` is run on each patched document; a patch whose result does not
/// validate counts as failed. Returns the patched document and the labels of
/// the patches that applied.
pub fn apply_patches(
    doc: serde_json::Value,
    patches: impl IntoIterator<Item = Result<Patch>>,
    validate: impl Fn(&serde_json::Value) -> Result<()>,
) -> (serde_json::Value, Vec<String>) {
    let mut current = doc;
    let mut applied = Vec::new();
    for patch in patches {
        let result = patch.and_then(|p| {
            let patched = p.apply(&current)?;
            validate(&patched)?;
            Ok((p.label, patched))
        });
        match result {
            Ok((label, patched)) => {
                tracing::debug!(patch = %label, "Applied amendment");
                current = patched;
                applied.push(label);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping amendment that failed to apply");
            }
        }
    }
    (current, applied)
}
