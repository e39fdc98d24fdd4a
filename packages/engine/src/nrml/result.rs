//! Per-item evaluation results

use crate::trace::PathNode;
use crate::types::{PathNodeType, Value};

/// Outcome of evaluating one item or sub-expression.
///
/// A failed result is data, not an error: it travels up to the items that
/// depend on it and finally marks the output as missing.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemResult {
    pub success: bool,
    pub value: Value,
    pub error: Option<String>,
    /// What was done, for the audit trail
    pub action: String,
    /// Evaluator that produced the result
    pub source: &'static str,
    pub dependencies: Vec<ItemResult>,
}

impl ItemResult {
    pub fn ok(value: Value, source: &'static str, action: impl Into<String>) -> Self {
        Self {
            success: true,
            value,
            error: None,
            action: action.into(),
            source,
            dependencies: Vec::new(),
        }
    }

    pub fn failed(source: &'static str, error: impl Into<String>) -> Self {
        let error = error.into();
        Self {
            success: false,
            value: Value::Null,
            action: error.clone(),
            error: Some(error),
            source,
            dependencies: Vec::new(),
        }
    }

    pub fn with_dependencies(mut self, dependencies: Vec<ItemResult>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Wraps another result, keeping its verdict.
    pub fn nested(inner: ItemResult, source: &'static str, action: impl Into<String>) -> Self {
        Self {
            success: inner.success,
            value: inner.value.clone(),
            error: inner.error.clone(),
            action: action.into(),
            source,
            dependencies: vec![inner],
        }
    }

    pub fn to_path_node(&self) -> PathNode {
        let mut node = PathNode::new(PathNodeType::Item, self.source)
            .with_result(self.value.clone())
            .with_detail("success", self.success)
            .with_detail("action", self.action.as_str());
        if let Some(error) = &self.error {
            node = node.with_detail("error", error.as_str());
        }
        for dependency in &self.dependencies {
            node = node.with_child(dependency.to_path_node());
        }
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nested_keeps_verdict() {
        let inner = ItemResult::failed("ArgumentResolver", "no value for #/facts/a/items/b");
        let outer = ItemResult::nested(inner, "TypeDefinition", "resolved through target");
        assert!(!outer.success);
        assert_eq!(outer.error.as_deref(), Some("no value for #/facts/a/items/b"));
        assert_eq!(outer.dependencies.len(), 1);
    }

    #[test]
    fn test_path_node() {
        let result = ItemResult::ok(Value::Int(2), "Arithmetic", "add")
            .with_dependencies(vec![ItemResult::ok(Value::Int(1), "Literal", "literal")]);
        let node = result.to_path_node();
        assert_eq!(node.node_type, PathNodeType::Item);
        assert_eq!(node.result, Some(Value::Int(2)));
        assert_eq!(node.children.len(), 1);
        assert_eq!(node.details["success"], Value::Bool(true));
    }
}
