//! Evaluation tracing for audit trails
//!
//! Every evaluation records the path it took: each resolved reference, each
//! operation, each action and each cross-law call becomes a [`PathNode`]. The
//! tree is used to explain a decision and to link an output back to the
//! legal clause that produced it.
//!
//! Nodes are recorded with a stack-based [`TraceBuilder`]. Code that enters a
//! node uses a [`TraceScope`] guard so the node is popped on every exit path,
//! including early returns through `?`.
//!
//! # Example
//!
//! ```ignore
//! use regelrecht_machine::trace::{TraceBuilder, TraceScope, Traced};
//! use regelrecht_machine::types::{PathNodeType, Value};
//!
//! let mut builder = TraceBuilder::new();
//! {
//!     let mut scope = TraceScope::enter(&mut builder, "inkomen", PathNodeType::Resolve);
//!     scope.trace_mut().set_result(Value::Int(50000));
//! } // popped here
//! let trace = builder.build();
//! ```

use crate::types::{PathNodeType, ResolveType, Value};
use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::{Deref, DerefMut};
use std::time::Instant;

/// A node in the evaluation trace tree.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PathNode {
    /// Type of this evaluation step
    pub node_type: PathNodeType,

    /// Name of the step (reference, operation kind, output name, ...)
    pub name: String,

    /// The result value produced by this step, if any
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,

    /// For resolve nodes, which layer supplied the value
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolve_type: Option<ResolveType>,

    /// Extra attributes (law, reference date, error message, ...)
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,

    /// Child nodes representing nested steps
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<PathNode>,

    /// Duration in microseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_us: Option<u64>,
}

impl PathNode {
    pub fn new(node_type: PathNodeType, name: impl Into<String>) -> Self {
        Self {
            node_type,
            name: name.into(),
            result: None,
            resolve_type: None,
            details: BTreeMap::new(),
            children: Vec::new(),
            duration_us: None,
        }
    }

    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_resolve_type(mut self, resolve_type: ResolveType) -> Self {
        self.resolve_type = Some(resolve_type);
        self
    }

    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    pub fn with_child(mut self, child: PathNode) -> Self {
        self.children.push(child);
        self
    }

    /// Collect the values that came from outside the law: source lookups,
    /// injected values, claims and cross-law results, keyed by reference.
    ///
    /// Nested cross-law traces are included; when the same reference is
    /// resolved more than once the first resolution wins.
    pub fn extract_value_tree(&self) -> BTreeMap<String, Value> {
        let mut values = BTreeMap::new();
        self.collect_external_values(&mut values);
        values
    }

    fn collect_external_values(&self, values: &mut BTreeMap<String, Value>) {
        if self.node_type == PathNodeType::Resolve {
            if let (Some(resolve_type), Some(result)) = (self.resolve_type, &self.result) {
                let external = matches!(
                    resolve_type,
                    ResolveType::Source
                        | ResolveType::SourceOverride
                        | ResolveType::Overwrite
                        | ResolveType::Claim
                        | ResolveType::Service
                );
                if external {
                    values
                        .entry(self.name.clone())
                        .or_insert_with(|| result.clone());
                }
            }
        }
        for child in &self.children {
            child.collect_external_values(values);
        }
    }

    /// Render the trace as a human-readable tree string.
    ///
    /// ```text
    /// zorgtoeslagwet (evaluation)
    /// +-- requirements (requirement) = true
    /// `-- hoogte_toeslag (action) = 154772
    ///     `-- MAX (operation) = 154772
    /// ```
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        self.render_into(&mut lines, "", "");
        lines.join("\n")
    }

    fn render_into(&self, lines: &mut Vec<String>, prefix: &str, child_prefix: &str) {
        let mut line = format!("{}{} ({})", prefix, self.name, self.node_type.as_str());
        if let Some(rt) = self.resolve_type {
            line.push_str(&format!(" [{}]", rt.as_str()));
        }
        if let Some(result) = &self.result {
            line.push_str(&format!(" = {}", format_value_compact(result)));
        }
        lines.push(line);

        let count = self.children.len();
        for (i, child) in self.children.iter().enumerate() {
            let last = i + 1 == count;
            let (branch, continuation) = if last {
                ("`-- ", "    ")
            } else {
                ("+-- ", "|   ")
            };
            child.render_into(
                lines,
                &format!("{}{}", child_prefix, branch),
                &format!("{}{}", child_prefix, continuation),
            );
        }
    }

    /// Render the node as a compact single-line summary.
    pub fn render_compact(&self) -> String {
        let result_str = self
            .result
            .as_ref()
            .map(|v| format!("={}", format_value_compact(v)))
            .unwrap_or_default();
        format!("{}:{}{}", self.node_type.as_str(), self.name, result_str)
    }
}

/// Format a Value compactly for trace output.
fn format_value_compact(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => {
            if f.fract() == 0.0 {
                format!("{:.1}", f)
            } else {
                format!("{:.4}", f)
            }
        }
        Value::Date(d) => d.to_string(),
        Value::String(s) => {
            if s.chars().count() > 20 {
                let head: String = s.chars().take(17).collect();
                format!("\"{}...\"", head)
            } else {
                format!("\"{}\"", s)
            }
        }
        Value::Array(arr) => {
            if arr.len() <= 3 {
                let items: Vec<String> = arr.iter().map(format_value_compact).collect();
                format!("[{}]", items.join(", "))
            } else {
                format!("[{} items]", arr.len())
            }
        }
        Value::Object(obj) => format!("{{...{} keys}}", obj.len()),
    }
}

/// A node being built, with timing information.
#[derive(Debug)]
struct BuildingNode {
    node: PathNode,
    start_time: Instant,
}

/// Builder for evaluation traces using a stack of open nodes.
#[derive(Debug)]
pub struct TraceBuilder {
    /// Stack of nodes being built (last is current)
    stack: Vec<BuildingNode>,
    /// Completed top-level nodes
    roots: Vec<PathNode>,
    enabled: bool,
}

impl Default for TraceBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceBuilder {
    pub fn new() -> Self {
        Self {
            stack: Vec::new(),
            roots: Vec::new(),
            enabled: true,
        }
    }

    /// A builder that records nothing.
    pub fn disabled() -> Self {
        Self {
            stack: Vec::new(),
            roots: Vec::new(),
            enabled: false,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Open a new node as child of the current one.
    pub fn push(&mut self, name: impl Into<String>, node_type: PathNodeType) {
        if !self.enabled {
            return;
        }
        self.stack.push(BuildingNode {
            node: PathNode::new(node_type, name),
            start_time: Instant::now(),
        });
    }

    pub fn set_result(&mut self, result: Value) {
        if let Some(current) = self.stack.last_mut() {
            current.node.result = Some(result);
        }
    }

    pub fn set_resolve_type(&mut self, resolve_type: ResolveType) {
        if let Some(current) = self.stack.last_mut() {
            current.node.resolve_type = Some(resolve_type);
        }
    }

    pub fn set_detail(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        if let Some(current) = self.stack.last_mut() {
            current.node.details.insert(key.into(), value.into());
        }
    }

    /// Attach an already completed subtree (e.g. a cross-law trace) to the
    /// current node.
    pub fn attach(&mut self, child: PathNode) {
        if !self.enabled {
            return;
        }
        match self.stack.last_mut() {
            Some(current) => current.node.children.push(child),
            None => self.roots.push(child),
        }
    }

    /// Close the current node and move it into its parent.
    pub fn pop(&mut self) {
        let Some(building) = self.stack.pop() else {
            return;
        };
        let mut completed = building.node;
        completed.duration_us = Some(building.start_time.elapsed().as_micros() as u64);

        match self.stack.last_mut() {
            Some(parent) => parent.node.children.push(completed),
            None => self.roots.push(completed),
        }
    }

    /// Close all open nodes and return the last completed root.
    pub fn build(mut self) -> Option<PathNode> {
        while !self.stack.is_empty() {
            self.pop();
        }
        self.roots.pop()
    }

    /// Current number of open nodes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

/// Anything that carries a trace builder.
pub trait Traced {
    fn trace_mut(&mut self) -> &mut TraceBuilder;
}

impl Traced for TraceBuilder {
    fn trace_mut(&mut self) -> &mut TraceBuilder {
        self
    }
}

/// Scope guard: pushes a node on creation and pops it on drop.
///
/// Derefs to the wrapped value so the evaluation can continue through the
/// guard while the node is open.
pub struct TraceScope<'a, T: Traced + ?Sized> {
    inner: &'a mut T,
}

impl<'a, T: Traced + ?Sized> TraceScope<'a, T> {
    pub fn enter(inner: &'a mut T, name: impl Into<String>, node_type: PathNodeType) -> Self {
        inner.trace_mut().push(name, node_type);
        Self { inner }
    }
}

impl<T: Traced + ?Sized> Deref for TraceScope<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.inner
    }
}

impl<T: Traced + ?Sized> DerefMut for TraceScope<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.inner
    }
}

impl<T: Traced + ?Sized> Drop for TraceScope<'_, T> {
    fn drop(&mut self) {
        self.inner.trace_mut().pop();
    }
}
